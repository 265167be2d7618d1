//! Write batches
//!
//! An ordered group of puts and deletes that is logged as one WAL record and
//! applied to the memtable under a single lock, so readers see either all of
//! it or none of it.

use crate::wal::Operation;

/// Ordered list of mutations applied atomically by `write`.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    operations: Vec<Operation>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a put
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.operations.push(Operation::Put {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Queue a delete (tombstone)
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) -> &mut Self {
        self.operations.push(Operation::Delete { key: key.into() });
        self
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn clear(&mut self) {
        self.operations.clear();
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }
}

impl From<Vec<Operation>> for WriteBatch {
    fn from(operations: Vec<Operation>) -> Self {
        Self { operations }
    }
}
