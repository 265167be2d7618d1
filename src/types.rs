//! Shared entry types
//!
//! Every layer (memtable, segments, merge iterator) speaks in terms of
//! [`Entry`]: a key, the sequence number that wrote it, and either a value
//! or a tombstone.

/// Sequence number assigned to every accepted mutation.
pub type SeqNum = u64;

/// A versioned key-value record. `value == None` is a tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub seq: SeqNum,
    pub value: Option<Vec<u8>>,
}

impl Entry {
    /// Create a live entry
    pub fn value(key: impl Into<Vec<u8>>, seq: SeqNum, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            seq,
            value: Some(value.into()),
        }
    }

    /// Create a tombstone entry
    pub fn tombstone(key: impl Into<Vec<u8>>, seq: SeqNum) -> Self {
        Self {
            key: key.into(),
            seq,
            value: None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// Approximate in-memory footprint, used for flush triggers.
    pub(crate) fn approximate_size(key: &[u8], value: Option<&[u8]>) -> usize {
        // key + value + seq + map node overhead estimate
        key.len() + value.map_or(0, <[u8]>::len) + 8 + 16
    }
}
