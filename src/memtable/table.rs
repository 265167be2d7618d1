//! MemTable implementation
//!
//! BTreeMap-based memtable with RwLock for concurrency.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::iterator::Direction;
use crate::types::{Entry, SeqNum};
use crate::wal::Operation;

/// Value stored per key: the winning sequence number and value (None = tombstone)
#[derive(Debug, Clone)]
struct Versioned {
    seq: SeqNum,
    value: Option<Vec<u8>>,
}

/// In-memory table for recent writes
pub struct MemTable {
    /// Sorted map of key -> newest version
    data: RwLock<BTreeMap<Vec<u8>, Versioned>>,
    /// Approximate size in bytes
    size: AtomicUsize,
    /// Lowest / highest sequence number ever applied (0 = none yet)
    min_seq: AtomicU64,
    max_seq: AtomicU64,
}

impl MemTable {
    /// Create a new empty MemTable
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            size: AtomicUsize::new(0),
            min_seq: AtomicU64::new(0),
            max_seq: AtomicU64::new(0),
        }
    }

    /// Get the newest entry for `key`, tombstones included
    pub fn get(&self, key: &[u8]) -> Option<Entry> {
        let data = self.data.read();
        data.get(key).map(|v| Entry {
            key: key.to_vec(),
            seq: v.seq,
            value: v.value.clone(),
        })
    }

    /// Insert a value or tombstone written at `seq`.
    ///
    /// Only replaces an existing entry with a lower sequence number; returns
    /// whether the entry was applied.
    pub fn insert(&self, key: Vec<u8>, value: Option<Vec<u8>>, seq: SeqNum) -> bool {
        let mut data = self.data.write();
        self.insert_locked(&mut data, key, value, seq)
    }

    /// Apply a logged record: operation `i` gets sequence `first_seq + i`.
    ///
    /// The whole record is applied under one write lock, so readers observe
    /// all of it or none of it. Returns the new approximate size.
    pub fn apply(&self, first_seq: SeqNum, operations: &[Operation]) -> usize {
        let mut data = self.data.write();
        for (i, op) in operations.iter().enumerate() {
            let value = op.value().map(<[u8]>::to_vec);
            self.insert_locked(&mut data, op.key().to_vec(), value, first_seq + i as u64);
        }
        self.size()
    }

    fn insert_locked(
        &self,
        data: &mut BTreeMap<Vec<u8>, Versioned>,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
        seq: SeqNum,
    ) -> bool {
        if let Some(existing) = data.get(&key) {
            if existing.seq >= seq {
                return false;
            }
            let old_size = Entry::approximate_size(&key, existing.value.as_deref());
            self.size.fetch_sub(old_size, Ordering::Relaxed);
        }
        self.size
            .fetch_add(Entry::approximate_size(&key, value.as_deref()), Ordering::Relaxed);
        self.track_seq(seq);

        data.insert(key, Versioned { seq, value });
        true
    }

    fn track_seq(&self, seq: SeqNum) {
        self.max_seq.fetch_max(seq, Ordering::Relaxed);
        let _ = self
            .min_seq
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                (current == 0 || seq < current).then_some(seq)
            });
    }

    /// Point-in-time copy of all entries in `direction` order.
    ///
    /// Every call yields a fresh, independent sequence.
    pub fn scan(&self, direction: Direction) -> Vec<Entry> {
        let data = self.data.read();
        let to_entry = |(k, v): (&Vec<u8>, &Versioned)| Entry {
            key: k.clone(),
            seq: v.seq,
            value: v.value.clone(),
        };
        match direction {
            Direction::Forward => data.iter().map(to_entry).collect(),
            Direction::Reverse => data.iter().rev().map(to_entry).collect(),
        }
    }

    /// All entries in ascending key order (for flush)
    pub fn entries(&self) -> Vec<Entry> {
        self.scan(Direction::Forward)
    }

    /// Get approximate size in bytes
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Get entry count (tombstones included)
    pub fn entry_count(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Check if should flush (size >= limit)
    pub fn should_flush(&self, size_limit: usize) -> bool {
        self.size() >= size_limit
    }

    /// Range of sequence numbers applied so far, `None` when empty
    pub fn seq_span(&self) -> Option<(SeqNum, SeqNum)> {
        match self.max_seq.load(Ordering::Relaxed) {
            0 => None,
            max => Some((self.min_seq.load(Ordering::Relaxed), max)),
        }
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}
