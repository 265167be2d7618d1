//! K-way merge over sorted entry sources
//!
//! Used for cursors (memtables + segments) and for compaction (segments).
//! Sources are ordered by priority: index 0 = newest, higher = older.
//!
//! Ordering guarantee: entries come out in key order for the chosen
//! direction, and only the newest version of each key is yielded.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::Result;
use crate::types::Entry;

use super::Direction;

/// A sorted stream of entries, each key at most once
pub type EntrySource = Box<dyn Iterator<Item = Result<Entry>> + Send>;

/// Head of one source inside the heap
struct HeapItem {
    entry: Entry,
    source: usize,
    direction: Direction,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    /// `BinaryHeap` is a max-heap: the item that should come out first
    /// compares greatest.
    fn cmp(&self, other: &Self) -> Ordering {
        let by_key = match self.direction {
            Direction::Forward => other.entry.key.cmp(&self.entry.key),
            Direction::Reverse => self.entry.key.cmp(&other.entry.key),
        };
        by_key
            .then_with(|| self.entry.seq.cmp(&other.entry.seq))
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Merges multiple sorted sources into one deduplicated stream
pub struct MergeIterator {
    sources: Vec<EntrySource>,
    heap: BinaryHeap<HeapItem>,
    direction: Direction,
    /// Yield tombstones instead of hiding them (compaction needs them)
    keep_tombstones: bool,
}

impl MergeIterator {
    /// Build the initial heap from the first entry of every source.
    pub fn new(sources: Vec<EntrySource>, direction: Direction, keep_tombstones: bool) -> Result<Self> {
        let mut merge = Self {
            sources,
            heap: BinaryHeap::new(),
            direction,
            keep_tombstones,
        };
        for source in 0..merge.sources.len() {
            merge.advance(source)?;
        }
        Ok(merge)
    }

    /// Pull the next entry of `source` into the heap
    fn advance(&mut self, source: usize) -> Result<()> {
        if let Some(next) = self.sources[source].next() {
            self.heap.push(HeapItem {
                entry: next?,
                source,
                direction: self.direction,
            });
        }
        Ok(())
    }

    /// Next winning entry, or `None` once every source is exhausted
    pub fn next_entry(&mut self) -> Result<Option<Entry>> {
        while let Some(top) = self.heap.pop() {
            self.advance(top.source)?;

            // Older versions of the same key lose
            while let Some(shadowed) = self.heap.peek() {
                if shadowed.entry.key != top.entry.key {
                    break;
                }
                let source = shadowed.source;
                self.heap.pop();
                self.advance(source)?;
            }

            if top.entry.is_tombstone() && !self.keep_tombstones {
                continue;
            }
            return Ok(Some(top.entry));
        }
        Ok(None)
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }
}

impl Iterator for MergeIterator {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}
