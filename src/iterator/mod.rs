//! Iterator Module
//!
//! Ordered traversal over everything visible in the store: the active and
//! frozen memtables plus all live segments, merged so that each key appears
//! once with its newest value and deleted keys are hidden.
//!
//! ## Snapshot semantics
//! A [`Cursor`] captures a [`ReadView`] when it is created: copies of the
//! memtables and `Arc`s of the segment readers. Writes made afterwards are
//! not visible through it, and segments it references stay on disk until
//! the cursor is dropped, even if a compaction replaces them.

mod merge;

use std::sync::Arc;

pub use merge::{EntrySource, MergeIterator};

use crate::error::Result;
use crate::storage::{SegmentIterator, SegmentReader};
use crate::types::Entry;
use crate::StrataError;

/// Traversal order of a cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Ascending byte-wise key order
    #[default]
    Forward,
    /// Descending byte-wise key order
    Reverse,
}

impl Direction {
    pub fn reverse(self) -> Self {
        match self {
            Direction::Forward => Direction::Reverse,
            Direction::Reverse => Direction::Forward,
        }
    }
}

// =============================================================================
// Read View
// =============================================================================

/// Frozen picture of the store at one instant
///
/// Both lists are ordered newest first.
pub struct ReadView {
    /// Memtable contents in ascending key order
    buffers: Vec<Arc<[Entry]>>,
    segments: Vec<Arc<SegmentReader>>,
}

impl ReadView {
    pub fn new(buffers: Vec<Arc<[Entry]>>, segments: Vec<Arc<SegmentReader>>) -> Self {
        Self { buffers, segments }
    }

    /// One source per buffer and segment, positioned per `from`
    fn sources(&self, direction: Direction, from: Option<&[u8]>) -> Result<Vec<EntrySource>> {
        let mut sources: Vec<EntrySource> = Vec::with_capacity(self.buffers.len() + self.segments.len());

        for buffer in &self.buffers {
            sources.push(Box::new(BufferIter::new(Arc::clone(buffer), direction, from)));
        }
        for segment in &self.segments {
            sources.push(Box::new(SegmentIterator::new(Arc::clone(segment), direction, from)?));
        }
        Ok(sources)
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }
}

/// Iterator over a sorted in-memory buffer
struct BufferIter {
    entries: Arc<[Entry]>,
    direction: Direction,
    next: Option<usize>,
}

impl BufferIter {
    fn new(entries: Arc<[Entry]>, direction: Direction, from: Option<&[u8]>) -> Self {
        let next = match direction {
            Direction::Forward => {
                let start = from.map_or(0, |k| entries.partition_point(|e| e.key.as_slice() < k));
                (start < entries.len()).then_some(start)
            }
            Direction::Reverse => {
                let upto = from.map_or(entries.len(), |k| {
                    entries.partition_point(|e| e.key.as_slice() <= k)
                });
                upto.checked_sub(1)
            }
        };
        Self {
            entries,
            direction,
            next,
        }
    }
}

impl Iterator for BufferIter {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        let pos = self.next?;
        self.next = match self.direction {
            Direction::Forward => Some(pos + 1).filter(|&p| p < self.entries.len()),
            Direction::Reverse => pos.checked_sub(1),
        };
        Some(Ok(self.entries[pos].clone()))
    }
}

// =============================================================================
// Cursor
// =============================================================================

/// Positional, ordered iterator over `(key, value)` pairs
///
/// Yields live pairs only, each key once. The cursor can be repositioned
/// with [`seek_to_first`](Cursor::seek_to_first),
/// [`seek_to_last`](Cursor::seek_to_last) and [`seek`](Cursor::seek);
/// iteration continues from the new position. After
/// [`close`](Cursor::close) every operation fails with `InvalidState`.
pub struct Cursor {
    view: Option<Arc<ReadView>>,
    merge: Option<MergeIterator>,
    direction: Direction,
}

impl Cursor {
    /// Open a cursor over `view`, positioned at the first key in `direction`
    pub fn new(view: Arc<ReadView>, direction: Direction) -> Result<Self> {
        let mut cursor = Self {
            view: Some(view),
            merge: None,
            direction,
        };
        cursor.position(None)?;
        Ok(cursor)
    }

    fn position(&mut self, from: Option<&[u8]>) -> Result<()> {
        let view = self.view.as_ref().ok_or_else(closed)?;
        let sources = view.sources(self.direction, from)?;
        self.merge = Some(MergeIterator::new(sources, self.direction, false)?);
        Ok(())
    }

    /// Restart at the smallest key, iterating forward
    pub fn seek_to_first(&mut self) -> Result<()> {
        self.direction = Direction::Forward;
        self.position(None)
    }

    /// Restart at the largest key, iterating in reverse
    pub fn seek_to_last(&mut self) -> Result<()> {
        self.direction = Direction::Reverse;
        self.position(None)
    }

    /// Position at `key` in the current direction: the first key `>= key`
    /// going forward, the last key `<= key` in reverse.
    pub fn seek(&mut self, key: &[u8]) -> Result<()> {
        self.position(Some(key))
    }

    /// Next live pair, `Ok(None)` when exhausted
    pub fn next_entry(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        if self.view.is_none() {
            return Err(closed());
        }
        let Some(merge) = self.merge.as_mut() else {
            return Ok(None);
        };

        loop {
            match merge.next_entry() {
                Ok(Some(Entry {
                    key,
                    value: Some(value),
                    ..
                })) => return Ok(Some((key, value))),
                Ok(Some(_)) => continue,
                Ok(None) => {
                    self.merge = None;
                    return Ok(None);
                }
                Err(e) => {
                    self.merge = None;
                    return Err(e);
                }
            }
        }
    }

    /// Release the snapshot. Idempotent.
    pub fn close(&mut self) {
        self.merge = None;
        self.view = None;
    }

    pub fn is_closed(&self) -> bool {
        self.view.is_none()
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Project onto values only
    pub fn values(self) -> Values {
        Values(self)
    }

    /// Project onto keys only
    pub fn keys(self) -> Keys {
        Keys(self)
    }
}

impl Iterator for Cursor {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}

fn closed() -> StrataError {
    StrataError::InvalidState("cursor is closed".into())
}

/// Values of a [`Cursor`], in cursor order
pub struct Values(Cursor);

impl Values {
    pub fn cursor(&mut self) -> &mut Cursor {
        &mut self.0
    }
}

impl Iterator for Values {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|r| r.map(|(_, v)| v))
    }
}

/// Keys of a [`Cursor`], in cursor order
pub struct Keys(Cursor);

impl Keys {
    pub fn cursor(&mut self) -> &mut Cursor {
        &mut self.0
    }
}

impl Iterator for Keys {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|r| r.map(|(k, _)| k))
    }
}
