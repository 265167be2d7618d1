//! Segment Iterator
//!
//! Lazy, ordered iteration over a segment in either direction.

use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::sync::Arc;

use crate::error::Result;
use crate::iterator::Direction;
use crate::types::Entry;

use super::{decode_entry, SegmentReader};

/// Iterator over segment entries in key order (or reverse key order)
///
/// Owns its own file handle and an `Arc` of the reader, so the segment file
/// stays in place while the iterator is alive even if a compaction
/// supersedes it.
pub struct SegmentIterator {
    segment: Arc<SegmentReader>,
    file: BufReader<File>,
    direction: Direction,
    /// Index position of the next entry to yield; `None` once exhausted
    next: Option<usize>,
    /// Current file position, to skip redundant seeks on sequential reads
    file_pos: Option<u64>,
}

impl SegmentIterator {
    /// Position on the first entry in `direction` order, or, with `from`,
    /// on the first key `>= from` (forward) / last key `<= from` (reverse).
    pub fn new(segment: Arc<SegmentReader>, direction: Direction, from: Option<&[u8]>) -> Result<Self> {
        let file = BufReader::new(File::open(segment.path())?);
        let index = &segment.index;

        let next = match direction {
            Direction::Forward => {
                let start = from.map_or(0, |k| index.partition_point(|(key, _)| key.as_slice() < k));
                (start < index.len()).then_some(start)
            }
            Direction::Reverse => {
                let upto = from.map_or(index.len(), |k| {
                    index.partition_point(|(key, _)| key.as_slice() <= k)
                });
                upto.checked_sub(1)
            }
        };

        Ok(Self {
            segment,
            file,
            direction,
            next,
            file_pos: None,
        })
    }

    pub fn segment(&self) -> &Arc<SegmentReader> {
        &self.segment
    }

    fn read_at(&mut self, offset: u64) -> Result<Entry> {
        if self.file_pos != Some(offset) {
            self.file.seek(SeekFrom::Start(offset))?;
        }
        let (entry, len) = decode_entry(&mut self.file)?;
        self.file_pos = Some(offset + len);
        Ok(entry)
    }
}

impl Iterator for SegmentIterator {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        let pos = self.next?;
        let offset = self.segment.index[pos].1;

        self.next = match self.direction {
            Direction::Forward => Some(pos + 1).filter(|&p| p < self.segment.index.len()),
            Direction::Reverse => pos.checked_sub(1),
        };

        match self.read_at(offset) {
            Ok(entry) => Some(Ok(entry)),
            Err(e) => {
                self.next = None;
                Some(Err(e))
            }
        }
    }
}
