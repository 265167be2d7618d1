//! Segment compaction
//!
//! Merges a contiguous run of segments into one, keeping only the newest
//! version of each key. Split into three phases so that the expensive I/O
//! runs without holding the engine's state lock:
//! 1. [`CompactionJob::prepare`]: pick the inputs from a state snapshot
//! 2. [`CompactionJob::execute`]: merge and write the output segment
//! 3. [`CompactionJob::finalize`]: compute the new segment list
//!
//! The selected run is always contiguous in recency order, so the output
//! can take its place without reordering versions relative to untouched
//! segments.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::Result;
use crate::iterator::{Direction, EntrySource, MergeIterator};
use crate::types::{Entry, SeqNum};

use super::{SegmentIterator, SegmentReader, SegmentStore};

/// Counters reported by a finished compaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    pub input_segments: usize,
    pub input_entries: u64,
    pub output_entries: u64,
    pub dropped_tombstones: u64,
}

/// Inputs gathered for one compaction (gathered from a state snapshot)
pub struct CompactionJob {
    /// Segments to merge, newest first
    inputs: Vec<Arc<SegmentReader>>,
    /// Segments older than every input; a tombstone may only be dropped
    /// when none of these holds the key
    older: Vec<Arc<SegmentReader>>,
    /// Sequence span the output must cover
    seq_span: (SeqNum, SeqNum),
}

impl CompactionJob {
    /// Phase 1: select the segments overlapping the inclusive key range
    /// `[start, end]` (a missing bound is unbounded) and widen the
    /// selection to a contiguous run.
    ///
    /// Without bounds every segment is selected, empty ones included.
    /// Returns `None` when nothing is selected.
    pub fn prepare(
        segments: &[Arc<SegmentReader>],
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Option<Self> {
        let unbounded = start.is_none() && end.is_none();
        let mut selected = segments
            .iter()
            .enumerate()
            .filter(|(_, s)| unbounded || s.overlaps(start, end))
            .map(|(i, _)| i);

        let first = selected.next()?;
        let last = selected.last().unwrap_or(first);

        let inputs = segments[first..=last].to_vec();
        let older = segments[last + 1..].to_vec();

        let min_seq = inputs.iter().map(|s| s.min_seq()).min().unwrap_or(0);
        let max_seq = inputs.iter().map(|s| s.max_seq()).max().unwrap_or(0);

        Some(Self {
            inputs,
            older,
            seq_span: (min_seq, max_seq),
        })
    }

    pub fn inputs(&self) -> &[Arc<SegmentReader>] {
        &self.inputs
    }

    pub fn input_ids(&self) -> Vec<u64> {
        self.inputs.iter().map(|s| s.id()).collect()
    }

    pub fn seq_span(&self) -> (SeqNum, SeqNum) {
        self.seq_span
    }

    /// Phase 2: merge the inputs into a new segment (no locks held)
    ///
    /// The output always covers the inputs' sequence span, even when every
    /// entry was discarded.
    pub fn execute(&self, store: &SegmentStore) -> Result<(Arc<SegmentReader>, CompactionStats)> {
        let sources = self
            .inputs
            .iter()
            .map(|s| -> Result<EntrySource> {
                Ok(Box::new(SegmentIterator::new(Arc::clone(s), Direction::Forward, None)?))
            })
            .collect::<Result<Vec<_>>>()?;

        let merge = MergeIterator::new(sources, Direction::Forward, true)?;

        let mut stats = CompactionStats {
            input_segments: self.inputs.len(),
            input_entries: self.inputs.iter().map(|s| s.entry_count()).sum(),
            ..Default::default()
        };

        let survivors = merge.filter_map(|entry| match entry {
            Ok(entry) if entry.is_tombstone() && !self.shadows_older(&entry) => {
                stats.dropped_tombstones += 1;
                None
            }
            other => Some(other),
        });

        let output = store.write_segment(survivors, self.seq_span)?;
        stats.output_entries = output.entry_count();

        debug!(
            output_id = output.id(),
            min_seq = self.seq_span.0,
            max_seq = self.seq_span.1,
            "Wrote compacted segment"
        );
        Ok((output, stats))
    }

    /// A tombstone must survive while an older segment still holds the key
    fn shadows_older(&self, entry: &Entry) -> bool {
        self.older.iter().any(|s| s.contains_key(&entry.key))
    }

    /// Phase 3: swap the inputs for `output` in `current`
    pub fn finalize(
        &self,
        current: &[Arc<SegmentReader>],
        output: Arc<SegmentReader>,
    ) -> Result<Vec<Arc<SegmentReader>>> {
        SegmentStore::replace(current, &self.input_ids(), output)
    }

    /// Mark the inputs obsolete once the new list is installed; their files
    /// go away when the last reader drops them.
    pub fn retire_inputs(&self, stats: &CompactionStats) {
        for segment in &self.inputs {
            segment.mark_obsolete();
        }
        info!(
            inputs = stats.input_segments,
            input_entries = stats.input_entries,
            output_entries = stats.output_entries,
            dropped_tombstones = stats.dropped_tombstones,
            "Compaction finished"
        );
    }
}
