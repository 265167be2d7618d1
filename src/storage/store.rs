//! Segment Store
//!
//! Owns the segment directory: discovers segments on startup, writes new
//! segments for flushes and compactions, and computes segment-list swaps.
//!
//! ## Responsibilities
//! - Discover existing segments on startup (newest → oldest)
//! - Clean up leftovers of interrupted flushes and compactions
//! - Write segments all-or-nothing (temp file + rename)
//! - Replace a contiguous run of segments with its compacted successor
//!
//! The live segment list itself is part of the engine's state snapshot, so
//! it is swapped together with the memtables.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::types::{Entry, SeqNum};
use crate::StrataError;

use super::{SegmentBuilder, SegmentReader};

/// Manages segment files on disk
///
/// ## Concurrency:
/// - `next_segment_id`: Atomic counter (lock-free)
/// - All methods use `&self`; callers serialize flush/compaction
pub struct SegmentStore {
    /// Directory where segments are stored
    dir: PathBuf,

    /// Next ID for creating new segments (atomic, lock-free)
    next_segment_id: AtomicU64,

    /// Never touch the directory when set
    read_only: bool,
}

impl SegmentStore {
    /// Open the segment directory and load its segments
    ///
    /// On startup:
    /// 1. Create directory if it doesn't exist (unless read-only)
    /// 2. Remove `*.tmp` files left by interrupted writes
    /// 3. Open readers for each segment
    /// 4. Order by sequence span, newest first
    /// 5. Drop segments whose span is covered by another segment (inputs of
    ///    a compaction that finished writing but not cleaning up)
    pub fn open(dir: &Path, read_only: bool) -> Result<(Self, Vec<Arc<SegmentReader>>)> {
        if !read_only {
            fs::create_dir_all(dir)?;
        }

        let mut segments: Vec<Arc<SegmentReader>> = Vec::new();
        let mut max_id = 0;

        if dir.exists() {
            for entry in fs::read_dir(dir)? {
                let path = entry?.path();
                if !path.is_file() {
                    continue;
                }

                if path.extension().is_some_and(|ext| ext == "tmp") {
                    if !read_only {
                        debug!(path = %path.display(), "Removing incomplete segment");
                        fs::remove_file(&path)?;
                    }
                    continue;
                }

                if let Some(id) = Self::parse_segment_id(&path) {
                    max_id = max_id.max(id);
                    segments.push(Arc::new(SegmentReader::open(&path, id)?));
                }
            }
        }

        // Newest first: highest sequence span, then highest id
        segments.sort_by(|a, b| {
            b.max_seq()
                .cmp(&a.max_seq())
                .then_with(|| b.id().cmp(&a.id()))
        });

        let (live, superseded): (Vec<_>, Vec<_>) = segments
            .iter()
            .cloned()
            .partition(|s| !Self::is_superseded(s, &segments));

        for segment in superseded {
            info!(
                segment_id = segment.id(),
                "Dropping segment superseded by an interrupted compaction"
            );
            if !read_only {
                segment.mark_obsolete();
            }
        }

        info!(
            dir = %dir.display(),
            segments = live.len(),
            next_id = max_id + 1,
            "Opened segment store"
        );

        let store = Self {
            dir: dir.to_path_buf(),
            next_segment_id: AtomicU64::new(max_id + 1),
            read_only,
        };
        Ok((store, live))
    }

    /// A segment is superseded when another segment covers its whole span
    /// and is either wider or newer (the compaction output).
    fn is_superseded(segment: &SegmentReader, all: &[Arc<SegmentReader>]) -> bool {
        all.iter().any(|other| {
            other.id() != segment.id()
                && segment.seq_span_within(other)
                && (other.min_seq() < segment.min_seq()
                    || other.max_seq() > segment.max_seq()
                    || other.id() > segment.id())
        })
    }

    /// Persist sorted entries from a frozen memtable as a new segment
    pub fn flush(&self, entries: Vec<Entry>, seq_span: (SeqNum, SeqNum)) -> Result<Arc<SegmentReader>> {
        if entries.is_empty() {
            return Err(StrataError::InvalidArgument(
                "cannot flush an empty memtable".into(),
            ));
        }
        self.write_segment(entries.into_iter().map(Ok), seq_span)
    }

    /// Write a new segment from ascending `entries`.
    ///
    /// The file is built under a temporary name, renamed into place only
    /// once complete, and the directory is synced before the segment is
    /// returned. On any error the file is removed under either name and no
    /// segment becomes visible.
    pub fn write_segment<I>(&self, entries: I, seq_span: (SeqNum, SeqNum)) -> Result<Arc<SegmentReader>>
    where
        I: IntoIterator<Item = Result<Entry>>,
    {
        if self.read_only {
            return Err(StrataError::ReadOnly);
        }

        let id = self.next_segment_id.fetch_add(1, Ordering::SeqCst);
        let path = self.segment_path(id);
        let tmp_path = path.with_extension("sst.tmp");

        let build = || -> Result<Arc<SegmentReader>> {
            let mut builder = SegmentBuilder::new(&tmp_path)?;
            for entry in entries {
                builder.add(&entry?)?;
            }
            builder.cover_seq_span(seq_span.0, seq_span.1);
            builder.finish()?;
            fs::rename(&tmp_path, &path)?;
            sync_dir(&self.dir)?;
            Ok(Arc::new(SegmentReader::open(&path, id)?))
        };

        build().map_err(|e| {
            // The rename may already have happened
            for leftover in [&tmp_path, &path] {
                if let Err(rm) = fs::remove_file(leftover) {
                    if rm.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %leftover.display(), error = %rm, "Failed to remove incomplete segment");
                    }
                }
            }
            e
        })
    }

    /// Swap the contiguous run `old_ids` (newest first) in `current` for
    /// `replacement`, returning the new list.
    pub fn replace(
        current: &[Arc<SegmentReader>],
        old_ids: &[u64],
        replacement: Arc<SegmentReader>,
    ) -> Result<Vec<Arc<SegmentReader>>> {
        let first = old_ids
            .first()
            .and_then(|id| current.iter().position(|s| s.id() == *id))
            .ok_or_else(|| StrataError::InvalidState("compaction inputs no longer live".into()))?;

        let run = current.get(first..first + old_ids.len()).ok_or_else(|| {
            StrataError::InvalidState("compaction inputs no longer contiguous".into())
        })?;
        if !run.iter().map(|s| s.id()).eq(old_ids.iter().copied()) {
            return Err(StrataError::InvalidState(
                "compaction inputs no longer contiguous".into(),
            ));
        }

        let mut next = Vec::with_capacity(current.len() + 1 - old_ids.len());
        next.extend_from_slice(&current[..first]);
        next.push(replacement);
        next.extend_from_slice(&current[first + old_ids.len()..]);
        Ok(next)
    }

    /// Get the data directory path
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Get the next segment ID (for testing/debugging)
    pub fn next_segment_id(&self) -> u64 {
        self.next_segment_id.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Generate the file path for a segment with given ID
    fn segment_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("segment_{:06}.sst", id))
    }

    /// Parse segment ID from filename
    /// "segment_000042.sst" → Some(42)
    fn parse_segment_id(path: &Path) -> Option<u64> {
        if path.extension()? != "sst" {
            return None;
        }
        let name = path.file_stem()?.to_string_lossy();
        let id_str = name.strip_prefix("segment_")?;
        id_str.parse().ok()
    }
}

/// Make a rename durable; some filesystems need the directory synced
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    File::open(dir)?.sync_all()?;
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}
