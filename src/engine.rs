//! Engine Module
//!
//! The core storage engine that coordinates all components.
//!
//! ## Responsibilities
//! - Coordinate WAL, memtables, and segments
//! - Handle concurrent read/write access
//! - Freeze and flush memtables when they grow past the limit
//! - Compact segments on request or when too many accumulate
//! - Manage crash recovery on startup

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::batch::WriteBatch;
use crate::config::Config;
use crate::error::Result;
use crate::iterator::{Cursor, Direction, ReadView};
use crate::lock::LocationLock;
use crate::memtable::MemTable;
use crate::storage::{CompactionJob, SegmentReader, SegmentStore};
use crate::types::{Entry, SeqNum};
use crate::wal::{self, Operation, WalRecovery, WalWriter};
use crate::StrataError;

/// A memtable that no longer accepts writes, waiting to be flushed
#[derive(Clone)]
struct FrozenMemTable {
    table: Arc<MemTable>,
    /// Sorted contents, captured once at freeze time and shared by every
    /// cursor opened while the table waits for its flush
    entries: Arc<[Entry]>,
    /// WAL file holding exactly this memtable's records
    wal_path: PathBuf,
}

/// Everything a reader needs, swapped atomically as a whole
#[derive(Clone)]
struct EngineState {
    /// Accepts writes
    memtable: Arc<MemTable>,
    /// Newest first
    frozen: Vec<FrozenMemTable>,
    /// Newest first
    segments: Vec<Arc<SegmentReader>>,
}

/// Work for the background thread
enum WorkerTask {
    Flush,
    Compact,
    Shutdown,
}

/// The main storage engine
///
/// ## Concurrency Model
///
/// - **Writes** (put/delete/write): serialized by the `wal` mutex, held
///   across the WAL append and the memtable apply so sequence order and
///   memtable order agree.
/// - **Reads** (get/iter): lock-free apart from cloning the current
///   `Arc<EngineState>`; they never wait for flush or compaction I/O.
/// - **Flush / compaction**: serialized by `admin_lock`. They take the
///   `wal` mutex only to freeze the memtable, and the state lock only to
///   swap in the result.
pub struct Engine {
    inner: Arc<EngineInner>,

    /// Sender half of the worker queue (`None` when read-only)
    notifier: Option<Sender<WorkerTask>>,

    /// Background flush/compaction thread
    worker: Mutex<Option<JoinHandle<()>>>,

    shut_down: AtomicBool,

    /// Keeps other engines off the location until shutdown
    lock: Mutex<Option<LocationLock>>,
}

struct EngineInner {
    /// Engine configuration
    config: Config,

    /// Directory for WAL files
    wal_dir: PathBuf,

    /// Current state snapshot
    state: RwLock<Arc<EngineState>>,

    /// Write-ahead log; `None` when read-only
    wal: Mutex<Option<WalWriter>>,

    /// Serializes flush and compaction
    admin_lock: Mutex<()>,

    /// Segment file management
    store: SegmentStore,

    /// A flush request is queued and not yet picked up
    flush_requested: AtomicBool,
}

impl Engine {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const WAL_DIR: &'static str = "wal";
    const SEGMENT_DIR: &'static str = "segments";

    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Open/create data directory and lock it
    /// 2. Load existing segments
    /// 3. Replay WAL files newer than the segments
    /// 4. Persist the replayed records and start a fresh WAL (writable only)
    /// 5. Start the background worker (writable only)
    pub fn open(config: Config) -> Result<Self> {
        let read_only = config.read_only;

        // Step 1: Create data directory if it doesn't exist
        if read_only {
            if !config.data_dir.is_dir() {
                return Err(StrataError::Config(format!(
                    "cannot open missing location {} read-only",
                    config.data_dir.display()
                )));
            }
        } else {
            fs::create_dir_all(&config.data_dir)?;
        }
        let lock = if read_only {
            LocationLock::shared(&config.data_dir)?
        } else {
            Some(LocationLock::exclusive(&config.data_dir)?)
        };

        let wal_dir = config.data_dir.join(Self::WAL_DIR);
        let segment_dir = config.data_dir.join(Self::SEGMENT_DIR);
        if !read_only {
            fs::create_dir_all(&wal_dir)?;
        }

        // Step 2: Open segment store (loads existing segments)
        let (store, mut segments) = SegmentStore::open(&segment_dir, read_only)?;
        let flushed_seq = segments.iter().map(|s| s.max_seq()).max().unwrap_or(0);

        // Step 3: Replay WAL files, oldest first
        let wal_files = if wal_dir.is_dir() {
            wal::list_wal_files(&wal_dir)?
        } else {
            Vec::new()
        };

        let memtable = MemTable::new();
        let mut last_seq = flushed_seq;
        let mut replayed = 0usize;
        let mut corrupted = 0u64;

        for (_, path) in &wal_files {
            let (entries, result) = if read_only {
                WalRecovery::recover_readonly(path)?
            } else {
                WalRecovery::recover(path)?
            };
            corrupted += result.entries_corrupted;

            for entry in entries {
                if entry.last_lsn() <= flushed_seq {
                    continue;
                }
                memtable.apply(entry.lsn, &entry.operations);
                last_seq = last_seq.max(entry.last_lsn());
                replayed += 1;
            }
        }

        if replayed > 0 || corrupted > 0 {
            info!(
                wal_files = wal_files.len(),
                replayed,
                corrupted,
                last_seq,
                "WAL recovery complete"
            );
        }

        // Step 4: Make recovered data durable in a segment, then retire the old WAL
        let (memtable, wal) = if read_only {
            (Arc::new(memtable), None)
        } else {
            if let Some(span) = memtable.seq_span() {
                info!(entries = memtable.entry_count(), "Flushing recovered entries to segment");
                let segment = store.flush(memtable.entries(), span)?;
                segments.insert(0, segment);
            }
            for (_, path) in &wal_files {
                fs::remove_file(path)?;
            }

            let next_file_id = wal_files.last().map_or(1, |(id, _)| id + 1);
            let writer = WalWriter::open(&wal_dir, next_file_id, last_seq + 1, config.wal_sync_strategy)?;
            (Arc::new(MemTable::new()), Some(writer))
        };

        info!(
            data_dir = %config.data_dir.display(),
            segments = segments.len(),
            last_seq,
            read_only,
            "Engine opened"
        );

        let inner = Arc::new(EngineInner {
            config,
            wal_dir,
            state: RwLock::new(Arc::new(EngineState {
                memtable,
                frozen: Vec::new(),
                segments,
            })),
            wal: Mutex::new(wal),
            admin_lock: Mutex::new(()),
            store,
            flush_requested: AtomicBool::new(false),
        });

        // Step 5: Background worker
        let (notifier, worker) = if read_only {
            (None, None)
        } else {
            let (tx, rx) = channel::unbounded();
            let worker_inner = Arc::clone(&inner);
            let handle = thread::Builder::new()
                .name("stratakv-worker".into())
                .spawn(move || worker_loop(worker_inner, rx))?;
            (Some(tx), Some(handle))
        };

        Ok(Self {
            inner,
            notifier,
            worker: Mutex::new(worker),
            shut_down: AtomicBool::new(false),
            lock: Mutex::new(lock),
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::with_data_dir(path))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get a value by key
    ///
    /// Search order:
    /// 1. Active memtable (most recent writes)
    /// 2. Frozen memtables (newest to oldest)
    /// 3. Segments (newest to oldest)
    ///
    /// The first version found wins; a tombstone means absent.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        let state = self.inner.snapshot();
        Ok(resolve(&state, key)?.and_then(|entry| entry.value))
    }

    /// Look up several keys, each resolved on its own
    pub fn multi_get<K: AsRef<[u8]>>(&self, keys: &[K]) -> Result<Vec<Option<Vec<u8>>>> {
        keys.iter().map(|k| self.get(k.as_ref())).collect()
    }

    /// Whether `key` currently has a value
    pub fn exists(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Open a cursor over a point-in-time view, positioned at the first key
    /// in `direction`
    pub fn iter(&self, direction: Direction) -> Result<Cursor> {
        self.ensure_open()?;
        Cursor::new(Arc::new(self.inner.read_view()), direction)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Put a key-value pair
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.write_operations(&[Operation::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        }])
    }

    /// Delete a key (writes a tombstone)
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.write_operations(&[Operation::Delete { key: key.to_vec() }])
    }

    /// Apply every operation of `batch` atomically
    ///
    /// An empty batch succeeds without writing anything.
    pub fn write(&self, batch: &WriteBatch) -> Result<()> {
        if batch.is_empty() {
            self.ensure_open()?;
            return Ok(());
        }
        self.write_operations(batch.operations())
    }

    fn write_operations(&self, operations: &[Operation]) -> Result<()> {
        self.ensure_open()?;
        if operations.iter().any(|op| op.key().is_empty()) {
            return Err(StrataError::InvalidArgument("keys must not be empty".into()));
        }

        if self.inner.append(operations)? {
            self.request(WorkerTask::Flush);
        }
        Ok(())
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Flush all memtables to segments
    pub fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        self.inner.flush()
    }

    /// Compact the segments overlapping the inclusive key range
    /// `[start, end]`; `None` bounds are open. Memtables are flushed first.
    pub fn compact(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        self.ensure_open()?;
        self.inner.compact(start, end)
    }

    /// Queue a full compaction on the background worker
    pub fn schedule_compaction(&self) -> Result<()> {
        self.ensure_open()?;
        if self.notifier.is_none() {
            return Err(StrataError::ReadOnly);
        }
        self.request(WorkerTask::Compact);
        Ok(())
    }

    fn request(&self, task: WorkerTask) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        if matches!(task, WorkerTask::Flush) && self.inner.flush_requested.swap(true, Ordering::AcqRel) {
            return;
        }
        if notifier.send(task).is_err() {
            warn!("Background worker is gone; request dropped");
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Stop the worker and sync the WAL. Idempotent; the engine rejects
    /// every operation afterwards.
    ///
    /// Memtable contents are not flushed: they are already in the WAL and
    /// are replayed on the next open.
    pub fn shutdown(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(notifier) = &self.notifier {
            let _ = notifier.send(WorkerTask::Shutdown);
        }
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                error!("Background worker panicked");
            }
        }

        let synced = match self.inner.wal.lock().as_mut() {
            Some(writer) => writer.sync(),
            None => Ok(()),
        };
        self.lock.lock().take();
        synced?;

        info!(data_dir = %self.inner.config.data_dir.display(), "Engine closed");
        Ok(())
    }

    /// Close the engine gracefully
    pub fn close(self) -> Result<()> {
        self.shutdown()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(StrataError::InvalidState("engine is closed".into()));
        }
        Ok(())
    }

    // =========================================================================
    // Properties
    // =========================================================================

    /// Diagnostic property by name; unknown names give `None`
    ///
    /// Known names: `stratakv.num-segments`, `stratakv.num-frozen-buffers`,
    /// `stratakv.buffer-entries`, `stratakv.buffer-bytes`,
    /// `stratakv.last-sequence`, `stratakv.total-segment-bytes`,
    /// `stratakv.stats`.
    pub fn property(&self, name: &str) -> Option<String> {
        let state = self.inner.snapshot();
        let value = match name {
            "stratakv.num-segments" => state.segments.len().to_string(),
            "stratakv.num-frozen-buffers" => state.frozen.len().to_string(),
            "stratakv.buffer-entries" => buffer_entries(&state).to_string(),
            "stratakv.buffer-bytes" => buffer_bytes(&state).to_string(),
            "stratakv.last-sequence" => self.last_sequence().to_string(),
            "stratakv.total-segment-bytes" => total_segment_bytes(&state).to_string(),
            "stratakv.stats" => format!(
                "segments: {}\nsegment entries: {}\nsegment bytes: {}\nfrozen buffers: {}\nbuffer entries: {}\nbuffer bytes: {}\nlast sequence: {}\nread only: {}",
                state.segments.len(),
                state.segments.iter().map(|s| s.entry_count()).sum::<u64>(),
                total_segment_bytes(&state),
                state.frozen.len(),
                buffer_entries(&state),
                buffer_bytes(&state),
                self.last_sequence(),
                self.is_read_only(),
            ),
            _ => return None,
        };
        Some(value)
    }

    /// Highest sequence number handed out so far
    pub fn last_sequence(&self) -> SeqNum {
        if let Some(writer) = self.inner.wal.lock().as_ref() {
            return writer.current_lsn() - 1;
        }
        let state = self.inner.snapshot();
        let buffered = std::iter::once(&state.memtable)
            .chain(state.frozen.iter().map(|f| &f.table))
            .filter_map(|t| t.seq_span())
            .map(|(_, max)| max);
        let segments = state.segments.iter().map(|s| s.max_seq());
        buffered.chain(segments).max().unwrap_or(0)
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.inner.config.data_dir
    }

    /// Get the segment directory path
    pub fn segment_dir(&self) -> &Path {
        self.inner.store.dir()
    }

    /// Get the WAL directory path
    pub fn wal_dir(&self) -> &Path {
        &self.inner.wal_dir
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.config.read_only
    }

    /// Get the active memtable size
    pub fn memtable_size(&self) -> usize {
        self.inner.snapshot().memtable.size()
    }

    /// Get the active memtable entry count
    pub fn memtable_entry_count(&self) -> usize {
        self.inner.snapshot().memtable.entry_count()
    }

    /// Get the number of frozen memtables awaiting flush
    pub fn frozen_count(&self) -> usize {
        self.inner.snapshot().frozen.len()
    }

    /// Get the number of live segments
    pub fn segment_count(&self) -> usize {
        self.inner.snapshot().segments.len()
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "Engine shutdown failed");
        }
    }
}

// =============================================================================
// Engine internals (shared with the worker thread)
// =============================================================================

impl EngineInner {
    fn snapshot(&self) -> Arc<EngineState> {
        Arc::clone(&self.state.read())
    }

    fn read_view(&self) -> ReadView {
        let state = self.snapshot();
        // Only the active table still changes; frozen ones share their copy
        let buffers: Vec<Arc<[Entry]>> = std::iter::once(Arc::<[Entry]>::from(state.memtable.entries()))
            .chain(state.frozen.iter().map(|f| Arc::clone(&f.entries)))
            .collect();
        ReadView::new(buffers, state.segments.clone())
    }

    /// Log and apply `operations`; returns whether a flush is due
    fn append(&self, operations: &[Operation]) -> Result<bool> {
        let mut wal = self.wal.lock();
        let writer = wal.as_mut().ok_or(StrataError::ReadOnly)?;

        let seqs = writer.append(operations)?;
        let memtable = Arc::clone(&self.state.read().memtable);
        memtable.apply(*seqs.start(), operations);

        Ok(memtable.should_flush(self.config.memtable_size_limit))
    }

    /// Move the active memtable into the frozen list and start a new WAL
    /// file for its successor. Returns `false` if there was nothing to freeze.
    fn freeze_memtable(&self) -> Result<bool> {
        let mut wal = self.wal.lock();
        let writer = wal.as_mut().ok_or(StrataError::ReadOnly)?;

        if self.snapshot().memtable.is_empty() {
            return Ok(false);
        }
        let wal_path = writer.rotate()?;

        // Writers are blocked on the wal lock, so this copy is final
        let table = Arc::clone(&self.snapshot().memtable);
        let entries: Arc<[Entry]> = Arc::from(table.entries());

        let mut state = self.state.write();
        let mut next = (**state).clone();
        next.frozen.insert(
            0,
            FrozenMemTable {
                table,
                entries,
                wal_path,
            },
        );
        next.memtable = Arc::new(MemTable::new());
        *state = Arc::new(next);
        Ok(true)
    }

    fn flush(&self) -> Result<()> {
        let _admin = self.admin_lock.lock();
        self.flush_locked()
    }

    /// Freeze the active memtable, then persist frozen memtables oldest first.
    /// A memtable that fails to flush stays frozen (and readable).
    fn flush_locked(&self) -> Result<()> {
        self.flush_requested.store(false, Ordering::Release);
        self.freeze_memtable()?;

        while let Some(frozen) = self.snapshot().frozen.last().cloned() {
            self.flush_frozen(&frozen)?;
        }
        Ok(())
    }

    fn flush_frozen(&self, frozen: &FrozenMemTable) -> Result<()> {
        let Some(span) = frozen.table.seq_span() else {
            return Err(StrataError::InvalidState("frozen memtable is empty".into()));
        };
        let entries = frozen.table.entry_count();
        let segment = self.store.flush(frozen.entries.to_vec(), span)?;

        {
            let mut state = self.state.write();
            let mut next = (**state).clone();
            next.frozen.retain(|f| !Arc::ptr_eq(&f.table, &frozen.table));
            next.segments.insert(0, Arc::clone(&segment));
            *state = Arc::new(next);
        }

        if let Err(e) = fs::remove_file(&frozen.wal_path) {
            warn!(path = %frozen.wal_path.display(), error = %e, "Failed to remove flushed WAL file");
        }

        info!(
            segment_id = segment.id(),
            entries,
            min_seq = span.0,
            max_seq = span.1,
            "Flushed memtable to segment"
        );
        Ok(())
    }

    fn compact(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        if self.config.read_only {
            return Err(StrataError::ReadOnly);
        }

        let _admin = self.admin_lock.lock();
        self.flush_locked()?;

        // Phase 1: pick inputs from a snapshot
        let Some(job) = CompactionJob::prepare(&self.snapshot().segments, start, end) else {
            debug!("No segments in range; nothing to compact");
            return Ok(());
        };

        // Phase 2: merge without holding the state lock
        let (output, stats) = job.execute(&self.store)?;

        // Phase 3: swap under the state lock
        {
            let mut state = self.state.write();
            let segments = match job.finalize(&state.segments, Arc::clone(&output)) {
                Ok(segments) => segments,
                Err(e) => {
                    output.mark_obsolete();
                    return Err(e);
                }
            };
            let mut next = (**state).clone();
            next.segments = segments;
            *state = Arc::new(next);
        }

        job.retire_inputs(&stats);
        Ok(())
    }

    /// Background compaction once the segment count reaches the trigger
    fn maybe_compact(&self) -> Result<()> {
        let trigger = self.config.compaction_trigger;
        if trigger == 0 || self.snapshot().segments.len() < trigger {
            return Ok(());
        }
        debug!(trigger, "Segment count reached compaction trigger");
        self.compact(None, None)
    }
}

/// Resolve the newest version of `key` visible in `state`
fn resolve(state: &EngineState, key: &[u8]) -> Result<Option<Entry>> {
    let buffers = std::iter::once(&state.memtable).chain(state.frozen.iter().map(|f| &f.table));
    for table in buffers {
        if let Some(entry) = table.get(key) {
            return Ok(Some(entry));
        }
    }

    for segment in &state.segments {
        if !segment.might_contain(key) {
            continue;
        }
        if let Some(entry) = segment.get(key)? {
            return Ok(Some(entry));
        }
    }
    Ok(None)
}

fn buffer_entries(state: &EngineState) -> usize {
    state.memtable.entry_count() + state.frozen.iter().map(|f| f.table.entry_count()).sum::<usize>()
}

fn buffer_bytes(state: &EngineState) -> usize {
    state.memtable.size() + state.frozen.iter().map(|f| f.table.size()).sum::<usize>()
}

fn total_segment_bytes(state: &EngineState) -> u64 {
    state.segments.iter().map(|s| s.file_size()).sum()
}

fn worker_loop(inner: Arc<EngineInner>, tasks: Receiver<WorkerTask>) {
    debug!("Background worker started");
    for task in tasks.iter() {
        let result = match task {
            WorkerTask::Flush => inner.flush().and_then(|()| inner.maybe_compact()),
            WorkerTask::Compact => inner.compact(None, None),
            WorkerTask::Shutdown => break,
        };
        if let Err(e) = result {
            error!(error = %e, "Background maintenance failed");
        }
    }
    debug!("Background worker stopped");
}
