//! Write-Ahead Log (WAL) Module
//!
//! Provides durability guarantees through append-only logging.
//!
//! ## Responsibilities
//! - Append a record (single mutation or whole batch) before it is applied
//! - CRC32 checksums for corruption detection
//! - Sequence numbers (LSN) for ordering and recency
//! - Crash recovery and replay
//!
//! ## Layout
//! One file per memtable generation: `{data_dir}/wal/wal_{id:06}.log`.
//! A file is rotated when its memtable is frozen and deleted once that
//! memtable has been written to a segment.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Record 1                                │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ LSN (8) │ CRC (4) │Len (4) │ Data   │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! ├─────────────────────────────────────────┤
//! │ Record 2                                │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ LSN (8) │ CRC (4) │Len (4) │ Data   │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! └─────────────────────────────────────────┘
//! ```
//! Data is the bincode encoding of [`WalEntry`]. A batch is one record, so a
//! torn batch fails its CRC and is dropped as a whole.

mod entry;
mod writer;
mod reader;
mod recovery;

use std::fs;
use std::path::{Path, PathBuf};

pub use entry::{WalEntry, Operation, HEADER_SIZE, MAX_PAYLOAD_LEN};
pub use writer::WalWriter;
pub use reader::{WalReader, WalIterator};
pub use recovery::{WalRecovery, RecoveryResult};

use crate::error::Result;

/// Path of WAL file `id` inside `dir`
pub fn wal_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("wal_{:06}.log", id))
}

/// Parse a WAL file id from its name
/// "wal_000042.log" → Some(42)
pub fn parse_wal_id(path: &Path) -> Option<u64> {
    if path.extension()? != "log" {
        return None;
    }
    let name = path.file_stem()?.to_string_lossy();
    name.strip_prefix("wal_")?.parse().ok()
}

/// All WAL files in `dir`, ordered by id (oldest first)
pub fn list_wal_files(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            if let Some(id) = parse_wal_id(&path) {
                files.push((id, path));
            }
        }
    }
    files.sort_by_key(|(id, _)| *id);
    Ok(files)
}
