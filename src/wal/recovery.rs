//! WAL Recovery
//!
//! Handles crash recovery by replaying WAL files.

use std::fs::OpenOptions;
use std::path::Path;

use tracing::warn;

use crate::error::Result;
use crate::StrataError;

use super::{WalEntry, WalReader};

/// Handles WAL recovery after crash
pub struct WalRecovery;

/// Result of a recovery operation
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Number of entries successfully recovered
    pub entries_recovered: u64,

    /// Number of corrupted entries skipped
    pub entries_corrupted: u64,

    /// Last valid LSN (sequence number of the last recovered operation)
    pub last_lsn: u64,

    /// Whether the WAL was truncated (partial writes removed)
    pub was_truncated: bool,
}

impl WalRecovery {
    /// Recover entries from a WAL file
    ///
    /// This will:
    /// 1. Read all valid entries
    /// 2. Stop at the first torn or corrupted record
    /// 3. Truncate the file to the end of the last valid record
    /// 4. Return all valid entries in order
    pub fn recover(path: &Path) -> Result<(Vec<WalEntry>, RecoveryResult)> {
        Self::scan(path, true)
    }

    /// Same as `recover`, but never modifies the file
    pub fn recover_readonly(path: &Path) -> Result<(Vec<WalEntry>, RecoveryResult)> {
        Self::scan(path, false)
    }

    /// Verify integrity of a WAL file without modifying it
    pub fn verify(path: &Path) -> Result<RecoveryResult> {
        Self::scan(path, false).map(|(_, result)| result)
    }

    fn scan(path: &Path, repair: bool) -> Result<(Vec<WalEntry>, RecoveryResult)> {
        let mut reader = WalReader::open(path)?;
        let mut entries = Vec::new();
        let mut result = RecoveryResult::default();

        loop {
            match reader.next_entry() {
                Ok(Some(entry)) => {
                    result.entries_recovered += 1;
                    result.last_lsn = entry.last_lsn();
                    entries.push(entry);
                }
                Ok(None) => break,
                Err(StrataError::WalCorruption(reason)) => {
                    // Everything from here on is unframed; count it as one
                    // corrupted record.
                    result.entries_corrupted += 1;
                    warn!(
                        path = %path.display(),
                        offset = reader.position(),
                        reason = %reason,
                        "Discarding corrupted WAL tail"
                    );
                    if repair {
                        let file = OpenOptions::new().write(true).open(path)?;
                        file.set_len(reader.position())?;
                        file.sync_all()?;
                        result.was_truncated = true;
                    }
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok((entries, result))
    }
}
