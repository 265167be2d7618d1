//! WAL Writer
//!
//! Handles appending records to the active WAL file and rotating to a fresh
//! file when the memtable it covers is frozen.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::WalSyncStrategy;
use crate::error::Result;
use crate::StrataError;

use super::entry::{encode_frame, now_millis};
use super::{wal_path, Operation};

/// Writes records to the active WAL file
///
/// The writer is the source of truth for sequence numbers: `next_lsn` is only
/// advanced after a record has been fully written.
pub struct WalWriter {
    /// Directory holding all WAL files
    dir: PathBuf,
    /// Id of the file currently being appended to
    file_id: u64,
    file: File,
    /// Byte length of the file after the last complete record
    offset: u64,
    /// Sequence number the next operation will receive
    next_lsn: u64,
    sync_strategy: WalSyncStrategy,
    /// Records written since the last fsync
    uncommitted: usize,
    /// Set when a failed append could not be rolled back
    poisoned: bool,
}

impl WalWriter {
    /// Open or create `wal_{file_id}.log` in `dir`, appending after any
    /// existing content. `next_lsn` is the first sequence number to hand out.
    pub fn open(
        dir: &Path,
        file_id: u64,
        next_lsn: u64,
        sync_strategy: WalSyncStrategy,
    ) -> Result<Self> {
        let path = wal_path(dir, file_id);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;
        let offset = file.seek(SeekFrom::End(0))?;

        debug!(path = %path.display(), next_lsn, "Opened WAL file");

        Ok(Self {
            dir: dir.to_path_buf(),
            file_id,
            file,
            offset,
            next_lsn: next_lsn.max(1),
            sync_strategy,
            uncommitted: 0,
            poisoned: false,
        })
    }

    /// Append one record holding `operations`.
    ///
    /// Returns the sequence numbers assigned to the operations. On error the
    /// file is rolled back to its previous length and no sequence number is
    /// consumed.
    pub fn append(&mut self, operations: &[Operation]) -> Result<RangeInclusive<u64>> {
        if self.poisoned {
            return Err(StrataError::InvalidState(
                "WAL writer is unusable after a failed rollback".into(),
            ));
        }
        if operations.is_empty() {
            return Err(StrataError::InvalidArgument(
                "cannot append an empty record".into(),
            ));
        }

        let first = self.next_lsn;
        let last = first + operations.len() as u64 - 1;
        let frame = encode_frame(first, operations, now_millis())?;

        if let Err(e) = self.write_frame(&frame) {
            self.rollback();
            return Err(e);
        }

        self.offset += frame.len() as u64;
        self.next_lsn = last + 1;
        Ok(first..=last)
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.file.write_all(frame)?;
        self.uncommitted += 1;

        let should_sync = match self.sync_strategy {
            WalSyncStrategy::EveryWrite => true,
            WalSyncStrategy::EveryNEntries { count } => self.uncommitted >= count.max(1),
        };
        if should_sync {
            self.sync()?;
        }
        Ok(())
    }

    /// Cut the file back to the last complete record after a failed write
    fn rollback(&mut self) {
        let restored = self
            .file
            .set_len(self.offset)
            .and_then(|_| self.file.seek(SeekFrom::Start(self.offset)).map(|_| ()));
        if let Err(e) = restored {
            warn!(error = %e, offset = self.offset, "Failed to roll back WAL after write error");
            self.poisoned = true;
        }
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        self.uncommitted = 0;
        Ok(())
    }

    /// Seal the current file and continue in `wal_{id + 1}.log`.
    ///
    /// Returns the sealed file's path; its records belong to the memtable
    /// frozen alongside this call and it can be removed once that memtable
    /// is persisted in a segment.
    pub fn rotate(&mut self) -> Result<PathBuf> {
        self.sync()?;
        let sealed = self.path();
        let next = Self::open(&self.dir, self.file_id + 1, self.next_lsn, self.sync_strategy)?;
        *self = next;
        Ok(sealed)
    }

    /// Get the sequence number the next operation will receive
    pub fn current_lsn(&self) -> u64 {
        self.next_lsn
    }

    /// Number of records written since the last fsync
    pub fn uncommitted_count(&self) -> usize {
        self.uncommitted
    }

    pub fn file_id(&self) -> u64 {
        self.file_id
    }

    pub fn path(&self) -> PathBuf {
        wal_path(&self.dir, self.file_id)
    }
}
