//! Location lock
//!
//! Keeps a data directory to one writer across engines and processes. A
//! writable engine holds an exclusive `flock` on `{data_dir}/LOCK`; read-only
//! engines hold a shared one, so readers coexist with each other but not
//! with a writer replaying and deleting WAL files under them.
//!
//! `flock` locks belong to the open file description, so two engines in the
//! same process conflict just like two processes do.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, StrataError};

/// Held for the lifetime of an open engine; dropping it releases the lock
#[derive(Debug)]
pub struct LocationLock {
    file: File,
    path: PathBuf,
    exclusive: bool,
}

impl LocationLock {
    pub const FILE_NAME: &'static str = "LOCK";

    /// Take the exclusive lock for a writable engine, creating the lock file
    pub fn exclusive(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(Self::FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        Self::acquire(file, path, data_dir, true)
    }

    /// Take a shared lock for a read-only engine.
    ///
    /// Read-only opens never create files, so a location that has no lock
    /// file yet (never opened writable) yields `None`.
    pub fn shared(data_dir: &Path) -> Result<Option<Self>> {
        let path = data_dir.join(Self::FILE_NAME);
        let file = match OpenOptions::new().read(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Self::acquire(file, path, data_dir, false).map(Some)
    }

    fn acquire(file: File, path: PathBuf, data_dir: &Path, exclusive: bool) -> Result<Self> {
        #[cfg(unix)]
        {
            use libc::{flock, EWOULDBLOCK, LOCK_EX, LOCK_NB, LOCK_SH};
            use std::os::unix::io::AsRawFd;

            let operation = if exclusive { LOCK_EX } else { LOCK_SH } | LOCK_NB;
            // SAFETY: the descriptor is owned by `file` and open for the call
            if unsafe { flock(file.as_raw_fd(), operation) } != 0 {
                let err = std::io::Error::last_os_error();
                return match err.raw_os_error() {
                    Some(code) if code == EWOULDBLOCK => {
                        Err(StrataError::LocationBusy(data_dir.to_path_buf()))
                    }
                    _ => Err(err.into()),
                };
            }
        }
        #[cfg(not(unix))]
        let _ = data_dir;

        debug!(path = %path.display(), exclusive, "Acquired location lock");
        Ok(Self { file, path, exclusive })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }
}

impl Drop for LocationLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use libc::{flock, LOCK_UN};
            use std::os::unix::io::AsRawFd;

            // SAFETY: the descriptor is still owned by `self.file`
            unsafe {
                flock(self.file.as_raw_fd(), LOCK_UN);
            }
        }
        debug!(path = %self.path.display(), "Released location lock");
    }
}
