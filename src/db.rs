//! Database handles
//!
//! [`Db`] is the public entry point. Handles opened on the same directory
//! share one engine through the process-wide registry; closing a handle
//! only shuts the engine down once no other handle uses it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::batch::WriteBatch;
use crate::config::Config;
use crate::engine::Engine;
use crate::error::Result;
use crate::iterator::{Cursor, Direction};
use crate::registry;
use crate::StrataError;

/// Handle on an open store location
///
/// Every operation on a closed handle fails with `InvalidState`. Dropping
/// the handle closes it.
pub struct Db {
    location: PathBuf,
    read_only: bool,
    engine: RwLock<Option<Arc<Engine>>>,
}

impl Db {
    /// Open (creating if needed) the store at `path` with default settings
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(Config::with_data_dir(path.as_ref()))
    }

    /// Open the store at `config.data_dir`
    ///
    /// With `config.read_only` the location must already exist; the other
    /// settings only take effect when this open creates the engine.
    pub fn open_with_config(config: Config) -> Result<Self> {
        let read_only = config.read_only;
        let (location, engine) = registry::acquire(config)?;
        Ok(Self {
            location,
            read_only,
            engine: RwLock::new(Some(engine)),
        })
    }

    /// Release this handle. Idempotent.
    pub fn close(&self) -> Result<()> {
        let engine = self.engine.write().take();
        match engine {
            Some(engine) => {
                drop(engine);
                registry::release(&self.location)
            }
            None => Ok(()),
        }
    }

    pub fn is_open(&self) -> bool {
        self.engine.read().is_some()
    }

    /// Whether this handle rejects writes
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Canonical path of the location
    pub fn location(&self) -> &Path {
        &self.location
    }

    fn engine(&self) -> Result<Arc<Engine>> {
        self.engine
            .read()
            .clone()
            .ok_or_else(|| StrataError::InvalidState("database handle is closed".into()))
    }

    fn writable_engine(&self) -> Result<Arc<Engine>> {
        let engine = self.engine()?;
        if self.read_only {
            return Err(StrataError::ReadOnly);
        }
        Ok(engine)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        self.engine()?.get(key.as_ref())
    }

    /// Values for `keys`, in order; each key is resolved independently
    pub fn multi_get<K: AsRef<[u8]>>(&self, keys: &[K]) -> Result<Vec<Option<Vec<u8>>>> {
        self.engine()?.multi_get(keys)
    }

    pub fn exists(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        self.engine()?.exists(key.as_ref())
    }

    /// Cursor over a snapshot taken now
    pub fn iter(&self, direction: Direction) -> Result<Cursor> {
        self.engine()?.iter(direction)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    pub fn put(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        self.writable_engine()?.put(key.as_ref(), value.as_ref())
    }

    pub fn delete(&self, key: impl AsRef<[u8]>) -> Result<()> {
        self.writable_engine()?.delete(key.as_ref())
    }

    /// Apply a batch atomically
    pub fn write(&self, batch: &WriteBatch) -> Result<()> {
        self.writable_engine()?.write(batch)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Compact segments overlapping `[start, end]` (inclusive, `None` = open)
    pub fn compact(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        self.writable_engine()?.compact(start, end)
    }

    /// Persist buffered writes to a segment
    pub fn flush(&self) -> Result<()> {
        self.writable_engine()?.flush()
    }

    /// Diagnostic property; see [`Engine::property`]
    pub fn property(&self, name: &str) -> Result<Option<String>> {
        Ok(self.engine()?.property(name))
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(location = %self.location.display(), error = %e, "Closing database handle failed");
        }
    }
}
