//! Process-wide registry of open locations
//!
//! Every [`Db`](crate::Db) handle on the same canonical directory shares one
//! [`Engine`]. The registry counts handles per location and shuts the engine
//! down when the last one closes.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::debug;

use crate::config::Config;
use crate::engine::Engine;
use crate::error::Result;
use crate::StrataError;

struct Slot {
    engine: Arc<Engine>,
    handles: usize,
}

static REGISTRY: OnceLock<Mutex<HashMap<PathBuf, Slot>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<PathBuf, Slot>> {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Canonical form of the configured location; creates it when writable
fn canonical_location(config: &Config) -> Result<PathBuf> {
    if !config.read_only {
        fs::create_dir_all(&config.data_dir)?;
    }
    fs::canonicalize(&config.data_dir).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => StrataError::Config(format!(
            "cannot open missing location {} read-only",
            config.data_dir.display()
        )),
        _ => StrataError::Io(e),
    })
}

/// Take a handle on the location named by `config`, opening the engine if
/// no handle holds it yet.
///
/// A writable request for a location currently open read-only fails with
/// `LocationBusy`.
pub(crate) fn acquire(config: Config) -> Result<(PathBuf, Arc<Engine>)> {
    let location = canonical_location(&config)?;
    let mut open = registry().lock();

    if let Some(slot) = open.get_mut(&location) {
        if slot.engine.is_read_only() && !config.read_only {
            return Err(StrataError::LocationBusy(location));
        }
        slot.handles += 1;
        debug!(location = %location.display(), handles = slot.handles, "Sharing open engine");
        return Ok((location, Arc::clone(&slot.engine)));
    }

    let config = Config {
        data_dir: location.clone(),
        ..config
    };
    let engine = Arc::new(Engine::open(config)?);
    open.insert(
        location.clone(),
        Slot {
            engine: Arc::clone(&engine),
            handles: 1,
        },
    );
    Ok((location, engine))
}

/// Give back one handle; the last one shuts the engine down
pub(crate) fn release(location: &Path) -> Result<()> {
    let mut open = registry().lock();
    let Some(slot) = open.get_mut(location) else {
        return Ok(());
    };

    slot.handles -= 1;
    if slot.handles > 0 {
        return Ok(());
    }

    match open.remove(location) {
        Some(slot) => slot.engine.shutdown(),
        None => Ok(()),
    }
}

/// Locations currently held open in this process
pub fn open_locations() -> Vec<PathBuf> {
    registry().lock().keys().cloned().collect()
}
