//! MemTable Module
//!
//! In-memory data structure for recent writes.
//!
//! ## Responsibilities
//! - Fast reads and writes in memory
//! - Single-writer/multi-reader access pattern
//! - Track size for flush triggers
//! - Ordered iteration for segment creation and cursors
//!
//! ## Data Structure Choice
//! BTreeMap wrapped in RwLock:
//! - Ordered keys (required for segment generation)
//! - Each key keeps only its highest-sequence version
//!
//! A memtable is never cleared. On flush the engine freezes it (stops
//! writing to it) and installs a fresh one, so cursors holding the old
//! table keep a stable view.

mod table;

pub use table::MemTable;
