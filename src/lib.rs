//! # StrataKV
//!
//! An embedded, ordered, persistent key-value store with:
//! - Write-Ahead Logging (WAL) for durability
//! - Crash recovery with torn-write handling
//! - Atomic write batches
//! - Snapshot cursors in forward and reverse key order
//! - Range compaction of immutable segments
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Db handles (shared per location)            │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                         Engine                              │
//! │        (serialized writers / snapshot readers)              │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │     WAL     │          │  MemTables  │
//!   │  (Append)   │          │ active+frozen│
//!   └─────────────┘          └──────┬──────┘
//!                                   │ flush
//!                                   ▼
//!                           ┌─────────────┐
//!                           │  Segments   │◀── compaction
//!                           └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use stratakv::{Db, Direction, WriteBatch};
//!
//! # fn main() -> stratakv::Result<()> {
//! let db = Db::open("./data")?;
//! db.put("a", "1")?;
//!
//! let mut batch = WriteBatch::new();
//! batch.put("b", "2").delete("a");
//! db.write(&batch)?;
//!
//! for pair in db.iter(Direction::Forward)? {
//!     let (key, value) = pair?;
//!     println!("{:?} = {:?}", key, value);
//! }
//! db.close()?;
//! # Ok(())
//! # }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod types;

pub mod batch;
pub mod wal;
pub mod memtable;
pub mod storage;
pub mod iterator;
pub mod lock;
pub mod engine;
pub mod registry;
pub mod db;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{StrataError, Result};
pub use config::{Config, WalSyncStrategy};
pub use types::{Entry, SeqNum};
pub use batch::WriteBatch;
pub use iterator::{Cursor, Direction};
pub use engine::Engine;
pub use db::Db;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of StrataKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
