//! Storage Module
//!
//! Persistent storage layer: immutable sorted segments on disk.
//!
//! ## Responsibilities
//! - Persist flushed memtables as sorted segment files
//! - Point lookups and ordered range traversal over segments
//! - Merge segments during compaction, discarding shadowed versions
//!
//! Segments are ordered newest → oldest by the sequence span they cover;
//! a key's newest version is always in the newest segment holding it.

mod compaction;
mod segment;
mod store;

pub use compaction::{CompactionJob, CompactionStats};
pub use segment::{SegmentBuilder, SegmentIterator, SegmentMeta, SegmentReader};
pub use store::SegmentStore;
