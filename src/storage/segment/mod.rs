//! Segment Module
//!
//! Immutable on-disk sorted entry sets produced by flushes and compactions.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (14 bytes)                                       │
//! │   Magic: "STKV" (4) | Version: u16 (2) | Count: u64 (8) │
//! ├─────────────────────────────────────────────────────────┤
//! │ Data Block (variable)                                   │
//! │   [KeyLen: u32][ValLen: u32][Seq: u64][Key][Value]      │
//! │   ... repeated for each entry, keys strictly ascending  │
//! │   (ValLen = u32::MAX means tombstone, no value bytes)   │
//! ├─────────────────────────────────────────────────────────┤
//! │ Index Block (variable)                                  │
//! │   [KeyLen: u32][Offset: u64][Key]                       │
//! ├─────────────────────────────────────────────────────────┤
//! │ Footer (32 bytes)                                       │
//! │   IndexOffset: u64 | MinSeq: u64 | MaxSeq: u64          │
//! │   DataCRC: u32 | Padding (4)                            │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! MinSeq/MaxSeq record the span of sequence numbers the segment covers.
//! Spans of live segments never overlap, which orders segments by recency
//! and lets startup detect inputs left behind by an interrupted compaction.

mod builder;
mod iterator;
mod reader;

use std::io::Read;
use std::path::PathBuf;

use bytes::{Buf, BufMut, BytesMut};

pub use builder::SegmentBuilder;
pub use iterator::SegmentIterator;
pub use reader::SegmentReader;

use crate::error::Result;
use crate::types::{Entry, SeqNum};
use crate::StrataError;

// =============================================================================
// Shared Constants (used by builder, reader, iterator)
// =============================================================================

/// Magic bytes identifying a StrataKV segment file
pub(crate) const MAGIC: &[u8; 4] = b"STKV";

/// Current segment format version
pub(crate) const VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) + EntryCount (8) = 14 bytes
pub(crate) const HEADER_SIZE: u64 = 14;

/// Footer size: IndexOffset (8) + MinSeq (8) + MaxSeq (8) + DataCRC (4) + Padding (4)
pub(crate) const FOOTER_SIZE: u64 = 32;

/// Entry header size: KeyLen (4) + ValLen (4) + Seq (8)
pub(crate) const ENTRY_HEADER_SIZE: usize = 16;

/// Sentinel value indicating a tombstone (deleted key)
pub(crate) const TOMBSTONE_MARKER: u32 = u32::MAX;

// =============================================================================
// Segment Metadata
// =============================================================================

/// Summary of a segment file as written by [`SegmentBuilder::finish`].
#[derive(Debug, Clone)]
pub struct SegmentMeta {
    /// Path to the segment file
    pub path: PathBuf,
    /// Number of entries (tombstones included)
    pub entry_count: u64,
    /// Smallest key, `None` for an empty segment
    pub min_key: Option<Vec<u8>>,
    /// Largest key, `None` for an empty segment
    pub max_key: Option<Vec<u8>>,
    /// Sequence span covered by this segment
    pub min_seq: SeqNum,
    pub max_seq: SeqNum,
    /// File size in bytes
    pub file_size: u64,
}

impl SegmentMeta {
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Quick check if a key might be in this segment (range check)
    pub fn might_contain(&self, key: &[u8]) -> bool {
        match (&self.min_key, &self.max_key) {
            (Some(min), Some(max)) => key >= min.as_slice() && key <= max.as_slice(),
            _ => false,
        }
    }
}

// =============================================================================
// Entry Codec
// =============================================================================

/// Encode one data-block entry
///
/// Keys must fit a `u32` length field; values must stay below
/// [`TOMBSTONE_MARKER`] so they never read back as a delete.
pub(crate) fn encode_entry(entry: &Entry) -> Result<BytesMut> {
    let key_len = u32::try_from(entry.key.len())
        .map_err(|_| StrataError::InvalidArgument(format!("key of {} bytes is too long", entry.key.len())))?;
    let value_len = match &entry.value {
        Some(v) => match u32::try_from(v.len()) {
            Ok(len) if len != TOMBSTONE_MARKER => len,
            _ => {
                return Err(StrataError::InvalidArgument(format!(
                    "value of {} bytes is too long",
                    v.len()
                )))
            }
        },
        None => TOMBSTONE_MARKER,
    };

    let body_len = entry.value.as_ref().map_or(0, Vec::len);
    let mut buf = BytesMut::with_capacity(ENTRY_HEADER_SIZE + entry.key.len() + body_len);

    buf.put_u32_le(key_len);
    buf.put_u32_le(value_len);
    buf.put_u64_le(entry.seq);
    buf.put_slice(&entry.key);
    if let Some(v) = &entry.value {
        buf.put_slice(v);
    }
    Ok(buf)
}

/// Decode one data-block entry; returns the entry and its encoded length
pub(crate) fn decode_entry<R: Read>(reader: &mut R) -> Result<(Entry, u64)> {
    let mut header = [0u8; ENTRY_HEADER_SIZE];
    reader.read_exact(&mut header)?;

    let mut buf = &header[..];
    let key_len = buf.get_u32_le() as usize;
    let val_len = buf.get_u32_le();
    let seq = buf.get_u64_le();

    let mut key = vec![0u8; key_len];
    reader.read_exact(&mut key)?;

    let mut encoded_len = (ENTRY_HEADER_SIZE + key_len) as u64;
    let value = if val_len == TOMBSTONE_MARKER {
        None
    } else {
        let mut value = vec![0u8; val_len as usize];
        reader.read_exact(&mut value)?;
        encoded_len += val_len as u64;
        Some(value)
    };

    if key.is_empty() {
        return Err(StrataError::Corruption("entry with empty key".into()));
    }

    Ok((Entry { key, seq, value }, encoded_len))
}
