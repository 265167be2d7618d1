//! Segment Reader
//!
//! Opens segment files and provides O(log n) key lookups via an in-memory
//! index. Readers are shared behind `Arc`; a reader marked obsolete removes
//! its file once the last reference (engine state or open cursor) is gone.

use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Buf;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::types::{Entry, SeqNum};
use crate::StrataError;

use super::{decode_entry, FOOTER_SIZE, HEADER_SIZE, MAGIC, VERSION};

/// Reader for segment files with in-memory index for O(log n) lookups
pub struct SegmentReader {
    /// Segment id (from the file name)
    id: u64,
    path: PathBuf,
    /// File handle for point lookups
    file: Mutex<BufReader<File>>,
    /// Sorted index: key → file offset of entry
    pub(super) index: Vec<(Vec<u8>, u64)>,
    min_seq: SeqNum,
    max_seq: SeqNum,
    file_size: u64,
    /// Set once the segment has been superseded by a compaction
    obsolete: AtomicBool,
}

impl SegmentReader {
    /// Open a segment for reading
    ///
    /// Validates header, footer and data checksum, then loads the entire
    /// index into memory.
    pub fn open(path: &Path, id: u64) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();

        if file_size < HEADER_SIZE + FOOTER_SIZE {
            return Err(StrataError::Corruption(format!(
                "segment {} is too small ({} bytes)",
                path.display(),
                file_size
            )));
        }

        // Header
        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;

        if &header[0..4] != MAGIC {
            return Err(StrataError::Corruption(format!(
                "Invalid segment magic: expected STKV, got {:?}",
                &header[0..4]
            )));
        }

        let mut buf = &header[4..];
        let version = buf.get_u16_le();
        if version != VERSION {
            return Err(StrataError::Corruption(format!(
                "Unsupported segment version: {}",
                version
            )));
        }
        let entry_count = buf.get_u64_le();

        // Footer
        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let mut footer = [0u8; FOOTER_SIZE as usize];
        file.read_exact(&mut footer)?;

        let mut buf = &footer[..];
        let index_offset = buf.get_u64_le();
        let min_seq = buf.get_u64_le();
        let max_seq = buf.get_u64_le();
        let data_crc = buf.get_u32_le();

        if index_offset < HEADER_SIZE || index_offset > file_size - FOOTER_SIZE {
            return Err(StrataError::Corruption(format!(
                "index offset {} out of bounds in {}",
                index_offset,
                path.display()
            )));
        }

        // Verify data block checksum
        file.seek(SeekFrom::Start(HEADER_SIZE))?;
        let mut hasher = crc32fast::Hasher::new();
        let mut remaining = index_offset - HEADER_SIZE;
        let mut chunk = vec![0u8; 64 * 1024];
        while remaining > 0 {
            let n = remaining.min(chunk.len() as u64) as usize;
            file.read_exact(&mut chunk[..n])?;
            hasher.update(&chunk[..n]);
            remaining -= n as u64;
        }
        if hasher.finalize() != data_crc {
            return Err(StrataError::Corruption(format!(
                "data checksum mismatch in {}",
                path.display()
            )));
        }

        // Index block: [key_len(4)][offset(8)][key]
        let index_block_size = file_size - FOOTER_SIZE - index_offset;
        let mut index_data = vec![0u8; index_block_size as usize];
        file.read_exact(&mut index_data)?;

        let index = parse_index(&index_data, index_offset).ok_or_else(|| {
            StrataError::Corruption(format!("malformed index block in {}", path.display()))
        })?;

        if index.len() as u64 != entry_count {
            return Err(StrataError::Corruption(format!(
                "index holds {} keys but header says {}",
                index.len(),
                entry_count
            )));
        }

        file.seek(SeekFrom::Start(0))?;

        Ok(Self {
            id,
            path: path.to_path_buf(),
            file: Mutex::new(BufReader::new(file)),
            index,
            min_seq,
            max_seq,
            file_size,
            obsolete: AtomicBool::new(false),
        })
    }

    /// Look up `key`: O(log n) via the in-memory index
    ///
    /// Returns:
    /// - `Ok(Some(entry))`: key present (the entry may be a tombstone)
    /// - `Ok(None)`: key not in this segment
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>> {
        let offset = match self.position_of(key) {
            Some(pos) => self.index[pos].1,
            None => return Ok(None),
        };

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let (entry, _) = decode_entry(&mut *file)?;

        if entry.key != key {
            return Err(StrataError::Corruption(format!(
                "index points at wrong key in {}",
                self.path.display()
            )));
        }
        Ok(Some(entry))
    }

    fn position_of(&self, key: &[u8]) -> Option<usize> {
        self.index
            .binary_search_by(|(k, _)| k.as_slice().cmp(key))
            .ok()
    }

    /// Exact membership test against the in-memory index (no I/O)
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.position_of(key).is_some()
    }

    /// Quick check if a key might be in this segment (range check)
    pub fn might_contain(&self, key: &[u8]) -> bool {
        match (self.min_key(), self.max_key()) {
            (Some(min), Some(max)) => key >= min && key <= max,
            _ => false,
        }
    }

    /// Whether this segment's key range intersects the inclusive range
    /// `[start, end]`; a missing bound is unbounded.
    pub fn overlaps(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> bool {
        let (Some(min), Some(max)) = (self.min_key(), self.max_key()) else {
            return false;
        };
        let after_start = start.map_or(true, |s| max >= s);
        let before_end = end.map_or(true, |e| min <= e);
        after_start && before_end
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get entry count
    pub fn entry_count(&self) -> u64 {
        self.index.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn min_key(&self) -> Option<&[u8]> {
        self.index.first().map(|(k, _)| k.as_slice())
    }

    pub fn max_key(&self) -> Option<&[u8]> {
        self.index.last().map(|(k, _)| k.as_slice())
    }

    pub fn min_seq(&self) -> SeqNum {
        self.min_seq
    }

    pub fn max_seq(&self) -> SeqNum {
        self.max_seq
    }

    /// Whether this segment's sequence span lies within `other`'s
    pub fn seq_span_within(&self, other: &SegmentReader) -> bool {
        self.min_seq >= other.min_seq && self.max_seq <= other.max_seq
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Mark this segment superseded; its file is removed on final drop.
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::Release);
    }

    pub fn is_obsolete(&self) -> bool {
        self.obsolete.load(Ordering::Acquire)
    }
}

impl Drop for SegmentReader {
    fn drop(&mut self) {
        if !self.is_obsolete() {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed obsolete segment"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove obsolete segment"),
        }
    }
}

/// Parse the index block; `None` when malformed or not strictly ascending
fn parse_index(data: &[u8], data_end: u64) -> Option<Vec<(Vec<u8>, u64)>> {
    let mut index: Vec<(Vec<u8>, u64)> = Vec::new();
    let mut buf = data;

    while buf.has_remaining() {
        if buf.remaining() < 12 {
            return None;
        }
        let key_len = buf.get_u32_le() as usize;
        let offset = buf.get_u64_le();
        if buf.remaining() < key_len || offset < HEADER_SIZE || offset >= data_end {
            return None;
        }
        let key = buf[..key_len].to_vec();
        buf.advance(key_len);

        if let Some((prev, _)) = index.last() {
            if key <= *prev {
                return None;
            }
        }
        index.push((key, offset));
    }

    Some(index)
}
