//! Segment Builder
//!
//! Writes sorted entries to a new segment file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::types::{Entry, SeqNum};
use crate::StrataError;

use super::{encode_entry, SegmentMeta, HEADER_SIZE, MAGIC, VERSION};

/// Builder for creating new segments from sorted entries
pub struct SegmentBuilder {
    /// Output file path
    path: PathBuf,
    /// Buffered writer for performance
    writer: BufWriter<File>,
    /// Number of entries written
    entry_count: u64,
    /// Current write position (for index)
    current_offset: u64,
    /// Index: key → file offset of entry
    index: Vec<(Vec<u8>, u64)>,
    /// Sequence span covered so far (0 = nothing yet)
    min_seq: SeqNum,
    max_seq: SeqNum,
    /// Running CRC hasher for data section
    data_hasher: crc32fast::Hasher,
}

impl SegmentBuilder {
    /// Create a new segment builder
    ///
    /// Writes header immediately; call `add()` in strictly ascending key
    /// order, then `finish()` to write index and footer.
    pub fn new(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut writer = BufWriter::new(file);

        // Write header (entry_count placeholder, will be updated in finish)
        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&0u64.to_le_bytes())?;

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            entry_count: 0,
            current_offset: HEADER_SIZE,
            index: Vec::new(),
            min_seq: 0,
            max_seq: 0,
            data_hasher: crc32fast::Hasher::new(),
        })
    }

    /// Append an entry (value or tombstone). Keys must be strictly ascending.
    pub fn add(&mut self, entry: &Entry) -> Result<()> {
        if let Some((last, _)) = self.index.last() {
            if entry.key.as_slice() <= last.as_slice() {
                return Err(StrataError::InvalidArgument(
                    "segment entries must be added in strictly ascending key order".into(),
                ));
            }
        }

        let bytes = encode_entry(entry)?;
        self.writer.write_all(&bytes)?;
        self.data_hasher.update(&bytes);

        self.index.push((entry.key.clone(), self.current_offset));
        self.current_offset += bytes.len() as u64;
        self.entry_count += 1;
        self.cover_seq_span(entry.seq, entry.seq);

        Ok(())
    }

    /// Widen the recorded sequence span to include `min ..= max`, even when
    /// no entry with those sequence numbers survives.
    pub fn cover_seq_span(&mut self, min: SeqNum, max: SeqNum) {
        if min == 0 && max == 0 {
            return;
        }
        self.min_seq = if self.min_seq == 0 { min } else { self.min_seq.min(min) };
        self.max_seq = self.max_seq.max(max);
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Finish building: write index block, footer, and return metadata
    pub fn finish(mut self) -> Result<SegmentMeta> {
        let index_offset = self.current_offset;

        // Index block: [key_len(4)][offset(8)][key] for each entry
        for (key, offset) in &self.index {
            self.writer.write_all(&(key.len() as u32).to_le_bytes())?;
            self.writer.write_all(&offset.to_le_bytes())?;
            self.writer.write_all(key)?;
        }

        let data_crc = self.data_hasher.finalize();

        // Footer
        self.writer.write_all(&index_offset.to_le_bytes())?;
        self.writer.write_all(&self.min_seq.to_le_bytes())?;
        self.writer.write_all(&self.max_seq.to_le_bytes())?;
        self.writer.write_all(&data_crc.to_le_bytes())?;
        self.writer.write_all(&[0u8; 4])?;

        self.writer.flush()?;

        // Seek back and update entry count in header
        let mut file = self
            .writer
            .into_inner()
            .map_err(|e| StrataError::Io(e.into_error()))?;
        file.seek(SeekFrom::Start(6))?; // After magic + version
        file.write_all(&self.entry_count.to_le_bytes())?;
        file.sync_all()?;

        let file_size = file.metadata()?.len();

        Ok(SegmentMeta {
            path: self.path,
            entry_count: self.entry_count,
            min_key: self.index.first().map(|(k, _)| k.clone()),
            max_key: self.index.last().map(|(k, _)| k.clone()),
            min_seq: self.min_seq,
            max_seq: self.max_seq,
            file_size,
        })
    }
}
