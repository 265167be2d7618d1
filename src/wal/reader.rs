//! WAL Reader
//!
//! Handles reading records from a single WAL file.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use bytes::Buf;

use crate::error::Result;
use crate::StrataError;

use super::{WalEntry, HEADER_SIZE, MAX_PAYLOAD_LEN};

/// Reads records from a WAL file
pub struct WalReader {
    reader: BufReader<File>,
    /// Byte offset just past the last successfully decoded record
    position: u64,
}

impl WalReader {
    /// Open a WAL file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            position: 0,
        })
    }

    /// Read the next record from the WAL
    ///
    /// - `Ok(Some(entry))`: a complete, checksummed record
    /// - `Ok(None)`: clean end of file
    /// - `Err(WalCorruption)`: torn or corrupted record; nothing after it
    ///   can be trusted
    pub fn next_entry(&mut self) -> Result<Option<WalEntry>> {
        let mut header = [0u8; HEADER_SIZE];
        let read = read_full(&mut self.reader, &mut header)?;
        if read == 0 {
            return Ok(None);
        }
        if read < HEADER_SIZE {
            return Err(StrataError::WalCorruption(format!(
                "truncated header at offset {}",
                self.position
            )));
        }

        let mut buf = &header[..];
        let lsn = buf.get_u64_le();
        let crc = buf.get_u32_le();
        let len = buf.get_u32_le() as usize;

        if len > MAX_PAYLOAD_LEN {
            return Err(StrataError::WalCorruption(format!(
                "implausible record length {} at offset {}",
                len, self.position
            )));
        }

        let mut payload = vec![0u8; len];
        if read_full(&mut self.reader, &mut payload)? < len {
            return Err(StrataError::WalCorruption(format!(
                "truncated payload at offset {}",
                self.position
            )));
        }

        let entry = WalEntry::decode_payload(lsn, crc, &payload)?;
        self.position += (HEADER_SIZE + len) as u64;
        Ok(Some(entry))
    }

    /// Offset just past the last valid record
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Iterate over records until EOF or the first corrupted record
    pub fn entries(self) -> WalIterator {
        WalIterator {
            reader: self,
            done: false,
        }
    }
}

/// Iterator over WAL records
///
/// Yields the corruption error once and then stops.
pub struct WalIterator {
    reader: WalReader,
    done: bool,
}

impl Iterator for WalIterator {
    type Item = Result<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Fill `buf` as far as the file allows; returns the number of bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
