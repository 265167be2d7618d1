//! WAL Entry definitions
//!
//! Defines the structure of individual WAL records and their framing.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::StrataError;

/// Frame header: LSN (8) + CRC (4) + Len (4)
pub const HEADER_SIZE: usize = 16;

/// Upper bound on a single record's payload. The writer refuses anything
/// larger and the reader treats a larger length field as garbage.
pub const MAX_PAYLOAD_LEN: usize = 256 * 1024 * 1024;

/// A single record in the WAL. One record holds either a single mutation or
/// a whole batch; the batch's operations own `lsn ..= last_lsn()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Sequence number of the first operation
    pub lsn: u64,

    /// The operations, in application order
    pub operations: Vec<Operation>,

    /// Timestamp (unix millis) when entry was created
    pub timestamp: u64,
}

/// Operations that can be logged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Put a key-value pair
    Put { key: Vec<u8>, value: Vec<u8> },

    /// Delete a key
    Delete { key: Vec<u8> },
}

impl Operation {
    pub fn key(&self) -> &[u8] {
        match self {
            Operation::Put { key, .. } | Operation::Delete { key } => key,
        }
    }

    /// Value bytes, `None` for a delete
    pub fn value(&self) -> Option<&[u8]> {
        match self {
            Operation::Put { value, .. } => Some(value),
            Operation::Delete { .. } => None,
        }
    }
}

/// Borrowed view used when appending, so the writer never clones the batch.
/// Serializes identically to `WalEntry`.
#[derive(Serialize)]
struct WalEntryRef<'a> {
    lsn: u64,
    operations: &'a [Operation],
    timestamp: u64,
}

impl WalEntry {
    pub fn new(lsn: u64, operations: Vec<Operation>) -> Self {
        Self {
            lsn,
            operations,
            timestamp: now_millis(),
        }
    }

    /// Sequence number of the last operation in this record
    pub fn last_lsn(&self) -> u64 {
        self.lsn + (self.operations.len() as u64).saturating_sub(1)
    }

    /// Encode this entry as a complete frame
    pub fn serialize(&self) -> Result<Vec<u8>> {
        encode_frame(self.lsn, &self.operations, self.timestamp)
    }

    /// Decode a complete frame, verifying its CRC
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(StrataError::WalCorruption("frame shorter than header".into()));
        }
        let mut header = &bytes[..HEADER_SIZE];
        let lsn = header.get_u64_le();
        let crc = header.get_u32_le();
        let len = header.get_u32_le() as usize;

        let payload = bytes
            .get(HEADER_SIZE..HEADER_SIZE + len)
            .ok_or_else(|| StrataError::WalCorruption("frame truncated".into()))?;

        Self::decode_payload(lsn, crc, payload)
    }

    /// Validate `payload` against the header fields and decode it
    pub(crate) fn decode_payload(lsn: u64, crc: u32, payload: &[u8]) -> Result<Self> {
        if compute_crc(lsn, payload) != crc {
            return Err(StrataError::WalCorruption(format!(
                "CRC mismatch for record at lsn {}",
                lsn
            )));
        }

        let entry: WalEntry = bincode::deserialize(payload)
            .map_err(|e| StrataError::WalCorruption(format!("undecodable record at lsn {}: {}", lsn, e)))?;
        if entry.lsn != lsn {
            return Err(StrataError::WalCorruption(format!(
                "header lsn {} does not match payload lsn {}",
                lsn, entry.lsn
            )));
        }
        if entry.operations.is_empty() {
            return Err(StrataError::WalCorruption(format!(
                "record at lsn {} carries no operations",
                lsn
            )));
        }
        Ok(entry)
    }
}

/// Build a frame: [lsn u64][crc u32][len u32][bincode payload]
///
/// Fails with `InvalidArgument` when the payload would exceed
/// [`MAX_PAYLOAD_LEN`]; nothing is allocated for it in that case.
pub(crate) fn encode_frame(lsn: u64, operations: &[Operation], timestamp: u64) -> Result<Vec<u8>> {
    let record = WalEntryRef {
        lsn,
        operations,
        timestamp,
    };
    let size = bincode::serialized_size(&record)?;
    if size > MAX_PAYLOAD_LEN as u64 {
        return Err(StrataError::InvalidArgument(format!(
            "record of {} bytes exceeds the {} byte limit",
            size, MAX_PAYLOAD_LEN
        )));
    }
    let payload = bincode::serialize(&record)?;

    let mut frame = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    frame.put_u64_le(lsn);
    frame.put_u32_le(compute_crc(lsn, &payload));
    frame.put_u32_le(payload.len() as u32);
    frame.put_slice(&payload);
    Ok(frame.to_vec())
}

/// CRC covers the LSN, the length field and the payload
fn compute_crc(lsn: u64, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&lsn.to_le_bytes());
    hasher.update(&(payload.len() as u32).to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
