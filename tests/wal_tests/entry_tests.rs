//! Tests for WAL Entry framing
//!
//! These tests verify:
//! - Single-operation and batch records decode to what was written
//! - CRC32 corruption detection
//! - Edge cases (truncation, malformed frames, large values)

use stratakv::wal::{Operation, WalEntry, HEADER_SIZE};
use stratakv::StrataError;

fn put(key: &str, value: &str) -> Operation {
    Operation::Put {
        key: key.as_bytes().to_vec(),
        value: value.as_bytes().to_vec(),
    }
}

// =============================================================================
// Framing Tests
// =============================================================================

#[test]
fn test_single_put_frame() {
    let entry = WalEntry::new(1, vec![put("hello", "world")]);

    let bytes = entry.serialize().unwrap();
    let recovered = WalEntry::deserialize(&bytes).unwrap();

    assert_eq!(entry, recovered);
    assert_eq!(recovered.last_lsn(), 1);
}

#[test]
fn test_batch_frame_owns_consecutive_lsns() {
    let entry = WalEntry::new(
        10,
        vec![
            put("a", "1"),
            Operation::Delete { key: b"b".to_vec() },
            put("c", "3"),
        ],
    );

    let recovered = WalEntry::deserialize(&entry.serialize().unwrap()).unwrap();

    assert_eq!(recovered.lsn, 10);
    assert_eq!(recovered.last_lsn(), 12);
    assert_eq!(recovered.operations.len(), 3);
    assert_eq!(recovered.operations[1].value(), None);
}

#[test]
fn test_header_layout() {
    let entry = WalEntry::new(7, vec![put("k", "v")]);
    let bytes = entry.serialize().unwrap();

    assert_eq!(&bytes[0..8], &7u64.to_le_bytes());
    let len = u32::from_le_bytes(bytes[12..16].try_into().unwrap()) as usize;
    assert_eq!(bytes.len(), HEADER_SIZE + len);
}

#[test]
fn test_large_value() {
    let value = vec![0xAB; 1024 * 1024];
    let entry = WalEntry::new(
        1,
        vec![Operation::Put {
            key: b"big".to_vec(),
            value: value.clone(),
        }],
    );

    let recovered = WalEntry::deserialize(&entry.serialize().unwrap()).unwrap();
    assert_eq!(recovered.operations[0].value(), Some(value.as_slice()));
}

// =============================================================================
// Corruption Detection Tests
// =============================================================================

#[test]
fn test_flipped_payload_byte_detected() {
    let entry = WalEntry::new(1, vec![put("key", "value")]);
    let mut bytes = entry.serialize().unwrap();

    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;

    assert!(matches!(
        WalEntry::deserialize(&bytes),
        Err(StrataError::WalCorruption(_))
    ));
}

#[test]
fn test_tampered_lsn_detected() {
    let entry = WalEntry::new(1, vec![put("key", "value")]);
    let mut bytes = entry.serialize().unwrap();

    bytes[0] = 2;

    assert!(matches!(
        WalEntry::deserialize(&bytes),
        Err(StrataError::WalCorruption(_))
    ));
}

#[test]
fn test_truncated_frame_detected() {
    let entry = WalEntry::new(1, vec![put("key", "value")]);
    let bytes = entry.serialize().unwrap();

    assert!(WalEntry::deserialize(&bytes[..HEADER_SIZE - 1]).is_err());
    assert!(WalEntry::deserialize(&bytes[..bytes.len() - 1]).is_err());
}

#[test]
fn test_empty_input_rejected() {
    assert!(matches!(
        WalEntry::deserialize(&[]),
        Err(StrataError::WalCorruption(_))
    ));
}
