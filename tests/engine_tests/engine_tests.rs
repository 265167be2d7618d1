//! Tests for Engine
//!
//! These tests verify:
//! - Basic get/put/delete operations
//! - Atomic write batches
//! - Flush to segments
//! - Crash recovery from WAL
//! - Read-only mode
//! - Properties
//! - Concurrent access patterns
//! - Engine lifecycle (open/shutdown)
//! - Location locking between engines
//! - Failed flushes and refused writes leave the log intact

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use stratakv::config::{Config, WalSyncStrategy};
use stratakv::engine::Engine;
use stratakv::wal::MAX_PAYLOAD_LEN;
use stratakv::{Direction, StrataError, WriteBatch};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn config_for(temp_dir: &TempDir) -> Config {
    Config::builder()
        .data_dir(temp_dir.path())
        .wal_sync_strategy(WalSyncStrategy::EveryWrite) // Sync every write for test reliability
        .memtable_size_limit(1024 * 1024) // 1 MB
        .compaction_trigger(0)
        .build()
}

fn setup_temp_engine() -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(config_for(&temp_dir)).unwrap();
    (temp_dir, engine)
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_engine_open_creates_directories() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("mydb");

    let engine = Engine::open(Config::with_data_dir(&data_dir)).unwrap();

    assert!(data_dir.exists());
    assert!(engine.segment_dir().exists());
    assert!(engine.wal_dir().join("wal_000001.log").exists());
}

#[test]
fn test_engine_put_get() {
    let (_temp, engine) = setup_temp_engine();

    engine.put(b"hello", b"world").unwrap();

    assert_eq!(engine.get(b"hello").unwrap(), Some(b"world".to_vec()));
    assert_eq!(engine.get(b"nonexistent").unwrap(), None);
}

#[test]
fn test_engine_overwrite_and_delete() {
    let (_temp, engine) = setup_temp_engine();

    engine.put(b"key", b"v1").unwrap();
    engine.put(b"key", b"v2").unwrap();
    assert_eq!(engine.get(b"key").unwrap(), Some(b"v2".to_vec()));

    engine.delete(b"key").unwrap();
    assert_eq!(engine.get(b"key").unwrap(), None);
    assert!(!engine.exists(b"key").unwrap());

    // Deleting an absent key is fine
    engine.delete(b"never-written").unwrap();
}

#[test]
fn test_engine_empty_value_is_present() {
    let (_temp, engine) = setup_temp_engine();

    engine.put(b"empty", b"").unwrap();

    assert_eq!(engine.get(b"empty").unwrap(), Some(Vec::new()));
    assert!(engine.exists(b"empty").unwrap());
}

#[test]
fn test_engine_rejects_empty_key() {
    let (_temp, engine) = setup_temp_engine();

    assert!(matches!(engine.put(b"", b"v"), Err(StrataError::InvalidArgument(_))));
    assert!(matches!(engine.delete(b""), Err(StrataError::InvalidArgument(_))));
    assert_eq!(engine.last_sequence(), 0);
}

#[test]
fn test_engine_multi_get() {
    let (_temp, engine) = setup_temp_engine();

    engine.put(b"a", b"1").unwrap();
    engine.put(b"c", b"3").unwrap();

    let values = engine.multi_get(&[b"a".as_slice(), b"b".as_slice(), b"c".as_slice()]).unwrap();
    assert_eq!(values, vec![Some(b"1".to_vec()), None, Some(b"3".to_vec())]);
    assert!(engine.multi_get::<&[u8]>(&[]).unwrap().is_empty());
}

#[test]
fn test_engine_binary_and_unicode_keys() {
    let (_temp, engine) = setup_temp_engine();

    let key = "日本語のキー".as_bytes();
    let value = "値".as_bytes();
    engine.put(key, value).unwrap();
    engine.put(&[0x00, 0xFF, 0x00], &[0xDE, 0xAD]).unwrap();

    assert_eq!(engine.get(key).unwrap(), Some(value.to_vec()));
    assert_eq!(engine.get(&[0x00, 0xFF, 0x00]).unwrap(), Some(vec![0xDE, 0xAD]));
}

// =============================================================================
// Write Batch Tests
// =============================================================================

#[test]
fn test_batch_applies_all_operations() {
    let (_temp, engine) = setup_temp_engine();
    engine.put(b"doomed", b"x").unwrap();

    let mut batch = WriteBatch::new();
    batch.put("a", "1").put("b", "2").delete("doomed");
    engine.write(&batch).unwrap();

    assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(engine.get(b"b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(engine.get(b"doomed").unwrap(), None);
    assert_eq!(engine.last_sequence(), 4);
}

#[test]
fn test_batch_later_operation_on_same_key_wins() {
    let (_temp, engine) = setup_temp_engine();

    let mut batch = WriteBatch::new();
    batch.put("k", "first").delete("k").put("k", "last");
    engine.write(&batch).unwrap();

    assert_eq!(engine.get(b"k").unwrap(), Some(b"last".to_vec()));
}

#[test]
fn test_empty_batch_is_noop() {
    let (_temp, engine) = setup_temp_engine();

    engine.write(&WriteBatch::new()).unwrap();

    assert_eq!(engine.last_sequence(), 0);
}

#[test]
fn test_batch_with_empty_key_writes_nothing() {
    let (_temp, engine) = setup_temp_engine();

    let mut batch = WriteBatch::new();
    batch.put("ok", "1").put("", "2");

    assert!(matches!(engine.write(&batch), Err(StrataError::InvalidArgument(_))));
    assert_eq!(engine.get(b"ok").unwrap(), None);
}

// =============================================================================
// Flush Tests
// =============================================================================

#[test]
fn test_flush_moves_data_to_segment() {
    let (_temp, engine) = setup_temp_engine();

    engine.put(b"key1", b"value1").unwrap();
    engine.put(b"key2", b"value2").unwrap();
    engine.flush().unwrap();

    assert_eq!(engine.memtable_entry_count(), 0);
    assert_eq!(engine.segment_count(), 1);
    assert_eq!(engine.get(b"key1").unwrap(), Some(b"value1".to_vec()));
}

#[test]
fn test_flush_empty_memtable_is_noop() {
    let (_temp, engine) = setup_temp_engine();

    engine.flush().unwrap();

    assert_eq!(engine.segment_count(), 0);
}

#[test]
fn test_flush_removes_covered_wal_file() {
    let (_temp, engine) = setup_temp_engine();

    engine.put(b"k", b"v").unwrap();
    engine.flush().unwrap();

    let wal_files: Vec<_> = fs::read_dir(engine.wal_dir()).unwrap().collect();
    assert_eq!(wal_files.len(), 1, "only the active WAL file remains");
}

#[test]
fn test_tombstone_in_memtable_shadows_segment() {
    let (_temp, engine) = setup_temp_engine();

    engine.put(b"key", b"old").unwrap();
    engine.flush().unwrap();
    engine.delete(b"key").unwrap();

    assert_eq!(engine.get(b"key").unwrap(), None);

    engine.flush().unwrap();
    assert_eq!(engine.get(b"key").unwrap(), None);
}

#[test]
fn test_size_triggered_background_flush() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .memtable_size_limit(256)
        .compaction_trigger(0)
        .build();
    let engine = Engine::open(config).unwrap();

    for i in 0..20 {
        engine.put(format!("key{:02}", i).as_bytes(), &[b'x'; 32]).unwrap();
    }

    assert!(wait_until(|| engine.segment_count() > 0));
    for i in 0..20 {
        assert!(engine.exists(format!("key{:02}", i).as_bytes()).unwrap());
    }
}

#[test]
fn test_background_compaction_trigger() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .memtable_size_limit(1)
        .compaction_trigger(3)
        .build();
    let engine = Engine::open(config).unwrap();

    for i in 0..10 {
        engine.put(format!("key{}", i).as_bytes(), b"v").unwrap();
    }

    assert!(wait_until(|| engine.frozen_count() == 0
        && engine.memtable_entry_count() == 0
        && engine.segment_count() < 3));
    for i in 0..10 {
        assert!(engine.exists(format!("key{}", i).as_bytes()).unwrap());
    }
}

// =============================================================================
// Recovery Tests
// =============================================================================

#[test]
fn test_recovery_after_drop_without_close() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(config_for(&temp_dir)).unwrap();
        engine.put(b"key1", b"value1").unwrap();
        engine.put(b"key2", b"value2").unwrap();
        engine.delete(b"key1").unwrap();
    }

    let engine = Engine::open(config_for(&temp_dir)).unwrap();
    assert_eq!(engine.get(b"key1").unwrap(), None);
    assert_eq!(engine.get(b"key2").unwrap(), Some(b"value2".to_vec()));
}

#[test]
fn test_recovery_persists_replayed_data() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(config_for(&temp_dir)).unwrap();
        engine.put(b"key", b"value").unwrap();
    }

    let engine = Engine::open(config_for(&temp_dir)).unwrap();

    // Replayed records now live in a segment; the old WAL file is gone
    assert_eq!(engine.segment_count(), 1);
    assert_eq!(engine.memtable_entry_count(), 0);
    assert!(!engine.wal_dir().join("wal_000001.log").exists());
    assert!(engine.wal_dir().join("wal_000002.log").exists());
}

#[test]
fn test_recovery_mixed_segments_and_wal() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(config_for(&temp_dir)).unwrap();
        engine.put(b"a", b"old").unwrap();
        engine.put(b"b", b"kept").unwrap();
        engine.flush().unwrap();
        engine.put(b"a", b"new").unwrap();
        engine.delete(b"b").unwrap();
    }

    let engine = Engine::open(config_for(&temp_dir)).unwrap();
    assert_eq!(engine.get(b"a").unwrap(), Some(b"new".to_vec()));
    assert_eq!(engine.get(b"b").unwrap(), None);
}

#[test]
fn test_sequence_continues_across_restarts() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(config_for(&temp_dir)).unwrap();
        engine.put(b"a", b"1").unwrap();
        engine.put(b"b", b"2").unwrap();
        engine.flush().unwrap();
        engine.put(b"c", b"3").unwrap();
        assert_eq!(engine.last_sequence(), 3);
    }

    let engine = Engine::open(config_for(&temp_dir)).unwrap();
    assert_eq!(engine.last_sequence(), 3);

    engine.put(b"a", b"newer").unwrap();
    assert_eq!(engine.last_sequence(), 4);
    engine.flush().unwrap();
    assert_eq!(engine.get(b"a").unwrap(), Some(b"newer".to_vec()));
}

#[test]
fn test_recovery_truncates_torn_tail() {
    let temp_dir = TempDir::new().unwrap();
    let wal_path = {
        let engine = Engine::open(config_for(&temp_dir)).unwrap();
        engine.put(b"kept", b"yes").unwrap();
        let mut batch = WriteBatch::new();
        batch.put("batch-a", "1").put("batch-b", "2");
        engine.write(&batch).unwrap();
        engine.wal_dir().join("wal_000001.log")
    };

    // Tear the last record (the batch) in half
    let len = fs::metadata(&wal_path).unwrap().len();
    let file = OpenOptions::new().write(true).open(&wal_path).unwrap();
    file.set_len(len - 5).unwrap();

    let engine = Engine::open(config_for(&temp_dir)).unwrap();
    assert_eq!(engine.get(b"kept").unwrap(), Some(b"yes".to_vec()));
    assert_eq!(engine.get(b"batch-a").unwrap(), None);
    assert_eq!(engine.get(b"batch-b").unwrap(), None);
    assert_eq!(engine.last_sequence(), 1);
}

#[test]
fn test_recovery_ignores_garbage_tail() {
    let temp_dir = TempDir::new().unwrap();
    let wal_path = {
        let engine = Engine::open(config_for(&temp_dir)).unwrap();
        engine.put(b"key", b"value").unwrap();
        engine.wal_dir().join("wal_000001.log")
    };

    let mut file = OpenOptions::new().append(true).open(&wal_path).unwrap();
    file.write_all(&[0xAB; 40]).unwrap();

    let engine = Engine::open(config_for(&temp_dir)).unwrap();
    assert_eq!(engine.get(b"key").unwrap(), Some(b"value".to_vec()));
}

// =============================================================================
// Read-only Tests
// =============================================================================

#[test]
fn test_read_only_sees_data_and_rejects_writes() {
    let temp_dir = TempDir::new().unwrap();
    let wal_path = {
        let engine = Engine::open(config_for(&temp_dir)).unwrap();
        engine.put(b"flushed", b"1").unwrap();
        engine.flush().unwrap();
        engine.put(b"buffered", b"2").unwrap();
        engine.wal_dir().join("wal_000002.log")
    };
    let wal_len = fs::metadata(&wal_path).unwrap().len();

    let config = Config::builder().data_dir(temp_dir.path()).read_only(true).build();
    let engine = Engine::open(config).unwrap();

    assert!(engine.is_read_only());
    assert_eq!(engine.get(b"flushed").unwrap(), Some(b"1".to_vec()));
    assert_eq!(engine.get(b"buffered").unwrap(), Some(b"2".to_vec()));
    assert_eq!(engine.last_sequence(), 2);

    assert!(matches!(engine.put(b"x", b"y"), Err(StrataError::ReadOnly)));
    assert!(matches!(engine.delete(b"x"), Err(StrataError::ReadOnly)));
    assert!(matches!(engine.flush(), Err(StrataError::ReadOnly)));
    assert!(matches!(engine.compact(None, None), Err(StrataError::ReadOnly)));

    // Nothing on disk changed
    assert_eq!(fs::metadata(&wal_path).unwrap().len(), wal_len);
}

#[test]
fn test_read_only_missing_location_fails() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path().join("absent"))
        .read_only(true)
        .build();

    assert!(matches!(Engine::open(config), Err(StrataError::Config(_))));
    assert!(!temp_dir.path().join("absent").exists());
}

// =============================================================================
// Property Tests
// =============================================================================

#[test]
fn test_properties() {
    let (_temp, engine) = setup_temp_engine();
    engine.put(b"a", b"1").unwrap();
    engine.flush().unwrap();
    engine.put(b"b", b"2").unwrap();

    assert_eq!(engine.property("stratakv.num-segments").as_deref(), Some("1"));
    assert_eq!(engine.property("stratakv.num-frozen-buffers").as_deref(), Some("0"));
    assert_eq!(engine.property("stratakv.buffer-entries").as_deref(), Some("1"));
    assert_eq!(engine.property("stratakv.last-sequence").as_deref(), Some("2"));

    let bytes: u64 = engine.property("stratakv.total-segment-bytes").unwrap().parse().unwrap();
    assert!(bytes > 0);
    let buffer: usize = engine.property("stratakv.buffer-bytes").unwrap().parse().unwrap();
    assert!(buffer > 0);

    assert!(engine.property("stratakv.stats").unwrap().contains("segments: 1"));
    assert_eq!(engine.property("stratakv.nope"), None);
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_operations_after_shutdown_fail() {
    let (_temp, engine) = setup_temp_engine();
    engine.put(b"k", b"v").unwrap();

    engine.shutdown().unwrap();
    engine.shutdown().unwrap();

    assert!(matches!(engine.get(b"k"), Err(StrataError::InvalidState(_))));
    assert!(matches!(engine.put(b"k", b"v"), Err(StrataError::InvalidState(_))));
}

#[test]
fn test_close_then_reopen() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(config_for(&temp_dir)).unwrap();
        engine.put(b"k", b"v").unwrap();
        engine.close().unwrap();
    }

    let engine = Engine::open(config_for(&temp_dir)).unwrap();
    assert_eq!(engine.get(b"k").unwrap(), Some(b"v".to_vec()));
}

// =============================================================================
// Location Lock Tests
// =============================================================================

fn read_only_config(temp_dir: &TempDir) -> Config {
    Config::builder().data_dir(temp_dir.path()).read_only(true).build()
}

#[test]
fn test_second_open_of_held_location_is_busy() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(config_for(&temp_dir)).unwrap();
    engine.put(b"k1", b"v1").unwrap();

    assert!(matches!(
        Engine::open(config_for(&temp_dir)),
        Err(StrataError::LocationBusy(_))
    ));

    // The refused open must not have replayed or removed the live WAL
    engine.put(b"k2", b"v2").unwrap();
    assert!(engine.wal_dir().join("wal_000001.log").exists());
    drop(engine);

    let engine = Engine::open(config_for(&temp_dir)).unwrap();
    assert_eq!(engine.get(b"k1").unwrap(), Some(b"v1".to_vec()));
    assert_eq!(engine.get(b"k2").unwrap(), Some(b"v2".to_vec()));
}

#[test]
fn test_read_only_open_of_written_location_is_busy() {
    let temp_dir = TempDir::new().unwrap();
    let _writer = Engine::open(config_for(&temp_dir)).unwrap();

    assert!(matches!(
        Engine::open(read_only_config(&temp_dir)),
        Err(StrataError::LocationBusy(_))
    ));
}

#[test]
fn test_read_only_engines_share_location() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(config_for(&temp_dir)).unwrap();
        engine.put(b"k", b"v").unwrap();
    }

    let first = Engine::open(read_only_config(&temp_dir)).unwrap();
    let second = Engine::open(read_only_config(&temp_dir)).unwrap();
    assert_eq!(first.get(b"k").unwrap(), Some(b"v".to_vec()));
    assert_eq!(second.get(b"k").unwrap(), Some(b"v".to_vec()));

    assert!(matches!(
        Engine::open(config_for(&temp_dir)),
        Err(StrataError::LocationBusy(_))
    ));
    drop(first);
    drop(second);

    let writer = Engine::open(config_for(&temp_dir)).unwrap();
    writer.put(b"k", b"v2").unwrap();
}

#[test]
fn test_shutdown_releases_location() {
    let (temp_dir, engine) = setup_temp_engine();
    engine.put(b"k", b"v").unwrap();

    engine.shutdown().unwrap();

    let reopened = Engine::open(config_for(&temp_dir)).unwrap();
    assert_eq!(reopened.get(b"k").unwrap(), Some(b"v".to_vec()));
}

// =============================================================================
// Write Failure Tests
// =============================================================================

#[test]
fn test_oversized_value_rejected_and_neighbours_survive() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(config_for(&temp_dir)).unwrap();
        engine.put(b"small", b"1").unwrap();

        let big = vec![0u8; MAX_PAYLOAD_LEN + 1];
        assert!(matches!(
            engine.put(b"big", &big),
            Err(StrataError::InvalidArgument(_))
        ));
        assert_eq!(engine.get(b"big").unwrap(), None);

        engine.put(b"after", b"2").unwrap();
        assert_eq!(engine.last_sequence(), 2);
    }

    let engine = Engine::open(config_for(&temp_dir)).unwrap();
    assert_eq!(engine.get(b"small").unwrap(), Some(b"1".to_vec()));
    assert_eq!(engine.get(b"big").unwrap(), None);
    assert_eq!(engine.get(b"after").unwrap(), Some(b"2".to_vec()));
}

#[test]
fn test_failed_flush_keeps_wal_and_data() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(config_for(&temp_dir)).unwrap();
        engine.put(b"a", b"1").unwrap();
        engine.put(b"b", b"2").unwrap();

        // A plain file where the segment directory should be
        let segment_dir = engine.segment_dir().to_path_buf();
        fs::remove_dir_all(&segment_dir).unwrap();
        fs::write(&segment_dir, b"not a directory").unwrap();

        assert!(engine.flush().is_err());

        // The frozen buffer still serves reads and its log is kept
        assert_eq!(engine.frozen_count(), 1);
        assert_eq!(engine.segment_count(), 0);
        assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
        let pairs: Vec<_> = engine.iter(Direction::Forward).unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(
            pairs,
            vec![(b"a".to_vec(), b"1".to_vec()), (b"b".to_vec(), b"2".to_vec())]
        );
        assert!(engine.wal_dir().join("wal_000001.log").exists());

        engine.put(b"c", b"3").unwrap();
        drop(engine);

        fs::remove_file(&segment_dir).unwrap();
    }

    let engine = Engine::open(config_for(&temp_dir)).unwrap();
    assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(engine.get(b"b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(engine.get(b"c").unwrap(), Some(b"3".to_vec()));
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_writers_and_readers() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .wal_sync_strategy(WalSyncStrategy::EveryNEntries { count: 64 })
        .memtable_size_limit(4 * 1024)
        .compaction_trigger(4)
        .build();
    let engine = Arc::new(Engine::open(config).unwrap());

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..200 {
                    let key = format!("t{}-{:04}", t, i);
                    engine.put(key.as_bytes(), key.as_bytes()).unwrap();
                }
            })
        })
        .collect();

    let reader = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            for _ in 0..50 {
                let keys: Vec<_> = engine
                    .iter(stratakv::Direction::Forward)
                    .unwrap()
                    .map(|r| r.unwrap().0)
                    .collect();
                assert!(keys.windows(2).all(|w| w[0] < w[1]));
            }
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    reader.join().unwrap();

    assert_eq!(engine.last_sequence(), 800);
    for t in 0..4 {
        for i in 0..200 {
            let key = format!("t{}-{:04}", t, i);
            assert_eq!(engine.get(key.as_bytes()).unwrap(), Some(key.into_bytes()));
        }
    }
}
