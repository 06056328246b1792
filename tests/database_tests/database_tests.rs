//! Tests for HierarchicalDatabase
//!
//! These tests verify:
//! - Basic get/put/delete operations
//! - Folder and storage file assignment
//! - Persistence across reopen
//! - Corruption recovery
//! - Background reads
//! - Storage file optimization after deletes
//! - The flat key view

use std::fs;
use std::time::Duration;

use crossbeam::channel;
use hdbstore::{Config, FlatDatabase, HdbError, HdbKey, HierarchicalDatabase, ReadMode};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn test_config(dir: &std::path::Path) -> Config {
    Config::builder()
        .storage_dir(dir)
        .name("test")
        .deletion_timeout_ms(None)
        .build()
}

fn setup_temp_database() -> (TempDir, HierarchicalDatabase) {
    let temp_dir = TempDir::new().unwrap();
    let database = HierarchicalDatabase::open(test_config(temp_dir.path())).unwrap();
    (temp_dir, database)
}

fn reopen(temp_dir: &TempDir, database: HierarchicalDatabase) -> HierarchicalDatabase {
    database.close().unwrap();
    HierarchicalDatabase::open(test_config(temp_dir.path())).unwrap()
}

fn value(byte: u8, len: usize) -> Vec<u8> {
    vec![byte; len]
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_open_creates_directory() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("nested").join("db");

    let database = HierarchicalDatabase::open(test_config(&dir)).unwrap();

    assert!(dir.is_dir());
    assert_eq!(database.storage_dir(), dir.as_path());
    assert_eq!(database.stats().entries, 0);
}

#[test]
fn test_put_get_round_trip() {
    let (_temp, database) = setup_temp_database();

    database.put(&["assets", "textures"], 42, b"pixels").unwrap();
    let result = database.get(&["assets", "textures"], 42).unwrap().unwrap();

    assert_eq!(result.as_slice(), b"pixels");
}

#[test]
fn test_get_missing_is_none() {
    let (_temp, database) = setup_temp_database();
    database.put(&["a"], 1, b"x").unwrap();

    assert!(database.get(&["a"], 2).unwrap().is_none());
    assert!(database.get(&["b"], 1).unwrap().is_none());
    assert!(database.get(&["a", "deeper"], 1).unwrap().is_none());
}

#[test]
fn test_put_overwrites() {
    let (_temp, database) = setup_temp_database();

    database.put(&["a"], 1, b"short").unwrap();
    database.put(&["a"], 1, b"a much longer value").unwrap();
    assert_eq!(database.get(&["a"], 1).unwrap().unwrap().as_slice(), b"a much longer value");

    database.put(&["a"], 1, b"tiny").unwrap();
    assert_eq!(database.get(&["a"], 1).unwrap().unwrap().as_slice(), b"tiny");
    assert_eq!(database.stats().entries, 1);
}

#[test]
fn test_empty_value_never_touches_disk() {
    let (_temp, database) = setup_temp_database();

    database.put(&["empty"], 7, b"").unwrap();

    let result = database.get(&["empty"], 7).unwrap().unwrap();
    assert!(result.is_empty());

    let id = database.storage_file_of(&["empty"]).unwrap();
    assert!(!database.backing_file_path(id).exists());
}

#[test]
fn test_root_folder_entries() {
    let (_temp, database) = setup_temp_database();
    let empty: [&str; 0] = [];

    database.put(&empty, 3, b"at root").unwrap();
    assert_eq!(database.get_key(&HdbKey::root(3)).unwrap().unwrap().as_slice(), b"at root");
}

#[test]
fn test_many_values_in_one_folder() {
    let (_temp, database) = setup_temp_database();

    for hash in 0..200u64 {
        database.put(&["bulk"], hash, &value(hash as u8, 1 + hash as usize % 37)).unwrap();
    }
    for hash in 0..200u64 {
        let result = database.get(&["bulk"], hash).unwrap().unwrap();
        assert_eq!(result.to_vec(), value(hash as u8, 1 + hash as usize % 37));
    }

    let stats = database.stats();
    assert_eq!(stats.entries, 200);
    assert_eq!(stats.storage_files, 1);
}

// =============================================================================
// Delete Tests
// =============================================================================

#[test]
fn test_delete_is_idempotent() {
    let (_temp, database) = setup_temp_database();
    database.put(&["a"], 1, b"value").unwrap();

    assert!(database.delete(&["a"], 1).unwrap());
    assert!(database.get(&["a"], 1).unwrap().is_none());
    assert!(!database.delete(&["a"], 1).unwrap());
    assert!(!database.delete(&["missing"], 1).unwrap());
}

#[test]
fn test_delete_keeps_other_entries() {
    let (_temp, database) = setup_temp_database();
    for hash in 0..10u64 {
        database.put(&["a"], hash, &value(hash as u8, 50)).unwrap();
    }

    for hash in (0..10u64).step_by(2) {
        assert!(database.delete(&["a"], hash).unwrap());
    }

    for hash in (1..10u64).step_by(2) {
        assert_eq!(database.get(&["a"], hash).unwrap().unwrap().to_vec(), value(hash as u8, 50));
    }
}

#[test]
fn test_delete_shrinks_fragmented_file() {
    let (_temp, database) = setup_temp_database();
    for hash in 1..=4u64 {
        database.put(&["f"], hash, &value(hash as u8, 100)).unwrap();
    }
    let id = database.storage_file_of(&["f"]).unwrap();
    let path = database.backing_file_path(id);
    assert!(fs::metadata(&path).unwrap().len() >= 400);

    for hash in 1..=3u64 {
        database.delete(&["f"], hash).unwrap();
    }

    // Only 100 of 400 bytes are live, so the file is repacked
    assert_eq!(fs::metadata(&path).unwrap().len(), 100);
    assert_eq!(database.storage_file(id).unwrap().size(), 100);
    assert_eq!(database.get(&["f"], 4).unwrap().unwrap().to_vec(), value(4, 100));

    database.delete(&["f"], 4).unwrap();
    assert!(!path.exists());
}

#[test]
fn test_delete_folder() {
    let (_temp, database) = setup_temp_database();
    database.put(&["p"], 1, b"one").unwrap();
    database.put(&["p"], 2, b"two").unwrap();
    database.put(&["p", "child"], 3, b"three").unwrap();

    assert!(database.delete_folder(&["p"]).unwrap());
    assert!(database.get(&["p"], 1).unwrap().is_none());
    assert!(database.get(&["p"], 2).unwrap().is_none());
    assert_eq!(database.get(&["p", "child"], 3).unwrap().unwrap().as_slice(), b"three");
    assert!(!database.delete_folder(&["p"]).unwrap());
}

#[test]
fn test_delete_all() {
    let (_temp, database) = setup_temp_database();
    database.put(&["a"], 1, b"one").unwrap();
    database.put(&["b"], 2, b"two").unwrap();
    database.flush().unwrap();

    database.delete_all().unwrap();

    assert!(database.get(&["a"], 1).unwrap().is_none());
    let stats = database.stats();
    assert_eq!(stats.storage_files, 0);
    assert_eq!(stats.folders, 0);
    assert_eq!(stats.entries, 0);
    assert_eq!(stats.allocated_bytes, 0);
    assert!(fs::read_dir(database.storage_dir()).unwrap().next().is_none());

    // Still usable afterwards
    database.put(&["a"], 1, b"again").unwrap();
    assert_eq!(database.get(&["a"], 1).unwrap().unwrap().as_slice(), b"again");
}

// =============================================================================
// Storage File Assignment Tests
// =============================================================================

#[test]
fn test_folders_share_file_until_target_size() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .storage_dir(temp_dir.path())
        .deletion_timeout_ms(None)
        .target_file_size(1_000)
        .build();
    let database = HierarchicalDatabase::open(config).unwrap();

    database.put(&["a"], 1, &value(1, 10)).unwrap();
    database.put(&["b"], 1, &value(2, 10)).unwrap();
    assert_eq!(database.storage_file_of(&["a"]), database.storage_file_of(&["b"]));

    // Growth past the target pushes new folders into a new file
    database.put(&["a"], 2, &value(3, 900)).unwrap();
    database.put(&["c"], 1, &value(4, 10)).unwrap();
    assert_ne!(database.storage_file_of(&["a"]), database.storage_file_of(&["c"]));

    assert_eq!(database.get(&["b"], 1).unwrap().unwrap().to_vec(), value(2, 10));
    assert_eq!(database.get(&["a"], 2).unwrap().unwrap().to_vec(), value(3, 900));
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_reopen_restores_data() {
    let (temp_dir, database) = setup_temp_database();
    for hash in 0..20u64 {
        database.put(&["x", "y"], hash, &value(hash as u8, 64)).unwrap();
    }
    database.put(&["z"], 1, b"").unwrap();

    let database = reopen(&temp_dir, database);

    for hash in 0..20u64 {
        assert_eq!(database.get(&["x", "y"], hash).unwrap().unwrap().to_vec(), value(hash as u8, 64));
    }
    assert!(database.get(&["z"], 1).unwrap().unwrap().is_empty());
    assert_eq!(database.stats().entries, 21);
}

#[test]
fn test_reopen_after_delete_and_reinsert() {
    let (temp_dir, database) = setup_temp_database();
    database.put(&["a"], 1, &value(1, 30)).unwrap();
    database.put(&["a"], 2, &value(2, 30)).unwrap();
    database.delete(&["a"], 1).unwrap();
    database.put(&["a"], 3, &value(3, 20)).unwrap();

    let database = reopen(&temp_dir, database);

    assert!(database.get(&["a"], 1).unwrap().is_none());
    assert_eq!(database.get(&["a"], 2).unwrap().unwrap().to_vec(), value(2, 30));
    assert_eq!(database.get(&["a"], 3).unwrap().unwrap().to_vec(), value(3, 20));

    // Allocator state was rebuilt, so new writes do not clobber old ones
    database.put(&["a"], 4, &value(4, 25)).unwrap();
    assert_eq!(database.get(&["a"], 2).unwrap().unwrap().to_vec(), value(2, 30));
    assert_eq!(database.get(&["a"], 4).unwrap().unwrap().to_vec(), value(4, 25));
}

#[test]
fn test_drop_after_deferred_flush_restores_data() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .storage_dir(temp_dir.path())
        .deletion_timeout_ms(None)
        .flush_interval_ms(50)
        .flush_retry_delay_ms(10)
        .build();
    let database = HierarchicalDatabase::open(config.clone()).unwrap();

    // Enough growth to force compactions, plus deletes and empty overwrites
    for hash in 0..40u64 {
        database.put(&["burst", "a"], hash, &value(hash as u8, 48)).unwrap();
        database.put(&["burst", "b"], hash, &value(hash as u8 + 100, 24)).unwrap();
    }
    for hash in (0..40u64).step_by(4) {
        database.delete(&["burst", "a"], hash).unwrap();
        database.put(&["burst", "b"], hash, b"").unwrap();
    }

    std::thread::sleep(Duration::from_millis(300));
    drop(database);

    let database = HierarchicalDatabase::open(config).unwrap();
    for hash in 0..40u64 {
        let a = database.get(&["burst", "a"], hash).unwrap();
        let b = database.get(&["burst", "b"], hash).unwrap().unwrap();
        if hash % 4 == 0 {
            assert!(a.is_none());
            assert!(b.is_empty());
        } else {
            assert_eq!(a.unwrap().to_vec(), value(hash as u8, 48));
            assert_eq!(b.to_vec(), value(hash as u8 + 100, 24));
        }
    }
}

#[test]
fn test_broken_index_starts_empty() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("index.json"), b"garbage").unwrap();

    let database = HierarchicalDatabase::open(test_config(temp_dir.path())).unwrap();

    assert_eq!(database.stats().entries, 0);
    database.put(&["a"], 1, b"fresh").unwrap();
    assert_eq!(database.get(&["a"], 1).unwrap().unwrap().as_slice(), b"fresh");
}

#[test]
fn test_clear_memory_reloads_index() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .storage_dir(temp_dir.path())
        .deletion_timeout_ms(None)
        .flush_interval_ms(60_000)
        .build();
    let database = HierarchicalDatabase::open(config).unwrap();

    database.put(&["a"], 1, b"flushed").unwrap();
    database.flush().unwrap();
    database.put(&["a"], 2, b"not yet flushed").unwrap();

    database.clear_memory();

    assert_eq!(database.get(&["a"], 1).unwrap().unwrap().as_slice(), b"flushed");
    assert!(database.get(&["a"], 2).unwrap().is_none());
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_truncated_file_is_recovered_on_put() {
    let (temp_dir, database) = setup_temp_database();
    database.put(&["c"], 1, &value(1, 100)).unwrap();
    database.put(&["c"], 2, b"").unwrap();
    let id = database.storage_file_of(&["c"]).unwrap();
    let path = database.backing_file_path(id);

    let database = reopen(&temp_dir, database);
    fs::write(&path, b"short").unwrap();

    database.put(&["c"], 3, b"after recovery").unwrap();

    assert!(database.get(&["c"], 1).unwrap().is_none());
    assert!(database.get(&["c"], 2).unwrap().unwrap().is_empty());
    assert_eq!(database.get(&["c"], 3).unwrap().unwrap().as_slice(), b"after recovery");
}

#[test]
fn test_truncated_file_fails_get() {
    let (temp_dir, database) = setup_temp_database();
    database.put(&["c"], 1, &value(1, 100)).unwrap();
    let id = database.storage_file_of(&["c"]).unwrap();
    let path = database.backing_file_path(id);

    let database = reopen(&temp_dir, database);
    fs::write(&path, b"short").unwrap();

    assert!(matches!(database.get(&["c"], 1), Err(HdbError::Storage(_))));
}

// =============================================================================
// Background Read Tests
// =============================================================================

#[test]
fn test_get_async_delivers_value() {
    let (_temp, database) = setup_temp_database();
    database.put(&["async"], 5, b"later").unwrap();

    let (tx, rx) = channel::bounded(1);
    database
        .get_async(&["async"], 5, move |result| {
            tx.send(result.map(|slice| slice.map(|s| s.to_vec()))).unwrap();
        })
        .unwrap();

    let result = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
    assert_eq!(result, Some(b"later".to_vec()));
}

#[test]
fn test_get_async_miss() {
    let (_temp, database) = setup_temp_database();

    let (tx, rx) = channel::bounded(1);
    database
        .get_async(&["nothing"], 5, move |result| {
            tx.send(result.map(|slice| slice.is_none())).unwrap();
        })
        .unwrap();

    assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap());
}

#[test]
fn test_fetch_modes() {
    let (_temp, database) = setup_temp_database();
    database.put(&["m"], 1, b"mode").unwrap();

    for mode in [ReadMode::Blocking, ReadMode::Background] {
        let (tx, rx) = channel::bounded(1);
        database
            .fetch(&["m"], 1, mode, move |result| {
                tx.send(result.unwrap().unwrap().to_vec()).unwrap();
            })
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), b"mode".to_vec());
    }
}

#[test]
fn test_concurrent_readers_and_writer() {
    let (_temp, database) = setup_temp_database();
    for hash in 0..50u64 {
        database.put(&["shared"], hash, &value(hash as u8, 16)).unwrap();
    }

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let database = database.clone();
            std::thread::spawn(move || {
                for _ in 0..20 {
                    for hash in 0..50u64 {
                        let result = database.get(&["shared"], hash).unwrap().unwrap();
                        assert_eq!(result.to_vec(), value(hash as u8, 16));
                    }
                }
            })
        })
        .collect();

    for hash in 50..150u64 {
        database.put(&["shared"], hash, &value(hash as u8, 16)).unwrap();
    }

    for reader in readers {
        reader.join().unwrap();
    }
}

// =============================================================================
// Flat Database Tests
// =============================================================================

#[test]
fn test_flat_database() {
    let (_temp, database) = setup_temp_database();
    let flat = FlatDatabase::new(database.clone());

    flat.put(11, b"single").unwrap();
    flat.put_pair(3, 4, b"pair").unwrap();

    assert_eq!(flat.get(11).unwrap().unwrap().as_slice(), b"single");
    assert_eq!(flat.get_pair(3, 4).unwrap().unwrap().as_slice(), b"pair");
    assert_eq!(database.get(&["11"], 11).unwrap().unwrap().as_slice(), b"single");
    assert_eq!(database.get(&["3", "4"], 4).unwrap().unwrap().as_slice(), b"pair");

    assert!(flat.delete(11).unwrap());
    assert!(flat.get(11).unwrap().is_none());
    assert!(flat.delete_pair(3, 4).unwrap());
    assert!(!flat.delete_pair(3, 4).unwrap());
}
