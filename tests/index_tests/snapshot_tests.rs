//! Tests for the index snapshot
//!
//! These tests verify:
//! - Tree capture and restore through JSON
//! - Atomic writes to disk
//! - Rejection of broken snapshots

use std::fs;

use hdbstore::error::HdbError;
use hdbstore::index::{FileEntry, Folder, IndexSnapshot, StorageFileRecord, SNAPSHOT_VERSION};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn sample_tree() -> Folder {
    let mut root = Folder::root();

    let textures = root.get_or_create(&["assets", "textures"]);
    textures.storage_file = Some(1);
    textures.files.insert(10, FileEntry::new(1_000, 0..100));
    textures.files.insert(11, FileEntry::new(2_000, 100..250));

    let meshes = root.get_or_create(&["assets", "meshes"]);
    meshes.storage_file = Some(2);
    meshes.files.insert(5, FileEntry::new(3_000, 0..40));
    meshes.files.insert(6, FileEntry::new(3_000, 0..0));

    root
}

fn sample_records() -> Vec<StorageFileRecord> {
    vec![
        StorageFileRecord { id: 1, size: 500 },
        StorageFileRecord { id: 2, size: 40 },
    ]
}

// =============================================================================
// Round Trip Tests
// =============================================================================

#[test]
fn test_snapshot_restores_tree() {
    let snapshot = IndexSnapshot::capture(&sample_tree(), sample_records(), 1_000);
    let json = snapshot.to_json().unwrap();

    let (root, records) = IndexSnapshot::from_json(&json).unwrap().into_tree().unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].size, 500);

    let textures = root.find(&["assets", "textures"]).unwrap();
    assert_eq!(textures.name, "textures");
    assert_eq!(textures.storage_file, Some(1));
    assert_eq!(textures.files[&11].range, 100..250);
    assert_eq!(textures.files[&11].last_accessed_millis(), 2_000);

    let meshes = root.find(&["assets", "meshes"]).unwrap();
    assert!(meshes.files[&6].range.is_empty());
    assert_eq!(root.entry_count(), 4);
    assert_eq!(root.find(&["assets"]).unwrap().storage_file, None);
}

#[test]
fn test_snapshot_json_layout() {
    let snapshot = IndexSnapshot::capture(&sample_tree(), sample_records(), 1_000);
    let value: serde_json::Value = serde_json::from_str(&snapshot.to_json().unwrap()).unwrap();

    assert_eq!(value["version"], SNAPSHOT_VERSION);
    assert_eq!(value["target_file_size"], 1_000);
    assert_eq!(value["storage_files"][0]["id"], 1);
    assert_eq!(value["root"]["name"], "");
    assert_eq!(value["root"]["children"][0]["name"], "assets");
}

// =============================================================================
// Disk Tests
// =============================================================================

#[test]
fn test_write_then_read() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("index.json");

    IndexSnapshot::capture(&sample_tree(), sample_records(), 1_000)
        .write(&path)
        .unwrap();

    assert!(path.exists());
    assert!(!temp_dir.path().join("index.json.tmp").exists());

    let snapshot = IndexSnapshot::read(&path).unwrap().unwrap();
    assert_eq!(snapshot.storage_files.len(), 2);
}

#[test]
fn test_read_missing_file() {
    let temp_dir = TempDir::new().unwrap();
    let result = IndexSnapshot::read(&temp_dir.path().join("index.json")).unwrap();
    assert!(result.is_none());
}

#[test]
fn test_read_garbage_fails() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("index.json");
    fs::write(&path, b"{ not json").unwrap();

    assert!(matches!(IndexSnapshot::read(&path), Err(HdbError::Serialization(_))));
}

#[test]
fn test_inverted_range_is_rejected() {
    let json = r#"{
        "version": 1,
        "target_file_size": 100,
        "storage_files": [],
        "root": {
            "name": "",
            "storage_file": 1,
            "files": [{ "hash": 1, "last_accessed": 0, "start": 20, "end": 10 }],
            "children": []
        }
    }"#;

    let snapshot = IndexSnapshot::from_json(json).unwrap();
    assert!(matches!(snapshot.into_tree(), Err(HdbError::Snapshot(_))));
}
