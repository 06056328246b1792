//! Index snapshot
//!
//! Serde model of `index.json`. The live tree is converted into records on
//! save and rebuilt from them on load; children and entries are sorted so
//! identical trees produce identical files.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{HdbError, Result};

use super::{FileEntry, Folder, StorageFileId};

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Complete persisted state of a database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub version: u32,
    pub target_file_size: usize,
    #[serde(default)]
    pub storage_files: Vec<StorageFileRecord>,
    pub root: FolderRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageFileRecord {
    pub id: StorageFileId,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderRecord {
    pub name: String,
    #[serde(default)]
    pub storage_file: Option<StorageFileId>,
    #[serde(default)]
    pub files: Vec<FileRecord>,
    #[serde(default)]
    pub children: Vec<FolderRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub hash: u64,
    pub last_accessed: u64,
    pub start: usize,
    pub end: usize,
}

impl IndexSnapshot {
    /// Capture the tree and storage file sizes
    pub fn capture(root: &Folder, storage_files: Vec<StorageFileRecord>, target_file_size: usize) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            target_file_size,
            storage_files,
            root: FolderRecord::from_folder(root),
        }
    }

    /// Rebuild the live tree
    ///
    /// Fails on unknown versions and inverted ranges.
    pub fn into_tree(self) -> Result<(Folder, Vec<StorageFileRecord>)> {
        if self.version != SNAPSHOT_VERSION {
            return Err(HdbError::Snapshot(format!(
                "unsupported index version {}",
                self.version
            )));
        }
        let root = self.root.into_folder()?;
        Ok((root, self.storage_files))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a snapshot file; `Ok(None)` when it does not exist
    pub fn read(path: &Path) -> Result<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(json) => Self::from_json(&json).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write through a temporary file and rename, so readers never see half a snapshot
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl FolderRecord {
    fn from_folder(folder: &Folder) -> Self {
        let mut files: Vec<FileRecord> = folder
            .files
            .iter()
            .map(|(&hash, entry)| FileRecord {
                hash,
                last_accessed: entry.last_accessed_millis(),
                start: entry.range.start,
                end: entry.range.end,
            })
            .collect();
        files.sort_by_key(|file| file.hash);

        let mut children: Vec<FolderRecord> = folder.children.values().map(Self::from_folder).collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));

        Self {
            name: folder.name.clone(),
            storage_file: folder.storage_file,
            files,
            children,
        }
    }

    fn into_folder(self) -> Result<Folder> {
        let mut folder = Folder::new(self.name);
        folder.storage_file = self.storage_file;

        for file in self.files {
            if file.start > file.end {
                return Err(HdbError::Snapshot(format!(
                    "entry {} in folder {:?} has inverted range {}..{}",
                    file.hash, folder.name, file.start, file.end
                )));
            }
            folder
                .files
                .insert(file.hash, FileEntry::new(file.last_accessed, file.start..file.end));
        }

        for child in self.children {
            let child = child.into_folder()?;
            folder.children.insert(child.name.clone(), child);
        }

        Ok(folder)
    }
}
