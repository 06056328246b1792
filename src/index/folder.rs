//! Folder tree
//!
//! Folders own their children and entries. Byte ranges are owned by the
//! storage file's allocator; the copy kept here is refreshed whenever the
//! allocator relocates entries.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::key::HdbKey;

use super::StorageFileId;

/// A stored blob's bookkeeping
#[derive(Debug)]
pub struct FileEntry {
    /// Unix millis of the last read or write; readers update it under a shared lock
    last_accessed: AtomicU64,

    /// Location inside the owning storage file
    pub range: Range<usize>,
}

impl FileEntry {
    pub fn new(last_accessed_millis: u64, range: Range<usize>) -> Self {
        Self {
            last_accessed: AtomicU64::new(last_accessed_millis),
            range,
        }
    }

    pub fn last_accessed_millis(&self) -> u64 {
        self.last_accessed.load(Ordering::Relaxed)
    }

    pub fn touch(&self, now_millis: u64) {
        self.last_accessed.fetch_max(now_millis, Ordering::Relaxed);
    }
}

impl Clone for FileEntry {
    fn clone(&self) -> Self {
        Self::new(self.last_accessed_millis(), self.range.clone())
    }
}

/// What a prune pass took out of the tree
#[derive(Debug, Default)]
pub struct PruneReport {
    /// Entries dropped because they were stale
    pub removed: Vec<(StorageFileId, HdbKey, Range<usize>)>,

    /// Empty folders dropped while they still held a storage assignment
    pub released: Vec<(StorageFileId, Vec<String>)>,

    /// Entries removed from folders without a storage file
    pub removed_unassigned: usize,

    /// Empty folders dropped
    pub folders_removed: usize,
}

impl PruneReport {
    pub fn changed(&self) -> bool {
        !self.removed.is_empty() || self.removed_unassigned > 0 || self.folders_removed > 0
    }
}

/// One node of the hierarchy
#[derive(Debug, Default, Clone)]
pub struct Folder {
    pub name: String,
    pub children: HashMap<String, Folder>,
    pub files: HashMap<u64, FileEntry>,

    /// Storage file holding this folder's blobs, assigned on first write
    pub storage_file: Option<StorageFileId>,
}

impl Folder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// The unnamed root
    pub fn root() -> Self {
        Self::default()
    }

    /// No children and no entries
    pub fn is_empty(&self) -> bool {
        self.children.is_empty() && self.files.is_empty()
    }

    /// Descend along `path`; `None` when a segment is missing
    pub fn find<S: AsRef<str>>(&self, path: &[S]) -> Option<&Folder> {
        let mut folder = self;
        for segment in path {
            folder = folder.children.get(segment.as_ref())?;
        }
        Some(folder)
    }

    pub fn find_mut<S: AsRef<str>>(&mut self, path: &[S]) -> Option<&mut Folder> {
        let mut folder = self;
        for segment in path {
            folder = folder.children.get_mut(segment.as_ref())?;
        }
        Some(folder)
    }

    /// Descend along `path`, creating missing folders
    pub fn get_or_create<S: AsRef<str>>(&mut self, path: &[S]) -> &mut Folder {
        let mut folder = self;
        for segment in path {
            let segment = segment.as_ref();
            folder = folder
                .children
                .entry(segment.to_string())
                .or_insert_with(|| Folder::new(segment));
        }
        folder
    }

    /// Drop entries last touched before `cutoff_millis`, then empty child folders
    ///
    /// Works bottom-up, so a folder emptied by its children's pruning is
    /// removed by its parent in the same pass. `path` is this folder's path.
    pub fn prune(&mut self, cutoff_millis: Option<u64>, path: &mut Vec<String>, report: &mut PruneReport) {
        for (name, child) in self.children.iter_mut() {
            path.push(name.clone());
            child.prune(cutoff_millis, path, report);
            path.pop();
        }

        if let Some(cutoff) = cutoff_millis {
            let storage_file = self.storage_file;
            self.files.retain(|&hash, entry| {
                if entry.last_accessed_millis() >= cutoff {
                    return true;
                }
                match storage_file {
                    Some(id) => report.removed.push((
                        id,
                        HdbKey {
                            path: path.clone(),
                            hash,
                        },
                        entry.range.clone(),
                    )),
                    None => report.removed_unassigned += 1,
                }
                false
            });
        }

        self.children.retain(|name, child| {
            if !child.is_empty() {
                return true;
            }
            if let Some(id) = child.storage_file {
                let mut child_path = path.clone();
                child_path.push(name.clone());
                report.released.push((id, child_path));
            }
            report.folders_removed += 1;
            false
        });
    }

    /// Call `visit` for this folder and every descendant, with its path
    pub fn walk<F: FnMut(&[String], &Folder)>(&self, visit: &mut F) {
        let mut path = Vec::new();
        self.walk_inner(&mut path, visit);
    }

    fn walk_inner<F: FnMut(&[String], &Folder)>(&self, path: &mut Vec<String>, visit: &mut F) {
        visit(path, self);
        for (name, child) in &self.children {
            path.push(name.clone());
            child.walk_inner(path, visit);
            path.pop();
        }
    }

    /// Number of folders below this one (excluding itself)
    pub fn descendant_count(&self) -> usize {
        self.children
            .values()
            .map(|child| 1 + child.descendant_count())
            .sum()
    }

    /// Number of entries in this folder and below
    pub fn entry_count(&self) -> usize {
        self.files.len() + self.children.values().map(Folder::entry_count).sum::<usize>()
    }
}
