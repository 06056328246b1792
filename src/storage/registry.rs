//! Storage Registry
//!
//! Tracks every backing file and decides where new folders store blobs.
//!
//! ## Responsibilities
//! - Pick a storage file with room, or create the next one
//! - Track owning folders so their entries can be found again
//! - Flag files that lost entries for later repacking
//! - Rebuild allocator state from a loaded index snapshot

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

use parking_lot::{Mutex, MutexGuard};

use crate::allocator::StorageAllocator;
use crate::index::{Folder, StorageFileRecord, StorageFileId};
use crate::key::HdbKey;

/// One backing file and the layout of its bytes
#[derive(Debug, Clone)]
pub struct StorageFile {
    id: StorageFileId,

    /// Length of the logical buffer (what `<id>.<ext>` must hold)
    pub(crate) size: usize,

    /// Lost an entry since the last optimization
    pub(crate) dirty: bool,

    /// Paths of folders assigned to this file
    folders: BTreeSet<Vec<String>>,

    /// Placement of every non-empty entry
    pub(crate) allocator: StorageAllocator<HdbKey>,
}

impl StorageFile {
    pub fn new(id: StorageFileId) -> Self {
        Self {
            id,
            size: 0,
            dirty: false,
            folders: BTreeSet::new(),
            allocator: StorageAllocator::new(),
        }
    }

    pub fn id(&self) -> StorageFileId {
        self.id
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn folders(&self) -> impl Iterator<Item = &Vec<String>> + '_ {
        self.folders.iter()
    }

    pub fn allocator(&self) -> &StorageAllocator<HdbKey> {
        &self.allocator
    }

    pub fn live_bytes(&self) -> usize {
        self.allocator.live_bytes()
    }

    /// File name inside the storage directory
    pub fn file_name(&self, extension: &str) -> String {
        file_name(self.id, extension)
    }

    /// Forget every placement (used when the file's bytes cannot be trusted)
    pub(crate) fn reset(&mut self) {
        self.allocator.clear();
        self.size = 0;
    }
}

/// `<id>.<ext>`
pub fn file_name(id: StorageFileId, extension: &str) -> String {
    format!("{}.{}", id, extension)
}

/// Registry of storage files
///
/// ## Concurrency:
/// - `files`: Protected by its own Mutex, separate from the folder tree lock
/// - Callers that already hold the tree lock take this one second
/// - All methods use `&self` (no exclusive access needed)
pub struct StorageRegistry {
    /// Preferred maximum size of one storage file
    target_file_size: usize,

    /// Storage files by id
    files: Mutex<BTreeMap<StorageFileId, StorageFile>>,
}

impl StorageRegistry {
    pub fn new(target_file_size: usize) -> Self {
        Self {
            target_file_size,
            files: Mutex::new(BTreeMap::new()),
        }
    }

    /// Direct access for multi-step updates
    pub fn lock(&self) -> MutexGuard<'_, BTreeMap<StorageFileId, StorageFile>> {
        self.files.lock()
    }

    /// First storage file (lowest id) that can take `required` more bytes
    /// without passing the target size, or a new one with the next id
    pub fn find_or_create(&self, required: usize) -> StorageFileId {
        let mut files = self.files.lock();

        let fitting = files.values().find(|file| {
            file.size
                .checked_add(required)
                .is_some_and(|total| total <= self.target_file_size)
        });
        if let Some(file) = fitting {
            return file.id;
        }

        let id = files.keys().next_back().map(|&id| id + 1).unwrap_or(1);
        files.insert(id, StorageFile::new(id));
        tracing::debug!("Created storage file {} for a {} byte blob", id, required);
        id
    }

    /// Record `path` as an owner of storage file `id`, creating the entry if needed
    pub fn assign(&self, id: StorageFileId, path: &[String]) {
        let mut files = self.files.lock();
        files
            .entry(id)
            .or_insert_with(|| StorageFile::new(id))
            .folders
            .insert(path.to_vec());
    }

    /// Forget `path` as an owner of storage file `id`
    pub fn release(&self, id: StorageFileId, path: &[String]) {
        if let Some(file) = self.files.lock().get_mut(&id) {
            file.folders.remove(path);
        }
    }

    /// Flag a file that lost entries; never call while holding `lock()`
    pub fn mark_dirty(&self, id: StorageFileId) -> bool {
        match self.files.lock().get_mut(&id) {
            Some(file) => {
                file.dirty = true;
                true
            }
            None => false,
        }
    }

    pub fn dirty_ids(&self) -> Vec<StorageFileId> {
        self.files
            .lock()
            .values()
            .filter(|file| file.dirty)
            .map(|file| file.id)
            .collect()
    }

    /// Drop storage files with no bytes and no owning folders
    pub fn drop_unused(&self) -> Vec<StorageFileId> {
        let mut files = self.files.lock();
        let unused: Vec<StorageFileId> = files
            .values()
            .filter(|file| file.size == 0 && file.folders.is_empty() && file.allocator.is_empty())
            .map(|file| file.id)
            .collect();
        for id in &unused {
            files.remove(id);
        }
        unused
    }

    /// Copy of one storage file's state (for inspection)
    pub fn snapshot_of(&self, id: StorageFileId) -> Option<StorageFile> {
        self.files.lock().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.files.lock().len()
    }

    /// Id and size of every storage file, for the index snapshot
    pub fn records(&self) -> Vec<StorageFileRecord> {
        self.files
            .lock()
            .values()
            .map(|file| StorageFileRecord {
                id: file.id,
                size: file.size,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.files.lock().clear();
    }

    /// Replace all state with what a loaded snapshot describes
    ///
    /// Entries of a storage file whose ranges overlap are dropped from the
    /// tree (their bytes cannot be told apart), keeping empty entries.
    pub fn rebuild(&self, records: Vec<StorageFileRecord>, root: &mut Folder) {
        let mut placements: BTreeMap<StorageFileId, Vec<(HdbKey, Range<usize>)>> = BTreeMap::new();
        let mut owners: BTreeMap<StorageFileId, BTreeSet<Vec<String>>> = BTreeMap::new();

        root.walk(&mut |path, folder| {
            let Some(id) = folder.storage_file else {
                return;
            };
            owners.entry(id).or_default().insert(path.to_vec());
            let list = placements.entry(id).or_default();
            for (&hash, entry) in &folder.files {
                if !entry.range.is_empty() {
                    list.push((
                        HdbKey {
                            path: path.to_vec(),
                            hash,
                        },
                        entry.range.clone(),
                    ));
                }
            }
        });

        let mut files = self.files.lock();
        files.clear();
        for record in records {
            let mut file = StorageFile::new(record.id);
            file.size = record.size;
            files.insert(record.id, file);
        }

        for (id, folders) in owners {
            let file = files.entry(id).or_insert_with(|| StorageFile::new(id));
            let allocator = StorageAllocator::from_entries(placements.remove(&id).unwrap_or_default(), 0);
            file.size = file.size.max(allocator.high_water_mark());

            if allocator.verify_layout(file.size) {
                file.allocator = allocator;
            } else {
                tracing::warn!("Storage file {} has overlapping entries, dropping them", id);
                for path in &folders {
                    if let Some(folder) = root.find_mut(path) {
                        folder.files.retain(|_, entry| entry.range.is_empty());
                    }
                }
                file.reset();
            }
            file.folders = folders;
        }
    }
}
