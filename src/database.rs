//! Database Module
//!
//! The hierarchical database that coordinates all components.
//!
//! ## Responsibilities
//! - Resolve and create folders along key paths
//! - Pick storage files and place blobs through their allocators
//! - Patch or rewrite backing files with as little I/O as possible
//! - Recover from backing files shorter than the index expects
//! - Prune stale entries, repack fragmented files, delete orphans
//! - Throttle index snapshot writes

use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use parking_lot::RwLock;

use crate::allocator::{should_optimize, FileAllocation, ReplaceType};
use crate::cache::ByteCache;
use crate::config::Config;
use crate::background::DelayScheduler;
use crate::error::{HdbError, Result};
use crate::flush::{FlushAction, FlushScheduler};
use crate::index::{FileEntry, Folder, IndexSnapshot, PruneReport, StorageFileId};
use crate::key::HdbKey;
use crate::slice::ByteSlice;
use crate::storage::{DiskStore, StorageFile, StorageRegistry};

/// How `fetch` delivers its result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Run the read on the calling thread before returning
    Blocking,

    /// Return immediately; the callback runs on a cache worker thread
    Background,
}

/// Counters describing the current state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseStats {
    pub storage_files: usize,
    pub folders: usize,
    pub entries: usize,
    /// Bytes occupied by live blobs
    pub live_bytes: usize,
    /// Bytes of all backing files (live + gaps + growth slack)
    pub allocated_bytes: usize,
    /// Index snapshots written since open
    pub index_flushes: u64,
}

/// Hierarchical small-object database
///
/// ## Concurrency Model: one coarse lock
///
/// - **Writes** (put/delete/cleanup/delete_all, index snapshots): hold the
///   folder tree's write lock for their whole duration
///   - Then take the storage registry lock when they touch storage files
/// - **Reads** (get): hold the tree's read lock while resolving the entry
///   and fetching its buffer, so range and buffer always match
///   - `last_accessed` is atomic, readers refresh it under the read lock
/// - **Background reads** run the same path on the cache's worker threads
/// - **Deferred flushes** run on the scheduler thread through a `Weak`
///   handle, so they never keep a dropped database alive
///
/// Cloning is cheap and shares the same instance.
#[derive(Clone)]
pub struct HierarchicalDatabase {
    shared: Arc<Shared>,
}

struct Shared {
    /// Database configuration
    config: Config,

    /// Backing files and the index live here
    store: DiskStore,

    /// Recently used backing file contents
    cache: ByteCache,

    /// Folder tree; its write lock serializes all mutation
    root: RwLock<Folder>,

    /// Storage files (internal Mutex)
    registry: StorageRegistry,

    /// Index snapshot throttle
    flush: FlushScheduler,

    /// Runs deferred flush checks
    scheduler: DelayScheduler,
}

impl HierarchicalDatabase {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    pub const INDEX_FILENAME: &'static str = "index.json";

    /// Open or create a database with the given config
    ///
    /// On startup:
    /// 1. Create the storage directory
    /// 2. Load the index snapshot (a broken one is logged and ignored)
    /// 3. Rebuild storage file allocators from it
    /// 4. Drop entries older than the deletion timeout, if one is set
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        // Step 1: Storage directory and collaborators
        let store = DiskStore::open(&config.storage_dir)?;
        let cache = ByteCache::new(
            &config.name,
            config.cache_timeout(),
            config.cache_capacity_bytes,
            config.async_workers,
        )?;
        let scheduler = DelayScheduler::new(&config.name)?;
        let flush = FlushScheduler::new(config.flush_interval(), config.flush_retry_delay());

        // Step 2 + 3: Index and storage files
        let registry = StorageRegistry::new(config.target_file_size);
        let root = load_index(&store, &registry);

        tracing::info!(
            "Opened database '{}' at {} ({} storage files, {} entries)",
            config.name,
            store.root().display(),
            registry.len(),
            root.entry_count()
        );

        let database = Self {
            shared: Arc::new(Shared {
                config,
                store,
                cache,
                root: RwLock::new(root),
                registry,
                flush,
                scheduler,
            }),
        };

        // Step 4: Retention
        if let Some(timeout_ms) = database.shared.config.deletion_timeout_ms {
            database.cleanup(timeout_ms)?;
        }

        Ok(database)
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified storage directory
    pub fn open_path(path: &std::path::Path) -> Result<Self> {
        Self::open(Config::builder().storage_dir(path).build())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Read a blob on the calling thread
    ///
    /// Returns `Ok(None)` when the folder or hash does not exist.
    pub fn get<S: AsRef<str>>(&self, path: &[S], hash: u64) -> Result<Option<ByteSlice>> {
        self.shared.get(path, hash)
    }

    /// Read a blob on a cache worker thread and hand the result to `callback`
    ///
    /// The whole lookup runs on the worker under the read lock, so the
    /// range always matches the buffer it is cut from.
    pub fn get_async<S, F>(&self, path: &[S], hash: u64, callback: F) -> Result<()>
    where
        S: AsRef<str>,
        F: FnOnce(Result<Option<ByteSlice>>) + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        let path = owned_path(path);
        self.shared.cache.spawn(move || callback(shared.get(&path, hash)))
    }

    /// Read a blob, delivering the result according to `mode`
    pub fn fetch<S, F>(&self, path: &[S], hash: u64, mode: ReadMode, callback: F) -> Result<()>
    where
        S: AsRef<str>,
        F: FnOnce(Result<Option<ByteSlice>>) + Send + 'static,
    {
        match mode {
            ReadMode::Blocking => {
                callback(self.get(path, hash));
                Ok(())
            }
            ReadMode::Background => self.get_async(path, hash, callback),
        }
    }

    pub fn get_key(&self, key: &HdbKey) -> Result<Option<ByteSlice>> {
        self.get(&key.path, key.hash)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Store `value` under `path` / `hash`, replacing any previous value
    pub fn put<S: AsRef<str>>(&self, path: &[S], hash: u64, value: &[u8]) -> Result<()> {
        self.shared.put(owned_path(path), hash, value)?;
        Shared::request_flush(&self.shared);
        Ok(())
    }

    pub fn put_key(&self, key: &HdbKey, value: &[u8]) -> Result<()> {
        self.put(&key.path, key.hash, value)
    }

    /// Remove a blob; `Ok(false)` if it did not exist
    ///
    /// The owning storage file is optimized right away.
    pub fn delete<S: AsRef<str>>(&self, path: &[S], hash: u64) -> Result<bool> {
        let removed = self.shared.delete(path, hash)?;
        if removed {
            Shared::request_flush(&self.shared);
        }
        Ok(removed)
    }

    pub fn delete_key(&self, key: &HdbKey) -> Result<bool> {
        self.delete(&key.path, key.hash)
    }

    /// Remove every blob stored directly in the folder at `path`
    ///
    /// Sub-folders are left alone. Returns `Ok(false)` if there was nothing
    /// to remove.
    pub fn delete_folder<S: AsRef<str>>(&self, path: &[S]) -> Result<bool> {
        let removed = self.shared.delete_folder(path)?;
        if removed {
            Shared::request_flush(&self.shared);
        }
        Ok(removed)
    }

    /// Remove all data, on disk and in memory
    pub fn delete_all(&self) -> Result<()> {
        self.shared.delete_all()
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Drop entries not accessed within the last `timeout_ms` milliseconds
    ///
    /// Also prunes empty folders, repacks storage files that lost entries,
    /// and deletes backing files the index does not know about.
    pub fn cleanup(&self, timeout_ms: u64) -> Result<()> {
        self.shared.cleanup(timeout_ms)
    }

    /// Forget in-memory state and cached buffers, then reload the index
    ///
    /// Changes not yet flushed to the index are lost.
    pub fn clear_memory(&self) {
        self.shared.clear_memory()
    }

    /// Write the index snapshot now
    pub fn flush(&self) -> Result<()> {
        let root = self.shared.root.write();
        self.shared.write_index(&root)?;
        self.shared.flush.mark_flushed();
        Ok(())
    }

    /// Close the database gracefully
    ///
    /// Writes the index snapshot so no deferred change is lost
    pub fn close(self) -> Result<()> {
        self.flush()
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn stats(&self) -> DatabaseStats {
        let root = self.shared.root.read();
        let files = self.shared.registry.lock();
        DatabaseStats {
            storage_files: files.len(),
            folders: root.descendant_count(),
            entries: root.entry_count(),
            live_bytes: files.values().map(StorageFile::live_bytes).sum(),
            allocated_bytes: files.values().map(StorageFile::size).sum(),
            index_flushes: self.shared.flush.flush_count(),
        }
    }

    /// Storage file assigned to the folder at `path`
    pub fn storage_file_of<S: AsRef<str>>(&self, path: &[S]) -> Option<StorageFileId> {
        self.shared.root.read().find(path)?.storage_file
    }

    /// Copy of a storage file's bookkeeping
    pub fn storage_file(&self, id: StorageFileId) -> Option<StorageFile> {
        self.shared.registry.snapshot_of(id)
    }

    /// Get the storage directory path
    pub fn storage_dir(&self) -> &std::path::Path {
        self.shared.store.root()
    }

    /// Path of the backing file for storage file `id`
    pub fn backing_file_path(&self, id: StorageFileId) -> std::path::PathBuf {
        self.shared.store.path(&self.shared.file_name(id))
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.shared.config
    }
}

impl Shared {
    fn file_name(&self, id: StorageFileId) -> String {
        crate::storage::file_name(id, &self.config.data_extension)
    }

    fn index_path(&self) -> std::path::PathBuf {
        self.store.path(HierarchicalDatabase::INDEX_FILENAME)
    }

    /// Buffer of a storage file, from the cache or disk (missing file = empty)
    fn load_bytes(&self, id: StorageFileId) -> Result<Bytes> {
        let name = self.file_name(id);
        self.cache.get_or_load(id, || {
            let bytes = self.store.read(&name)?.unwrap_or_default();
            tracing::trace!("Loaded {} ({} bytes)", name, bytes.len());
            Ok(Bytes::from(bytes))
        })
    }

    fn get<S: AsRef<str>>(&self, path: &[S], hash: u64) -> Result<Option<ByteSlice>> {
        let root = self.root.read();

        let Some(folder) = root.find(path) else {
            return Ok(None);
        };
        let Some(entry) = folder.files.get(&hash) else {
            return Ok(None);
        };
        entry.touch(now_millis());

        if entry.range.is_empty() {
            return Ok(Some(ByteSlice::empty()));
        }

        let id = folder.storage_file.ok_or_else(|| {
            HdbError::Storage(format!("entry {} has no storage file", HdbKey::new(path, hash)))
        })?;
        let bytes = self.load_bytes(id)?;
        if bytes.len() < entry.range.end {
            return Err(HdbError::Storage(format!(
                "{} holds {} bytes, entry {} needs {}",
                self.file_name(id),
                bytes.len(),
                HdbKey::new(path, hash),
                entry.range.end
            )));
        }

        Ok(Some(ByteSlice::new(bytes, entry.range.clone())))
    }

    fn put(&self, path: Vec<String>, hash: u64, value: &[u8]) -> Result<()> {
        let now = now_millis();
        let key = HdbKey {
            path: path.clone(),
            hash,
        };

        let mut root = self.root.write();

        // Step 1: Folder chain and storage file
        let id = {
            let folder = root.get_or_create(&path);
            match folder.storage_file {
                Some(id) => id,
                None => {
                    let id = self.registry.find_or_create(value.len());
                    folder.storage_file = Some(id);
                    id
                }
            }
        };
        self.registry.assign(id, &path);

        let mut files = self.registry.lock();
        let file = files
            .get_mut(&id)
            .ok_or_else(|| HdbError::Storage(format!("storage file {} vanished", id)))?;

        // Empty blobs never touch the allocator or the disk
        if value.is_empty() {
            let freed = file.allocator.remove(&key);
            drop(files);
            if freed {
                self.registry.mark_dirty(id);
            }
            root.get_or_create(&path).files.insert(hash, FileEntry::new(now, 0..0));
            return Ok(());
        }

        // Step 2: Current bytes, with recovery if the file is shorter than indexed
        let name = file.file_name(&self.config.data_extension);
        let current = self.load_bytes(id)?;
        if current.len() < file.size {
            tracing::warn!(
                "{} holds {} bytes but the index expects {}, dropping its entries",
                name,
                current.len(),
                file.size
            );
            discard_entries(&mut root, file);
        }

        // Step 3: Placement
        let mut storage = current.to_vec();
        storage.resize(file.size, 0);
        let capacity = storage.len();
        let placement = file.allocator.insert(
            key,
            value,
            0..value.len(),
            capacity,
            storage,
            true,
            &mut FileAllocation,
        );
        file.size = placement.storage.len();

        tracing::debug!(
            "Placed {} bytes for #{} at {:?} in {} ({:?})",
            value.len(),
            hash,
            placement.range,
            name,
            placement.replace_type
        );

        // Step 4: Index
        root.get_or_create(&path)
            .files
            .insert(hash, FileEntry::new(now, placement.range.clone()));
        if placement.replace_type == ReplaceType::Append {
            sync_ranges(&mut root, file);
        }

        // Step 5: Cache and disk
        let bytes = Bytes::from(placement.storage);
        self.cache.insert(id, bytes.clone());
        match placement.replace_type {
            ReplaceType::InsertInto if self.store.exists(&name) => {
                self.store.write_at(&name, placement.range.start as u64, value)?;
            }
            _ => self.store.write(&name, &bytes)?,
        }

        Ok(())
    }

    fn delete<S: AsRef<str>>(&self, path: &[S], hash: u64) -> Result<bool> {
        let mut root = self.root.write();

        let Some(folder) = root.find_mut(path) else {
            return Ok(false);
        };
        if folder.files.remove(&hash).is_none() {
            return Ok(false);
        }

        if let Some(id) = folder.storage_file {
            self.forget(id, [HdbKey::new(path, hash)]);
            self.optimize_best_effort(&mut root, id);
        }
        Ok(true)
    }

    fn delete_folder<S: AsRef<str>>(&self, path: &[S]) -> Result<bool> {
        let mut root = self.root.write();

        let Some(folder) = root.find_mut(path) else {
            return Ok(false);
        };
        if folder.files.is_empty() {
            return Ok(false);
        }

        let hashes: Vec<u64> = folder.files.drain().map(|(hash, _)| hash).collect();
        if let Some(id) = folder.storage_file {
            self.forget(id, hashes.into_iter().map(|hash| HdbKey::new(path, hash)));
            self.optimize_best_effort(&mut root, id);
        }
        Ok(true)
    }

    fn delete_all(&self) -> Result<()> {
        let mut root = self.root.write();
        self.store.remove_all()?;
        *root = Folder::root();
        self.registry.clear();
        self.cache.clear();
        tracing::info!("Deleted all data of database '{}'", self.config.name);
        Ok(())
    }

    fn cleanup(&self, timeout_ms: u64) -> Result<()> {
        let mut root = self.root.write();

        // Step 1: Stale entries and empty folders
        let cutoff = now_millis().saturating_sub(timeout_ms);
        let mut report = PruneReport::default();
        root.prune(Some(cutoff), &mut Vec::new(), &mut report);

        {
            let mut files = self.registry.lock();
            for (id, key, _) in &report.removed {
                if let Some(file) = files.get_mut(id) {
                    file.allocator.remove(key);
                }
            }
        }
        for (id, _, _) in &report.removed {
            self.registry.mark_dirty(*id);
        }
        for (id, path) in &report.released {
            self.registry.release(*id, path);
        }

        // Step 2: Repack what lost entries (including frees from earlier puts)
        let mut relocated = false;
        for id in self.registry.dirty_ids() {
            relocated |= self.optimize(&mut root, id)?;
        }
        let dropped = self.registry.drop_unused();

        // Step 3: Persist; a repack moves ranges, so the index must follow
        if report.changed() || relocated || !dropped.is_empty() {
            self.write_index(&root)?;
            self.flush.mark_flushed();
        }

        // Step 4: Orphans
        let orphans = self.remove_orphans()?;

        tracing::info!(
            "Cleanup of '{}': {} entries and {} folders removed, {} storage files dropped, {} orphan files deleted",
            self.config.name,
            report.removed.len() + report.removed_unassigned,
            report.folders_removed,
            dropped.len(),
            orphans
        );
        Ok(())
    }

    fn clear_memory(&self) {
        let mut root = self.root.write();
        self.cache.clear();
        *root = load_index(&self.store, &self.registry);
    }

    /// Remove placements of deleted entries and flag their storage file
    fn forget(&self, id: StorageFileId, keys: impl IntoIterator<Item = HdbKey>) {
        if let Some(file) = self.registry.lock().get_mut(&id) {
            for key in keys {
                file.allocator.remove(&key);
            }
        }
        self.registry.mark_dirty(id);
    }

    fn optimize_best_effort(&self, root: &mut Folder, id: StorageFileId) {
        if let Err(e) = self.optimize(root, id) {
            tracing::warn!("Failed to optimize {}: {}", self.file_name(id), e);
        }
    }

    /// Delete an empty storage file, or repack one that is fragmented enough
    ///
    /// Returns whether the file's size or entry ranges changed.
    fn optimize(&self, root: &mut Folder, id: StorageFileId) -> Result<bool> {
        let mut files = self.registry.lock();
        let Some(file) = files.get_mut(&id) else {
            return Ok(false);
        };
        file.dirty = false;
        let name = file.file_name(&self.config.data_extension);

        if file.allocator.is_empty() {
            let had_bytes = file.size > 0;
            file.reset();
            self.cache.invalidate(id);
            let deleted = self.store.delete(&name)?;
            if deleted {
                tracing::debug!("Deleted empty storage file {}", name);
            }
            return Ok(had_bytes || deleted);
        }

        let live = file.allocator.live_bytes();
        let high_water = file.allocator.high_water_mark();
        if !should_optimize(live, high_water, self.config.compaction_threshold) {
            return Ok(false);
        }

        let current = self.load_bytes(id)?;
        if current.len() < high_water {
            tracing::warn!(
                "{} holds {} bytes, below its high-water mark {}, not repacking",
                name,
                current.len(),
                high_water
            );
            return Ok(false);
        }

        let packed = file.allocator.compact(current.to_vec(), &mut FileAllocation);
        file.size = packed.len();
        sync_ranges(root, file);

        let bytes = Bytes::from(packed);
        self.cache.insert(id, bytes.clone());
        self.store.write(&name, &bytes)?;

        tracing::debug!("Repacked {} from {} to {} bytes", name, high_water, live);
        Ok(true)
    }

    /// Delete backing files that belong to no storage file with data
    fn remove_orphans(&self) -> Result<usize> {
        let suffix = format!(".{}", self.config.data_extension);
        let files = self.registry.lock();
        let mut removed = 0;

        for name in self.store.list()? {
            if !name.ends_with(&suffix) {
                continue;
            }
            let known = files
                .values()
                .any(|file| file.size > 0 && file.file_name(&self.config.data_extension) == name);
            if !known {
                self.store.delete(&name)?;
                tracing::debug!("Deleted orphan backing file {}", name);
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn write_index(&self, root: &Folder) -> Result<()> {
        let snapshot = IndexSnapshot::capture(root, self.registry.records(), self.config.target_file_size);
        snapshot.write(&self.index_path())?;
        tracing::trace!("Wrote index of '{}'", self.config.name);
        Ok(())
    }

    /// Throttled index write after a mutation
    fn request_flush(shared: &Arc<Shared>) {
        let action = shared.flush.request();
        Self::apply_flush(Arc::downgrade(shared), shared, action);
    }

    fn apply_flush(weak: Weak<Shared>, shared: &Shared, action: FlushAction) {
        match action {
            FlushAction::Skip => {}
            FlushAction::FlushNow => {
                let root = shared.root.write();
                match shared.write_index(&root) {
                    Ok(()) => shared.flush.record_flush(),
                    Err(e) => tracing::warn!("Failed to write index of '{}': {}", shared.config.name, e),
                }
            }
            FlushAction::Defer(delay) => {
                let retry = weak.clone();
                let scheduled = shared.scheduler.run_after(delay, move || {
                    if let Some(shared) = retry.upgrade() {
                        let action = shared.flush.poll();
                        Self::apply_flush(Arc::downgrade(&shared), &shared, action);
                    }
                });
                if let Err(e) = scheduled {
                    tracing::warn!("Could not defer index flush: {}", e);
                }
            }
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Load `index.json` and rebuild the registry; any failure starts empty
fn load_index(store: &DiskStore, registry: &StorageRegistry) -> Folder {
    let path = store.path(HierarchicalDatabase::INDEX_FILENAME);
    let loaded = IndexSnapshot::read(&path).and_then(|snapshot| snapshot.map(IndexSnapshot::into_tree).transpose());

    match loaded {
        Ok(Some((mut root, records))) => {
            registry.rebuild(records, &mut root);
            root
        }
        Ok(None) => {
            registry.clear();
            Folder::root()
        }
        Err(e) => {
            tracing::warn!("Failed to load index {}: {}, starting empty", path.display(), e);
            registry.clear();
            Folder::root()
        }
    }
}

/// Copy the allocator's ranges back into the folder entries
fn sync_ranges(root: &mut Folder, file: &StorageFile) {
    for (key, range) in file.allocator().entries() {
        if let Some(entry) = root.find_mut(&key.path).and_then(|folder| folder.files.get_mut(&key.hash)) {
            entry.range = range;
        }
    }
}

/// Lossy recovery: drop every non-empty entry stored in `file`
fn discard_entries(root: &mut Folder, file: &mut StorageFile) {
    for path in file.folders() {
        if let Some(folder) = root.find_mut(path) {
            folder.files.retain(|_, entry| entry.range.is_empty());
        }
    }
    file.reset();
}

fn owned_path<S: AsRef<str>>(path: &[S]) -> Vec<String> {
    path.iter().map(|segment| segment.as_ref().to_string()).collect()
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
