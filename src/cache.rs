//! Byte Cache
//!
//! Keeps recently used backing files in memory.
//!
//! Entries expire after a period without access (time-to-idle) and the
//! total is bounded by byte size. Writers override entries with the buffer
//! they just produced, so a put never has to re-read its own file. Cached
//! buffers are immutable `Bytes`; readers keep their snapshot even after an
//! override.

use std::time::Duration;

use bytes::Bytes;
use moka::sync::Cache;

use crate::background::WorkerPool;
use crate::error::Result;
use crate::index::StorageFileId;

/// Time- and size-bounded cache of backing file contents
pub struct ByteCache {
    entries: Cache<StorageFileId, Bytes>,
    workers: WorkerPool,
}

impl ByteCache {
    pub fn new(name: &str, time_to_idle: Duration, capacity_bytes: u64, workers: usize) -> Result<Self> {
        let entries = Cache::builder()
            .max_capacity(capacity_bytes)
            .weigher(|_id: &StorageFileId, bytes: &Bytes| u32::try_from(bytes.len()).unwrap_or(u32::MAX))
            .time_to_idle(time_to_idle)
            .build();

        Ok(Self {
            entries,
            workers: WorkerPool::new(name, workers)?,
        })
    }

    /// Cached buffer, or the result of `load` (which is then cached)
    pub fn get_or_load<F>(&self, id: StorageFileId, load: F) -> Result<Bytes>
    where
        F: FnOnce() -> Result<Bytes>,
    {
        if let Some(bytes) = self.entries.get(&id) {
            return Ok(bytes);
        }
        let bytes = load()?;
        self.entries.insert(id, bytes.clone());
        Ok(bytes)
    }

    /// Run a read on the cache's worker threads
    pub fn spawn<F: FnOnce() + Send + 'static>(&self, job: F) -> Result<()> {
        self.workers.execute(job)
    }

    /// Replace the cached buffer after a write
    pub fn insert(&self, id: StorageFileId, bytes: Bytes) {
        self.entries.insert(id, bytes);
    }

    pub fn invalidate(&self, id: StorageFileId) {
        self.entries.invalidate(&id);
    }

    pub fn clear(&self) {
        self.entries.invalidate_all();
    }
}
