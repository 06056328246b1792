//! Byte buffer allocation
//!
//! Handler used by the database: a storage is the full content of one
//! backing file held as a `Vec<u8>`.

use std::ops::Range;

use super::AllocationHandler;

/// Allocation handler for in-memory file images
#[derive(Debug, Default, Clone, Copy)]
pub struct FileAllocation;

impl<K> AllocationHandler<K, Vec<u8>, [u8]> for FileAllocation {
    fn allocate(&mut self, capacity: usize, previous: &Vec<u8>) -> Vec<u8> {
        // Keep the unchanged prefix so compaction only copies moved entries
        let kept = previous.len().min(capacity);
        let mut storage = Vec::with_capacity(capacity);
        storage.extend_from_slice(&previous[..kept]);
        storage.resize(capacity, 0);
        storage
    }

    fn copy(&mut self, _key: &K, from: Range<usize>, source: &Vec<u8>, to: Range<usize>, target: &mut Vec<u8>) {
        target[to].copy_from_slice(&source[from]);
    }

    fn write(&mut self, _key: &K, from: Range<usize>, payload: &[u8], to: Range<usize>, target: &mut Vec<u8>) {
        target[to].copy_from_slice(&payload[from]);
    }

    fn allocation_keeps_old_data(&self) -> bool {
        true
    }
}

/// Whether a storage file is worth repacking
///
/// Empty files always are (they get deleted); otherwise the share of the
/// high-water mark lost to gaps must exceed `threshold`.
pub fn should_optimize(live_bytes: usize, high_water: usize, threshold: f64) -> bool {
    if live_bytes == 0 {
        return true;
    }
    if high_water <= live_bytes {
        return false;
    }
    (high_water - live_bytes) as f64 / high_water as f64 > threshold
}
