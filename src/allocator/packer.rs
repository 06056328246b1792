//! Storage Allocator
//!
//! Sorted range bookkeeping plus the insert / remove / compact algorithm.

use std::collections::HashMap;
use std::hash::Hash;
use std::ops::Range;

use super::{AllocationHandler, Placement, ReplaceType};

/// One live entry
#[derive(Debug, Clone)]
struct Slot<K> {
    range: Range<usize>,
    key: K,
}

/// Places keyed entries inside a single storage
///
/// ## Invariants
/// - `entries` is sorted by range start
/// - live ranges are pairwise disjoint and end at or below `high_water`
/// - `live_bytes` is the sum of all live range lengths
/// - `high_water` only moves down during compaction
#[derive(Debug, Clone)]
pub struct StorageAllocator<K> {
    /// Live entries, ordered by range start
    entries: Vec<Slot<K>>,

    /// Key → range, for O(1) removal lookups
    ranges: HashMap<K, Range<usize>>,

    /// End of the furthest allocation since the last compaction
    high_water: usize,

    /// Sum of live range lengths
    live_bytes: usize,
}

impl<K> Default for StorageAllocator<K> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            ranges: HashMap::new(),
            high_water: 0,
            live_bytes: 0,
        }
    }
}

impl<K: Clone + Eq + Hash> StorageAllocator<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild bookkeeping for entries already laid out in a storage
    ///
    /// `high_water` is raised to the furthest range end if it is lower.
    pub fn from_entries(entries: impl IntoIterator<Item = (K, Range<usize>)>, high_water: usize) -> Self {
        let mut allocator = Self::new();
        for (key, range) in entries {
            allocator.high_water = allocator.high_water.max(range.end);
            allocator.add_slot(key, range);
        }
        allocator.high_water = allocator.high_water.max(high_water);
        allocator
    }

    // =========================================================================
    // Core Operations
    // =========================================================================

    /// Place `payload[payload_range]` under `key`
    ///
    /// An existing entry with the same key is removed first, so its range is
    /// available for reuse. `available_capacity` is the number of bytes the
    /// current `storage` can hold. With `keep_old_data == false` the bytes in
    /// `storage` are treated as garbage and compaction does not copy them.
    #[allow(clippy::too_many_arguments)]
    pub fn insert<S, P, H>(
        &mut self,
        key: K,
        payload: &P,
        payload_range: Range<usize>,
        available_capacity: usize,
        mut storage: S,
        keep_old_data: bool,
        handler: &mut H,
    ) -> Placement<S>
    where
        P: ?Sized,
        H: AllocationHandler<K, S, P>,
    {
        debug_assert!(payload_range.start <= payload_range.end);
        self.remove(&key);
        let size = payload_range.len();

        // Case 1: a gap left by removed entries
        if let Some(start) = self.find_gap(size) {
            let range = start..start + size;
            handler.write(&key, payload_range, payload, range.clone(), &mut storage);
            self.add_slot(key, range.clone());
            return Placement {
                replace_type: ReplaceType::InsertInto,
                storage,
                range,
            };
        }

        // Case 2: room behind the high-water mark
        if self.high_water + size <= available_capacity {
            let range = self.high_water..self.high_water + size;
            handler.write(&key, payload_range, payload, range.clone(), &mut storage);
            self.high_water = range.end;
            self.add_slot(key, range.clone());
            return Placement {
                replace_type: ReplaceType::InsertInto,
                storage,
                range,
            };
        }

        // Case 3: pack everything into a larger storage, then append
        let required = self.live_bytes + size;
        let capacity = handler.round_up_storage(required).max(required);
        let mut storage = self.compact_into(storage, capacity, keep_old_data, handler);
        let range = self.high_water..self.high_water + size;
        handler.write(&key, payload_range, payload, range.clone(), &mut storage);
        self.high_water = range.end;
        self.add_slot(key, range.clone());
        Placement {
            replace_type: ReplaceType::Append,
            storage,
            range,
        }
    }

    /// Forget the entry under `key`
    ///
    /// Leaves a gap; nothing moves and the high-water mark stays.
    pub fn remove(&mut self, key: &K) -> bool {
        let Some(range) = self.ranges.remove(key) else {
            return false;
        };
        let first = self.entries.partition_point(|slot| slot.range.start < range.start);
        if let Some(offset) = self.entries[first..].iter().position(|slot| slot.key == *key) {
            self.entries.remove(first + offset);
        }
        self.live_bytes -= range.len();
        true
    }

    /// Pack all live entries into a storage of exactly `live_bytes`
    pub fn compact<S, P, H>(&mut self, storage: S, handler: &mut H) -> S
    where
        P: ?Sized,
        H: AllocationHandler<K, S, P>,
    {
        self.compact_into(storage, self.live_bytes, true, handler)
    }

    /// Drop every entry and reset the high-water mark
    pub fn clear(&mut self) {
        self.entries.clear();
        self.ranges.clear();
        self.high_water = 0;
        self.live_bytes = 0;
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn range_of(&self, key: &K) -> Option<Range<usize>> {
        self.ranges.get(key).cloned()
    }

    /// Live entries in ascending range order
    pub fn entries(&self) -> impl Iterator<Item = (&K, Range<usize>)> + '_ {
        self.entries.iter().map(|slot| (&slot.key, slot.range.clone()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    pub fn high_water_mark(&self) -> usize {
        self.high_water
    }

    /// Share of the high-water mark not covered by live entries (0.0 – 1.0)
    pub fn fragmentation(&self) -> f64 {
        if self.high_water == 0 {
            return 0.0;
        }
        (self.high_water - self.live_bytes) as f64 / self.high_water as f64
    }

    /// Check that all live ranges are disjoint and inside `[0, capacity)`
    pub fn verify_layout(&self, capacity: usize) -> bool {
        let mut cursor = 0;
        for slot in &self.entries {
            if slot.range.start < cursor || slot.range.end > capacity || slot.range.start > slot.range.end {
                return false;
            }
            cursor = slot.range.end;
        }
        self.high_water <= capacity
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Lowest offset of a free gap below the high-water mark holding `size` bytes
    fn find_gap(&self, size: usize) -> Option<usize> {
        let mut cursor = 0;
        for slot in &self.entries {
            if slot.range.start >= cursor + size {
                return Some(cursor);
            }
            cursor = cursor.max(slot.range.end);
        }
        (self.high_water >= cursor + size && cursor < self.high_water).then_some(cursor)
    }

    fn add_slot(&mut self, key: K, range: Range<usize>) {
        let index = self
            .entries
            .partition_point(|slot| (slot.range.start, slot.range.end) <= (range.start, range.end));
        self.live_bytes += range.len();
        self.ranges.insert(key.clone(), range.clone());
        self.entries.insert(index, Slot { range, key });
    }

    /// Copy live entries front to back into a new storage of `capacity` bytes
    fn compact_into<S, P, H>(&mut self, storage: S, capacity: usize, keep_old_data: bool, handler: &mut H) -> S
    where
        P: ?Sized,
        H: AllocationHandler<K, S, P>,
    {
        let mut target = handler.allocate(capacity, &storage);
        let in_place = handler.allocation_keeps_old_data();
        let mut cursor = 0;
        let mut moved = 0;

        for slot in &mut self.entries {
            let to = cursor..cursor + slot.range.len();
            if keep_old_data && !(in_place && to == slot.range) {
                handler.copy(&slot.key, slot.range.clone(), &storage, to.clone(), &mut target);
                moved += 1;
            }
            if let Some(range) = self.ranges.get_mut(&slot.key) {
                *range = to.clone();
            }
            slot.range = to;
            cursor = slot.range.end;
        }

        handler.deallocate(storage);
        tracing::trace!(
            "Compacted {} entries ({} copied) into {} bytes",
            self.entries.len(),
            moved,
            capacity
        );
        self.high_water = cursor;
        target
    }
}
