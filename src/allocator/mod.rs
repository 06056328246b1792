//! Allocator Module
//!
//! Packs variable-size entries into one growable storage.
//!
//! ## Responsibilities
//! - Keep live byte ranges sorted and pairwise disjoint
//! - Reuse gaps left by removed entries
//! - Append at the high-water mark while capacity lasts
//! - Compact and grow the storage when nothing else fits
//!
//! ## Placement Order
//! ```text
//!  capacity ───────────────────────────────────────────────┐
//!  ┌──────┬──────┬ ─ ─ ─ ┬──────┬──────┬ ─ ─ ─ ─ ─ ─ ─ ─ ─ ┐
//!  │  A   │  B   │  gap  │  D   │  E   │   free tail       │
//!  └──────┴──────┴ ─ ─ ─ ┴──────┴──────┴ ─ ─ ─ ─ ─ ─ ─ ─ ─ ┘
//!                                      ▲ high-water mark
//!
//!  1. gap reuse     → write into `gap`            (InsertInto)
//!  2. tail append   → write at high-water mark    (InsertInto)
//!  3. compaction    → A B D E packed into a new,  (Append)
//!                     larger storage, new entry last
//! ```
//!
//! The algorithm never touches bytes itself; an [`AllocationHandler`] does,
//! so the same code drives in-memory buffers, files or anything else with a
//! notion of "storage".

mod file;
mod packer;

use std::ops::Range;

pub use file::{should_optimize, FileAllocation};
pub use packer::StorageAllocator;

/// How an insert changed the storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceType {
    /// The new entry was written into the existing storage; nothing else moved
    InsertInto,

    /// Live entries were compacted into a new storage and the entry appended
    Append,
}

/// Result of [`StorageAllocator::insert`]
#[derive(Debug)]
pub struct Placement<S> {
    pub replace_type: ReplaceType,

    /// Storage now holding every live entry
    pub storage: S,

    /// Where the new entry landed
    pub range: Range<usize>,
}

/// Capabilities the allocator needs from whatever holds the bytes
///
/// `K` is the entry key, `S` the storage handle, `P` the payload a new entry
/// is read from.
pub trait AllocationHandler<K, S, P: ?Sized> {
    /// Create a storage holding `capacity` bytes, replacing `previous`
    fn allocate(&mut self, capacity: usize, previous: &S) -> S;

    /// Release a storage that was replaced during compaction
    fn deallocate(&mut self, storage: S) {
        drop(storage);
    }

    /// Move a live entry from `source[from]` to `target[to]`
    ///
    /// Both ranges always have the same length.
    fn copy(&mut self, key: &K, from: Range<usize>, source: &S, to: Range<usize>, target: &mut S);

    /// Write a new entry's payload `payload[from]` to `target[to]`
    fn write(&mut self, key: &K, from: Range<usize>, payload: &P, to: Range<usize>, target: &mut S);

    /// Capacity to allocate when `required` bytes must fit
    fn round_up_storage(&self, required: usize) -> usize {
        required.saturating_mul(2)
    }

    /// Whether `allocate` returns storage that already holds the previous
    /// bytes at their old offsets
    ///
    /// Entries that keep their offset during compaction are then not copied.
    fn allocation_keeps_old_data(&self) -> bool {
        false
    }
}
