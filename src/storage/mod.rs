//! Storage Module
//!
//! Backing files and the registry that hands them out.
//!
//! ## Responsibilities
//! - Choose the backing file for a folder's first blob
//! - Track size, dirtiness and owning folders per backing file
//! - Keep each file's allocator (the source of truth for byte ranges)
//! - Read, patch and rewrite files in the storage directory
//!
//! ## Backing File Layout
//! ```text
//! {storage_dir}/1.bin
//! ┌────────┬────────┬ ─ ─ ─ ─ ┬────────┬ ─ ─ ─ ─ ─ ─ ─ ┐
//! │ blob A │ blob B │  (gap)  │ blob D │ growth slack  │
//! └────────┴────────┴ ─ ─ ─ ─ ┴────────┴ ─ ─ ─ ─ ─ ─ ─ ┘
//! 0                                    hwm             size
//! ```
//! No header and no framing: the index alone knows where blobs live.

mod disk;
mod registry;

pub use disk::DiskStore;
pub use registry::{file_name, StorageFile, StorageRegistry};
