//! Index Module
//!
//! In-memory folder tree and its on-disk snapshot.
//!
//! ## Responsibilities
//! - Map path segments to folders, and hashes to file entries
//! - Record which storage file backs each folder
//! - Prune stale entries and empty folders
//! - Save / restore the tree as `index.json`
//!
//! ## Tree Shape
//! ```text
//!   root ("")
//!    ├── "thumbs"            storage_file: 1
//!    │     ├── #17  [0, 340)
//!    │     └── #42  [340, 900)
//!    └── "meshes"
//!          └── "lod0"        storage_file: 2
//!                └── #99  [0, 12000)
//! ```

mod folder;
mod snapshot;

pub use folder::{FileEntry, Folder, PruneReport};
pub use snapshot::{FileRecord, FolderRecord, IndexSnapshot, StorageFileRecord, SNAPSHOT_VERSION};

/// Identifier of a storage file; `<id>.<ext>` on disk
pub type StorageFileId = u32;
