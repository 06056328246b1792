//! # hdbstore
//!
//! An embedded store for many small binary blobs, addressed by a folder path
//! plus a 64-bit hash:
//! - Blobs of many folders packed into a few large backing files
//! - Gap reuse, tail appends and compaction through a generic allocator
//! - JSON index snapshot with throttled writes
//! - Time-to-idle cache of backing files, optional background reads
//! - Access-time based cleanup of stale entries and orphan files
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  HierarchicalDatabase                        │
//! │         (coarse RwLock over the folder tree)                 │
//! └───────┬──────────────────┬──────────────────┬───────────────┘
//!         │                  │                  │
//!         ▼                  ▼                  ▼
//!  ┌─────────────┐   ┌───────────────┐   ┌─────────────┐
//!  │ Folder tree │   │StorageRegistry│   │  ByteCache  │
//!  │   (index)   │   │ + allocators  │   │   (moka)    │
//!  └──────┬──────┘   └───────┬───────┘   └──────┬──────┘
//!         │                  │                  │
//!         ▼                  ▼                  ▼
//!   index.json          <id>.bin  ◄────────  DiskStore
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod key;
pub mod slice;
pub mod allocator;
pub mod index;
pub mod storage;
pub mod background;
pub mod cache;
pub mod flush;
pub mod database;
pub mod flat;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{HdbError, Result};
pub use config::Config;
pub use key::HdbKey;
pub use slice::ByteSlice;
pub use database::{DatabaseStats, HierarchicalDatabase, ReadMode};
pub use flat::FlatDatabase;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of hdbstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
