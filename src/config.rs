//! Configuration for hdbstore
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{HdbError, Result};

/// Main configuration for a database instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Directory holding the index and all backing files
    /// Internal structure:
    ///   {storage_dir}/
    ///     ├── index.json       (folder tree snapshot)
    ///     ├── 1.bin            (packed blobs of storage file 1)
    ///     └── 2.bin
    pub storage_dir: PathBuf,

    /// Name used in log lines to tell several databases apart
    pub name: String,

    /// Preferred upper bound for a single backing file (in bytes)
    pub target_file_size: usize,

    /// Extension of backing files, without the dot
    pub data_extension: String,

    /// Fraction of the high-water mark that may be lost to gaps before a
    /// storage file is repacked
    pub compaction_threshold: f64,

    // -------------------------------------------------------------------------
    // Cache Configuration
    // -------------------------------------------------------------------------
    /// Idle time after which a loaded backing file leaves the cache (milliseconds)
    pub cache_timeout_ms: u64,

    /// Max bytes of backing files kept in memory
    pub cache_capacity_bytes: u64,

    /// Threads serving asynchronous reads
    pub async_workers: usize,

    // -------------------------------------------------------------------------
    // Retention Configuration
    // -------------------------------------------------------------------------
    /// Entries untouched for this long are dropped when the database opens
    /// (milliseconds). `None` keeps everything.
    pub deletion_timeout_ms: Option<u64>,

    // -------------------------------------------------------------------------
    // Index Flush Configuration
    // -------------------------------------------------------------------------
    /// Minimum time between two index snapshot writes (milliseconds)
    pub flush_interval_ms: u64,

    /// Delay before a deferred flush re-checks the interval (milliseconds)
    pub flush_retry_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("./hdb_data"),
            name: "hdb".to_string(),
            target_file_size: 10_000_000,
            data_extension: "bin".to_string(),
            compaction_threshold: 0.5,
            cache_timeout_ms: 10_000,
            cache_capacity_bytes: 64 * 1024 * 1024, // 64 MB
            async_workers: 2,
            deletion_timeout_ms: Some(7 * 24 * 3600 * 1000), // one week
            flush_interval_ms: 1000,
            flush_retry_delay_ms: 500,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the database cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.target_file_size == 0 {
            return Err(HdbError::Config("target_file_size must be positive".to_string()));
        }
        // The index lives next to the data files as index.json
        if self.data_extension.is_empty() || self.data_extension.contains('.') || self.data_extension == "json" {
            return Err(HdbError::Config(format!(
                "invalid data extension: {:?}",
                self.data_extension
            )));
        }
        if !(0.0..=1.0).contains(&self.compaction_threshold) {
            return Err(HdbError::Config(format!(
                "compaction_threshold must be within [0, 1], got {}",
                self.compaction_threshold
            )));
        }
        if self.async_workers == 0 {
            return Err(HdbError::Config("async_workers must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn cache_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_timeout_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn flush_retry_delay(&self) -> Duration {
        Duration::from_millis(self.flush_retry_delay_ms)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the storage directory (root for the index and backing files)
    pub fn storage_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.storage_dir = path.into();
        self
    }

    /// Set the database name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the preferred backing file size (in bytes)
    pub fn target_file_size(mut self, size: usize) -> Self {
        self.config.target_file_size = size;
        self
    }

    /// Set the backing file extension
    pub fn data_extension(mut self, extension: impl Into<String>) -> Self {
        self.config.data_extension = extension.into();
        self
    }

    /// Set the fragmentation ratio that triggers repacking
    pub fn compaction_threshold(mut self, threshold: f64) -> Self {
        self.config.compaction_threshold = threshold;
        self
    }

    /// Set the cache idle timeout (in milliseconds)
    pub fn cache_timeout_ms(mut self, ms: u64) -> Self {
        self.config.cache_timeout_ms = ms;
        self
    }

    /// Set the cache capacity (in bytes)
    pub fn cache_capacity_bytes(mut self, bytes: u64) -> Self {
        self.config.cache_capacity_bytes = bytes;
        self
    }

    /// Set the number of asynchronous read workers
    pub fn async_workers(mut self, count: usize) -> Self {
        self.config.async_workers = count;
        self
    }

    /// Set the startup retention timeout (in milliseconds), `None` disables it
    pub fn deletion_timeout_ms(mut self, ms: Option<u64>) -> Self {
        self.config.deletion_timeout_ms = ms;
        self
    }

    /// Set the minimum interval between index flushes (in milliseconds)
    pub fn flush_interval_ms(mut self, ms: u64) -> Self {
        self.config.flush_interval_ms = ms;
        self
    }

    /// Set the deferred flush retry delay (in milliseconds)
    pub fn flush_retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.flush_retry_delay_ms = ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
