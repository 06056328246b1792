//! Error types for hdbstore
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using HdbError
pub type Result<T> = std::result::Result<T, HdbError>;

/// Unified error type for hdbstore operations
#[derive(Debug, Error)]
pub enum HdbError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Index Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid index snapshot: {0}")]
    Snapshot(String),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Background Work Errors
    // -------------------------------------------------------------------------
    #[error("Background worker unavailable: {0}")]
    Shutdown(String),
}
