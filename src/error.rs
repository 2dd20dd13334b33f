//! Error types for CaskKV
//!
//! Provides a unified error type for all operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using CaskError
pub type Result<T> = std::result::Result<T, CaskError>;

/// Unified error type for CaskKV operations
#[derive(Debug, Error)]
pub enum CaskError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Key Errors
    // -------------------------------------------------------------------------
    #[error("Key is empty")]
    EmptyKey,

    #[error("Key not found")]
    KeyNotFound,

    // -------------------------------------------------------------------------
    // Index Errors
    // -------------------------------------------------------------------------
    #[error("Failed to update the index")]
    IndexUpdateFailed,

    #[error("Index backend error: {0}")]
    Index(String),

    // -------------------------------------------------------------------------
    // Log / Segment Errors
    // -------------------------------------------------------------------------
    #[error("Data file {0} not found")]
    DataFileNotFound(u32),

    #[error("Checksum mismatch in data file {file_id} at offset {offset}")]
    ChecksumMismatch { file_id: u32, offset: u64 },

    #[error("No complete record in data file {file_id} at offset {offset}")]
    UnexpectedEof { file_id: u32, offset: u64 },

    #[error("Corrupted data: {0}")]
    Corruption(String),

    #[error("Database directory may be corrupted: {0}")]
    DirectoryCorrupted(String),

    #[error("Database directory {0} is in use by another handle")]
    DirectoryLocked(PathBuf),

    // -------------------------------------------------------------------------
    // Batch / Merge Errors
    // -------------------------------------------------------------------------
    #[error("Write batch has {pending} pending records, max is {max}")]
    BatchTooLarge { pending: usize, max: usize },

    #[error("Write batch unavailable: sequence number snapshot is missing")]
    SeqNoUnavailable,

    #[error("Merge is already in progress")]
    MergeInProgress,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}
