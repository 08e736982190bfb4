//! Error types for the spool and cache layers.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors from spool directory handling and sidecar files.
#[derive(Debug, Error)]
pub enum SpoolError {
    /// I/O operation failed (create/read/write/copy).
    #[error("I/O error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    /// Sidecar serialization or deserialization failed.
    #[error("Sidecar error for {path}: {source}")]
    Sidecar {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Spool root exists but is not a directory.
    #[error("Spool path is not a directory: {0}")]
    NotDirectory(PathBuf),
}

/// Errors from the shared queue cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Cache encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Cache decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

/// Specialized `Result` type for spool operations.
pub type Result<T> = std::result::Result<T, SpoolError>;
