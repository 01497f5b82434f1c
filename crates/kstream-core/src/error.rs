//! Error types for kstream core library.
//!
//! Uses hierarchical domain-specific errors following the thiserror pattern.

use thiserror::Error;

/// Result type alias for kstream operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for kstream.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Stream service error
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    /// Checkpoint store error
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Shutdown requested
    #[error("Shutdown requested")]
    Shutdown,
}

/// Stream service errors.
#[derive(Error, Debug)]
pub enum StreamError {
    /// Could not obtain a shard iterator
    #[error("Iterator acquisition failed for shard {shard_id}: {message}")]
    IteratorAcquisition { shard_id: String, message: String },

    /// Fetching records with an iterator failed
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// The service rejected the request for exceeding provisioned throughput
    #[error("Provisioned throughput exceeded")]
    ThroughputExceeded,

    /// Stream exists but cannot be read from
    #[error("Stream {stream} not in ACTIVE or UPDATING state (status: {status})")]
    StreamNotReadable { stream: String, status: String },

    /// Stream or shard does not exist
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Record submission failed
    #[error("Put record failed: {0}")]
    Put(String),

    /// Any other service-side failure
    #[error("Service error: {0}")]
    Service(String),
}

/// Checkpoint store errors.
///
/// These never escape the checkpointer; they are logged and swallowed.
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// Lease table creation failed
    #[error("Table creation failed: {0}")]
    TableCreation(String),

    /// Lease lookup failed
    #[error("Lease lookup failed: {0}")]
    Lookup(String),

    /// Lease write failed
    #[error("Lease write failed: {0}")]
    Write(String),
}

// Conversion implementations for external error types

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
