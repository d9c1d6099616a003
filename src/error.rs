//! # Error Handling for the Shard Store
//!
//! A single error enum ([`Error`]) covers every failure mode of the store. The
//! repository facade logs each failure with its dataset and operation and then
//! hands it back to the caller unchanged.
//!
//! ## Error Categories
//!
//! | Category | Examples | Typical Response |
//! |----------|----------|------------------|
//! | Storage | I/O, parquet, arrow errors | Mark the caller's operation failed |
//! | Content | Malformed JSON (strict policy), bad column types | Investigate the shard |
//! | Request | Invalid cursor, dataset mismatch | Fix the request |
//! | Control | Cancelled | Nothing to do |
//!
//! ## Partial Mutations
//!
//! Shard deletion and rewrite touch several files without a transaction log.
//! An error in the middle of either leaves the dataset with a mix of old,
//! new, or missing shards. There is no repair path.

use thiserror::Error;

use crate::types::DatasetId;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in shard store operations.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Filesystem operation failed (create, open, rename, remove, list).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Parquet encoding or decoding failed.
    ///
    /// Usually means a shard file is truncated or was not written by this crate.
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Arrow array construction or conversion failed.
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    // =========================================================================
    // Content Errors
    // =========================================================================
    /// A JSON-encoded column (tags or metadata) could not be decoded.
    ///
    /// Only raised under [`MalformedJsonPolicy::Strict`](crate::config::MalformedJsonPolicy).
    /// The lenient policy logs and substitutes an empty collection instead.
    #[error("malformed json in column '{column}': {source}")]
    Json {
        /// Column that held the bad value
        column: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Shard content does not match the expected schema.
    #[error("schema error: {0}")]
    Schema(String),

    // =========================================================================
    // Request Errors
    // =========================================================================
    /// Pagination cursor was not of the form `shardIndex:rowIndex`.
    #[error("invalid cursor '{0}': expected '<shardIndex>:<rowIndex>'")]
    InvalidCursor(String),

    /// An item passed to `add_range` belongs to a different dataset.
    #[error("dataset mismatch: writing to {expected}, but item belongs to {found}")]
    DatasetMismatch {
        /// Dataset the batch was written to
        expected: DatasetId,
        /// Dataset recorded on the offending item
        found: DatasetId,
    },

    /// Configuration failed validation.
    #[error("config error: {0}")]
    Config(String),

    // =========================================================================
    // Control
    // =========================================================================
    /// The caller's cancellation token fired.
    ///
    /// Cancellation during a write can leave shard files of the interrupted
    /// call on disk.
    #[error("operation cancelled")]
    Cancelled,

    /// A blocking shard task panicked or was aborted.
    #[error("shard task failed: {0}")]
    TaskFailed(String),
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::TaskFailed(err.to_string())
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================
