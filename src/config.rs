//! Store configuration.
//!
//! [`StoreConfig`] can be built in code with the `with_*` setters or loaded
//! from JSON. Every field except `root_dir` has a default, so a minimal JSON
//! document is `{"root_dir": "/var/lib/datasets"}`.

use std::path::{Path, PathBuf};

use parquet::basic::Compression;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::DEFAULT_BATCH_SIZE;

/// Default bound on concurrently running per-shard read tasks.
pub const DEFAULT_MAX_PARALLEL_SHARD_READS: usize = 16;

// =============================================================================
// Policies
// =============================================================================

/// What to do when a tags/metadata JSON value cannot be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedJsonPolicy {
    /// Log a warning and use an empty collection.
    #[default]
    Lenient,
    /// Fail the read with [`Error::Json`].
    Strict,
}

/// Compression codec for shard files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardCompression {
    #[default]
    Snappy,
    Uncompressed,
}

impl ShardCompression {
    pub(crate) fn to_parquet(self) -> Compression {
        match self {
            ShardCompression::Snappy => Compression::SNAPPY,
            ShardCompression::Uncompressed => Compression::UNCOMPRESSED,
        }
    }
}

// =============================================================================
// Store Configuration
// =============================================================================

/// Configuration for an [`ItemStore`](crate::ItemStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding every shard file of every dataset.
    pub root_dir: PathBuf,

    /// Maximum rows per shard file.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default)]
    pub malformed_json: MalformedJsonPolicy,

    /// Upper bound on per-shard tasks running at once for lookups and counts.
    #[serde(default = "default_max_parallel_shard_reads")]
    pub max_parallel_shard_reads: usize,

    #[serde(default)]
    pub compression: ShardCompression,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_max_parallel_shard_reads() -> usize {
    DEFAULT_MAX_PARALLEL_SHARD_READS
}

impl StoreConfig {
    /// Creates a configuration with defaults for everything but the directory.
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            root_dir: root_dir.as_ref().to_path_buf(),
            batch_size: DEFAULT_BATCH_SIZE,
            malformed_json: MalformedJsonPolicy::default(),
            max_parallel_shard_reads: DEFAULT_MAX_PARALLEL_SHARD_READS,
            compression: ShardCompression::default(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_malformed_json(mut self, policy: MalformedJsonPolicy) -> Self {
        self.malformed_json = policy;
        self
    }

    pub fn with_max_parallel_shard_reads(mut self, limit: usize) -> Self {
        self.max_parallel_shard_reads = limit;
        self
    }

    pub fn with_compression(mut self, compression: ShardCompression) -> Self {
        self.compression = compression;
        self
    }

    /// Parses and validates a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: StoreConfig =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `batch_size` or `max_parallel_shard_reads`
    /// is zero, or `root_dir` is empty.
    pub fn validate(&self) -> Result<()> {
        if self.root_dir.as_os_str().is_empty() {
            return Err(Error::Config("root_dir must not be empty".to_string()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".to_string()));
        }
        if self.max_parallel_shard_reads == 0 {
            return Err(Error::Config(
                "max_parallel_shard_reads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
