//! # Shardstore - Columnar Dataset Item Store
//!
//! Shardstore persists large collections of dataset items (image-like records
//! with dimensions, tags, and free-form metadata) as immutable parquet shards
//! on the local filesystem. It provides:
//!
//! - **Chunked appends**: each write becomes one or more fixed-size shards
//! - **Cursor paging**: stable `shard:row` cursors across shard boundaries
//! - **Predicate filtering**: search, tags, dates, dimensions, metadata
//! - **Rewrite mutations**: update or delete rows by rewriting the dataset
//! - **Cached counts**: unfiltered counts served from memory
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        ItemStore (api)                          │
//! │    add_range · get_page · update · delete · count · stats       │
//! │                                                                 │
//! │  ┌──────────────────────┐     ┌──────────────────────────────┐  │
//! │  │ per-dataset locks    │     │ row-count cache              │  │
//! │  └──────────────────────┘     └──────────────────────────────┘  │
//! └───────────────┬─────────────────────────────────┬───────────────┘
//!                 │                                 │
//!                 ▼                                 ▼
//! ┌───────────────────────────────┐ ┌───────────────────────────────┐
//! │ ShardWriter                   │ │ ShardReader                   │
//! │ chunk → encode → tmp → rename │ │ discover → scan → filter      │
//! └───────────────┬───────────────┘ └───────────────┬───────────────┘
//!                 └────────────────┬────────────────┘
//!                                  ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  <root>/dataset_<hex>_shard_<index>.parquet   (one row group)   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! 1. **Shards are immutable**: a shard is written once and only ever deleted
//! 2. **Row order is stable**: shard index order, then row order within a shard
//! 3. **One writer per dataset**: writes to a dataset are serialized
//! 4. **Readers never see partial shards**: shards appear by atomic rename
//!
//! ## Module Organization
//!
//! - [`error`]: Error enum for all failure modes
//! - [`config`]: Store configuration
//! - [`types`]: Identifiers, the item record, cursors, pages
//! - [`filter`]: Filter predicate
//! - [`schema`]: Columnar schema and shard file naming
//! - [`codec`]: Item ↔ record batch conversion
//! - [`writer`]: Shard writer
//! - [`reader`]: Shard reader
//! - [`statistics`]: Dataset statistics
//! - [`api`]: Async facade (main entry point)

// =============================================================================
// Module Declarations
// =============================================================================

/// Error types for store operations.
pub mod error;

/// Store configuration and policies.
pub mod config;

/// Domain types: dataset and item ids, [`DatasetItem`], cursors, pages.
pub mod types;

/// The filter predicate applied by paging and counting.
pub mod filter;

/// Columnar schema, shard file naming, and shard discovery.
pub mod schema;

/// Conversion between items and Arrow record batches.
///
/// JSON-encoded columns (tags, metadata) are decoded here, subject to the
/// configured malformed-JSON policy.
pub mod codec;

/// Chunked shard writes and dataset deletion.
pub mod writer;

/// Paged, filtered, and point reads over a dataset's shards.
pub mod reader;

/// Aggregate statistics over a dataset.
pub mod statistics;

/// Async facade over the writer and reader.
///
/// The main entry point is [`ItemStore`](api::ItemStore).
pub mod api;

// =============================================================================
// Re-exports
// =============================================================================

pub use api::ItemStore;
pub use config::{MalformedJsonPolicy, ShardCompression, StoreConfig};
pub use error::{Error, Result};
pub use filter::FilterRequest;
pub use reader::ShardReader;
pub use statistics::{DatasetStatistics, DimensionStats};
pub use types::{DatasetId, DatasetItem, ItemId, ItemPage, ShardCursor};
pub use writer::ShardWriter;
