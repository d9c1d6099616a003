//! # Domain Types for the Shard Store
//!
//! This module defines the record stored in shards ([`DatasetItem`]), the
//! identifiers that partition and address it, and the pagination types that
//! cross the store boundary.
//!
//! ## Newtypes for Identifiers
//!
//! Both identifiers are 128-bit UUIDs. Wrapping them keeps a dataset id from
//! being passed where an item id is expected:
//!
//! ```rust
//! use shardstore::types::{DatasetId, ItemId};
//!
//! fn lookup(dataset: DatasetId, item: ItemId) {
//!     // lookup(item, dataset) won't compile
//! }
//! ```
//!
//! ## Cursor Format
//!
//! Pagination cursors are the string `"<shardIndex>:<rowIndex>"`. Callers treat
//! them as opaque; [`ShardCursor`] is the parsed form used inside the reader.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// =============================================================================
// Identifiers
// =============================================================================

/// Identifier of a dataset: the partition key of every shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetId(Uuid);

impl DatasetId {
    /// Creates a fresh random dataset id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Builds an id from its 128-bit integer value.
    pub fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// Returns the wrapped UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Returns the 32 lowercase hex digits used in shard file names.
    pub fn to_hex(&self) -> String {
        self.0.simple().to_string()
    }
}

impl Default for DatasetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a single item, unique across the whole store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(Uuid);

impl ItemId {
    /// Creates a fresh random item id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Dataset Item
// =============================================================================

/// One row of a dataset.
///
/// `tags` and `metadata` are stored as JSON strings in their own columns; all
/// other fields map to a native parquet column (see [`crate::schema`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetItem {
    pub id: ItemId,
    pub dataset_id: DatasetId,
    /// Identifier in the source system. Not guaranteed unique.
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub thumbnail_url: Option<String>,
    /// Pixel width, 0 if unknown.
    pub width: i32,
    /// Pixel height, 0 if unknown.
    pub height: i32,
    pub tags: Vec<String>,
    pub is_favorite: bool,
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DatasetItem {
    /// Creates an item with a fresh id and both timestamps set to now.
    pub fn new(dataset_id: DatasetId, external_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ItemId::new(),
            dataset_id,
            external_id: external_id.into(),
            title: title.into(),
            description: None,
            image_url: None,
            thumbnail_url: None,
            width: 0,
            height: 0,
            tags: Vec::new(),
            is_favorite: false,
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Width divided by height, or 0 when the height is unknown.
    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            0.0
        } else {
            f64::from(self.width) / f64::from(self.height)
        }
    }

    /// Copies the user-editable fields of `patch` onto `self`.
    ///
    /// `id`, `dataset_id` and `created_at` are kept; `updated_at` is set to `now`.
    pub fn apply_patch(&mut self, patch: &DatasetItem, now: DateTime<Utc>) {
        self.external_id = patch.external_id.clone();
        self.title = patch.title.clone();
        self.description = patch.description.clone();
        self.image_url = patch.image_url.clone();
        self.thumbnail_url = patch.thumbnail_url.clone();
        self.width = patch.width;
        self.height = patch.height;
        self.tags = patch.tags.clone();
        self.is_favorite = patch.is_favorite;
        self.metadata = patch.metadata.clone();
        self.updated_at = now;
    }
}

// =============================================================================
// Pagination
// =============================================================================

/// Position of the next unread row: a shard index and a row within it.
///
/// Ordering is shard first, then row, which is the scan order of the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ShardCursor {
    pub shard_index: u64,
    pub row_index: u64,
}

impl ShardCursor {
    /// The start of a dataset.
    pub const START: ShardCursor = ShardCursor { shard_index: 0, row_index: 0 };

    pub fn new(shard_index: u64, row_index: u64) -> Self {
        Self { shard_index, row_index }
    }

    /// Parses an optional cursor string; `None` and `""` both mean "start".
    pub fn parse_optional(cursor: Option<&str>) -> Result<ShardCursor> {
        match cursor.map(str::trim) {
            None | Some("") => Ok(Self::START),
            Some(s) => s.parse(),
        }
    }
}

impl fmt::Display for ShardCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.shard_index, self.row_index)
    }
}

impl FromStr for ShardCursor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidCursor(s.to_string());
        let (shard, row) = s.split_once(':').ok_or_else(invalid)?;
        let is_number = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
        if !is_number(shard) || !is_number(row) {
            return Err(invalid());
        }
        Ok(Self {
            shard_index: shard.parse().map_err(|_| invalid())?,
            row_index: row.parse().map_err(|_| invalid())?,
        })
    }
}

/// One page of items plus the cursor to continue from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPage {
    pub items: Vec<DatasetItem>,
    /// `None` when the dataset has no more rows after this page.
    pub next_cursor: Option<String>,
}

// =============================================================================
// Tests
// =============================================================================
