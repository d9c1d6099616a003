//! # Shard Schema and File Layout
//!
//! Single source of truth for the column layout of a shard, the default number
//! of rows per shard, and how shard files are named and discovered.
//!
//! ## Column Layout
//!
//! ```text
//! ┌────┬─────────────────┬──────────────────────┬──────────┐
//! │ #  │ column          │ arrow type           │ nullable │
//! ├────┼─────────────────┼──────────────────────┼──────────┤
//! │ 0  │ id              │ FixedSizeBinary(16)  │ no       │
//! │ 1  │ dataset_id      │ FixedSizeBinary(16)  │ no       │
//! │ 2  │ external_id     │ Utf8                 │ no       │
//! │ 3  │ title           │ Utf8                 │ no       │
//! │ 4  │ description     │ Utf8                 │ yes      │
//! │ 5  │ image_url       │ Utf8                 │ yes      │
//! │ 6  │ thumbnail_url   │ Utf8                 │ yes      │
//! │ 7  │ width           │ Int32                │ no       │
//! │ 8  │ height          │ Int32                │ no       │
//! │ 9  │ tags_json       │ Utf8 (JSON array)    │ no       │
//! │ 10 │ is_favorite     │ Boolean              │ no       │
//! │ 11 │ metadata_json   │ Utf8 (JSON object)   │ no       │
//! │ 12 │ created_at      │ Timestamp(ns, UTC)   │ no       │
//! │ 13 │ updated_at      │ Timestamp(ns, UTC)   │ no       │
//! └────┴─────────────────┴──────────────────────┴──────────┘
//! ```
//!
//! `id` comes first so point lookups can project a single leaf column.
//!
//! ## File Names
//!
//! `dataset_<32 lowercase hex>_shard_<index>.parquet`. The parser accepts this
//! exact shape and nothing else, so temporary files, backups, and foreign
//! files in the shard directory are ignored by discovery.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};

use crate::error::Result;
use crate::types::DatasetId;

// =============================================================================
// Constants
// =============================================================================

/// Default maximum rows per shard file.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Parquet key-value metadata entry holding the shard's first logical row.
pub const FIRST_ROW_METADATA_KEY: &str = "shardstore.first_row";

const FILE_PREFIX: &str = "dataset_";
const SHARD_INFIX: &str = "_shard_";
const FILE_EXTENSION: &str = ".parquet";
const DATASET_HEX_LEN: usize = 32;

/// Suffix of in-progress shard files; never matches the shard pattern.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Column names, in schema order.
pub mod columns {
    pub const ID: &str = "id";
    pub const DATASET_ID: &str = "dataset_id";
    pub const EXTERNAL_ID: &str = "external_id";
    pub const TITLE: &str = "title";
    pub const DESCRIPTION: &str = "description";
    pub const IMAGE_URL: &str = "image_url";
    pub const THUMBNAIL_URL: &str = "thumbnail_url";
    pub const WIDTH: &str = "width";
    pub const HEIGHT: &str = "height";
    pub const TAGS_JSON: &str = "tags_json";
    pub const IS_FAVORITE: &str = "is_favorite";
    pub const METADATA_JSON: &str = "metadata_json";
    pub const CREATED_AT: &str = "created_at";
    pub const UPDATED_AT: &str = "updated_at";
}

/// Index of the `id` leaf column, used for id-only projections.
pub const ID_COLUMN_INDEX: usize = 0;

/// Timezone attached to both timestamp columns.
pub const TIMESTAMP_TZ: &str = "UTC";

// =============================================================================
// Arrow Schema
// =============================================================================

fn timestamp_type() -> DataType {
    DataType::Timestamp(TimeUnit::Nanosecond, Some(TIMESTAMP_TZ.into()))
}

/// Returns the shared arrow schema of every shard.
pub fn item_schema() -> SchemaRef {
    static SCHEMA: OnceLock<SchemaRef> = OnceLock::new();
    SCHEMA
        .get_or_init(|| {
            Arc::new(Schema::new(vec![
                Field::new(columns::ID, DataType::FixedSizeBinary(16), false),
                Field::new(columns::DATASET_ID, DataType::FixedSizeBinary(16), false),
                Field::new(columns::EXTERNAL_ID, DataType::Utf8, false),
                Field::new(columns::TITLE, DataType::Utf8, false),
                Field::new(columns::DESCRIPTION, DataType::Utf8, true),
                Field::new(columns::IMAGE_URL, DataType::Utf8, true),
                Field::new(columns::THUMBNAIL_URL, DataType::Utf8, true),
                Field::new(columns::WIDTH, DataType::Int32, false),
                Field::new(columns::HEIGHT, DataType::Int32, false),
                Field::new(columns::TAGS_JSON, DataType::Utf8, false),
                Field::new(columns::IS_FAVORITE, DataType::Boolean, false),
                Field::new(columns::METADATA_JSON, DataType::Utf8, false),
                Field::new(columns::CREATED_AT, timestamp_type(), false),
                Field::new(columns::UPDATED_AT, timestamp_type(), false),
            ]))
        })
        .clone()
}

// =============================================================================
// File Names
// =============================================================================

/// Builds the file name of shard `shard_index` of `dataset_id`.
pub fn shard_file_name(dataset_id: DatasetId, shard_index: u64) -> String {
    format!(
        "{}{}{}{}{}",
        FILE_PREFIX,
        dataset_id.to_hex(),
        SHARD_INFIX,
        shard_index,
        FILE_EXTENSION
    )
}

/// Returns the file name prefix shared by every shard of `dataset_id`.
pub fn dataset_file_prefix(dataset_id: DatasetId) -> String {
    format!("{}{}{}", FILE_PREFIX, dataset_id.to_hex(), SHARD_INFIX)
}

/// Parses `dataset_<hex>_shard_<index>.parquet` back into its parts.
///
/// Returns `None` for any name that is not exactly that shape: wrong prefix or
/// extension, a dataset id that is not 32 hex digits, or an index with a sign,
/// whitespace, or leading zeros.
pub fn try_parse_file_name(name: &str) -> Option<(DatasetId, u64)> {
    let rest = name.strip_prefix(FILE_PREFIX)?;
    let rest = rest.strip_suffix(FILE_EXTENSION)?;

    if rest.len() < DATASET_HEX_LEN || !rest.is_char_boundary(DATASET_HEX_LEN) {
        return None;
    }
    let (hex, rest) = rest.split_at(DATASET_HEX_LEN);
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let index = rest.strip_prefix(SHARD_INFIX)?;

    if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if index.len() > 1 && index.starts_with('0') {
        return None;
    }

    let dataset = u128::from_str_radix(hex, 16).ok()?;
    let shard_index = index.parse::<u64>().ok()?;
    Some((DatasetId::from_u128(dataset), shard_index))
}

// =============================================================================
// Shard Discovery
// =============================================================================

/// A shard file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardFile {
    pub dataset_id: DatasetId,
    pub shard_index: u64,
    pub path: PathBuf,
}

/// Lists every shard file in `dir`, sorted by dataset then shard index.
///
/// A missing directory is treated as empty.
pub async fn list_all_shards(dir: &Path) -> Result<Vec<ShardFile>> {
    scan_shards(dir, |_| true).await
}

/// Lists the shard files of one dataset, sorted by shard index.
///
/// Names without the dataset's prefix are skipped before parsing.
pub async fn list_dataset_shards(dir: &Path, dataset_id: DatasetId) -> Result<Vec<ShardFile>> {
    let prefix = dataset_file_prefix(dataset_id);
    let mut shards = scan_shards(dir, |name| has_dataset_prefix(name, &prefix)).await?;
    shards.retain(|s| s.dataset_id == dataset_id);
    Ok(shards)
}

/// Returns the dataset a shard or `.tmp` shard name belongs to.
///
/// Uses the same rule as [`try_parse_file_name`], so anything discovery sees
/// as a shard of a dataset is also recognized here.
pub fn owning_dataset(name: &str) -> Option<DatasetId> {
    let base = name.strip_suffix(TEMP_SUFFIX).unwrap_or(name);
    try_parse_file_name(base).map(|(dataset_id, _)| dataset_id)
}

/// Prefix test that ignores the case of the hex digits, as the parser does.
fn has_dataset_prefix(name: &str, prefix: &str) -> bool {
    name.len() >= prefix.len()
        && name.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

async fn scan_shards<F>(dir: &Path, keep: F) -> Result<Vec<ShardFile>>
where
    F: Fn(&str) -> bool,
{
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut shards = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !keep(name) {
            continue;
        }
        if let Some((dataset_id, shard_index)) = try_parse_file_name(name) {
            shards.push(ShardFile { dataset_id, shard_index, path: entry.path() });
        }
    }

    shards.sort_by_key(|s| (s.dataset_id, s.shard_index));
    Ok(shards)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_roundtrip() {
        let dataset = DatasetId::from_u128(0x0123_4567_89ab_cdef_0123_4567_89ab_cdef);
        let name = shard_file_name(dataset, 12);
        assert_eq!(
            name,
            "dataset_0123456789abcdef0123456789abcdef_shard_12.parquet"
        );
        assert_eq!(try_parse_file_name(&name), Some((dataset, 12)));
    }

    #[test]
    fn test_parse_accepts_uppercase_hex() {
        let parsed =
            try_parse_file_name("dataset_0123456789ABCDEF0123456789ABCDEF_shard_0.parquet");
        assert_eq!(
            parsed,
            Some((DatasetId::from_u128(0x0123_4567_89ab_cdef_0123_4567_89ab_cdef), 0))
        );
    }

    #[test]
    fn test_parse_rejects_non_conforming_names() {
        let hex = "0123456789abcdef0123456789abcdef";
        let bad = [
            String::new(),
            "readme.md".to_string(),
            format!("dataset_{}_shard_1.parquet.tmp", hex),
            format!("dataset_{}_shard_.parquet", hex),
            format!("dataset_{}_shard_01.parquet", hex),
            format!("dataset_{}_shard_+1.parquet", hex),
            format!("dataset_{}_shard_-1.parquet", hex),
            format!("dataset_{}_shard_1 .parquet", hex),
            format!("dataset_{}_shard_1.csv", hex),
            format!("dataset_{}_part_1.parquet", hex),
            format!("Dataset_{}_shard_1.parquet", hex),
            format!("dataset_{}_shard_1.parquet", &hex[..31]),
            format!("dataset_{}0_shard_1.parquet", hex),
            "dataset_0123456789abcdef0123456789abcdeg_shard_1.parquet".to_string(),
            format!("xdataset_{}_shard_1.parquet", hex),
            "dataset_é123456789abcdef0123456789abcde_shard_1.parquet".to_string(),
        ];
        for name in &bad {
            assert_eq!(try_parse_file_name(name), None, "accepted {:?}", name);
        }
    }

    #[test]
    fn test_prefix_matches_file_names() {
        let dataset = DatasetId::new();
        assert!(shard_file_name(dataset, 7).starts_with(&dataset_file_prefix(dataset)));
    }

    #[test]
    fn test_owning_dataset_agrees_with_parser() {
        let dataset = DatasetId::from_u128(0x0123_4567_89ab_cdef_0123_4567_89ab_cdef);
        let upper = "dataset_0123456789ABCDEF0123456789ABCDEF_shard_3.parquet";

        assert_eq!(owning_dataset(&shard_file_name(dataset, 3)), Some(dataset));
        assert_eq!(owning_dataset(upper), Some(dataset));
        assert_eq!(owning_dataset(&format!("{}{}", upper, TEMP_SUFFIX)), Some(dataset));
        assert!(has_dataset_prefix(upper, &dataset_file_prefix(dataset)));

        assert_eq!(owning_dataset("notes.txt"), None);
        assert_eq!(
            owning_dataset("dataset_0123456789abcdef0123456789abcdef_shard_01.parquet"),
            None
        );
    }

    #[test]
    fn test_schema_layout() {
        let schema = item_schema();
        assert_eq!(schema.fields().len(), 14);
        assert_eq!(schema.field(ID_COLUMN_INDEX).name(), columns::ID);
        assert!(schema.field_with_name(columns::DESCRIPTION).unwrap().is_nullable());
        assert!(!schema.field_with_name(columns::TITLE).unwrap().is_nullable());
    }

    #[tokio::test]
    async fn test_list_shards_sorted_and_filtered() {
        let dir = tempfile::TempDir::new().unwrap();
        let a = DatasetId::from_u128(1);
        let b = DatasetId::from_u128(2);

        for (dataset, index) in [(a, 10), (b, 0), (a, 2), (a, 0)] {
            std::fs::write(dir.path().join(shard_file_name(dataset, index)), b"").unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();
        std::fs::write(
            dir.path().join(format!("{}{}", shard_file_name(a, 11), TEMP_SUFFIX)),
            b"",
        )
        .unwrap();

        let shards = list_dataset_shards(dir.path(), a).await.unwrap();
        let indexes: Vec<u64> = shards.iter().map(|s| s.shard_index).collect();
        assert_eq!(indexes, vec![0, 2, 10]);

        let all = list_all_shards(dir.path()).await.unwrap();
        assert_eq!(all.len(), 4);
    }

    #[tokio::test]
    async fn test_list_dataset_shards_finds_uppercase_names() {
        let dir = tempfile::TempDir::new().unwrap();
        let dataset = DatasetId::from_u128(0xabcd_ef00_0000_0000_0000_0000_0000_00ff);
        let upper = format!("dataset_{}_shard_4.parquet", dataset.to_hex().to_uppercase());
        std::fs::write(dir.path().join(&upper), b"").unwrap();
        std::fs::write(dir.path().join(shard_file_name(dataset, 1)), b"").unwrap();

        let shards = list_dataset_shards(dir.path(), dataset).await.unwrap();
        let indexes: Vec<u64> = shards.iter().map(|s| s.shard_index).collect();
        assert_eq!(indexes, vec![1, 4]);
    }

    #[tokio::test]
    async fn test_list_missing_dir_is_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(list_all_shards(&missing).await.unwrap().is_empty());
    }
}
