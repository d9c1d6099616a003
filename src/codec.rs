//! # Row Codec
//!
//! Converts between [`DatasetItem`] rows and Arrow [`RecordBatch`]es laid out
//! per [`crate::schema::item_schema`]. Every column is built individually and
//! the batch is assembled once all fourteen arrays are finished.
//!
//! ## Nested Columns
//!
//! `tags` and `metadata` are stored as JSON strings. Decoding them follows the
//! configured [`MalformedJsonPolicy`]: lenient decoding logs and substitutes an
//! empty collection, strict decoding fails the read.

use std::collections::BTreeMap;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, BooleanBuilder, FixedSizeBinaryArray,
    FixedSizeBinaryBuilder, Int32Array, Int32Builder, PrimitiveArray, StringArray, StringBuilder,
    TimestampNanosecondBuilder,
};
use arrow::datatypes::{Int32Type, TimestampNanosecondType};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tracing::warn;
use uuid::Uuid;

use crate::config::MalformedJsonPolicy;
use crate::error::{Error, Result};
use crate::schema::{columns, item_schema, TIMESTAMP_TZ};
use crate::types::{DatasetId, DatasetItem, ItemId};

const UUID_LEN: i32 = 16;

// =============================================================================
// Encoding
// =============================================================================

/// Encodes `items` into a single record batch.
pub fn encode_batch(items: &[DatasetItem]) -> Result<RecordBatch> {
    let n = items.len();

    let mut id = FixedSizeBinaryBuilder::with_capacity(n, UUID_LEN);
    let mut dataset_id = FixedSizeBinaryBuilder::with_capacity(n, UUID_LEN);
    let mut external_id = StringBuilder::new();
    let mut title = StringBuilder::new();
    let mut description = StringBuilder::new();
    let mut image_url = StringBuilder::new();
    let mut thumbnail_url = StringBuilder::new();
    let mut width = Int32Builder::with_capacity(n);
    let mut height = Int32Builder::with_capacity(n);
    let mut tags_json = StringBuilder::new();
    let mut is_favorite = BooleanBuilder::with_capacity(n);
    let mut metadata_json = StringBuilder::new();
    let mut created_at = TimestampNanosecondBuilder::with_capacity(n).with_timezone(TIMESTAMP_TZ);
    let mut updated_at = TimestampNanosecondBuilder::with_capacity(n).with_timezone(TIMESTAMP_TZ);

    for item in items {
        id.append_value(item.id.as_uuid().as_bytes())?;
        dataset_id.append_value(item.dataset_id.as_uuid().as_bytes())?;
        external_id.append_value(&item.external_id);
        title.append_value(&item.title);
        description.append_option(item.description.as_deref());
        image_url.append_option(item.image_url.as_deref());
        thumbnail_url.append_option(item.thumbnail_url.as_deref());
        width.append_value(item.width);
        height.append_value(item.height);
        tags_json.append_value(encode_json(&item.tags, columns::TAGS_JSON)?);
        is_favorite.append_value(item.is_favorite);
        metadata_json.append_value(encode_json(&item.metadata, columns::METADATA_JSON)?);
        created_at.append_value(timestamp_nanos(item.created_at, columns::CREATED_AT)?);
        updated_at.append_value(timestamp_nanos(item.updated_at, columns::UPDATED_AT)?);
    }

    let arrays: Vec<ArrayRef> = vec![
        Arc::new(id.finish()),
        Arc::new(dataset_id.finish()),
        Arc::new(external_id.finish()),
        Arc::new(title.finish()),
        Arc::new(description.finish()),
        Arc::new(image_url.finish()),
        Arc::new(thumbnail_url.finish()),
        Arc::new(width.finish()),
        Arc::new(height.finish()),
        Arc::new(tags_json.finish()),
        Arc::new(is_favorite.finish()),
        Arc::new(metadata_json.finish()),
        Arc::new(created_at.finish()),
        Arc::new(updated_at.finish()),
    ];

    Ok(RecordBatch::try_new(item_schema(), arrays)?)
}

fn encode_json<T: serde::Serialize>(value: &T, column: &'static str) -> Result<String> {
    serde_json::to_string(value).map_err(|source| Error::Json { column, source })
}

fn timestamp_nanos(value: DateTime<Utc>, column: &str) -> Result<i64> {
    value.timestamp_nanos_opt().ok_or_else(|| {
        Error::Schema(format!(
            "{} value {} is outside the nanosecond timestamp range",
            column, value
        ))
    })
}

// =============================================================================
// Decoding
// =============================================================================

/// Where a batch came from; only used to give warnings and errors context.
#[derive(Debug, Clone, Copy)]
pub struct DecodeContext {
    pub dataset_id: DatasetId,
    pub shard_index: u64,
    /// Row index within the shard of the batch's first row.
    pub first_row: u64,
    pub policy: MalformedJsonPolicy,
}

/// Typed views over the columns of one record batch.
struct ItemColumns<'a> {
    id: &'a FixedSizeBinaryArray,
    dataset_id: &'a FixedSizeBinaryArray,
    external_id: &'a StringArray,
    title: &'a StringArray,
    description: &'a StringArray,
    image_url: &'a StringArray,
    thumbnail_url: &'a StringArray,
    width: &'a Int32Array,
    height: &'a Int32Array,
    tags_json: &'a StringArray,
    is_favorite: &'a BooleanArray,
    metadata_json: &'a StringArray,
    created_at: &'a PrimitiveArray<TimestampNanosecondType>,
    updated_at: &'a PrimitiveArray<TimestampNanosecondType>,
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef> {
    batch
        .column_by_name(name)
        .ok_or_else(|| Error::Schema(format!("shard is missing column '{}'", name)))
}

fn wrong_type(name: &str) -> Error {
    Error::Schema(format!("column '{}' has an unexpected type", name))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    column(batch, name)?.as_string_opt::<i32>().ok_or_else(|| wrong_type(name))
}

fn uuid_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a FixedSizeBinaryArray> {
    column(batch, name)?.as_fixed_size_binary_opt().ok_or_else(|| wrong_type(name))
}

fn int_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int32Array> {
    column(batch, name)?.as_primitive_opt::<Int32Type>().ok_or_else(|| wrong_type(name))
}

fn timestamp_column<'a>(
    batch: &'a RecordBatch,
    name: &str,
) -> Result<&'a PrimitiveArray<TimestampNanosecondType>> {
    column(batch, name)?
        .as_primitive_opt::<TimestampNanosecondType>()
        .ok_or_else(|| wrong_type(name))
}

impl<'a> ItemColumns<'a> {
    fn new(batch: &'a RecordBatch) -> Result<Self> {
        Ok(Self {
            id: uuid_column(batch, columns::ID)?,
            dataset_id: uuid_column(batch, columns::DATASET_ID)?,
            external_id: string_column(batch, columns::EXTERNAL_ID)?,
            title: string_column(batch, columns::TITLE)?,
            description: string_column(batch, columns::DESCRIPTION)?,
            image_url: string_column(batch, columns::IMAGE_URL)?,
            thumbnail_url: string_column(batch, columns::THUMBNAIL_URL)?,
            width: int_column(batch, columns::WIDTH)?,
            height: int_column(batch, columns::HEIGHT)?,
            tags_json: string_column(batch, columns::TAGS_JSON)?,
            is_favorite: column(batch, columns::IS_FAVORITE)?
                .as_boolean_opt()
                .ok_or_else(|| wrong_type(columns::IS_FAVORITE))?,
            metadata_json: string_column(batch, columns::METADATA_JSON)?,
            created_at: timestamp_column(batch, columns::CREATED_AT)?,
            updated_at: timestamp_column(batch, columns::UPDATED_AT)?,
        })
    }

    fn row(&self, i: usize, ctx: &DecodeContext) -> Result<DatasetItem> {
        let row = ctx.first_row + i as u64;
        Ok(DatasetItem {
            id: ItemId::from_uuid(uuid_at(self.id, i)?),
            dataset_id: DatasetId::from_uuid(uuid_at(self.dataset_id, i)?),
            external_id: self.external_id.value(i).to_string(),
            title: self.title.value(i).to_string(),
            description: optional_string(self.description, i),
            image_url: optional_string(self.image_url, i),
            thumbnail_url: optional_string(self.thumbnail_url, i),
            width: self.width.value(i),
            height: self.height.value(i),
            tags: decode_json::<Vec<String>>(self.tags_json.value(i), columns::TAGS_JSON, row, ctx)?,
            is_favorite: self.is_favorite.value(i),
            metadata: decode_json::<BTreeMap<String, String>>(
                self.metadata_json.value(i),
                columns::METADATA_JSON,
                row,
                ctx,
            )?,
            created_at: DateTime::from_timestamp_nanos(self.created_at.value(i)),
            updated_at: DateTime::from_timestamp_nanos(self.updated_at.value(i)),
        })
    }
}

fn uuid_at(array: &FixedSizeBinaryArray, i: usize) -> Result<Uuid> {
    Uuid::from_slice(array.value(i)).map_err(|e| Error::Schema(format!("invalid uuid: {}", e)))
}

fn optional_string(array: &StringArray, i: usize) -> Option<String> {
    if array.is_null(i) {
        None
    } else {
        Some(array.value(i).to_string())
    }
}

fn decode_json<T: DeserializeOwned + Default>(
    raw: &str,
    column: &'static str,
    row: u64,
    ctx: &DecodeContext,
) -> Result<T> {
    match serde_json::from_str(raw) {
        Ok(value) => Ok(value),
        Err(source) => match ctx.policy {
            MalformedJsonPolicy::Strict => Err(Error::Json { column, source }),
            MalformedJsonPolicy::Lenient => {
                warn!(
                    dataset_id = %ctx.dataset_id,
                    shard = ctx.shard_index,
                    row,
                    column,
                    error = %source,
                    "malformed json column, using empty value"
                );
                Ok(T::default())
            }
        },
    }
}

/// Decodes every row of `batch`.
pub fn decode_batch(batch: &RecordBatch, ctx: &DecodeContext) -> Result<Vec<DatasetItem>> {
    let columns = ItemColumns::new(batch)?;
    (0..batch.num_rows()).map(|i| columns.row(i, ctx)).collect()
}

/// Decodes rows of `batch` in order, keeping those accepted by `keep`, and
/// stops once `limit` rows have been kept.
///
/// Rows are yielded with their row index inside the shard.
pub fn decode_batch_filtered<F>(
    batch: &RecordBatch,
    ctx: &DecodeContext,
    limit: usize,
    mut keep: F,
) -> Result<Vec<(u64, DatasetItem)>>
where
    F: FnMut(&DatasetItem) -> bool,
{
    let columns = ItemColumns::new(batch)?;
    let mut out = Vec::new();
    for i in 0..batch.num_rows() {
        if out.len() >= limit {
            break;
        }
        let item = columns.row(i, ctx)?;
        if keep(&item) {
            out.push((ctx.first_row + i as u64, item));
        }
    }
    Ok(out)
}

/// Extracts the `id` column of a batch (full or id-only projection).
pub fn decode_ids(batch: &RecordBatch) -> Result<Vec<ItemId>> {
    let ids = uuid_column(batch, columns::ID)?;
    (0..ids.len()).map(|i| uuid_at(ids, i).map(ItemId::from_uuid)).collect()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ctx(policy: MalformedJsonPolicy) -> DecodeContext {
        DecodeContext {
            dataset_id: DatasetId::from_u128(9),
            shard_index: 0,
            first_row: 0,
            policy,
        }
    }

    fn sample_item() -> DatasetItem {
        let dataset = DatasetId::from_u128(9);
        let mut item = DatasetItem::new(dataset, "ext-1", "Sunset");
        item.description = Some("over the bay".to_string());
        item.thumbnail_url = Some("https://img/t.jpg".to_string());
        item.width = 1920;
        item.height = 1080;
        item.tags = vec!["sky".to_string(), "orange".to_string()];
        item.is_favorite = true;
        item.metadata.insert("photographer".to_string(), "Ana".to_string());
        item.created_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        item.updated_at = item.created_at + chrono::Duration::nanoseconds(123_456_789);
        item
    }

    #[test]
    fn test_encode_decode_preserves_fields() {
        let item = sample_item();
        let batch = encode_batch(std::slice::from_ref(&item)).unwrap();

        assert_eq!(batch.num_rows(), 1);
        assert_eq!(batch.num_columns(), 14);

        let decoded = decode_batch(&batch, &ctx(MalformedJsonPolicy::Strict)).unwrap();
        assert_eq!(decoded, vec![item]);
    }

    #[test]
    fn test_empty_batch() {
        let batch = encode_batch(&[]).unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert!(decode_batch(&batch, &ctx(MalformedJsonPolicy::Strict)).unwrap().is_empty());
    }

    fn batch_with_tags_json(raw: &str) -> RecordBatch {
        let batch = encode_batch(&[sample_item()]).unwrap();
        let mut arrays: Vec<ArrayRef> = batch.columns().to_vec();
        let tags_index = batch.schema().index_of(columns::TAGS_JSON).unwrap();
        arrays[tags_index] = Arc::new(StringArray::from(vec![raw]));
        RecordBatch::try_new(batch.schema(), arrays).unwrap()
    }

    #[test]
    fn test_malformed_json_lenient_yields_empty() {
        let batch = batch_with_tags_json("[\"unterminated");
        let decoded = decode_batch(&batch, &ctx(MalformedJsonPolicy::Lenient)).unwrap();
        assert!(decoded[0].tags.is_empty());
        assert_eq!(decoded[0].metadata.get("photographer").map(String::as_str), Some("Ana"));
    }

    #[test]
    fn test_malformed_json_strict_fails() {
        let batch = batch_with_tags_json("{\"not\": \"a list\"}");
        let err = decode_batch(&batch, &ctx(MalformedJsonPolicy::Strict)).unwrap_err();
        assert!(matches!(err, Error::Json { column: "tags_json", .. }));
    }

    #[test]
    fn test_filtered_decode_reports_shard_rows() {
        let mut items: Vec<DatasetItem> = (0..4).map(|_| sample_item()).collect();
        items[1].is_favorite = false;
        items[3].is_favorite = false;
        let batch = encode_batch(&items).unwrap();

        let mut context = ctx(MalformedJsonPolicy::Strict);
        context.first_row = 100;
        let kept = decode_batch_filtered(&batch, &context, usize::MAX, |i| i.is_favorite).unwrap();
        let rows: Vec<u64> = kept.iter().map(|(row, _)| *row).collect();
        assert_eq!(rows, vec![100, 102]);

        let first_only = decode_batch_filtered(&batch, &context, 1, |i| i.is_favorite).unwrap();
        assert_eq!(first_only.len(), 1);
        assert_eq!(first_only[0].0, 100);
    }

    #[test]
    fn test_decode_ids() {
        let items: Vec<DatasetItem> = (0..3).map(|_| sample_item()).collect();
        let batch = encode_batch(&items).unwrap();
        let ids = decode_ids(&batch).unwrap();
        assert_eq!(ids, items.iter().map(|i| i.id).collect::<Vec<_>>());
    }

    #[test]
    fn test_missing_column_is_schema_error() {
        let batch = encode_batch(&[sample_item()]).unwrap();
        let projected = batch.project(&[0]).unwrap();
        let err = decode_batch(&projected, &ctx(MalformedJsonPolicy::Strict)).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }
}
