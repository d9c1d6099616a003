//! # Shard Writer
//!
//! Serializes items into immutable parquet shard files and removes the shards
//! of a dataset.
//!
//! ## Chunking
//!
//! A write call is split into chunks of at most `batch_size` rows. Each chunk
//! becomes exactly one shard with exactly one row group:
//!
//! ```text
//! items: [ 0 ........................................ 2.5B )
//!           │                 │                 │
//!           ▼                 ▼                 ▼
//!        shard k (B)      shard k+1 (B)     shard k+2 (B/2)
//! ```
//!
//! `k` is one past the highest shard index the dataset already has, so an
//! append never overwrites an existing shard even when earlier appends left a
//! partly filled last shard.
//!
//! ## Visibility
//!
//! Each shard is written to `<name>.tmp`, synced, then renamed into place.
//! Discovery ignores `.tmp` names, so readers see a shard either complete or
//! not at all.
//!
//! ## Failure Semantics
//!
//! There is no rollback. If chunk 3 of 5 fails, shards 1 and 2 stay on disk
//! and the error is returned to the caller.

use std::fs::File;
use std::path::{Path, PathBuf};

use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::codec::encode_batch;
use crate::config::{ShardCompression, StoreConfig};
use crate::error::{Error, Result};
use crate::schema::{
    list_dataset_shards, owning_dataset, shard_file_name, ShardFile, FIRST_ROW_METADATA_KEY,
    TEMP_SUFFIX,
};
use crate::types::{DatasetId, DatasetItem};

// =============================================================================
// Shard Writer
// =============================================================================

/// Writes and deletes shard files under one root directory.
///
/// Holds no state besides its configuration; clones share nothing mutable.
#[derive(Debug, Clone)]
pub struct ShardWriter {
    root_dir: PathBuf,
    batch_size: usize,
    compression: ShardCompression,
}

impl ShardWriter {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            root_dir: config.root_dir.clone(),
            batch_size: config.batch_size.max(1),
            compression: config.compression,
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Writes `items` as one or more new shards of `dataset_id`.
    ///
    /// `start_row_index` is the logical row offset of `items[0]` within the
    /// dataset. It is recorded in each shard's footer metadata.
    ///
    /// # Returns
    ///
    /// The shards written, in index order. Empty input writes nothing.
    ///
    /// # Errors
    ///
    /// I/O and encoding errors, or [`Error::Cancelled`] when `cancel` fires
    /// between chunks. Shards written before the failure remain on disk.
    pub async fn write_batch(
        &self,
        dataset_id: DatasetId,
        items: Vec<DatasetItem>,
        start_row_index: u64,
        cancel: &CancellationToken,
    ) -> Result<Vec<ShardFile>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        tokio::fs::create_dir_all(&self.root_dir).await?;

        let next_index = list_dataset_shards(&self.root_dir, dataset_id)
            .await?
            .last()
            .map_or(0, |s| s.shard_index + 1);

        let total = items.len();
        let mut rest = items;
        let mut written = Vec::new();
        let mut first_row = start_row_index;
        let mut shard_index = next_index;

        while !rest.is_empty() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let take = rest.len().min(self.batch_size);
            let tail = rest.split_off(take);
            let chunk = std::mem::replace(&mut rest, tail);
            let rows = chunk.len();

            let path = self.root_dir.join(shard_file_name(dataset_id, shard_index));
            let props = self.writer_properties(rows, first_row);
            let target = path.clone();
            tokio::task::spawn_blocking(move || write_shard_file(&target, &chunk, props)).await??;

            debug!(
                dataset_id = %dataset_id,
                shard = shard_index,
                first_row,
                rows,
                "wrote shard"
            );

            written.push(ShardFile { dataset_id, shard_index, path });
            first_row += rows as u64;
            shard_index += 1;
        }

        info!(
            dataset_id = %dataset_id,
            rows = total,
            start_row_index,
            shards = written.len(),
            "wrote batch"
        );
        Ok(written)
    }

    fn writer_properties(&self, rows: usize, first_row: u64) -> WriterProperties {
        WriterProperties::builder()
            .set_compression(self.compression.to_parquet())
            .set_max_row_group_size(rows.max(1))
            .set_key_value_metadata(Some(vec![KeyValue::new(
                FIRST_ROW_METADATA_KEY.to_string(),
                first_row.to_string(),
            )]))
            .set_created_by(concat!("shardstore version ", env!("CARGO_PKG_VERSION")).to_owned())
            .build()
    }

    /// Deletes every shard of `dataset_id`, plus any leftover `.tmp` files.
    ///
    /// # Returns
    ///
    /// The number of shard files removed (temporary files are not counted).
    ///
    /// # Errors
    ///
    /// The first removal failure is returned; files removed before it stay
    /// removed.
    pub async fn delete_dataset_shards(&self, dataset_id: DatasetId) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.root_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if owning_dataset(name) != Some(dataset_id) {
                continue;
            }
            let is_shard = !name.ends_with(TEMP_SUFFIX);

            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => {
                    if is_shard {
                        removed += 1;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        info!(dataset_id = %dataset_id, shards = removed, "deleted dataset shards");
        Ok(removed)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

/// Encodes and writes one shard. Runs on the blocking pool.
fn write_shard_file(path: &Path, items: &[DatasetItem], props: WriterProperties) -> Result<()> {
    let batch = encode_batch(items)?;
    let tmp = temp_path(path);

    let write = || -> Result<()> {
        let file = File::create(&tmp)?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
        writer.write(&batch)?;
        let file = writer.into_inner()?;
        file.sync_all()?;
        Ok(())
    };

    if let Err(e) = write() {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }

    std::fs::rename(&tmp, path)?;
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
