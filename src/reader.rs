//! # Shard Reader
//!
//! Read operations over a dataset's shard set: cursor-paged scans, point
//! lookup, counts, and full materialization.
//!
//! ## Execution Model
//!
//! Parquet decoding is synchronous, so every per-shard unit of work runs on
//! Tokio's blocking pool. Lookups and counts fan out one task per shard:
//!
//! ```text
//!                    read_item / count
//!                           │
//!           ┌───────────────┼───────────────┐
//!           ▼               ▼               ▼
//!      ┌─────────┐     ┌─────────┐     ┌─────────┐
//!      │ shard 0 │     │ shard 1 │ ... │ shard N │   ≤ max_parallel_shard_reads
//!      └────┬────┘     └────┬────┘     └────┬────┘   running at once
//!           └───────────────┼───────────────┘
//!                           ▼
//!             first match wins / sum all
//! ```
//!
//! A lookup returns as soon as one shard reports the item. The remaining tasks
//! are detached, not aborted, and run to completion in the background.
//!
//! Paging is sequential: it walks shards in index order and stops as soon as
//! the page is full.
//!
//! ## No Snapshot Isolation
//!
//! Each call discovers the shard set afresh. A paging session that spans a
//! concurrent rewrite of the dataset can skip or repeat rows.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use parquet::arrow::arrow_reader::{ParquetRecordBatchReaderBuilder, RowSelection, RowSelector};
use parquet::arrow::ProjectionMask;
use parquet::file::reader::{FileReader, SerializedFileReader};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::codec::{decode_batch, decode_batch_filtered, decode_ids, DecodeContext};
use crate::config::{MalformedJsonPolicy, StoreConfig};
use crate::error::{Error, Result};
use crate::filter::FilterRequest;
use crate::schema::{list_all_shards, list_dataset_shards, ShardFile, ID_COLUMN_INDEX};
use crate::types::{DatasetId, DatasetItem, ItemId, ItemPage, ShardCursor};

/// Rows decoded per arrow batch while scanning a shard.
const READ_BATCH_ROWS: usize = 1024;

// =============================================================================
// Shard Reader
// =============================================================================

/// Reads shard files under one root directory.
#[derive(Debug, Clone)]
pub struct ShardReader {
    root_dir: PathBuf,
    policy: MalformedJsonPolicy,
    permits: Arc<Semaphore>,
}

impl ShardReader {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            root_dir: config.root_dir.clone(),
            policy: config.malformed_json,
            permits: Arc::new(Semaphore::new(config.max_parallel_shard_reads.max(1))),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Reads up to `page_size` rows matching `filter`, starting at `cursor`.
    ///
    /// # Arguments
    ///
    /// * `cursor` - `"shardIndex:rowIndex"` from a previous page; `None` or
    ///   empty starts at the beginning of the dataset.
    ///
    /// # Returns
    ///
    /// The page and the cursor of the next unread row. `next_cursor` is `None`
    /// once no rows remain after the page. A `page_size` of 0 returns no items
    /// and hands the cursor back unchanged while shards remain.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidCursor`] for a malformed cursor, plus I/O and decoding
    /// errors.
    pub async fn read_page(
        &self,
        dataset_id: DatasetId,
        filter: &FilterRequest,
        cursor: Option<&str>,
        page_size: usize,
        cancel: &CancellationToken,
    ) -> Result<ItemPage> {
        let cursor = ShardCursor::parse_optional(cursor)?;
        let shards = list_dataset_shards(&self.root_dir, dataset_id).await?;
        let first = shards.partition_point(|s| s.shard_index < cursor.shard_index);
        let shards = &shards[first..];

        if page_size == 0 {
            let next_cursor = shards.first().map(|_| cursor.to_string());
            return Ok(ItemPage { items: Vec::new(), next_cursor });
        }

        let filter = Arc::new(filter.clone());
        let mut items = Vec::with_capacity(page_size.min(READ_BATCH_ROWS));

        for (pos, shard) in shards.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let start_row = if shard.shard_index == cursor.shard_index {
                cursor.row_index
            } else {
                0
            };
            let limit = page_size - items.len();

            let task_shard = shard.clone();
            let task_filter = Arc::clone(&filter);
            let task_cancel = cancel.clone();
            let policy = self.policy;
            let scan = tokio::task::spawn_blocking(move || {
                scan_shard(&task_shard, policy, start_row, &task_filter, limit, &task_cancel)
            })
            .await??;

            let last_row = scan.matches.last().map(|(row, _)| *row);
            let filled = scan.matches.len() == limit;
            items.extend(scan.matches.into_iter().map(|(_, item)| item));

            if filled {
                // `filled` implies at least one match.
                let next_row = last_row.map_or(start_row, |row| row + 1);
                let next_cursor = if next_row < scan.total_rows {
                    Some(ShardCursor::new(shard.shard_index, next_row))
                } else {
                    shards.get(pos + 1).map(|s| ShardCursor::new(s.shard_index, 0))
                };

                debug!(
                    dataset_id = %dataset_id,
                    rows = items.len(),
                    next = ?next_cursor,
                    "read page"
                );
                return Ok(ItemPage {
                    items,
                    next_cursor: next_cursor.map(|c| c.to_string()),
                });
            }
        }

        debug!(dataset_id = %dataset_id, rows = items.len(), "read final page");
        Ok(ItemPage { items, next_cursor: None })
    }

    /// Looks up one item by id, searching every shard in parallel.
    ///
    /// Each shard task reads only the `id` column and decodes the full row
    /// only on a hit. A shard error does not stop the search; it is returned
    /// only if no other shard holds the item.
    pub async fn read_item(
        &self,
        dataset_id: DatasetId,
        item_id: ItemId,
        cancel: &CancellationToken,
    ) -> Result<Option<DatasetItem>> {
        let shards = list_dataset_shards(&self.root_dir, dataset_id).await?;
        let policy = self.policy;
        let task_cancel = cancel.clone();

        let mut tasks: FuturesUnordered<_> = self
            .spawn_per_shard(&shards, move |shard| {
                find_in_shard(&shard, policy, item_id, &task_cancel)
            })
            .into_iter()
            .collect();

        let mut first_error = None;
        while let Some(joined) = tasks.next().await {
            match joined.map_err(Error::from).and_then(|r| r) {
                Ok(Some(item)) => return Ok(Some(item)),
                Ok(None) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    /// Counts rows matching `filter`.
    ///
    /// An empty filter sums the row counts recorded in shard footers without
    /// decoding any column data. Any other filter decodes every row.
    pub async fn count(
        &self,
        dataset_id: DatasetId,
        filter: &FilterRequest,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let shards = list_dataset_shards(&self.root_dir, dataset_id).await?;

        let handles = if filter.is_empty() {
            self.spawn_per_shard(&shards, |shard| shard_row_count(&shard.path))
        } else {
            let filter = Arc::new(filter.clone());
            let policy = self.policy;
            let task_cancel = cancel.clone();
            self.spawn_per_shard(&shards, move |shard| {
                let scan = scan_shard(&shard, policy, 0, &filter, usize::MAX, &task_cancel)?;
                Ok(scan.matches.len() as u64)
            })
        };

        let mut total = 0;
        for handle in handles {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            total += handle.await??;
        }
        Ok(total)
    }

    /// Materializes every row of the dataset in shard-then-row order.
    ///
    /// Cost is linear in the dataset size.
    pub async fn read_all(
        &self,
        dataset_id: DatasetId,
        cancel: &CancellationToken,
    ) -> Result<Vec<DatasetItem>> {
        let shards = list_dataset_shards(&self.root_dir, dataset_id).await?;
        let policy = self.policy;
        let task_cancel = cancel.clone();
        let everything = Arc::new(FilterRequest::default());

        let handles = self.spawn_per_shard(&shards, move |shard| {
            let scan = scan_shard(&shard, policy, 0, &everything, usize::MAX, &task_cancel)?;
            Ok(scan.matches.into_iter().map(|(_, item)| item).collect::<Vec<_>>())
        });

        let mut items = Vec::new();
        for handle in handles {
            items.extend(handle.await??);
        }
        debug!(dataset_id = %dataset_id, rows = items.len(), shards = shards.len(), "read all");
        Ok(items)
    }

    /// Returns `(shard_index, rows)` for each shard of the dataset.
    pub async fn shard_row_counts(&self, dataset_id: DatasetId) -> Result<Vec<(u64, u64)>> {
        let shards = list_dataset_shards(&self.root_dir, dataset_id).await?;
        let handles = self.spawn_per_shard(&shards, |shard| {
            Ok((shard.shard_index, shard_row_count(&shard.path)?))
        });

        let mut counts = Vec::with_capacity(handles.len());
        for handle in handles {
            counts.push(handle.await??);
        }
        Ok(counts)
    }

    /// Sums footer row counts of every dataset in the directory.
    ///
    /// Used to seed the row-count cache when a store is opened.
    pub async fn count_all_datasets(&self) -> Result<HashMap<DatasetId, u64>> {
        let shards = list_all_shards(&self.root_dir).await?;
        let handles = self.spawn_per_shard(&shards, |shard| {
            Ok((shard.dataset_id, shard_row_count(&shard.path)?))
        });

        let mut counts = HashMap::new();
        for handle in handles {
            let (dataset_id, rows) = handle.await??;
            *counts.entry(dataset_id).or_insert(0) += rows;
        }
        Ok(counts)
    }

    /// Spawns `task` once per shard on the blocking pool, gated by the read
    /// semaphore. Handles are returned in shard order.
    ///
    /// Tasks are detached: dropping a handle does not stop its task.
    fn spawn_per_shard<T, F>(&self, shards: &[ShardFile], task: F) -> Vec<JoinHandle<Result<T>>>
    where
        T: Send + 'static,
        F: Fn(ShardFile) -> Result<T> + Send + Sync + 'static,
    {
        let task = Arc::new(task);
        shards
            .iter()
            .cloned()
            .map(|shard| {
                let permits = Arc::clone(&self.permits);
                let task = Arc::clone(&task);
                tokio::spawn(async move {
                    let permit = permits
                        .acquire_owned()
                        .await
                        .map_err(|e| Error::TaskFailed(e.to_string()))?;
                    tokio::task::spawn_blocking(move || {
                        let _permit = permit;
                        task(shard)
                    })
                    .await?
                })
            })
            .collect()
    }
}

// =============================================================================
// Blocking Shard Operations
// =============================================================================

/// Rows kept by a shard scan, plus the shard's total row count.
struct ShardScan {
    matches: Vec<(u64, DatasetItem)>,
    total_rows: u64,
}

fn open_builder(path: &Path) -> Result<ParquetRecordBatchReaderBuilder<File>> {
    Ok(ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?)
}

/// Reads rows `start_row..` of a shard, keeping up to `limit` that match.
fn scan_shard(
    shard: &ShardFile,
    policy: MalformedJsonPolicy,
    start_row: u64,
    filter: &FilterRequest,
    limit: usize,
    cancel: &CancellationToken,
) -> Result<ShardScan> {
    let builder = open_builder(&shard.path)?;
    let total_rows = u64::try_from(builder.metadata().file_metadata().num_rows()).unwrap_or(0);

    let mut matches = Vec::new();
    if start_row >= total_rows || limit == 0 {
        return Ok(ShardScan { matches, total_rows });
    }

    let mut builder = builder.with_batch_size(READ_BATCH_ROWS);
    if start_row > 0 {
        builder = builder.with_row_selection(RowSelection::from(vec![
            RowSelector::skip(start_row as usize),
            RowSelector::select((total_rows - start_row) as usize),
        ]));
    }

    let mut ctx = DecodeContext {
        dataset_id: shard.dataset_id,
        shard_index: shard.shard_index,
        first_row: start_row,
        policy,
    };

    for batch in builder.build()? {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let batch = batch?;
        let remaining = limit - matches.len();
        matches.extend(decode_batch_filtered(&batch, &ctx, remaining, |item| filter.matches(item))?);
        if matches.len() >= limit {
            break;
        }
        ctx.first_row += batch.num_rows() as u64;
    }

    Ok(ShardScan { matches, total_rows })
}

/// Scans the `id` column of a shard and decodes the matching row, if any.
fn find_in_shard(
    shard: &ShardFile,
    policy: MalformedJsonPolicy,
    item_id: ItemId,
    cancel: &CancellationToken,
) -> Result<Option<DatasetItem>> {
    let builder = open_builder(&shard.path)?;
    let ids_only = ProjectionMask::roots(builder.parquet_schema(), [ID_COLUMN_INDEX]);
    let reader = builder.with_projection(ids_only).with_batch_size(READ_BATCH_ROWS).build()?;

    let mut offset = 0usize;
    let mut found = None;
    for batch in reader {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let batch = batch?;
        if let Some(pos) = decode_ids(&batch)?.iter().position(|id| *id == item_id) {
            found = Some(offset + pos);
            break;
        }
        offset += batch.num_rows();
    }

    let Some(row) = found else {
        return Ok(None);
    };

    let mut selectors = Vec::with_capacity(2);
    if row > 0 {
        selectors.push(RowSelector::skip(row));
    }
    selectors.push(RowSelector::select(1));

    let reader = open_builder(&shard.path)?
        .with_row_selection(RowSelection::from(selectors))
        .build()?;

    let ctx = DecodeContext {
        dataset_id: shard.dataset_id,
        shard_index: shard.shard_index,
        first_row: row as u64,
        policy,
    };
    for batch in reader {
        if let Some(item) = decode_batch(&batch?, &ctx)?.into_iter().next() {
            return Ok(Some(item));
        }
    }

    Err(Error::Schema(format!(
        "shard {} lost row {} between id scan and row read",
        shard.path.display(),
        row
    )))
}

/// Sums row-group row counts from the footer.
fn shard_row_count(path: &Path) -> Result<u64> {
    let reader = SerializedFileReader::new(File::open(path)?)?;
    let rows: i64 = reader.metadata().row_groups().iter().map(|rg| rg.num_rows()).sum();
    Ok(u64::try_from(rows).unwrap_or(0))
}

// =============================================================================
// Tests
// =============================================================================
