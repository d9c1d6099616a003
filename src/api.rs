//! # Item Store: the Repository Facade
//!
//! [`ItemStore`] is the entry point collaborators use. It owns the shard
//! writer and reader, a write lock per dataset, and an in-memory cache of
//! each dataset's row count.
//!
//! ## Read and Write Paths
//!
//! ```text
//!         get_page / get_count / read_item              add_range / update / delete
//!                       │                                          │
//!                       │                              ┌───────────▼───────────┐
//!                       │                              │ dataset write lock    │
//!                       │                              │ (one per dataset)     │
//!                       │                              └───────────┬───────────┘
//!                       ▼                                          ▼
//!               ┌──────────────┐   read_all (rewrite)      ┌──────────────┐
//!               │ ShardReader  │◄──────────────────────────│ ShardWriter  │
//!               └──────┬───────┘                           └──────┬───────┘
//!                      └──────────────────┬───────────────────────┘
//!                                         ▼
//!                              shard directory (parquet)
//! ```
//!
//! Reads take no lock. Writes to the same dataset are serialized; writes to
//! different datasets run concurrently.
//!
//! ## Mutation by Rewrite
//!
//! Shards are immutable, so updating or deleting individual rows reads the
//! whole dataset, patches it in memory, deletes every shard, and writes the
//! patched rows back from shard 0. Cost is O(dataset size) no matter how
//! few rows change.
//!
//! ## Row-Count Cache
//!
//! Seeded from shard footers when the store opens and set under the dataset's
//! lock after every write. A failed write re-reads the footers before the lock
//! is released, so the cache and `list_datasets` keep matching the disk.
//! Filtered counts never touch the cache.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::filter::FilterRequest;
use crate::reader::ShardReader;
use crate::statistics::DatasetStatistics;
use crate::types::{DatasetId, DatasetItem, ItemId, ItemPage};
use crate::writer::ShardWriter;

// =============================================================================
// ItemStore
// =============================================================================

/// Handle to a shard store rooted at one directory.
///
/// `ItemStore` is `Clone`, `Send`, and `Sync`; clones share the same locks
/// and cache.
///
/// # Example
///
/// ```rust,ignore
/// use shardstore::{DatasetId, DatasetItem, FilterRequest, ItemStore, StoreConfig};
/// use tokio_util::sync::CancellationToken;
///
/// let store = ItemStore::open(StoreConfig::new("/var/lib/datasets")).await?;
/// let cancel = CancellationToken::new();
/// let dataset = DatasetId::new();
///
/// store.add_range(dataset, vec![DatasetItem::new(dataset, "ext-1", "Sunset")], &cancel).await?;
///
/// let page = store.get_page(dataset, &FilterRequest::default(), None, 50, &cancel).await?;
/// println!("{} items, next = {:?}", page.items.len(), page.next_cursor);
/// ```
#[derive(Clone)]
pub struct ItemStore {
    inner: Arc<Inner>,
}

struct Inner {
    config: StoreConfig,
    writer: ShardWriter,
    reader: ShardReader,
    /// Write lock per dataset, created on first use and dropped by
    /// `delete_by_dataset` when unused.
    locks: DashMap<DatasetId, Arc<Mutex<()>>>,
    /// Live row count per dataset.
    counts: DashMap<DatasetId, u64>,
}

impl ItemStore {
    /// Opens a store, creating the shard directory if needed.
    ///
    /// Every existing shard footer is read once to seed the row-count cache.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for invalid configuration, I/O or parquet errors
    /// while scanning existing shards.
    pub async fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        tokio::fs::create_dir_all(&config.root_dir).await?;

        let writer = ShardWriter::new(&config);
        let reader = ShardReader::new(&config);

        let counts = DashMap::new();
        for (dataset_id, rows) in reader.count_all_datasets().await? {
            counts.insert(dataset_id, rows);
        }

        info!(
            root_dir = %config.root_dir.display(),
            datasets = counts.len(),
            batch_size = config.batch_size,
            "opened item store"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                writer,
                reader,
                locks: DashMap::new(),
                counts,
            }),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    fn dataset_lock(&self, dataset_id: DatasetId) -> Arc<Mutex<()>> {
        Arc::clone(&self.inner.locks.entry(dataset_id).or_default())
    }

    /// Resets a dataset's cached count from shard footers after a failed write.
    ///
    /// Must be called with the dataset's lock held. If the footers cannot be
    /// read either, the entry is dropped and later counts go to disk.
    async fn reseed_count(&self, dataset_id: DatasetId) {
        let footers = self
            .inner
            .reader
            .count(dataset_id, &FilterRequest::default(), &CancellationToken::new())
            .await;
        match footers {
            Ok(0) => {
                self.inner.counts.remove(&dataset_id);
            }
            Ok(rows) => {
                self.inner.counts.insert(dataset_id, rows);
            }
            Err(e) => {
                warn!(dataset_id = %dataset_id, error = %e, "could not recount dataset after failed write");
                self.inner.counts.remove(&dataset_id);
            }
        }
    }

    /// Cached count, falling back to shard footers. Does not populate the cache.
    async fn current_count(&self, dataset_id: DatasetId, cancel: &CancellationToken) -> Result<u64> {
        if let Some(count) = self.inner.counts.get(&dataset_id) {
            return Ok(*count);
        }
        self.inner.reader.count(dataset_id, &FilterRequest::default(), cancel).await
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Appends `items` to the end of the dataset.
    ///
    /// # Returns
    ///
    /// The dataset's row count after the append.
    ///
    /// # Errors
    ///
    /// [`Error::DatasetMismatch`] if any item names another dataset (nothing
    /// is written). I/O errors may leave some of the new shards on disk.
    pub async fn add_range(
        &self,
        dataset_id: DatasetId,
        items: Vec<DatasetItem>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let result = self.add_range_locked(dataset_id, items, cancel).await;
        logged("add_range", dataset_id, result)
    }

    async fn add_range_locked(
        &self,
        dataset_id: DatasetId,
        items: Vec<DatasetItem>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        if let Some(other) = items.iter().find(|i| i.dataset_id != dataset_id) {
            return Err(Error::DatasetMismatch { expected: dataset_id, found: other.dataset_id });
        }

        let lock = self.dataset_lock(dataset_id);
        let _guard = lock.lock().await;

        let current = self.current_count(dataset_id, cancel).await?;
        let added = items.len() as u64;
        if added == 0 {
            return Ok(current);
        }

        if let Err(e) = self.inner.writer.write_batch(dataset_id, items, current, cancel).await {
            self.reseed_count(dataset_id).await;
            return Err(e);
        }

        let total = current + added;
        self.inner.counts.insert(dataset_id, total);
        debug!(dataset_id = %dataset_id, added, total, "appended items");
        Ok(total)
    }

    /// Replaces the editable fields of one stored item.
    ///
    /// # Returns
    ///
    /// `true` if the item was found and rewritten.
    pub async fn update_item(&self, item: DatasetItem, cancel: &CancellationToken) -> Result<bool> {
        Ok(self.update_items(vec![item], cancel).await? > 0)
    }

    /// Replaces the editable fields of stored items, matched by `id`.
    ///
    /// Items are grouped by `dataset_id` and each affected dataset is rewritten
    /// once. `id`, `dataset_id`, and `created_at` of the stored row are kept;
    /// `updated_at` is set to the current time. Ids that are not stored are
    /// ignored.
    ///
    /// # Returns
    ///
    /// The number of rows patched across all datasets.
    pub async fn update_items(
        &self,
        items: Vec<DatasetItem>,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let mut by_dataset: BTreeMap<DatasetId, HashMap<ItemId, DatasetItem>> = BTreeMap::new();
        for item in items {
            by_dataset.entry(item.dataset_id).or_default().insert(item.id, item);
        }

        let mut patched = 0;
        for (dataset_id, patches) in by_dataset {
            let result = self
                .rewrite_dataset(dataset_id, cancel, |rows| {
                    let now = Utc::now();
                    let mut changed = 0;
                    for row in rows.iter_mut() {
                        if let Some(patch) = patches.get(&row.id) {
                            row.apply_patch(patch, now);
                            changed += 1;
                        }
                    }
                    changed
                })
                .await;
            patched += logged("update_items", dataset_id, result)?;
        }
        Ok(patched)
    }

    /// Removes individual items from a dataset by rewriting it.
    ///
    /// # Returns
    ///
    /// The number of rows removed.
    pub async fn delete_items(
        &self,
        dataset_id: DatasetId,
        ids: &[ItemId],
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let doomed: HashSet<ItemId> = ids.iter().copied().collect();
        let result = self
            .rewrite_dataset(dataset_id, cancel, |rows| {
                let before = rows.len();
                rows.retain(|row| !doomed.contains(&row.id));
                before - rows.len()
            })
            .await;
        logged("delete_items", dataset_id, result)
    }

    /// Read-all, edit, delete, rewrite-from-zero under the dataset's lock.
    ///
    /// `edit` returns how many rows it changed; zero skips the rewrite.
    async fn rewrite_dataset<F>(
        &self,
        dataset_id: DatasetId,
        cancel: &CancellationToken,
        edit: F,
    ) -> Result<usize>
    where
        F: FnOnce(&mut Vec<DatasetItem>) -> usize,
    {
        let lock = self.dataset_lock(dataset_id);
        let _guard = lock.lock().await;

        let mut rows = self.inner.reader.read_all(dataset_id, cancel).await?;
        let changed = edit(&mut rows);
        if changed == 0 {
            return Ok(0);
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let total = rows.len() as u64;
        if let Err(e) = self.inner.writer.delete_dataset_shards(dataset_id).await {
            self.reseed_count(dataset_id).await;
            return Err(e);
        }

        // Old shards are gone; the rewrite is not interruptible.
        let uninterruptible = CancellationToken::new();
        if let Err(e) = self.inner.writer.write_batch(dataset_id, rows, 0, &uninterruptible).await {
            self.reseed_count(dataset_id).await;
            return Err(e);
        }

        if total > 0 {
            self.inner.counts.insert(dataset_id, total);
        } else {
            self.inner.counts.remove(&dataset_id);
        }
        info!(dataset_id = %dataset_id, changed, rows = total, "rewrote dataset");
        Ok(changed)
    }

    /// Deletes every shard of a dataset and forgets its row count.
    ///
    /// # Returns
    ///
    /// The number of shard files removed.
    pub async fn delete_by_dataset(&self, dataset_id: DatasetId) -> Result<usize> {
        let lock = self.dataset_lock(dataset_id);
        let result = {
            let _guard = lock.lock().await;
            let result = self.inner.writer.delete_dataset_shards(dataset_id).await;
            match &result {
                Ok(_) => {
                    self.inner.counts.remove(&dataset_id);
                }
                Err(_) => self.reseed_count(dataset_id).await,
            }
            result
        };

        // Forget the lock unless another task is holding or waiting on it.
        drop(lock);
        self.inner.locks.remove_if(&dataset_id, |_, lock| Arc::strong_count(lock) == 1);

        logged("delete_by_dataset", dataset_id, result)
    }

    /// Number of datasets with a live write lock entry.
    pub fn lock_count(&self) -> usize {
        self.inner.locks.len()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Reads one page of items; see [`ShardReader::read_page`].
    pub async fn get_page(
        &self,
        dataset_id: DatasetId,
        filter: &FilterRequest,
        cursor: Option<&str>,
        page_size: usize,
        cancel: &CancellationToken,
    ) -> Result<ItemPage> {
        let result = self.inner.reader.read_page(dataset_id, filter, cursor, page_size, cancel).await;
        logged("get_page", dataset_id, result)
    }

    /// Counts rows. An empty filter is answered from the cache when possible.
    pub async fn get_count(
        &self,
        dataset_id: DatasetId,
        filter: &FilterRequest,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let result = if filter.is_empty() {
            self.current_count(dataset_id, cancel).await
        } else {
            self.inner.reader.count(dataset_id, filter, cancel).await
        };
        logged("get_count", dataset_id, result)
    }

    /// Looks up a single item by id.
    pub async fn read_item(
        &self,
        dataset_id: DatasetId,
        item_id: ItemId,
        cancel: &CancellationToken,
    ) -> Result<Option<DatasetItem>> {
        let result = self.inner.reader.read_item(dataset_id, item_id, cancel).await;
        logged("read_item", dataset_id, result)
    }

    /// Materializes the whole dataset in row order.
    pub async fn read_all(
        &self,
        dataset_id: DatasetId,
        cancel: &CancellationToken,
    ) -> Result<Vec<DatasetItem>> {
        let result = self.inner.reader.read_all(dataset_id, cancel).await;
        logged("read_all", dataset_id, result)
    }

    /// Computes statistics from a full scan of the dataset.
    pub async fn get_statistics(
        &self,
        dataset_id: DatasetId,
        cancel: &CancellationToken,
    ) -> Result<DatasetStatistics> {
        let result = self
            .inner
            .reader
            .read_all(dataset_id, cancel)
            .await
            .map(|items| DatasetStatistics::from_items(&items));
        logged("get_statistics", dataset_id, result)
    }

    /// Datasets with a cached row count, sorted by id.
    pub fn list_datasets(&self) -> Vec<DatasetId> {
        let mut ids: Vec<DatasetId> = self.inner.counts.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    /// Direct access to the reader, for callers that need shard-level detail.
    pub fn reader(&self) -> &ShardReader {
        &self.inner.reader
    }
}

fn logged<T>(op: &'static str, dataset_id: DatasetId, result: Result<T>) -> Result<T> {
    match &result {
        Err(Error::Cancelled) => debug!(dataset_id = %dataset_id, op, "operation cancelled"),
        Err(e) => error!(dataset_id = %dataset_id, op, error = %e, "store operation failed"),
        Ok(_) => {}
    }
    result
}

// =============================================================================
// Tests
// =============================================================================
