#![allow(dead_code)]

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use shardstore::{DatasetId, DatasetItem, FilterRequest, ItemStore, StoreConfig};
use tokio_util::sync::CancellationToken;

pub async fn open_store(batch_size: usize) -> (tempfile::TempDir, ItemStore) {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let store = ItemStore::open(StoreConfig::new(dir.path()).with_batch_size(batch_size))
        .await
        .expect("open store");
    (dir, store)
}

pub async fn reopen(dir: &tempfile::TempDir, batch_size: usize) -> ItemStore {
    ItemStore::open(StoreConfig::new(dir.path()).with_batch_size(batch_size))
        .await
        .expect("reopen store")
}

/// Whole-second timestamp, `seq` seconds after 2024-01-01.
pub fn at(seq: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(seq)
}

pub fn make_item(dataset_id: DatasetId, seq: usize) -> DatasetItem {
    let mut item = DatasetItem::new(dataset_id, format!("ext-{}", seq), format!("Item {}", seq));
    item.description = (seq % 2 == 0).then(|| format!("even item {}", seq));
    item.image_url = Some(format!("https://img.example/{}.jpg", seq));
    item.width = 100 + seq as i32;
    item.height = 100;
    item.tags = vec![format!("group-{}", seq % 3)];
    item.is_favorite = seq % 4 == 0;
    item.metadata = BTreeMap::from([("seq".to_string(), seq.to_string())]);
    item.created_at = at(seq as i64);
    item.updated_at = at(seq as i64);
    item
}

pub fn make_items(dataset_id: DatasetId, n: usize) -> Vec<DatasetItem> {
    (0..n).map(|seq| make_item(dataset_id, seq)).collect()
}

/// Follows cursors until exhausted and returns every item seen.
pub async fn page_through(
    store: &ItemStore,
    dataset_id: DatasetId,
    filter: &FilterRequest,
    page_size: usize,
) -> Vec<DatasetItem> {
    let cancel = CancellationToken::new();
    let mut out = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = store
            .get_page(dataset_id, filter, cursor.as_deref(), page_size, &cancel)
            .await
            .expect("read page");
        assert!(page.items.len() <= page_size);
        out.extend(page.items);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => return out,
        }
    }
}

pub async fn count(store: &ItemStore, dataset_id: DatasetId) -> u64 {
    store
        .get_count(dataset_id, &FilterRequest::default(), &CancellationToken::new())
        .await
        .expect("count")
}
