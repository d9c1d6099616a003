//! Append and Read-Back Tests
//!
//! Tests for:
//! - Item fields surviving the columnar round trip
//! - Shard boundaries (N = 0, 1, B-1, B, B+1, 3B+7)
//! - Counts after reopen

mod common;

use shardstore::{DatasetId, FilterRequest};
use tokio_util::sync::CancellationToken;

const BATCH: usize = 8;

#[tokio::test]
async fn round_trip_across_shard_boundaries() {
    for n in [0, 1, BATCH - 1, BATCH, BATCH + 1, 3 * BATCH + 7] {
        let (_dir, store) = common::open_store(BATCH).await;
        let dataset = DatasetId::new();
        let items = common::make_items(dataset, n);
        let cancel = CancellationToken::new();

        let total = store.add_range(dataset, items.clone(), &cancel).await.unwrap();
        assert_eq!(total, n as u64, "n = {}", n);

        let read = store.read_all(dataset, &cancel).await.unwrap();
        assert_eq!(read, items, "n = {}", n);

        let paged = common::page_through(&store, dataset, &FilterRequest::default(), 5).await;
        assert_eq!(paged, items, "n = {}", n);

        assert_eq!(common::count(&store, dataset).await, n as u64);
    }
}

#[tokio::test]
async fn optional_and_empty_fields_survive() {
    let (_dir, store) = common::open_store(BATCH).await;
    let dataset = DatasetId::new();
    let cancel = CancellationToken::new();

    let mut bare = common::make_item(dataset, 1);
    bare.description = None;
    bare.image_url = None;
    bare.thumbnail_url = None;
    bare.tags.clear();
    bare.metadata.clear();
    bare.title = String::new();

    let mut rich = common::make_item(dataset, 2);
    rich.title = "Überraschung \u{1F4F7} \"quoted\"".to_string();
    rich.tags = vec!["a,b".to_string(), "[x]".to_string()];
    rich.metadata.insert("photographer".to_string(), "Ana Lopez".to_string());

    store.add_range(dataset, vec![bare.clone(), rich.clone()], &cancel).await.unwrap();

    let read = store.read_all(dataset, &cancel).await.unwrap();
    assert_eq!(read, vec![bare, rich]);
}

#[tokio::test]
async fn appends_keep_insertion_order() {
    let (_dir, store) = common::open_store(BATCH).await;
    let dataset = DatasetId::new();
    let cancel = CancellationToken::new();
    let items = common::make_items(dataset, 20);

    // Uneven appends leave partly filled shards in the middle.
    store.add_range(dataset, items[..3].to_vec(), &cancel).await.unwrap();
    store.add_range(dataset, items[3..12].to_vec(), &cancel).await.unwrap();
    store.add_range(dataset, items[12..].to_vec(), &cancel).await.unwrap();

    let paged = common::page_through(&store, dataset, &FilterRequest::default(), 4).await;
    assert_eq!(paged, items);
    assert_eq!(common::count(&store, dataset).await, 20);
}

#[tokio::test]
async fn reopen_restores_counts_and_data() {
    let (dir, store) = common::open_store(BATCH).await;
    let first = DatasetId::new();
    let second = DatasetId::new();
    let cancel = CancellationToken::new();

    store.add_range(first, common::make_items(first, 11), &cancel).await.unwrap();
    store.add_range(second, common::make_items(second, 3), &cancel).await.unwrap();
    drop(store);

    let store = common::reopen(&dir, BATCH).await;
    assert_eq!(common::count(&store, first).await, 11);
    assert_eq!(common::count(&store, second).await, 3);

    let mut expected = vec![first, second];
    expected.sort();
    assert_eq!(store.list_datasets(), expected);

    // Appending after reopen continues the dataset.
    let more = common::make_items(first, 2);
    assert_eq!(store.add_range(first, more, &cancel).await.unwrap(), 13);
    assert_eq!(store.read_all(first, &cancel).await.unwrap().len(), 13);
}

#[tokio::test]
async fn read_item_finds_rows_in_any_shard() {
    let (_dir, store) = common::open_store(BATCH).await;
    let dataset = DatasetId::new();
    let cancel = CancellationToken::new();
    let items = common::make_items(dataset, 3 * BATCH + 1);
    store.add_range(dataset, items.clone(), &cancel).await.unwrap();

    for item in [&items[0], &items[BATCH + 3], &items[3 * BATCH]] {
        let found = store.read_item(dataset, item.id, &cancel).await.unwrap();
        assert_eq!(found.as_ref(), Some(item));
    }

    let missing = store.read_item(dataset, shardstore::ItemId::new(), &cancel).await.unwrap();
    assert!(missing.is_none());
}
