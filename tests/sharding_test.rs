//! Shard Layout Tests
//!
//! Tests for:
//! - Shard sizes produced by chunking
//! - File naming on disk
//! - Foreign and temporary files being ignored

mod common;

use shardstore::schema::{list_dataset_shards, shard_file_name, try_parse_file_name};
use shardstore::DatasetId;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn two_and_a_half_batches_make_three_shards() {
    let batch = 10;
    let (dir, store) = common::open_store(batch).await;
    let dataset = DatasetId::new();
    store
        .add_range(dataset, common::make_items(dataset, batch * 5 / 2), &CancellationToken::new())
        .await
        .unwrap();

    let shards = list_dataset_shards(dir.path(), dataset).await.unwrap();
    let indexes: Vec<u64> = shards.iter().map(|s| s.shard_index).collect();
    assert_eq!(indexes, vec![0, 1, 2]);

    let rows = store.reader().shard_row_counts(dataset).await.unwrap();
    assert_eq!(rows, vec![(0, 10), (1, 10), (2, 5)]);
}

#[tokio::test]
async fn shard_files_follow_naming_scheme() {
    let (dir, store) = common::open_store(4).await;
    let dataset = DatasetId::from_u128(0x00ff_0000_0000_0000_0000_0000_0000_abcd);
    store
        .add_range(dataset, common::make_items(dataset, 5), &CancellationToken::new())
        .await
        .unwrap();

    let mut names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();

    assert_eq!(
        names,
        vec![
            "dataset_00ff000000000000000000000000abcd_shard_0.parquet".to_string(),
            "dataset_00ff000000000000000000000000abcd_shard_1.parquet".to_string(),
        ]
    );
    assert_eq!(names[1], shard_file_name(dataset, 1));
    assert_eq!(try_parse_file_name(&names[1]), Some((dataset, 1)));
}

#[tokio::test]
async fn stray_files_are_ignored() {
    let (dir, store) = common::open_store(4).await;
    let dataset = DatasetId::new();
    let cancel = CancellationToken::new();
    let items = common::make_items(dataset, 3);
    store.add_range(dataset, items.clone(), &cancel).await.unwrap();

    let tmp = dir.path().join(format!("{}.tmp", shard_file_name(dataset, 7)));
    std::fs::write(&tmp, b"half a shard").unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();
    std::fs::write(dir.path().join(format!("dataset_{}_shard_01.parquet", dataset.to_hex())), b"bad index").unwrap();

    assert_eq!(store.read_all(dataset, &cancel).await.unwrap(), items);
    assert_eq!(common::count(&store, dataset).await, 3);

    // A reopened store seeds counts from the same discovery rules.
    let reopened = common::reopen(&dir, 4).await;
    assert_eq!(reopened.list_datasets(), vec![dataset]);
    assert_eq!(common::count(&reopened, dataset).await, 3);

    // Deleting the dataset clears its leftover temp file too.
    assert_eq!(reopened.delete_by_dataset(dataset).await.unwrap(), 1);
    assert!(!tmp.exists());
    assert!(dir.path().join("notes.txt").exists());
}
