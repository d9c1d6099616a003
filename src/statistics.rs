//! Aggregate statistics over a dataset's rows.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::DatasetItem;

/// Min / mean / max of one image dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionStats {
    pub min: i32,
    pub max: i32,
    pub avg: f64,
}

/// Summary of a dataset, computed from a full scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetStatistics {
    pub total_items: u64,
    pub favorite_count: u64,
    /// `None` when no item has a known (non-zero) width.
    pub width: Option<DimensionStats>,
    /// `None` when no item has a known (non-zero) height.
    pub height: Option<DimensionStats>,
    /// Number of items carrying each tag.
    pub tag_counts: BTreeMap<String, u64>,
}

#[derive(Default)]
struct DimensionAccumulator {
    min: Option<i32>,
    max: Option<i32>,
    sum: i64,
    count: u64,
}

impl DimensionAccumulator {
    fn add(&mut self, value: i32) {
        // 0 means unknown
        if value == 0 {
            return;
        }
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
        self.sum += i64::from(value);
        self.count += 1;
    }

    fn finish(self) -> Option<DimensionStats> {
        Some(DimensionStats {
            min: self.min?,
            max: self.max?,
            avg: self.sum as f64 / self.count as f64,
        })
    }
}

impl DatasetStatistics {
    /// Folds `items` into statistics.
    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a DatasetItem>) -> Self {
        let mut stats = DatasetStatistics::default();
        let mut width = DimensionAccumulator::default();
        let mut height = DimensionAccumulator::default();

        for item in items {
            stats.total_items += 1;
            if item.is_favorite {
                stats.favorite_count += 1;
            }
            width.add(item.width);
            height.add(item.height);

            // A tag repeated on one item counts once.
            let mut seen: Vec<&str> = Vec::with_capacity(item.tags.len());
            for tag in &item.tags {
                if !seen.contains(&tag.as_str()) {
                    seen.push(tag);
                    *stats.tag_counts.entry(tag.clone()).or_insert(0) += 1;
                }
            }
        }

        stats.width = width.finish();
        stats.height = height.finish();
        stats
    }
}
