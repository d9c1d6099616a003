//! Row filter for paging and counting.
//!
//! A [`FilterRequest`] is a flat set of optional criteria. A row matches when
//! every criterion that is set accepts it; an unset criterion places no
//! constraint on its dimension.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::DatasetItem;

/// Metadata key compared by [`FilterRequest::photographer`].
pub const PHOTOGRAPHER_KEY: &str = "photographer";
/// Metadata key compared by [`FilterRequest::location`].
pub const LOCATION_KEY: &str = "location";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterRequest {
    /// Case-insensitive substring of the title, description, or any tag.
    pub search_query: Option<String>,
    /// Every listed tag must be present on the item.
    pub tags: Vec<String>,
    /// Inclusive lower bound on `created_at`.
    pub date_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    pub date_to: Option<DateTime<Utc>>,
    pub favorites_only: bool,
    pub min_width: Option<i32>,
    pub max_width: Option<i32>,
    pub min_height: Option<i32>,
    pub max_height: Option<i32>,
    pub min_aspect_ratio: Option<f64>,
    pub max_aspect_ratio: Option<f64>,
    pub photographer: Option<String>,
    pub location: Option<String>,
}

impl FilterRequest {
    /// True when no criterion is set, i.e. every row matches.
    pub fn is_empty(&self) -> bool {
        self.search_text().is_none()
            && self.tags.is_empty()
            && self.date_from.is_none()
            && self.date_to.is_none()
            && !self.favorites_only
            && self.min_width.is_none()
            && self.max_width.is_none()
            && self.min_height.is_none()
            && self.max_height.is_none()
            && self.min_aspect_ratio.is_none()
            && self.max_aspect_ratio.is_none()
            && self.photographer.is_none()
            && self.location.is_none()
    }

    fn search_text(&self) -> Option<&str> {
        self.search_query.as_deref().map(str::trim).filter(|q| !q.is_empty())
    }

    /// Returns whether `item` satisfies every criterion.
    pub fn matches(&self, item: &DatasetItem) -> bool {
        if let Some(query) = self.search_text() {
            let needle = query.to_lowercase();
            let hit = item.title.to_lowercase().contains(&needle)
                || item
                    .description
                    .as_deref()
                    .is_some_and(|d| d.to_lowercase().contains(&needle))
                || item.tags.iter().any(|t| t.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }

        if !self.tags.iter().all(|tag| item.tags.contains(tag)) {
            return false;
        }

        if self.date_from.is_some_and(|from| item.created_at < from)
            || self.date_to.is_some_and(|to| item.created_at > to)
        {
            return false;
        }

        if self.favorites_only && !item.is_favorite {
            return false;
        }

        if !within(item.width, self.min_width, self.max_width)
            || !within(item.height, self.min_height, self.max_height)
        {
            return false;
        }

        if self.min_aspect_ratio.is_some() || self.max_aspect_ratio.is_some() {
            let ratio = item.aspect_ratio();
            if !within(ratio, self.min_aspect_ratio, self.max_aspect_ratio) {
                return false;
            }
        }

        metadata_matches(item, PHOTOGRAPHER_KEY, self.photographer.as_deref())
            && metadata_matches(item, LOCATION_KEY, self.location.as_deref())
    }
}

fn within<T: PartialOrd + Copy>(value: T, min: Option<T>, max: Option<T>) -> bool {
    min.map_or(true, |min| value >= min) && max.map_or(true, |max| value <= max)
}

fn metadata_matches(item: &DatasetItem, key: &str, wanted: Option<&str>) -> bool {
    match wanted {
        None => true,
        Some(wanted) => item
            .metadata
            .get(key)
            .is_some_and(|value| value.to_lowercase() == wanted.to_lowercase()),
    }
}
