use std::collections::HashSet;

use serde::Serialize;
use uuid::Uuid;

use crate::models::{PostSort, TimeRange};

/// Client-side pagination state for the post feed.
#[derive(Debug, Clone, Serialize)]
pub struct FeedCursor {
    pub sort: PostSort,
    pub time_window: TimeRange,
    /// Next page to request, 1-based.
    pub page: u32,
    pub has_more: bool,
    #[serde(skip)]
    pub seen_ids: HashSet<Uuid>,
}

impl Default for FeedCursor {
    fn default() -> Self {
        Self {
            sort: PostSort::default(),
            time_window: TimeRange::default(),
            page: 1,
            has_more: true,
            seen_ids: HashSet::new(),
        }
    }
}

/// A fetch handed out by the pager. The generation ties the eventual
/// response back to the feed state that requested it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub generation: u64,
    pub sort: PostSort,
    pub time_window: TimeRange,
    pub page: u32,
    pub page_size: u32,
}
