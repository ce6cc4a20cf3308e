use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Post {
    pub id: Uuid,
    pub title: String,
    pub author_id: Uuid,
    pub community_id: Uuid,
    pub upvotes: i32,
    pub downvotes: i32,
    pub score: i32,
    pub controversy_score: f64,
    pub comment_count: i32,
    pub created_at: DateTime<Utc>,
}

// Sorting options for posts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostSort {
    #[default]
    Hot,
    New,
    Top,
    Controversial,
    Rising,
}

impl PostSort {
    /// Whether results under this sort depend on the selected time window.
    pub fn uses_time_window(self) -> bool {
        matches!(self, PostSort::Top | PostSort::Controversial)
    }
}

impl FromStr for PostSort {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hot" | "Hot" => Ok(PostSort::Hot),
            "new" | "New" => Ok(PostSort::New),
            "top" | "Top" => Ok(PostSort::Top),
            "controversial" | "Controversial" => Ok(PostSort::Controversial),
            "rising" | "Rising" => Ok(PostSort::Rising),
            _ => Err(format!("Unknown PostSort: {}", s)),
        }
    }
}

// Time range for top and controversial posts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeRange {
    Hour,
    #[default]
    Day,
    Week,
    Month,
    Year,
    All,
}

impl TimeRange {
    pub fn as_duration(self) -> Option<Duration> {
        match self {
            TimeRange::Hour => Some(Duration::hours(1)),
            TimeRange::Day => Some(Duration::days(1)),
            TimeRange::Week => Some(Duration::weeks(1)),
            TimeRange::Month => Some(Duration::days(30)),
            TimeRange::Year => Some(Duration::days(365)),
            TimeRange::All => None,
        }
    }

    /// Oldest creation time admitted by this window, if any.
    pub fn cutoff(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.as_duration().map(|window| now - window)
    }
}

/// One page of feed results after de-duplication.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FeedPage {
    pub posts: Vec<Post>,
    pub page: u32,
    pub has_more: bool,
    /// Set when the response belonged to a feed that has since been reset.
    pub stale: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_top_and_controversial_use_time_window() {
        assert!(PostSort::Top.uses_time_window());
        assert!(PostSort::Controversial.uses_time_window());
        assert!(!PostSort::Hot.uses_time_window());
        assert!(!PostSort::New.uses_time_window());
        assert!(!PostSort::Rising.uses_time_window());
    }

    #[test]
    fn all_time_has_no_cutoff() {
        let now = Utc::now();
        assert_eq!(TimeRange::All.cutoff(now), None);
        assert_eq!(TimeRange::Hour.cutoff(now), Some(now - Duration::hours(1)));
    }
}
