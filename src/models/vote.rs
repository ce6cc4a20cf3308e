use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "target_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Post,
    Comment,
}

impl TargetType {
    pub fn karma_bucket(self) -> KarmaBucket {
        match self {
            TargetType::Post => KarmaBucket::Post,
            TargetType::Comment => KarmaBucket::Comment,
        }
    }
}

/// Per-author karma counters, one per kind of content voted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KarmaBucket {
    Post,
    Comment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Vote {
    pub user_id: Uuid,
    pub target_id: Uuid,
    pub target_type: TargetType,
    pub vote_type: i16, // -1 for downvote, 1 for upvote
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Saved and hidden markers the viewer has stored for one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, FromRow)]
pub struct ViewerFlags {
    pub target_id: Uuid,
    pub is_saved: bool,
    pub is_hidden: bool,
}

// Vote request
#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    pub vote_type: i16, // -1 for downvote, 0 for remove vote, 1 for upvote
}

// Vote response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoteResponse {
    /// False when the action was dropped by the per-target throttle.
    pub accepted: bool,
    pub user_vote: Option<i16>,
    pub upvotes: i32,
    pub downvotes: i32,
    pub score: i32,
}

/// Score as the UI should render it, including unconfirmed local changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayScore {
    pub target_id: Uuid,
    pub target_type: TargetType,
    pub score: i32,
    pub upvotes: i32,
    pub downvotes: i32,
    pub user_vote: Option<i16>,
    pub is_saved: bool,
    pub is_hidden: bool,
    pub pending: bool,
}

/// Outcome of a save or hide toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ToggleResponse {
    pub accepted: bool,
    pub active: bool,
}
