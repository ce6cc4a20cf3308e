use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

pub const DELETED_MARKER: &str = "[deleted]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "comment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CommentStatus {
    Active,
    Removed,
    Deleted,
    Spam,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Comment {
    pub id: Uuid,
    pub content: String,
    pub post_id: Uuid,
    pub author_id: Uuid,
    pub parent_comment_id: Option<Uuid>,
    pub status: CommentStatus,
    pub upvotes: i32,
    pub downvotes: i32,
    pub score: i32,
    pub controversy_score: f64,
    pub depth: i32,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    pub fn is_deleted(&self) -> bool {
        matches!(self.status, CommentStatus::Deleted | CommentStatus::Removed)
    }
}

// Create comment request
#[derive(Debug, Validate, Deserialize)]
pub struct CreateCommentRequest {
    #[validate(length(min = 1, max = 10000))]
    pub content: String,
    pub post_id: Uuid,
    pub parent_comment_id: Option<Uuid>,
}

// Comment response with nested structure
#[derive(Debug, Clone, Serialize)]
pub struct CommentThread {
    pub id: Uuid,
    pub content: String,
    pub post_id: Uuid,
    pub author_id: Option<Uuid>,
    pub parent_comment_id: Option<Uuid>,
    pub status: CommentStatus,
    pub upvotes: i32,
    pub downvotes: i32,
    pub score: i32,
    pub depth: i32,
    pub created_at: DateTime<Utc>,
    pub replies: Vec<CommentThread>,
}

// Comment sorting options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentSort {
    #[default]
    Best,
    Top,
    New,
    Controversial,
    Old,
}
