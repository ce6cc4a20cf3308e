use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::{
        Comment, KarmaBucket, Post, PostSort, TargetType, TimeRange, ViewerFlags, Vote,
    },
    redis::RedisClient,
    services::{
        score_service,
        store::Store,
        vote_service::{self, VoteTransition},
    },
};

const POST_COLUMNS: &str = r#"
    id, title, author_id, community_id, upvotes, downvotes, score,
    controversy_score, comment_count, created_at
"#;

const COMMENT_COLUMNS: &str = r#"
    id, content, post_id, author_id, parent_comment_id, status,
    upvotes, downvotes, score, controversy_score, depth, created_at
"#;

/// Postgres-backed store. Vote counters are adjusted inside the same
/// transaction that writes the vote row.
#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
    redis: Option<Arc<RedisClient>>,
}

impl PgStore {
    pub fn new(db: PgPool, redis: Option<Arc<RedisClient>>) -> Self {
        Self { db, redis }
    }
}

fn vote_tables(target_type: TargetType) -> (&'static str, &'static str, &'static str) {
    match target_type {
        TargetType::Post => ("posts", "post_votes", "post_id"),
        TargetType::Comment => ("comments", "comment_votes", "comment_id"),
    }
}

#[async_trait]
impl Store for PgStore {
    async fn cast_vote(
        &self,
        target_id: Uuid,
        target_type: TargetType,
        user_id: Uuid,
        value: i16,
    ) -> Result<()> {
        let value = vote_service::validate_vote_value(value)?;
        let (table, vote_table, column) = vote_tables(target_type);

        let mut tx = self.db.begin().await?;

        // Serializes voters per target; the vote row may not exist yet.
        let locked: Option<Uuid> = sqlx::query_scalar(&format!(
            "SELECT id FROM {} WHERE id = $1 FOR UPDATE",
            table
        ))
        .bind(target_id)
        .fetch_optional(&mut *tx)
        .await?;

        if locked.is_none() {
            return Err(AppError::NotFound(format!("{} not found", target_id)));
        }

        let previous: Option<i16> = sqlx::query_scalar(&format!(
            "SELECT vote_type FROM {} WHERE user_id = $1 AND {} = $2 FOR UPDATE",
            vote_table, column
        ))
        .bind(user_id)
        .bind(target_id)
        .fetch_optional(&mut *tx)
        .await?;

        let transition = VoteTransition::between(previous.unwrap_or(0), value);
        if transition.is_noop() {
            tx.commit().await?;
            return Ok(());
        }

        if value == 0 {
            // Remove vote
            sqlx::query(&format!(
                "DELETE FROM {} WHERE user_id = $1 AND {} = $2",
                vote_table, column
            ))
            .bind(user_id)
            .bind(target_id)
            .execute(&mut *tx)
            .await?;
        } else {
            // Insert or update vote
            sqlx::query(&format!(
                r#"
                INSERT INTO {table} (user_id, {column}, vote_type, created_at, updated_at)
                VALUES ($1, $2, $3, NOW(), NOW())
                ON CONFLICT (user_id, {column})
                DO UPDATE SET vote_type = $3, updated_at = NOW()
                "#,
                table = vote_table,
                column = column
            ))
            .bind(user_id)
            .bind(target_id)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }

        let counts: Option<(i32, i32, DateTime<Utc>)> = sqlx::query_as(&format!(
            r#"
            UPDATE {}
            SET upvotes = upvotes + $1, downvotes = downvotes + $2, score = score + $3,
                updated_at = NOW()
            WHERE id = $4
            RETURNING upvotes, downvotes, created_at
            "#,
            table
        ))
        .bind(transition.upvote_delta)
        .bind(transition.downvote_delta)
        .bind(transition.score_delta)
        .bind(target_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((upvotes, downvotes, created_at)) = counts else {
            return Err(AppError::NotFound(format!("{} not found", target_id)));
        };

        let controversy = score_service::controversy_score(upvotes, downvotes);
        match target_type {
            TargetType::Post => {
                sqlx::query(
                    "UPDATE posts SET controversy_score = $1, hot_rank = $2 WHERE id = $3",
                )
                .bind(controversy)
                .bind(score_service::hot_rank(upvotes, downvotes, created_at))
                .bind(target_id)
                .execute(&mut *tx)
                .await?;
            }
            TargetType::Comment => {
                sqlx::query("UPDATE comments SET controversy_score = $1 WHERE id = $2")
                    .bind(controversy)
                    .bind(target_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;

        if let Some(redis) = &self.redis {
            if let Err(e) = redis
                .publish_vote_update(target_id, target_type, upvotes, downvotes)
                .await
            {
                tracing::warn!("Failed to publish vote update for {}: {}", target_id, e);
            }
        }

        Ok(())
    }

    async fn fetch_posts(
        &self,
        sort: PostSort,
        time_window: TimeRange,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Post>> {
        let order_clause = match sort {
            PostSort::Hot => "hot_rank DESC",
            PostSort::New => "created_at DESC",
            PostSort::Top => "score DESC, created_at DESC",
            PostSort::Controversial => "controversy_score DESC, created_at DESC",
            PostSort::Rising => {
                "score / (EXTRACT(EPOCH FROM (NOW() - created_at)) / 3600.0 + 2.0) DESC"
            }
        };

        let cutoff = if sort.uses_time_window() {
            time_window.cutoff(Utc::now())
        } else {
            None
        };

        let query = format!(
            r#"
            SELECT {}
            FROM posts
            WHERE status = 'active' AND ($1::timestamptz IS NULL OR created_at >= $1)
            ORDER BY {}, id
            LIMIT $2 OFFSET $3
            "#,
            POST_COLUMNS, order_clause
        );

        let offset = i64::from(page.max(1) - 1) * i64::from(page_size);
        let posts = sqlx::query_as::<_, Post>(&query)
            .bind(cutoff)
            .bind(i64::from(page_size))
            .bind(offset)
            .fetch_all(&self.db)
            .await?;

        Ok(posts)
    }

    async fn fetch_comments(&self, post_id: Uuid) -> Result<Vec<Comment>> {
        let comments = sqlx::query_as::<_, Comment>(&format!(
            "SELECT {} FROM comments WHERE post_id = $1",
            COMMENT_COLUMNS
        ))
        .bind(post_id)
        .fetch_all(&self.db)
        .await?;

        Ok(comments)
    }

    async fn fetch_comment(&self, comment_id: Uuid) -> Result<Option<Comment>> {
        let comment = sqlx::query_as::<_, Comment>(&format!(
            "SELECT {} FROM comments WHERE id = $1",
            COMMENT_COLUMNS
        ))
        .bind(comment_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(comment)
    }

    async fn insert_comment(&self, comment: &Comment) -> Result<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO comments (
                id, content, post_id, author_id, parent_comment_id, status,
                upvotes, downvotes, score, controversy_score, depth, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12)
            "#,
        )
        .bind(comment.id)
        .bind(&comment.content)
        .bind(comment.post_id)
        .bind(comment.author_id)
        .bind(comment.parent_comment_id)
        .bind(comment.status)
        .bind(comment.upvotes)
        .bind(comment.downvotes)
        .bind(comment.score)
        .bind(comment.controversy_score)
        .bind(comment.depth)
        .bind(comment.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE posts SET comment_count = comment_count + 1 WHERE id = $1")
            .bind(comment.post_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn delete_comment(&self, comment_id: Uuid) -> Result<()> {
        // Soft delete - mark as deleted but keep for thread structure
        let result = sqlx::query(
            r#"
            UPDATE comments
            SET status = 'deleted', content = '[deleted]', updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(comment_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Comment not found".to_string()));
        }
        Ok(())
    }

    async fn increment_karma(
        &self,
        author_id: Uuid,
        bucket: KarmaBucket,
        delta: i32,
    ) -> Result<()> {
        let column = match bucket {
            KarmaBucket::Post => "post_karma",
            KarmaBucket::Comment => "comment_karma",
        };

        sqlx::query(&format!(
            r#"
            INSERT INTO user_karma (user_id, {column}, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (user_id)
            DO UPDATE SET {column} = user_karma.{column} + EXCLUDED.{column}, updated_at = NOW()
            "#,
            column = column
        ))
        .bind(author_id)
        .bind(i64::from(delta))
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn set_saved(
        &self,
        user_id: Uuid,
        target_id: Uuid,
        target_type: TargetType,
        saved: bool,
    ) -> Result<()> {
        if saved {
            sqlx::query(
                r#"
                INSERT INTO saved_items (user_id, target_id, target_type, created_at)
                VALUES ($1, $2, $3, NOW())
                ON CONFLICT (user_id, target_id) DO NOTHING
                "#,
            )
            .bind(user_id)
            .bind(target_id)
            .bind(target_type)
            .execute(&self.db)
            .await?;
        } else {
            sqlx::query("DELETE FROM saved_items WHERE user_id = $1 AND target_id = $2")
                .bind(user_id)
                .bind(target_id)
                .execute(&self.db)
                .await?;
        }

        Ok(())
    }

    async fn set_hidden(&self, user_id: Uuid, post_id: Uuid, hidden: bool) -> Result<()> {
        if hidden {
            sqlx::query(
                r#"
                INSERT INTO hidden_posts (user_id, post_id, created_at)
                VALUES ($1, $2, NOW())
                ON CONFLICT (user_id, post_id) DO NOTHING
                "#,
            )
            .bind(user_id)
            .bind(post_id)
            .execute(&self.db)
            .await?;
        } else {
            sqlx::query("DELETE FROM hidden_posts WHERE user_id = $1 AND post_id = $2")
                .bind(user_id)
                .bind(post_id)
                .execute(&self.db)
                .await?;
        }

        Ok(())
    }

    async fn fetch_user_votes(&self, user_id: Uuid, target_ids: &[Uuid]) -> Result<Vec<Vote>> {
        let votes = sqlx::query_as::<_, Vote>(
            r#"
            SELECT user_id, post_id AS target_id, 'post'::target_type AS target_type,
                   vote_type, created_at, updated_at
            FROM post_votes
            WHERE user_id = $1 AND post_id = ANY($2)
            UNION ALL
            SELECT user_id, comment_id AS target_id, 'comment'::target_type AS target_type,
                   vote_type, created_at, updated_at
            FROM comment_votes
            WHERE user_id = $1 AND comment_id = ANY($2)
            "#,
        )
        .bind(user_id)
        .bind(target_ids)
        .fetch_all(&self.db)
        .await?;

        Ok(votes)
    }

    async fn fetch_user_flags(
        &self,
        user_id: Uuid,
        target_ids: &[Uuid],
    ) -> Result<Vec<ViewerFlags>> {
        let flags = sqlx::query_as::<_, ViewerFlags>(
            r#"
            SELECT t.id AS target_id,
                   EXISTS (
                       SELECT 1 FROM saved_items s
                       WHERE s.user_id = $1 AND s.target_id = t.id
                   ) AS is_saved,
                   EXISTS (
                       SELECT 1 FROM hidden_posts h
                       WHERE h.user_id = $1 AND h.post_id = t.id
                   ) AS is_hidden
            FROM UNNEST($2::uuid[]) AS t(id)
            "#,
        )
        .bind(user_id)
        .bind(target_ids)
        .fetch_all(&self.db)
        .await?;

        Ok(flags
            .into_iter()
            .filter(|flags| flags.is_saved || flags.is_hidden)
            .collect())
    }
}
