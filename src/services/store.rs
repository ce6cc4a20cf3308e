// Persistence collaborator consumed by the engine.
//
// Implementors: InMemoryStore (below) and PgStore (pg_store.rs). Everything
// the engine needs from the outside world goes through this trait, so the
// engine can be exercised without a database.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::{
        Comment, KarmaBucket, Post, PostSort, TargetType, TimeRange, ViewerFlags, Vote,
    },
    services::{
        score_service,
        vote_service::{self, Tally, VoteTransition},
    },
};

#[async_trait]
pub trait Store: Send + Sync {
    /// Set the user's vote on a target. Repeating a call with the same
    /// arguments leaves the same end state.
    async fn cast_vote(
        &self,
        target_id: Uuid,
        target_type: TargetType,
        user_id: Uuid,
        value: i16,
    ) -> Result<()>;

    /// One page (1-based) of posts, already ordered for `sort`.
    async fn fetch_posts(
        &self,
        sort: PostSort,
        time_window: TimeRange,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Post>>;

    /// Every comment of a post, in no particular order.
    async fn fetch_comments(&self, post_id: Uuid) -> Result<Vec<Comment>>;

    async fn fetch_comment(&self, comment_id: Uuid) -> Result<Option<Comment>>;

    async fn insert_comment(&self, comment: &Comment) -> Result<()>;

    /// Soft delete: the row stays so replies keep their parent.
    async fn delete_comment(&self, comment_id: Uuid) -> Result<()>;

    async fn increment_karma(&self, author_id: Uuid, bucket: KarmaBucket, delta: i32)
    -> Result<()>;

    async fn set_saved(
        &self,
        user_id: Uuid,
        target_id: Uuid,
        target_type: TargetType,
        saved: bool,
    ) -> Result<()>;

    async fn set_hidden(&self, user_id: Uuid, post_id: Uuid, hidden: bool) -> Result<()>;

    async fn fetch_user_votes(&self, user_id: Uuid, target_ids: &[Uuid]) -> Result<Vec<Vote>>;

    /// Saved and hidden markers for the given targets. Targets with neither
    /// may be left out.
    async fn fetch_user_flags(
        &self,
        user_id: Uuid,
        target_ids: &[Uuid],
    ) -> Result<Vec<ViewerFlags>>;
}

#[derive(Debug, Default)]
struct MemoryData {
    posts: HashMap<Uuid, Post>,
    comments: HashMap<Uuid, Comment>,
    votes: HashMap<(Uuid, Uuid), Vote>,
    karma: HashMap<(Uuid, KarmaBucket), i64>,
    saved: HashMap<(Uuid, Uuid), TargetType>,
    hidden: HashMap<Uuid, Vec<Uuid>>,
}

/// Process-local store. Used when no database is configured and in tests.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    data: Mutex<MemoryData>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_post(&self, post: Post) {
        self.data.lock().await.posts.insert(post.id, post);
    }

    pub async fn post(&self, post_id: Uuid) -> Option<Post> {
        self.data.lock().await.posts.get(&post_id).cloned()
    }

    pub async fn comment(&self, comment_id: Uuid) -> Option<Comment> {
        self.data.lock().await.comments.get(&comment_id).cloned()
    }

    pub async fn karma(&self, author_id: Uuid, bucket: KarmaBucket) -> i64 {
        self.data
            .lock()
            .await
            .karma
            .get(&(author_id, bucket))
            .copied()
            .unwrap_or(0)
    }

    pub async fn is_saved(&self, user_id: Uuid, target_id: Uuid) -> bool {
        self.data
            .lock()
            .await
            .saved
            .contains_key(&(user_id, target_id))
    }

    pub async fn is_hidden(&self, user_id: Uuid, post_id: Uuid) -> bool {
        self.data
            .lock()
            .await
            .hidden
            .get(&user_id)
            .is_some_and(|posts| posts.contains(&post_id))
    }

    pub async fn vote_count(&self) -> usize {
        self.data.lock().await.votes.len()
    }
}

fn rank_posts(posts: &mut [Post], sort: PostSort, now: DateTime<Utc>) {
    let age = |post: &Post| (now - post.created_at).num_seconds();
    match sort {
        PostSort::Hot => posts.sort_by(|a, b| {
            score_service::hot_score(b.upvotes, b.downvotes, age(b))
                .total_cmp(&score_service::hot_score(a.upvotes, a.downvotes, age(a)))
        }),
        PostSort::New => posts.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        PostSort::Top => posts.sort_by(|a, b| b.score.cmp(&a.score)),
        PostSort::Controversial => posts.sort_by(|a, b| {
            score_service::controversy_score(b.upvotes, b.downvotes)
                .total_cmp(&score_service::controversy_score(a.upvotes, a.downvotes))
        }),
        PostSort::Rising => posts.sort_by(|a, b| {
            score_service::rising_score(b.score, age(b))
                .total_cmp(&score_service::rising_score(a.score, age(a)))
        }),
    }
}

fn apply_transition(
    upvotes: &mut i32,
    downvotes: &mut i32,
    score: &mut i32,
    controversy: &mut f64,
    transition: &VoteTransition,
) {
    let mut tally = Tally {
        upvotes: *upvotes,
        downvotes: *downvotes,
        score: *score,
    };
    transition.apply_to(&mut tally);
    *upvotes = tally.upvotes;
    *downvotes = tally.downvotes;
    *score = tally.score;
    *controversy = tally.controversy();
}

#[async_trait]
impl Store for InMemoryStore {
    async fn cast_vote(
        &self,
        target_id: Uuid,
        target_type: TargetType,
        user_id: Uuid,
        value: i16,
    ) -> Result<()> {
        let value = vote_service::validate_vote_value(value)?;
        let mut data = self.data.lock().await;
        let data = &mut *data;

        let previous = data
            .votes
            .get(&(user_id, target_id))
            .map(|vote| vote.vote_type)
            .unwrap_or(0);
        let transition = VoteTransition::between(previous, value);

        match target_type {
            TargetType::Post => {
                let post = data
                    .posts
                    .get_mut(&target_id)
                    .ok_or_else(|| AppError::NotFound("Post not found".to_string()))?;
                apply_transition(
                    &mut post.upvotes,
                    &mut post.downvotes,
                    &mut post.score,
                    &mut post.controversy_score,
                    &transition,
                );
            }
            TargetType::Comment => {
                let comment = data
                    .comments
                    .get_mut(&target_id)
                    .ok_or_else(|| AppError::NotFound("Comment not found".to_string()))?;
                apply_transition(
                    &mut comment.upvotes,
                    &mut comment.downvotes,
                    &mut comment.score,
                    &mut comment.controversy_score,
                    &transition,
                );
            }
        }

        let now = Utc::now();
        if value == 0 {
            data.votes.remove(&(user_id, target_id));
        } else {
            data.votes
                .entry((user_id, target_id))
                .and_modify(|vote| {
                    vote.vote_type = value;
                    vote.updated_at = now;
                })
                .or_insert_with(|| Vote {
                    user_id,
                    target_id,
                    target_type,
                    vote_type: value,
                    created_at: now,
                    updated_at: now,
                });
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
        let now = Utc::now();
        let cutoff = if sort.uses_time_window() {
            time_window.cutoff(now)
        } else {
            None
        };

        let mut posts: Vec<Post> = {
            let data = self.data.lock().await;
            data.posts
                .values()
                .filter(|post| cutoff.is_none_or(|cutoff| post.created_at >= cutoff))
                .cloned()
                .collect()
        };
        // Deterministic base order before the stable ranking sort.
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        rank_posts(&mut posts, sort, now);

        let offset = (page.max(1) as usize - 1) * page_size as usize;
        Ok(posts
            .into_iter()
            .skip(offset)
            .take(page_size as usize)
            .collect())
    }

    async fn fetch_comments(&self, post_id: Uuid) -> Result<Vec<Comment>> {
        let data = self.data.lock().await;
        Ok(data
            .comments
            .values()
            .filter(|comment| comment.post_id == post_id)
            .cloned()
            .collect())
    }

    async fn fetch_comment(&self, comment_id: Uuid) -> Result<Option<Comment>> {
        Ok(self.data.lock().await.comments.get(&comment_id).cloned())
    }

    async fn insert_comment(&self, comment: &Comment) -> Result<()> {
        let mut data = self.data.lock().await;
        if let Some(post) = data.posts.get_mut(&comment.post_id) {
            post.comment_count += 1;
        }
        data.comments.insert(comment.id, comment.clone());
        Ok(())
    }

    async fn delete_comment(&self, comment_id: Uuid) -> Result<()> {
        let mut data = self.data.lock().await;
        let comment = data
            .comments
            .get_mut(&comment_id)
            .ok_or_else(|| AppError::NotFound("Comment not found".to_string()))?;
        comment.status = crate::models::CommentStatus::Deleted;
        comment.content = crate::models::DELETED_MARKER.to_string();
        Ok(())
    }

    async fn increment_karma(
        &self,
        author_id: Uuid,
        bucket: KarmaBucket,
        delta: i32,
    ) -> Result<()> {
        let mut data = self.data.lock().await;
        *data.karma.entry((author_id, bucket)).or_insert(0) += i64::from(delta);
        Ok(())
    }

    async fn set_saved(
        &self,
        user_id: Uuid,
        target_id: Uuid,
        target_type: TargetType,
        saved: bool,
    ) -> Result<()> {
        let mut data = self.data.lock().await;
        if saved {
            data.saved.insert((user_id, target_id), target_type);
        } else {
            data.saved.remove(&(user_id, target_id));
        }
        Ok(())
    }

    async fn set_hidden(&self, user_id: Uuid, post_id: Uuid, hidden: bool) -> Result<()> {
        let mut data = self.data.lock().await;
        let posts = data.hidden.entry(user_id).or_default();
        posts.retain(|id| *id != post_id);
        if hidden {
            posts.push(post_id);
        }
        Ok(())
    }

    async fn fetch_user_votes(&self, user_id: Uuid, target_ids: &[Uuid]) -> Result<Vec<Vote>> {
        let data = self.data.lock().await;
        Ok(target_ids
            .iter()
            .filter_map(|target_id| data.votes.get(&(user_id, *target_id)).cloned())
            .collect())
    }

    async fn fetch_user_flags(
        &self,
        user_id: Uuid,
        target_ids: &[Uuid],
    ) -> Result<Vec<ViewerFlags>> {
        let data = self.data.lock().await;
        let hidden = data.hidden.get(&user_id);
        Ok(target_ids
            .iter()
            .map(|&target_id| ViewerFlags {
                target_id,
                is_saved: data.saved.contains_key(&(user_id, target_id)),
                is_hidden: hidden.is_some_and(|posts| posts.contains(&target_id)),
            })
            .filter(|flags| flags.is_saved || flags.is_hidden)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn post(title: &str, up: i32, down: i32, age_hours: i64) -> Post {
        Post {
            id: Uuid::new_v4(),
            title: title.to_string(),
            author_id: Uuid::new_v4(),
            community_id: Uuid::new_v4(),
            upvotes: up,
            downvotes: down,
            score: up - down,
            controversy_score: score_service::controversy_score(up, down),
            comment_count: 0,
            created_at: Utc::now() - Duration::hours(age_hours),
        }
    }

    #[tokio::test]
    async fn cast_vote_is_idempotent() {
        let store = InMemoryStore::new();
        let p = post("a", 3, 1, 1);
        let id = p.id;
        store.insert_post(p).await;
        let user = Uuid::new_v4();

        store.cast_vote(id, TargetType::Post, user, 1).await.unwrap();
        store.cast_vote(id, TargetType::Post, user, 1).await.unwrap();
        let p = store.post(id).await.unwrap();
        assert_eq!((p.upvotes, p.downvotes, p.score), (4, 1, 3));

        store.cast_vote(id, TargetType::Post, user, -1).await.unwrap();
        let p = store.post(id).await.unwrap();
        assert_eq!((p.upvotes, p.downvotes, p.score), (3, 2, 1));

        store.cast_vote(id, TargetType::Post, user, 0).await.unwrap();
        store.cast_vote(id, TargetType::Post, user, 0).await.unwrap();
        let p = store.post(id).await.unwrap();
        assert_eq!((p.upvotes, p.downvotes, p.score), (3, 1, 2));
        assert_eq!(store.vote_count().await, 0);
    }

    #[tokio::test]
    async fn cast_vote_on_missing_target_fails() {
        let store = InMemoryStore::new();
        let err = store
            .cast_vote(Uuid::new_v4(), TargetType::Comment, Uuid::new_v4(), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn top_window_filters_old_posts() {
        let store = InMemoryStore::new();
        store.insert_post(post("fresh", 5, 0, 2)).await;
        store.insert_post(post("stale", 500, 0, 24 * 40)).await;

        let day = store
            .fetch_posts(PostSort::Top, TimeRange::Day, 1, 10)
            .await
            .unwrap();
        assert_eq!(day.len(), 1);
        assert_eq!(day[0].title, "fresh");

        let all = store
            .fetch_posts(PostSort::Top, TimeRange::All, 1, 10)
            .await
            .unwrap();
        assert_eq!(all[0].title, "stale");

        // Hot ignores the window.
        let hot = store
            .fetch_posts(PostSort::Hot, TimeRange::Hour, 1, 10)
            .await
            .unwrap();
        assert_eq!(hot.len(), 2);
    }

    #[tokio::test]
    async fn flags_are_read_back_per_user() {
        let store = InMemoryStore::new();
        let p = post("a", 0, 0, 1);
        let other = post("b", 0, 0, 1);
        let (id, other_id) = (p.id, other.id);
        store.insert_post(p).await;
        store.insert_post(other).await;
        let user = Uuid::new_v4();

        store.set_saved(user, id, TargetType::Post, true).await.unwrap();
        store.set_hidden(user, other_id, true).await.unwrap();

        let mut flags = store.fetch_user_flags(user, &[id, other_id]).await.unwrap();
        flags.sort_by_key(|f| f.is_hidden);
        assert_eq!(flags.len(), 2);
        assert!(flags[0].is_saved && flags[0].target_id == id);
        assert!(flags[1].is_hidden && flags[1].target_id == other_id);

        let stranger = store
            .fetch_user_flags(Uuid::new_v4(), &[id, other_id])
            .await
            .unwrap();
        assert!(stranger.is_empty());
    }

    #[tokio::test]
    async fn pages_do_not_overlap() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            store.insert_post(post(&format!("p{}", i), i, 0, 1)).await;
        }
        let first = store.fetch_posts(PostSort::Top, TimeRange::All, 1, 2).await.unwrap();
        let second = store.fetch_posts(PostSort::Top, TimeRange::All, 2, 2).await.unwrap();
        let third = store.fetch_posts(PostSort::Top, TimeRange::All, 3, 2).await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        assert_eq!(third.len(), 1);
        assert!(first.iter().all(|p| !second.iter().any(|q| q.id == p.id)));
        assert_eq!(first[0].title, "p4");
    }
}
