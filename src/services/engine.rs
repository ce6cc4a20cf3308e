use std::collections::HashMap;
use std::sync::{Arc, Mutex as SyncMutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::EngineConfig,
    error::{AppError, Result},
    models::{
        Comment, CommentSort, CommentStatus, CommentThread, CreateCommentRequest, DisplayScore,
        FeedCursor, FeedPage, PageRequest, Post, PostSort, TargetType, TimeRange,
        ToggleResponse, ViewerFlags, VoteResponse,
    },
    services::{
        comment_tree::{self, CommentForest},
        feed_service::FeedPager,
        mutation_service::{
            FailureNotice, HideMutation, MutationCoordinator, SaveMutation, VoteMutation,
        },
        store::Store,
        view_cache::{VotableState, ViewCache},
        vote_service::{self, VoteLedger},
    },
};

/// Client-side core for one viewer: scores, votes, comment threads and the
/// post feed. Constructed explicitly and shared by reference.
pub struct Engine {
    viewer_id: Uuid,
    store: Arc<dyn Store>,
    cache: Arc<Mutex<ViewCache>>,
    ledger: Arc<Mutex<VoteLedger>>,
    // Never held across an await, so a plain mutex; see `FetchGuard`.
    pager: SyncMutex<FeedPager>,
    comments: Mutex<HashMap<Uuid, Vec<Comment>>>,
    coordinator: MutationCoordinator,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, viewer_id: Uuid, config: EngineConfig) -> Self {
        let cache = Arc::new(Mutex::new(ViewCache::new()));
        let coordinator =
            MutationCoordinator::new(store.clone(), cache.clone(), config.mutation_cooldown);

        Self {
            viewer_id,
            store,
            cache,
            ledger: Arc::new(Mutex::new(VoteLedger::new())),
            pager: SyncMutex::new(FeedPager::new(config.page_size)),
            comments: Mutex::new(HashMap::new()),
            coordinator,
        }
    }

    pub fn viewer_id(&self) -> Uuid {
        self.viewer_id
    }

    pub async fn get_display_score(&self, target_id: Uuid) -> Option<DisplayScore> {
        let pending = self.coordinator.is_in_flight(target_id).await;
        self.cache
            .lock()
            .await
            .get(target_id)
            .map(|state| state.display(target_id, pending))
    }

    /// Optimistically vote as the viewer. A repeat within the cooldown is
    /// dropped and reported with `accepted: false`.
    pub async fn submit_vote(
        &self,
        target_id: Uuid,
        target_type: TargetType,
        value: i16,
    ) -> Result<VoteResponse> {
        vote_service::validate_vote_value(value)?;

        let mutation = VoteMutation {
            user_id: self.viewer_id,
            target_id,
            target_type,
            requested: value,
            ledger: self.ledger.clone(),
        };

        match self.coordinator.run(mutation).await {
            Ok(applied) => {
                let state = &applied.state;
                Ok(VoteResponse {
                    accepted: true,
                    user_vote: (state.user_vote != 0).then_some(state.user_vote),
                    upvotes: state.tally.upvotes,
                    downvotes: state.tally.downvotes,
                    score: state.tally.score,
                })
            }
            Err(AppError::DuplicateMutationRejected) => {
                let display = self
                    .get_display_score(target_id)
                    .await
                    .ok_or_else(|| AppError::NotFound(format!("{} is not loaded", target_id)))?;
                Ok(VoteResponse {
                    accepted: false,
                    user_vote: display.user_vote,
                    upvotes: display.upvotes,
                    downvotes: display.downvotes,
                    score: display.score,
                })
            }
            Err(e) => Err(e),
        }
    }

    pub async fn toggle_save(
        &self,
        target_id: Uuid,
        target_type: TargetType,
    ) -> Result<ToggleResponse> {
        let mutation = SaveMutation {
            user_id: self.viewer_id,
            target_id,
            target_type,
        };

        match self.coordinator.run(mutation).await {
            Ok(saved) => Ok(ToggleResponse {
                accepted: true,
                active: saved,
            }),
            Err(AppError::DuplicateMutationRejected) => Ok(ToggleResponse {
                accepted: false,
                active: self.flag(target_id, |state| state.is_saved).await,
            }),
            Err(e) => Err(e),
        }
    }

    pub async fn toggle_hide(&self, post_id: Uuid) -> Result<ToggleResponse> {
        let mutation = HideMutation {
            user_id: self.viewer_id,
            post_id,
        };

        match self.coordinator.run(mutation).await {
            Ok(hidden) => Ok(ToggleResponse {
                accepted: true,
                active: hidden,
            }),
            Err(AppError::DuplicateMutationRejected) => Ok(ToggleResponse {
                accepted: false,
                active: self.flag(post_id, |state| state.is_hidden).await,
            }),
            Err(e) => Err(e),
        }
    }

    async fn flag(
        &self,
        target_id: Uuid,
        read: impl Fn(&VotableState) -> bool,
    ) -> bool {
        self.cache
            .lock()
            .await
            .get(target_id)
            .map(read)
            .unwrap_or(false)
    }

    pub async fn take_notices(&self) -> Vec<FailureNotice> {
        self.coordinator.take_notices().await
    }

    fn pager(&self) -> MutexGuard<'_, FeedPager> {
        self.pager.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn feed_cursor(&self) -> FeedCursor {
        self.pager().cursor().clone()
    }

    pub async fn set_sort(&self, sort: PostSort) {
        if self.pager().set_sort(sort) {
            tracing::debug!("Feed sort changed to {:?}", sort);
        }
    }

    pub async fn set_time_window(&self, time_window: TimeRange) {
        if self.pager().set_time_window(time_window) {
            tracing::debug!("Feed window changed to {:?}", time_window);
        }
    }

    pub async fn reset_feed(&self) {
        self.pager().reset();
    }

    /// Load the next feed page. Returns an empty page once the feed is
    /// exhausted or while another load for the same feed is outstanding.
    pub async fn next_page(&self) -> Result<FeedPage> {
        let request = {
            let mut pager = self.pager();
            match pager.begin_fetch() {
                Some(request) => request,
                None => {
                    let cursor = pager.cursor();
                    return Ok(FeedPage {
                        posts: Vec::new(),
                        page: cursor.page,
                        has_more: cursor.has_more,
                        stale: false,
                    });
                }
            }
        };
        let guard = FetchGuard {
            pager: &self.pager,
            request: Some(request),
        };

        let posts = self
            .store
            .fetch_posts(
                request.sort,
                request.time_window,
                request.page,
                request.page_size,
            )
            .await?;

        let (accepted, page, has_more) = {
            let mut pager = self.pager();
            let accepted = pager.complete_fetch(&request, posts);
            guard.disarm();
            let cursor = pager.cursor();
            (accepted, cursor.page, cursor.has_more)
        };

        let Some(posts) = accepted else {
            tracing::warn!("Dropped stale feed page {}", request.page);
            return Ok(FeedPage {
                posts: Vec::new(),
                page,
                has_more,
                stale: true,
            });
        };

        let ids: Vec<Uuid> = posts.iter().map(|post| post.id).collect();
        let flags = self.load_viewer_state(&ids).await;
        self.absorb_posts(&posts, flags.as_ref()).await;

        let visible = {
            let cache = self.cache.lock().await;
            posts
                .into_iter()
                .filter(|post| !cache.get(post.id).is_some_and(|state| state.is_hidden))
                .collect::<Vec<_>>()
        };

        tracing::debug!(
            "Loaded feed page {} ({} posts, has_more={})",
            request.page,
            visible.len(),
            has_more
        );

        Ok(FeedPage {
            posts: visible,
            page,
            has_more,
            stale: false,
        })
    }

    // Best effort: without the viewer's votes, toggles start from zero.
    // Returns the stored saved/hidden markers, or `None` if they could not
    // be read and local flags should stand.
    async fn load_viewer_state(&self, target_ids: &[Uuid]) -> Option<HashMap<Uuid, ViewerFlags>> {
        if target_ids.is_empty() {
            return Some(HashMap::new());
        }
        match self.store.fetch_user_votes(self.viewer_id, target_ids).await {
            Ok(votes) => self.ledger.lock().await.absorb(votes),
            Err(e) => tracing::warn!("Failed to load viewer votes: {}", e),
        }
        match self.store.fetch_user_flags(self.viewer_id, target_ids).await {
            Ok(flags) => Some(flags.into_iter().map(|f| (f.target_id, f)).collect()),
            Err(e) => {
                tracing::warn!("Failed to load saved and hidden flags: {}", e);
                None
            }
        }
    }

    async fn absorb_posts(&self, posts: &[Post], flags: Option<&HashMap<Uuid, ViewerFlags>>) {
        let in_flight = self.coordinator.in_flight_targets().await;
        let ledger = self.ledger.lock().await;
        let mut cache = self.cache.lock().await;
        for post in posts.iter().filter(|post| !in_flight.contains(&post.id)) {
            cache.upsert_post(post, ledger.current_value(self.viewer_id, post.id));
            if let Some(flags) = flags {
                cache.apply_flags(post.id, flags.get(&post.id));
            }
        }
    }

    /// Threaded comments of a post. The flat list is fetched once and kept
    /// until [`Engine::invalidate_comments`]; local vote state is laid over
    /// it on every call.
    pub async fn get_comment_forest(
        &self,
        post_id: Uuid,
        sort: CommentSort,
    ) -> Result<Vec<CommentThread>> {
        let cached = self.comments.lock().await.get(&post_id).cloned();
        let (mut comments, fresh, flags) = match cached {
            Some(comments) => (comments, false, None),
            None => {
                let comments = self.store.fetch_comments(post_id).await?;
                let ids: Vec<Uuid> = comments.iter().map(|comment| comment.id).collect();
                let flags = self.load_viewer_state(&ids).await;
                self.comments
                    .lock()
                    .await
                    .insert(post_id, comments.clone());
                (comments, true, flags)
            }
        };

        let in_flight = self.coordinator.in_flight_targets().await;
        {
            let ledger = self.ledger.lock().await;
            let mut cache = self.cache.lock().await;
            for comment in comments.iter_mut() {
                let server_wins = fresh && !in_flight.contains(&comment.id);
                let local = if server_wins {
                    None
                } else {
                    cache.get(comment.id).cloned()
                };
                match local {
                    Some(state) => state.overlay(comment),
                    None => {
                        cache.upsert_comment(
                            comment,
                            ledger.current_value(self.viewer_id, comment.id),
                        );
                        if let Some(flags) = &flags {
                            cache.apply_flags(comment.id, flags.get(&comment.id));
                        }
                    }
                }
            }
        }

        let forest = CommentForest::build(comments, sort, Utc::now());
        Ok(forest.to_threads())
    }

    pub async fn invalidate_comments(&self, post_id: Uuid) {
        self.comments.lock().await.remove(&post_id);
    }

    /// Create a comment as the viewer; replies deeper than the nesting limit
    /// are refused here, before anything is stored.
    pub async fn create_comment(&self, request: CreateCommentRequest) -> Result<Comment> {
        request.validate()?;

        let parent = match request.parent_comment_id {
            Some(parent_id) => {
                let parent = self
                    .store
                    .fetch_comment(parent_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound("Parent comment not found".to_string()))?;
                if parent.post_id != request.post_id {
                    return Err(AppError::BadRequest(
                        "Parent comment belongs to another post".to_string(),
                    ));
                }
                Some(parent)
            }
            None => None,
        };
        let depth = comment_tree::reply_depth(parent.as_ref())?;

        let comment = Comment {
            id: Uuid::new_v4(),
            content: request.content,
            post_id: request.post_id,
            author_id: self.viewer_id,
            parent_comment_id: request.parent_comment_id,
            status: CommentStatus::Active,
            upvotes: 0,
            downvotes: 0,
            score: 0,
            controversy_score: 0.0,
            depth,
            created_at: Utc::now(),
        };

        self.store.insert_comment(&comment).await?;
        self.invalidate_comments(comment.post_id).await;
        self.cache.lock().await.upsert_comment(&comment, 0);

        tracing::debug!("Created comment {} at depth {}", comment.id, depth);
        Ok(comment)
    }

    /// Soft-delete one of the viewer's comments. Replies stay attached.
    pub async fn delete_comment(&self, comment_id: Uuid) -> Result<()> {
        let comment = self
            .store
            .fetch_comment(comment_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Comment not found".to_string()))?;

        if comment.author_id != self.viewer_id {
            return Err(AppError::BadRequest(
                "Only the author can delete a comment".to_string(),
            ));
        }

        self.store.delete_comment(comment_id).await?;
        self.invalidate_comments(comment.post_id).await;
        Ok(())
    }
}

/// Releases the pager's in-flight slot if a page load is dropped before its
/// response is handed back, so the next call can retry the same page.
struct FetchGuard<'a> {
    pager: &'a SyncMutex<FeedPager>,
    request: Option<PageRequest>,
}

impl FetchGuard<'_> {
    fn disarm(mut self) {
        self.request = None;
    }
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        if let Some(request) = self.request.take() {
            let mut pager = self.pager.lock().unwrap_or_else(PoisonError::into_inner);
            pager.abort_fetch(&request);
        }
    }
}
