use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::TargetType,
    services::{
        store::Store,
        view_cache::{VotableState, ViewCache},
        vote_service::{self, VoteLedger, VoteTransition},
    },
};

/// A locally-applied change that is confirmed by the store afterwards.
#[async_trait]
pub trait Mutation: Send + Sync + 'static {
    /// Whatever `rollback` needs to restore the prior state exactly.
    type Snapshot: Send + 'static;
    /// Result of the local apply, handed to `persist` and returned on success.
    type Applied: Send + Sync + 'static;

    fn target_id(&self) -> Uuid;

    fn label(&self) -> &'static str;

    fn apply(&self, cache: &mut ViewCache) -> Result<(Self::Snapshot, Self::Applied)>;

    fn rollback(&self, cache: &mut ViewCache, snapshot: Self::Snapshot);

    async fn persist(&self, store: &dyn Store, applied: &Self::Applied) -> Result<()>;

    /// Follow-up work once the store has accepted the change.
    async fn confirmed(&self, _store: &Arc<dyn Store>, _applied: &Self::Applied) {}
}

#[derive(Debug, Clone, Copy)]
pub struct PendingMutation {
    pub target_id: Uuid,
    pub label: &'static str,
    pub applied_at: Instant,
    pub resolved_at: Option<Instant>,
}

impl PendingMutation {
    fn blocks(&self, now: Instant, cooldown: Duration) -> bool {
        match self.resolved_at {
            None => true,
            Some(resolved_at) => now < resolved_at + cooldown,
        }
    }
}

/// Retryable failure the UI should show to the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureNotice {
    pub target_id: Uuid,
    pub action: &'static str,
    pub message: String,
    pub retryable: bool,
}

struct Shared {
    store: Arc<dyn Store>,
    cache: Arc<Mutex<ViewCache>>,
    pending: Mutex<HashMap<Uuid, PendingMutation>>,
    notices: Mutex<Vec<FailureNotice>>,
}

impl Shared {
    async fn resolve(&self, target_id: Uuid) {
        if let Some(entry) = self.pending.lock().await.get_mut(&target_id) {
            entry.resolved_at = Some(Instant::now());
        }
    }

    // Runs on its own task: finishes even if the caller is dropped.
    async fn settle<M: Mutation>(self: Arc<Self>, mutation: M) -> Result<M::Applied> {
        let target_id = mutation.target_id();

        let applied = {
            let mut cache = self.cache.lock().await;
            mutation.apply(&mut cache)
        };
        let (snapshot, applied) = match applied {
            Ok(applied) => applied,
            Err(e) => {
                // Nothing changed locally, so no cooldown either.
                self.pending.lock().await.remove(&target_id);
                return Err(e);
            }
        };

        match mutation.persist(self.store.as_ref(), &applied).await {
            Ok(()) => {
                mutation.confirmed(&self.store, &applied).await;
                self.resolve(target_id).await;
                tracing::debug!("Confirmed {} on {}", mutation.label(), target_id);
                Ok(applied)
            }
            Err(e) => {
                {
                    let mut cache = self.cache.lock().await;
                    mutation.rollback(&mut cache, snapshot);
                }
                tracing::warn!(
                    "Rolled back {} on {} after store failure: {}",
                    mutation.label(),
                    target_id,
                    e
                );

                self.notices.lock().await.push(FailureNotice {
                    target_id,
                    action: mutation.label(),
                    message: format!("Could not {} right now, please try again", mutation.label()),
                    retryable: true,
                });
                self.resolve(target_id).await;

                Err(AppError::PersistenceFailure(e.to_string()))
            }
        }
    }
}

pub struct MutationCoordinator {
    shared: Arc<Shared>,
    cooldown: Duration,
}

impl MutationCoordinator {
    pub fn new(store: Arc<dyn Store>, cache: Arc<Mutex<ViewCache>>, cooldown: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                cache,
                pending: Mutex::new(HashMap::new()),
                notices: Mutex::new(Vec::new()),
            }),
            cooldown,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Apply locally, persist, and roll back if the store refuses.
    ///
    /// A second mutation on the same target is rejected while the first is
    /// in flight and until the cooldown has passed since it resolved. Neither
    /// lock is held while the store call is awaited. Once accepted, the
    /// mutation is settled on a spawned task, so dropping the returned future
    /// does not leave the target pending.
    pub async fn run<M: Mutation>(&self, mutation: M) -> Result<M::Applied> {
        let target_id = mutation.target_id();
        let now = Instant::now();

        {
            let mut pending = self.shared.pending.lock().await;
            let cooldown = self.cooldown;
            pending.retain(|_, entry| entry.blocks(now, cooldown));

            if let Some(existing) = pending.get(&target_id) {
                tracing::debug!(
                    "Dropping {} on {}: {} still settling",
                    mutation.label(),
                    target_id,
                    existing.label
                );
                return Err(AppError::DuplicateMutationRejected);
            }

            pending.insert(
                target_id,
                PendingMutation {
                    target_id,
                    label: mutation.label(),
                    applied_at: now,
                    resolved_at: None,
                },
            );
        }

        let label = mutation.label();
        let task = tokio::spawn(self.shared.clone().settle(mutation));

        match task.await {
            Ok(result) => result,
            Err(e) => {
                self.shared.resolve(target_id).await;
                tracing::error!("{} on {} did not settle: {}", label, target_id, e);
                Err(AppError::Internal(format!("{} task failed", label)))
            }
        }
    }

    /// Whether a store call for the target is still outstanding.
    pub async fn is_in_flight(&self, target_id: Uuid) -> bool {
        self.shared
            .pending
            .lock()
            .await
            .get(&target_id)
            .is_some_and(|entry| entry.resolved_at.is_none())
    }

    pub async fn in_flight_targets(&self) -> HashSet<Uuid> {
        self.shared
            .pending
            .lock()
            .await
            .values()
            .filter(|entry| entry.resolved_at.is_none())
            .map(|entry| entry.target_id)
            .collect()
    }

    pub async fn take_notices(&self) -> Vec<FailureNotice> {
        std::mem::take(&mut *self.shared.notices.lock().await)
    }
}

fn cached<'a>(cache: &'a mut ViewCache, target_id: Uuid) -> Result<&'a mut VotableState> {
    cache
        .get_mut(target_id)
        .ok_or_else(|| AppError::NotFound(format!("{} is not loaded", target_id)))
}

pub struct VoteMutation {
    pub user_id: Uuid,
    pub target_id: Uuid,
    pub target_type: TargetType,
    pub requested: i16,
    pub ledger: Arc<Mutex<VoteLedger>>,
}

#[derive(Debug, Clone)]
pub struct VoteApplied {
    pub transition: VoteTransition,
    pub author_id: Uuid,
    pub state: VotableState,
}

#[async_trait]
impl Mutation for VoteMutation {
    type Snapshot = VotableState;
    type Applied = VoteApplied;

    fn target_id(&self) -> Uuid {
        self.target_id
    }

    fn label(&self) -> &'static str {
        "vote"
    }

    fn apply(&self, cache: &mut ViewCache) -> Result<(VotableState, VoteApplied)> {
        let state = cached(cache, self.target_id)?;
        if state.target_type != self.target_type {
            return Err(AppError::BadRequest(format!(
                "{} is not a {:?}",
                self.target_id, self.target_type
            )));
        }

        let transition = vote_service::apply_vote(state.user_vote, self.requested)?;
        let snapshot = state.clone();

        transition.apply_to(&mut state.tally);
        state.user_vote = transition.to;
        state.controversy_score = state.tally.controversy();

        Ok((
            snapshot,
            VoteApplied {
                transition,
                author_id: state.author_id,
                state: state.clone(),
            },
        ))
    }

    fn rollback(&self, cache: &mut ViewCache, snapshot: VotableState) {
        cache.insert(self.target_id, snapshot);
    }

    async fn persist(&self, store: &dyn Store, applied: &VoteApplied) -> Result<()> {
        store
            .cast_vote(
                self.target_id,
                self.target_type,
                self.user_id,
                applied.transition.to,
            )
            .await
    }

    // Karma only follows a confirmed vote, so a rollback never has karma to
    // undo.
    async fn confirmed(&self, store: &Arc<dyn Store>, applied: &VoteApplied) {
        if let Err(e) = self.ledger.lock().await.record_vote(
            self.user_id,
            self.target_id,
            self.target_type,
            applied.transition.to,
        ) {
            tracing::warn!("Failed to record vote on {}: {}", self.target_id, e);
        }

        let delta = applied.transition.score_delta;
        if delta == 0 {
            return;
        }

        let store = store.clone();
        let author_id = applied.author_id;
        let bucket = self.target_type.karma_bucket();
        tokio::spawn(async move {
            if let Err(e) = store.increment_karma(author_id, bucket, delta).await {
                tracing::error!("Failed to update karma for {}: {}", author_id, e);
            }
        });
    }
}

pub struct SaveMutation {
    pub user_id: Uuid,
    pub target_id: Uuid,
    pub target_type: TargetType,
}

#[async_trait]
impl Mutation for SaveMutation {
    type Snapshot = bool;
    type Applied = bool;

    fn target_id(&self) -> Uuid {
        self.target_id
    }

    fn label(&self) -> &'static str {
        "save"
    }

    fn apply(&self, cache: &mut ViewCache) -> Result<(bool, bool)> {
        let state = cached(cache, self.target_id)?;
        let prior = state.is_saved;
        state.is_saved = !prior;
        Ok((prior, !prior))
    }

    fn rollback(&self, cache: &mut ViewCache, snapshot: bool) {
        if let Some(state) = cache.get_mut(self.target_id) {
            state.is_saved = snapshot;
        }
    }

    async fn persist(&self, store: &dyn Store, saved: &bool) -> Result<()> {
        store
            .set_saved(self.user_id, self.target_id, self.target_type, *saved)
            .await
    }
}

pub struct HideMutation {
    pub user_id: Uuid,
    pub post_id: Uuid,
}

#[async_trait]
impl Mutation for HideMutation {
    type Snapshot = bool;
    type Applied = bool;

    fn target_id(&self) -> Uuid {
        self.post_id
    }

    fn label(&self) -> &'static str {
        "hide"
    }

    fn apply(&self, cache: &mut ViewCache) -> Result<(bool, bool)> {
        let state = cached(cache, self.post_id)?;
        if state.target_type != TargetType::Post {
            return Err(AppError::BadRequest("Only posts can be hidden".to_string()));
        }
        let prior = state.is_hidden;
        state.is_hidden = !prior;
        Ok((prior, !prior))
    }

    fn rollback(&self, cache: &mut ViewCache, snapshot: bool) {
        if let Some(state) = cache.get_mut(self.post_id) {
            state.is_hidden = snapshot;
        }
    }

    async fn persist(&self, store: &dyn Store, hidden: &bool) -> Result<()> {
        store.set_hidden(self.user_id, self.post_id, *hidden).await
    }
}
