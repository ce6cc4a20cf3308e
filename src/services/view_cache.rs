use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    models::{Comment, DisplayScore, Post, TargetType, ViewerFlags},
    services::vote_service::Tally,
};

/// Local view of one post or comment as the viewer currently sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct VotableState {
    pub target_type: TargetType,
    pub author_id: Uuid,
    pub tally: Tally,
    pub controversy_score: f64,
    pub created_at: DateTime<Utc>,
    pub user_vote: i16,
    pub is_saved: bool,
    pub is_hidden: bool,
}

impl VotableState {
    pub fn display(&self, target_id: Uuid, pending: bool) -> DisplayScore {
        DisplayScore {
            target_id,
            target_type: self.target_type,
            score: self.tally.score,
            upvotes: self.tally.upvotes,
            downvotes: self.tally.downvotes,
            user_vote: (self.user_vote != 0).then_some(self.user_vote),
            is_saved: self.is_saved,
            is_hidden: self.is_hidden,
            pending,
        }
    }

    /// Copy the local counters over a comment loaded earlier.
    pub fn overlay(&self, comment: &mut Comment) {
        comment.upvotes = self.tally.upvotes;
        comment.downvotes = self.tally.downvotes;
        comment.score = self.tally.score;
        comment.controversy_score = self.controversy_score;
    }
}

/// Cache of votables the viewer has loaded. Written only by the mutation
/// coordinator and by confirmed server responses.
#[derive(Debug, Default)]
pub struct ViewCache {
    entries: HashMap<Uuid, VotableState>,
}

impl ViewCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, target_id: Uuid) -> Option<&VotableState> {
        self.entries.get(&target_id)
    }

    pub fn get_mut(&mut self, target_id: Uuid) -> Option<&mut VotableState> {
        self.entries.get_mut(&target_id)
    }

    pub fn insert(&mut self, target_id: Uuid, state: VotableState) {
        self.entries.insert(target_id, state);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stored saved/hidden markers; `None` means neither is set.
    pub fn apply_flags(&mut self, target_id: Uuid, flags: Option<&ViewerFlags>) {
        if let Some(state) = self.entries.get_mut(&target_id) {
            state.is_saved = flags.is_some_and(|f| f.is_saved);
            state.is_hidden = flags.is_some_and(|f| f.is_hidden);
        }
    }

    /// Server counters replace local ones; viewer flags survive.
    pub fn upsert_post(&mut self, post: &Post, user_vote: i16) {
        self.upsert(
            post.id,
            TargetType::Post,
            post.author_id,
            Tally {
                upvotes: post.upvotes,
                downvotes: post.downvotes,
                score: post.score,
            },
            post.controversy_score,
            post.created_at,
            user_vote,
        );
    }

    pub fn upsert_comment(&mut self, comment: &Comment, user_vote: i16) {
        self.upsert(
            comment.id,
            TargetType::Comment,
            comment.author_id,
            Tally {
                upvotes: comment.upvotes,
                downvotes: comment.downvotes,
                score: comment.score,
            },
            comment.controversy_score,
            comment.created_at,
            user_vote,
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn upsert(
        &mut self,
        target_id: Uuid,
        target_type: TargetType,
        author_id: Uuid,
        tally: Tally,
        controversy_score: f64,
        created_at: DateTime<Utc>,
        user_vote: i16,
    ) {
        let (is_saved, is_hidden) = self
            .entries
            .get(&target_id)
            .map(|state| (state.is_saved, state.is_hidden))
            .unwrap_or_default();

        self.entries.insert(
            target_id,
            VotableState {
                target_type,
                author_id,
                tally,
                controversy_score,
                created_at,
                user_vote,
                is_saved,
                is_hidden,
            },
        );
    }
}
