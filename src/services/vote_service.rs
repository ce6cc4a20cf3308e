use std::collections::HashMap;

use chrono::Utc;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::{TargetType, Vote},
    services::score_service,
};

/// Effect of moving one user's vote on one target from `from` to `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteTransition {
    pub from: i16,
    pub to: i16,
    pub score_delta: i32,
    pub upvote_delta: i32,
    pub downvote_delta: i32,
}

impl VoteTransition {
    /// Set semantics: the deltas that take a tally from a vote of `from` to a
    /// vote of `to`. Both values must already be validated.
    pub fn between(from: i16, to: i16) -> Self {
        let up = |v: i16| i32::from(v == 1);
        let down = |v: i16| i32::from(v == -1);

        Self {
            from,
            to,
            score_delta: i32::from(to) - i32::from(from),
            upvote_delta: up(to) - up(from),
            downvote_delta: down(to) - down(from),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.from == self.to
    }

    pub fn apply_to(&self, tally: &mut Tally) {
        tally.upvotes += self.upvote_delta;
        tally.downvotes += self.downvote_delta;
        tally.score += self.score_delta;
    }
}

/// Mutable vote counters of a single votable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tally {
    pub upvotes: i32,
    pub downvotes: i32,
    pub score: i32,
}

impl Tally {
    pub fn controversy(&self) -> f64 {
        score_service::controversy_score(self.upvotes, self.downvotes)
    }
}

pub fn validate_vote_value(value: i16) -> Result<i16> {
    if matches!(value, -1..=1) {
        Ok(value)
    } else {
        Err(AppError::InvalidVoteValue(value))
    }
}

/// Vote value that results from a user pressing `requested` while holding
/// `current`. Pressing the active arrow again clears the vote.
pub fn resolve_vote(current: i16, requested: i16) -> Result<i16> {
    let requested = validate_vote_value(requested)?;
    let current = validate_vote_value(current)?;

    if requested == current {
        Ok(0)
    } else {
        Ok(requested)
    }
}

/// Toggle semantics on top of [`VoteTransition::between`].
pub fn apply_vote(current: i16, requested: i16) -> Result<VoteTransition> {
    let to = resolve_vote(current, requested)?;
    Ok(VoteTransition::between(current, to))
}

/// Confirmed votes cast by users, at most one per (user, target).
#[derive(Debug, Default)]
pub struct VoteLedger {
    votes: HashMap<(Uuid, Uuid), Vote>,
}

impl VoteLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_value(&self, user_id: Uuid, target_id: Uuid) -> i16 {
        self.votes
            .get(&(user_id, target_id))
            .map(|vote| vote.vote_type)
            .unwrap_or(0)
    }

    pub fn get(&self, user_id: Uuid, target_id: Uuid) -> Option<&Vote> {
        self.votes.get(&(user_id, target_id))
    }

    /// Upsert or delete the vote record. Repeating a call is a no-op.
    pub fn record_vote(
        &mut self,
        user_id: Uuid,
        target_id: Uuid,
        target_type: TargetType,
        value: i16,
    ) -> Result<()> {
        let value = validate_vote_value(value)?;
        let key = (user_id, target_id);

        if value == 0 {
            self.votes.remove(&key);
            return Ok(());
        }

        let now = Utc::now();
        self.votes
            .entry(key)
            .and_modify(|vote| {
                if vote.vote_type != value {
                    vote.vote_type = value;
                    vote.updated_at = now;
                }
            })
            .or_insert_with(|| Vote {
                user_id,
                target_id,
                target_type,
                vote_type: value,
                created_at: now,
                updated_at: now,
            });

        Ok(())
    }

    /// Seed from votes loaded alongside server data.
    pub fn absorb(&mut self, votes: impl IntoIterator<Item = Vote>) {
        for vote in votes {
            if vote.vote_type == 0 {
                self.votes.remove(&(vote.user_id, vote.target_id));
            } else {
                self.votes.insert((vote.user_id, vote.target_id), vote);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upvote_twice_toggles_off() {
        let t = apply_vote(1, 1).unwrap();
        assert_eq!(t.to, 0);
        assert_eq!(t.score_delta, -1);
        assert_eq!(t.upvote_delta, -1);
        assert_eq!(t.downvote_delta, 0);
    }

    #[test]
    fn downvote_twice_toggles_off() {
        let t = apply_vote(-1, -1).unwrap();
        assert_eq!(t.to, 0);
        assert_eq!(t.score_delta, 1);
        assert_eq!(t.downvote_delta, -1);
    }

    #[test]
    fn first_vote_adds_requested_value() {
        let t = apply_vote(0, 1).unwrap();
        assert_eq!((t.to, t.score_delta, t.upvote_delta, t.downvote_delta), (1, 1, 1, 0));

        let t = apply_vote(0, -1).unwrap();
        assert_eq!((t.to, t.score_delta, t.upvote_delta, t.downvote_delta), (-1, -1, 0, 1));
    }

    #[test]
    fn switching_sides_moves_two_points() {
        let t = apply_vote(1, -1).unwrap();
        assert_eq!((t.to, t.score_delta, t.upvote_delta, t.downvote_delta), (-1, -2, -1, 1));

        let t = apply_vote(-1, 1).unwrap();
        assert_eq!((t.to, t.score_delta), (1, 2));
    }

    #[test]
    fn explicit_removal_clears_vote() {
        let t = apply_vote(-1, 0).unwrap();
        assert_eq!((t.to, t.score_delta), (0, 1));
        assert!(apply_vote(0, 0).unwrap().is_noop());
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(matches!(apply_vote(0, 2), Err(AppError::InvalidVoteValue(2))));
        assert!(matches!(apply_vote(0, -5), Err(AppError::InvalidVoteValue(-5))));
        assert!(matches!(apply_vote(3, 1), Err(AppError::InvalidVoteValue(3))));
    }

    #[test]
    fn repeated_toggling_restores_original_tally() {
        let original = Tally {
            upvotes: 7,
            downvotes: 3,
            score: 4,
        };

        for sequence in [[1, 1], [-1, -1], [1, -1], [-1, 1]] {
            let mut tally = original;
            let mut current = 0;
            for _ in 0..5 {
                for requested in sequence {
                    let t = apply_vote(current, requested).unwrap();
                    t.apply_to(&mut tally);
                    current = t.to;
                    assert_eq!(tally.score, tally.upvotes - tally.downvotes);
                }
                // Undo whatever the sequence left behind.
                let t = apply_vote(current, 0).unwrap();
                t.apply_to(&mut tally);
                current = t.to;
            }
            assert_eq!(tally, original);
        }
    }

    #[test]
    fn record_vote_is_idempotent() {
        let mut ledger = VoteLedger::new();
        let user = Uuid::new_v4();
        let target = Uuid::new_v4();

        ledger.record_vote(user, target, TargetType::Post, 1).unwrap();
        let first = ledger.get(user, target).cloned();
        ledger.record_vote(user, target, TargetType::Post, 1).unwrap();
        assert_eq!(ledger.get(user, target).cloned(), first);
        assert_eq!(ledger.len(), 1);

        ledger.record_vote(user, target, TargetType::Post, -1).unwrap();
        assert_eq!(ledger.current_value(user, target), -1);
        assert_eq!(ledger.len(), 1);

        ledger.record_vote(user, target, TargetType::Post, 0).unwrap();
        ledger.record_vote(user, target, TargetType::Post, 0).unwrap();
        assert_eq!(ledger.current_value(user, target), 0);
        assert!(ledger.is_empty());
    }

    #[test]
    fn record_vote_rejects_invalid_value() {
        let mut ledger = VoteLedger::new();
        let err = ledger
            .record_vote(Uuid::new_v4(), Uuid::new_v4(), TargetType::Comment, 9)
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidVoteValue(9)));
        assert!(ledger.is_empty());
    }
}
