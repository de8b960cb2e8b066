//! The vote state machine shared by posts and comments.
//!
//! A user's vote on a reactable is one of three states: up, down or none.
//! [`transition`] maps (current voter sets, user, requested vote) to the next
//! voter sets; counters are always recomputed from set sizes, so they cannot
//! drift from membership. [`VoteLedger`] runs that transition inside the
//! store's atomic read-modify-write.
//!
//! ```text
//!            upvote                     downvote
//!   none ───────────────→ up   none ───────────────→ down
//!   up   ←── remove_upvote     down ←── remove_downvote
//!   down ─── upvote ────→ up   up   ─── downvote ──→ down
//! ```
//!
//! Precondition: the tally handed to [`transition`] has initialized voter
//! sets. devit-db normalizes legacy rows with no voter column on load.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use devit_db::ReactableRepository;
use devit_types::models::{
    Reactable, ReactableKind, UnknownVoteType, VoteAction, VoteTally, VoteType,
};

use crate::error::ApiError;

/// The next state for one vote request. `next == None` means no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: Option<VoteTally>,
    pub action: VoteAction,
    pub message: Option<&'static str>,
}

impl Transition {
    fn noop(message: &'static str) -> Self {
        Self {
            next: None,
            action: VoteAction::None,
            message: Some(message),
        }
    }
}

pub fn transition(tally: &VoteTally, user: Uuid, vote: VoteType) -> Transition {
    let upvoted = tally.voters.upvoters.contains(&user);
    let downvoted = tally.voters.downvoters.contains(&user);
    let mut voters = tally.voters.clone();

    let action = match vote {
        VoteType::Upvote if upvoted => return Transition::noop("Already upvoted"),
        VoteType::Upvote => {
            let switched = voters.downvoters.remove(&user);
            voters.upvoters.insert(user);
            if switched { VoteAction::Switched } else { VoteAction::Added }
        }
        VoteType::Downvote if downvoted => return Transition::noop("Already downvoted"),
        VoteType::Downvote => {
            let switched = voters.upvoters.remove(&user);
            voters.downvoters.insert(user);
            if switched { VoteAction::Switched } else { VoteAction::Added }
        }
        VoteType::RemoveUpvote if !upvoted => return Transition::noop("Not upvoted"),
        VoteType::RemoveUpvote => {
            voters.upvoters.remove(&user);
            VoteAction::Removed
        }
        VoteType::RemoveDownvote if !downvoted => return Transition::noop("Not downvoted"),
        VoteType::RemoveDownvote => {
            voters.downvoters.remove(&user);
            VoteAction::Removed
        }
    };

    Transition {
        next: Some(VoteTally::from_voters(voters)),
        action,
        message: None,
    }
}

#[derive(Debug, Clone)]
pub struct VoteOutcome {
    pub reactable: Reactable,
    pub action: VoteAction,
    pub message: Option<&'static str>,
}

pub struct VoteLedger {
    repo: Arc<dyn ReactableRepository>,
}

impl VoteLedger {
    pub fn new(repo: Arc<dyn ReactableRepository>) -> Self {
        Self { repo }
    }

    /// Apply `vote_type` (`upvote`, `downvote`, `remove_upvote`,
    /// `remove_downvote`) from `user_id` to the post or comment `id`.
    pub fn apply_vote(
        &self,
        kind: ReactableKind,
        id: Uuid,
        user_id: Uuid,
        vote_type: &str,
    ) -> Result<VoteOutcome, ApiError> {
        let vote: VoteType = vote_type
            .parse()
            .map_err(|e: UnknownVoteType| ApiError::InvalidArgument(e.to_string()))?;

        let mut step: Option<Transition> = None;
        let reactable = self
            .repo
            .atomic_vote_update(kind, id, &mut |tally| {
                let t = transition(tally, user_id, vote);
                let next = t.next.clone();
                step = Some(t);
                next
            })?
            .ok_or_else(|| ApiError::NotFound(format!("{} not found", kind.noun())))?;

        let step = step.ok_or_else(|| anyhow::anyhow!("vote mutation was never evaluated"))?;
        debug!(%id, %user_id, ?vote, action = ?step.action, "vote applied");

        Ok(VoteOutcome {
            reactable,
            action: step.action,
            message: step.message,
        })
    }
}
