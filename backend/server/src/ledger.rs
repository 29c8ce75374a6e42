//! # Vote Ledger
//!
//! Owns the cast transaction and the single-vote invariant.
//!
//! ## Cast
//!
//! Preconditions, each with its own rejection:
//! 1. Voter exists and is not an admin
//! 2. No vote record exists for the voter (primary check)
//! 3. Voter `has_voted` flag is false (secondary check, different record)
//! 4. Candidate exists and is approved
//! 5. Candidate is not owned by the voter
//!
//! Then one store commit inserts the vote, bumps the tally and marks the voter.
//! The pre-checks are a fast path only: two racing casts can both pass them, and
//! the store's unique index on vote voter decides the winner. The loser gets
//! [`Rejection::AlreadyVoted`].
//!
//! There is no in-process lock here. Several instances may share one store.
use std::{sync::Arc, time::Duration};

use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::Rejection,
    fanout::{Event, FanOut},
    models::{Vote, VoteReceipt, VoterStatus},
    store::Store,
};

pub struct Ledger {
    store: Arc<dyn Store>,
    fanout: Arc<FanOut>,
    commit_timeout: Duration,
}

impl Ledger {
    pub fn new(store: Arc<dyn Store>, fanout: Arc<FanOut>, commit_timeout: Duration) -> Self {
        Self {
            store,
            fanout,
            commit_timeout,
        }
    }

    pub async fn cast(
        &self,
        voter_id: Uuid,
        candidate_id: Uuid,
    ) -> Result<VoteReceipt, Rejection> {
        let voter = self
            .store
            .voter(voter_id)
            .await?
            .ok_or(Rejection::VoterNotFound)?;

        if voter.is_admin {
            return Err(Rejection::AdminCannotVote);
        }
        if self.store.vote_by_voter(voter_id).await?.is_some() {
            return Err(Rejection::AlreadyVoted);
        }
        if voter.has_voted {
            return Err(Rejection::AlreadyVoted);
        }

        let candidate = self
            .store
            .candidate(candidate_id)
            .await?
            .ok_or(Rejection::CandidateNotFound)?;

        if !candidate.approved {
            return Err(Rejection::CandidateNotApproved);
        }
        if candidate.owner == voter.id {
            return Err(Rejection::SelfVote);
        }

        let vote = Vote::new(&voter, &candidate);

        match timeout(self.commit_timeout, self.store.commit_vote(&vote)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let rejection = Rejection::from(e);
                if rejection.is_retryable() {
                    warn!("Vote commit for {voter_id} failed: {rejection}");
                }
                return Err(rejection);
            }
            Err(_) => {
                warn!("Vote commit for {voter_id} timed out, outcome unknown");
                return Err(Rejection::Timeout);
            }
        }

        info!("Vote recorded: {} -> {}", voter.id, candidate.id);

        let delivered = self.fanout.broadcast(Event::vote_cast(&vote));
        info!("vote-cast delivered to {delivered} observers");

        Ok(vote.receipt())
    }

    /// Read-only; safe to call after a timed out cast.
    pub async fn voter_status(&self, voter_id: Uuid) -> Result<VoterStatus, Rejection> {
        if self.store.voter(voter_id).await?.is_none() {
            return Err(Rejection::VoterNotFound);
        }

        let vote = self.store.vote_by_voter(voter_id).await?;

        Ok(VoterStatus {
            has_voted: vote.is_some(),
            vote: vote.map(|vote| vote.receipt()),
        })
    }
}
