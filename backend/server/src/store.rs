//! # Store
//!
//! Persistence seam between the core and whatever holds the records.
//!
//! Every backend must provide three unique indexes:
//! - voter username
//! - candidate owner (a voter runs at most once)
//! - vote voter (a voter votes at most once)
//!
//! The last one carries the single-vote guarantee. `commit_vote` must apply its
//! three effects (insert vote, bump the tally, mark the voter) all together or
//! not at all, and must report a collision on the vote index as
//! [`StoreError::Duplicate`] rather than a generic failure.
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Candidate, Vote, Voter};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UniqueIndex {
    VoterUsername,
    CandidateOwner,
    VoteVoter,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Record {
    Voter,
    Candidate,
}

#[derive(Error, Debug, PartialEq)]
pub enum StoreError {
    #[error("Unique index {0:?} violated")]
    Duplicate(UniqueIndex),

    #[error("{0:?} not found")]
    Missing(Record),

    #[error("Candidate {0} is not approved")]
    Unapproved(Uuid),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_voter(&self, voter: &Voter) -> Result<(), StoreError>;

    async fn voter(&self, id: Uuid) -> Result<Option<Voter>, StoreError>;

    async fn voter_by_username(&self, username: &str) -> Result<Option<Voter>, StoreError>;

    /// Newest first.
    async fn voters(&self) -> Result<Vec<Voter>, StoreError>;

    /// The voters among `ids` that exist, in no particular order.
    async fn voters_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Voter>, StoreError>;

    async fn count_voters(&self) -> Result<u64, StoreError>;

    async fn insert_candidate(&self, candidate: &Candidate) -> Result<(), StoreError>;

    async fn candidate(&self, id: Uuid) -> Result<Option<Candidate>, StoreError>;

    async fn candidate_by_owner(&self, owner: Uuid) -> Result<Option<Candidate>, StoreError>;

    /// Unordered; ranking belongs to the tally.
    async fn candidates(&self, approved_only: bool) -> Result<Vec<Candidate>, StoreError>;

    async fn set_approval(&self, id: Uuid, approved: bool) -> Result<Candidate, StoreError>;

    async fn vote_by_voter(&self, voter: Uuid) -> Result<Option<Vote>, StoreError>;

    async fn count_votes(&self) -> Result<u64, StoreError>;

    /// Newest first, `skip` then `limit`.
    async fn votes(&self, skip: usize, limit: usize) -> Result<Vec<Vote>, StoreError>;

    /// Atomically inserts `vote`, increments its candidate's tally and marks the
    /// voter. Rechecks the vote index, the candidate's existence and approval
    /// and the voter's existence inside the transaction.
    async fn commit_vote(&self, vote: &Vote) -> Result<(), StoreError>;
}
