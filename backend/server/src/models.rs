//! # Records
//!
//! Voters, candidates and votes as they live in the store.
//!
//! - Voter owns `has_voted`/`voted_for`, written once by the ledger commit
//! - Candidate `vote_count` is owned by the ledger, only ever incremented
//! - Vote is append-only, the name fields are snapshots taken at write time
//!   and are never refreshed if a display name changes later
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MAX_MANIFESTO_CHARS: usize = 1000;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Voter {
    pub id: Uuid,
    pub username: String,
    pub full_name: String,
    pub password_hash: String,
    pub salt: String,
    pub is_admin: bool,
    pub has_voted: bool,
    pub voted_for: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: Uuid,
    pub owner: Uuid,
    pub name: String,
    pub party: String,
    pub manifesto: String,
    pub vote_count: u64,
    pub approved: bool,
    pub registered_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub id: Uuid,
    pub voter: Uuid,
    pub candidate: Uuid,
    pub voter_name: String,
    pub candidate_name: String,
    pub party: String,
    pub timestamp: DateTime<Utc>,
}

impl Voter {
    pub fn new(username: String, full_name: String, password_hash: String, salt: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            username,
            full_name,
            password_hash,
            salt,
            is_admin: false,
            has_voted: false,
            voted_for: None,
            created_at: Utc::now(),
        }
    }
}

impl Candidate {
    pub fn new(
        owner: Uuid,
        name: String,
        party: String,
        manifesto: String,
        approved: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner,
            name,
            party,
            manifesto,
            vote_count: 0,
            approved,
            registered_at: Utc::now(),
        }
    }
}

impl Vote {
    pub fn new(voter: &Voter, candidate: &Candidate) -> Self {
        Self {
            id: Uuid::new_v4(),
            voter: voter.id,
            candidate: candidate.id,
            voter_name: voter.full_name.clone(),
            candidate_name: candidate.name.clone(),
            party: candidate.party.clone(),
            timestamp: Utc::now(),
        }
    }

    pub fn receipt(&self) -> VoteReceipt {
        VoteReceipt {
            candidate_name: self.candidate_name.clone(),
            party: self.party.clone(),
            timestamp: self.timestamp,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteReceipt {
    pub candidate_name: String,
    pub party: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterStatus {
    pub has_voted: bool,
    pub vote: Option<VoteReceipt>,
}

/// Public view of a voter, never carries credentials.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterProfile {
    pub id: Uuid,
    pub username: String,
    pub full_name: String,
    pub is_admin: bool,
    pub has_voted: bool,
    pub voted_for: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<&Voter> for VoterProfile {
    fn from(voter: &Voter) -> Self {
        Self {
            id: voter.id,
            username: voter.username.clone(),
            full_name: voter.full_name.clone(),
            is_admin: voter.is_admin,
            has_voted: voter.has_voted,
            voted_for: voter.voted_for,
            created_at: voter.created_at,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateView {
    pub id: Uuid,
    pub candidate_name: String,
    pub party: String,
    pub manifesto: String,
    pub vote_count: u64,
    pub is_approved: bool,
    pub registered_at: DateTime<Utc>,
}

impl From<&Candidate> for CandidateView {
    fn from(candidate: &Candidate) -> Self {
        Self {
            id: candidate.id,
            candidate_name: candidate.name.clone(),
            party: candidate.party.clone(),
            manifesto: candidate.manifesto.clone(),
            vote_count: candidate.vote_count,
            is_approved: candidate.approved,
            registered_at: candidate.registered_at,
        }
    }
}
