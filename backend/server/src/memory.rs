//! # In-process store
//!
//! All tables behind a single mutex, so every method is one transaction.
//! Used for tests and single-node development when `REDIS_URL` is unset.
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    models::{Candidate, Vote, Voter},
    store::{Record, Store, StoreError, UniqueIndex},
};

#[derive(Default)]
struct Tables {
    voters: HashMap<Uuid, Voter>,
    usernames: HashMap<String, Uuid>,
    candidates: HashMap<Uuid, Candidate>,
    owners: HashMap<Uuid, Uuid>,
    votes: HashMap<Uuid, Vote>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".to_string()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_voter(&self, voter: &Voter) -> Result<(), StoreError> {
        let mut tables = self.lock()?;

        if tables.usernames.contains_key(&voter.username) {
            return Err(StoreError::Duplicate(UniqueIndex::VoterUsername));
        }

        tables.usernames.insert(voter.username.clone(), voter.id);
        tables.voters.insert(voter.id, voter.clone());

        Ok(())
    }

    async fn voter(&self, id: Uuid) -> Result<Option<Voter>, StoreError> {
        Ok(self.lock()?.voters.get(&id).cloned())
    }

    async fn voter_by_username(&self, username: &str) -> Result<Option<Voter>, StoreError> {
        let tables = self.lock()?;

        Ok(tables
            .usernames
            .get(username)
            .and_then(|id| tables.voters.get(id))
            .cloned())
    }

    async fn voters(&self) -> Result<Vec<Voter>, StoreError> {
        let mut voters: Vec<Voter> = self.lock()?.voters.values().cloned().collect();
        voters.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        Ok(voters)
    }

    async fn voters_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Voter>, StoreError> {
        let tables = self.lock()?;

        Ok(ids
            .iter()
            .filter_map(|id| tables.voters.get(id))
            .cloned()
            .collect())
    }

    async fn count_voters(&self) -> Result<u64, StoreError> {
        Ok(self.lock()?.voters.len() as u64)
    }

    async fn insert_candidate(&self, candidate: &Candidate) -> Result<(), StoreError> {
        let mut tables = self.lock()?;

        if !tables.voters.contains_key(&candidate.owner) {
            return Err(StoreError::Missing(Record::Voter));
        }
        if tables.owners.contains_key(&candidate.owner) {
            return Err(StoreError::Duplicate(UniqueIndex::CandidateOwner));
        }

        tables.owners.insert(candidate.owner, candidate.id);
        tables.candidates.insert(candidate.id, candidate.clone());

        Ok(())
    }

    async fn candidate(&self, id: Uuid) -> Result<Option<Candidate>, StoreError> {
        Ok(self.lock()?.candidates.get(&id).cloned())
    }

    async fn candidate_by_owner(&self, owner: Uuid) -> Result<Option<Candidate>, StoreError> {
        let tables = self.lock()?;

        Ok(tables
            .owners
            .get(&owner)
            .and_then(|id| tables.candidates.get(id))
            .cloned())
    }

    async fn candidates(&self, approved_only: bool) -> Result<Vec<Candidate>, StoreError> {
        Ok(self
            .lock()?
            .candidates
            .values()
            .filter(|candidate| !approved_only || candidate.approved)
            .cloned()
            .collect())
    }

    async fn set_approval(&self, id: Uuid, approved: bool) -> Result<Candidate, StoreError> {
        let mut tables = self.lock()?;
        let candidate = tables
            .candidates
            .get_mut(&id)
            .ok_or(StoreError::Missing(Record::Candidate))?;

        candidate.approved = approved;

        Ok(candidate.clone())
    }

    async fn vote_by_voter(&self, voter: Uuid) -> Result<Option<Vote>, StoreError> {
        Ok(self.lock()?.votes.get(&voter).cloned())
    }

    async fn count_votes(&self) -> Result<u64, StoreError> {
        Ok(self.lock()?.votes.len() as u64)
    }

    async fn votes(&self, skip: usize, limit: usize) -> Result<Vec<Vote>, StoreError> {
        let mut votes: Vec<Vote> = self.lock()?.votes.values().cloned().collect();
        votes.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(a.id.cmp(&b.id)));

        Ok(votes.into_iter().skip(skip).take(limit).collect())
    }

    async fn commit_vote(&self, vote: &Vote) -> Result<(), StoreError> {
        let mut tables = self.lock()?;

        // every check happens before the first write, nothing to roll back
        if tables.votes.contains_key(&vote.voter) {
            return Err(StoreError::Duplicate(UniqueIndex::VoteVoter));
        }
        if !tables.voters.contains_key(&vote.voter) {
            return Err(StoreError::Missing(Record::Voter));
        }
        match tables.candidates.get(&vote.candidate) {
            None => return Err(StoreError::Missing(Record::Candidate)),
            Some(candidate) if !candidate.approved => {
                return Err(StoreError::Unapproved(vote.candidate));
            }
            Some(_) => {}
        }

        tables.votes.insert(vote.voter, vote.clone());

        if let Some(candidate) = tables.candidates.get_mut(&vote.candidate) {
            candidate.vote_count += 1;
        }
        if let Some(voter) = tables.voters.get_mut(&vote.voter) {
            voter.has_voted = true;
            voter.voted_for = Some(vote.candidate);
        }

        Ok(())
    }
}
