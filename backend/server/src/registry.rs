//! # Registration
//!
//! Voter accounts, candidacies and the admin reads around them.
//!
//! Candidate registration mirrors the ledger: a pre-check for an existing
//! candidacy, then the store's owner index as the backstop. A fresh candidacy is
//! announced to observers as `candidate-registered`.
use std::{collections::HashMap, sync::Arc};

use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::{hash_password, new_salt, verify_password},
    error::Rejection,
    fanout::{Event, FanOut},
    models::{Candidate, Vote, Voter},
    store::Store,
    tally::rank,
    utils::{self, MAX_NAME_CHARS},
};

pub const MAX_PAGE_SIZE: usize = 100;

pub struct Registry {
    store: Arc<dyn Store>,
    fanout: Arc<FanOut>,
    auto_approve: bool,
}

pub struct VotePage {
    pub votes: Vec<Vote>,
    /// Current usernames of the voters on this page.
    pub usernames: HashMap<Uuid, String>,
    pub page: usize,
    pub total_pages: usize,
    pub total_votes: u64,
}

impl Registry {
    pub fn new(store: Arc<dyn Store>, fanout: Arc<FanOut>, auto_approve: bool) -> Self {
        Self {
            store,
            fanout,
            auto_approve,
        }
    }

    pub async fn register_voter(
        &self,
        username: &str,
        password: &str,
        full_name: &str,
    ) -> Result<Voter, Rejection> {
        let username = utils::username(username)?;
        let password = utils::password(password)?;
        let full_name = utils::required("full name", full_name, MAX_NAME_CHARS)?;

        let salt = new_salt();
        let voter = Voter::new(username, full_name, hash_password(password, &salt), salt);

        self.store.insert_voter(&voter).await?;

        info!("Voter registered: {}", voter.id);

        Ok(voter)
    }

    pub async fn authenticate(&self, username: &str, password: &str) -> Result<Voter, Rejection> {
        let username = utils::sanitize_username(username);

        match self.store.voter_by_username(&username).await? {
            Some(voter) if verify_password(password, &voter.salt, &voter.password_hash) => {
                Ok(voter)
            }
            _ => Err(Rejection::InvalidCredentials),
        }
    }

    /// Creates the administrator account unless the username is already taken.
    pub async fn seed_admin(
        &self,
        username: &str,
        password: &str,
        full_name: &str,
    ) -> Result<(), Rejection> {
        let username = utils::username(username)?;

        if self.store.voter_by_username(&username).await?.is_some() {
            info!("Admin account {username} already present");
            return Ok(());
        }

        let salt = new_salt();
        let mut admin = Voter::new(
            username,
            utils::required("full name", full_name, MAX_NAME_CHARS)?,
            hash_password(utils::password(password)?, &salt),
            salt,
        );
        admin.is_admin = true;

        match self.store.insert_voter(&admin).await {
            Ok(()) => {
                info!("Admin account {} created", admin.username);
                Ok(())
            }
            // another instance seeded it first
            Err(e) => match Rejection::from(e) {
                Rejection::UsernameTaken => Ok(()),
                rejection => Err(rejection),
            },
        }
    }

    pub async fn register_candidate(
        &self,
        voter_id: Uuid,
        name: &str,
        party: &str,
        manifesto: &str,
    ) -> Result<Candidate, Rejection> {
        let voter = self
            .store
            .voter(voter_id)
            .await?
            .ok_or(Rejection::VoterNotFound)?;

        if voter.is_admin {
            return Err(Rejection::AdminCannotRegister);
        }
        if self.store.candidate_by_owner(voter_id).await?.is_some() {
            return Err(Rejection::AlreadyCandidate);
        }

        let candidate = Candidate::new(
            voter_id,
            utils::required("candidate name", name, MAX_NAME_CHARS)?,
            utils::required("party", party, MAX_NAME_CHARS)?,
            utils::manifesto(manifesto)?,
            self.auto_approve,
        );

        self.store.insert_candidate(&candidate).await?;

        info!("Candidate registered: {} by {}", candidate.id, voter_id);

        let delivered = self
            .fanout
            .broadcast(Event::candidate_registered(&candidate));
        info!("candidate-registered delivered to {delivered} observers");

        Ok(candidate)
    }

    pub async fn set_approval(
        &self,
        candidate_id: Uuid,
        approved: bool,
    ) -> Result<Candidate, Rejection> {
        let candidate = self.store.set_approval(candidate_id, approved).await?;

        if approved {
            info!("Candidate {candidate_id} approved");
        } else {
            warn!("Candidate {candidate_id} approval withdrawn");
        }

        Ok(candidate)
    }

    /// Approved only, in tally order.
    pub async fn candidates(&self) -> Result<Vec<Candidate>, Rejection> {
        let mut candidates = self.store.candidates(true).await?;
        candidates.sort_by(rank);

        Ok(candidates)
    }

    /// Every candidacy regardless of approval, in tally order.
    pub async fn all_candidates(&self) -> Result<Vec<Candidate>, Rejection> {
        let mut candidates = self.store.candidates(false).await?;
        candidates.sort_by(rank);

        Ok(candidates)
    }

    pub async fn candidate(&self, id: Uuid) -> Result<Candidate, Rejection> {
        self.store
            .candidate(id)
            .await?
            .ok_or(Rejection::CandidateNotFound)
    }

    pub async fn candidacy(&self, voter_id: Uuid) -> Result<Option<Candidate>, Rejection> {
        Ok(self.store.candidate_by_owner(voter_id).await?)
    }

    pub async fn voter(&self, id: Uuid) -> Result<Voter, Rejection> {
        self.store.voter(id).await?.ok_or(Rejection::VoterNotFound)
    }

    pub async fn voters(&self) -> Result<Vec<Voter>, Rejection> {
        Ok(self.store.voters().await?)
    }

    /// 1-based `page`, `limit` clamped to `1..=MAX_PAGE_SIZE`.
    pub async fn votes(&self, page: usize, limit: usize) -> Result<VotePage, Rejection> {
        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_SIZE);

        let total_votes = self.store.count_votes().await?;
        let votes = match (page - 1).checked_mul(limit) {
            Some(skip) if skip < total_votes as usize => self.store.votes(skip, limit).await?,
            _ => Vec::new(),
        };

        let voter_ids: Vec<Uuid> = votes.iter().map(|vote| vote.voter).collect();
        let usernames = self
            .store
            .voters_by_ids(&voter_ids)
            .await?
            .into_iter()
            .map(|voter| (voter.id, voter.username))
            .collect();

        Ok(VotePage {
            votes,
            usernames,
            page,
            total_pages: (total_votes as usize).div_ceil(limit),
            total_votes,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{ledger::Ledger, memory::MemoryStore};

    fn registry(auto_approve: bool) -> (Registry, Arc<FanOut>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let fanout = Arc::new(FanOut::new(8));

        (
            Registry::new(store.clone(), fanout.clone(), auto_approve),
            fanout,
            store,
        )
    }

    #[tokio::test]
    async fn test_register_and_authenticate() {
        let (registry, _, _) = registry(true);
        let voter = registry
            .register_voter("  Alice ", "secret1", "Alice   Liddell")
            .await
            .unwrap();

        assert_eq!(voter.username, "alice");
        assert_eq!(voter.full_name, "Alice Liddell");
        assert!(!voter.has_voted);

        assert_eq!(registry.authenticate("ALICE", "secret1").await.unwrap().id, voter.id);
        assert_eq!(
            registry.authenticate("alice", "wrong!!").await.unwrap_err(),
            Rejection::InvalidCredentials
        );
        assert_eq!(
            registry.authenticate("nobody", "secret1").await.unwrap_err(),
            Rejection::InvalidCredentials
        );
        assert_eq!(
            registry.register_voter("alice", "secret2", "Other").await.unwrap_err(),
            Rejection::UsernameTaken
        );
    }

    #[tokio::test]
    async fn test_register_candidate_broadcasts() {
        let (registry, fanout, _) = registry(true);
        let mut observer = fanout.subscribe();
        let voter = registry.register_voter("alice", "secret1", "Alice").await.unwrap();

        let candidate = registry
            .register_candidate(voter.id, "Alice", "Green", "Trees for all")
            .await
            .unwrap();

        assert_eq!(candidate.vote_count, 0);
        assert!(candidate.approved);
        assert_eq!(
            observer.receiver.try_recv().unwrap(),
            Event::candidate_registered(&candidate)
        );
        assert_eq!(
            registry
                .register_candidate(voter.id, "Alice", "Blue", "Again")
                .await
                .unwrap_err(),
            Rejection::AlreadyCandidate
        );
        assert_eq!(registry.candidacy(voter.id).await.unwrap(), Some(candidate));
    }

    #[tokio::test]
    async fn test_admin_cannot_register_candidate() {
        let (registry, fanout, _) = registry(true);
        let mut observer = fanout.subscribe();
        registry.seed_admin("admin", "admin@123", "System Administrator").await.unwrap();
        let admin = registry.authenticate("admin", "admin@123").await.unwrap();

        assert!(admin.is_admin);
        assert_eq!(
            registry
                .register_candidate(admin.id, "Boss", "Staff", "Rule")
                .await
                .unwrap_err(),
            Rejection::AdminCannotRegister
        );
        assert!(observer.receiver.try_recv().is_err());
        // seeding twice is a no-op
        registry.seed_admin("admin", "admin@123", "System Administrator").await.unwrap();
    }

    #[tokio::test]
    async fn test_manual_approval() {
        let (registry, _, store) = registry(false);
        let ledger = Ledger::new(store.clone(), Arc::new(FanOut::new(1)), Duration::from_secs(1));
        let alice = registry.register_voter("alice", "secret1", "Alice").await.unwrap();
        let bob = registry.register_voter("bob", "secret1", "Bob").await.unwrap();
        let candidate = registry
            .register_candidate(bob.id, "Bob", "Red", "Stuff")
            .await
            .unwrap();

        assert!(registry.candidates().await.unwrap().is_empty());
        assert_eq!(registry.all_candidates().await.unwrap().len(), 1);
        assert_eq!(
            ledger.cast(alice.id, candidate.id).await.unwrap_err(),
            Rejection::CandidateNotApproved
        );

        registry.set_approval(candidate.id, true).await.unwrap();
        ledger.cast(alice.id, candidate.id).await.unwrap();
        assert_eq!(registry.candidate(candidate.id).await.unwrap().vote_count, 1);
    }

    #[tokio::test]
    async fn test_invalid_candidate_input() {
        let (registry, _, _) = registry(true);
        let voter = registry.register_voter("alice", "secret1", "Alice").await.unwrap();

        assert!(matches!(
            registry.register_candidate(voter.id, "   ", "Green", "x").await,
            Err(Rejection::Invalid(_))
        ));
        assert!(matches!(
            registry
                .register_candidate(voter.id, "Alice", "Green", &"x".repeat(1001))
                .await,
            Err(Rejection::Invalid(_))
        ));
        assert_eq!(registry.candidacy(voter.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_vote_pages() {
        let (registry, _, store) = registry(true);
        let ledger = Ledger::new(store.clone(), Arc::new(FanOut::new(1)), Duration::from_secs(1));
        let owner = registry.register_voter("owner", "secret1", "Owner").await.unwrap();
        let candidate = registry
            .register_candidate(owner.id, "Owner", "P", "M")
            .await
            .unwrap();

        for n in 0..5 {
            let voter = registry
                .register_voter(&format!("voter{n}"), "secret1", "Voter")
                .await
                .unwrap();
            ledger.cast(voter.id, candidate.id).await.unwrap();
        }

        let page = registry.votes(2, 2).await.unwrap();
        assert_eq!(page.votes.len(), 2);
        for vote in &page.votes {
            assert!(page.usernames[&vote.voter].starts_with("voter"));
        }
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.total_votes, 5);
        assert_eq!(registry.votes(3, 2).await.unwrap().votes.len(), 1);
        assert_eq!(registry.votes(0, 0).await.unwrap().page, 1);
    }

    #[tokio::test]
    async fn test_vote_page_past_the_end() {
        let (registry, _, store) = registry(true);
        let ledger = Ledger::new(store.clone(), Arc::new(FanOut::new(1)), Duration::from_secs(1));
        let owner = registry.register_voter("owner", "secret1", "Owner").await.unwrap();
        let voter = registry.register_voter("voter", "secret1", "Voter").await.unwrap();
        let candidate = registry
            .register_candidate(owner.id, "Owner", "P", "M")
            .await
            .unwrap();
        ledger.cast(voter.id, candidate.id).await.unwrap();

        let page = registry.votes(usize::MAX, MAX_PAGE_SIZE).await.unwrap();
        assert!(page.votes.is_empty());
        assert_eq!(page.page, usize::MAX);
        assert_eq!(page.total_votes, 1);
        assert!(registry.votes(2, 1).await.unwrap().votes.is_empty());
    }
}
