//! # Result Aggregator
//!
//! Ranked standings straight from the store on every call, never cached. The
//! count per candidate is the denormalized `vote_count`, the total is the
//! number of vote records.
//!
//! Ordering: `vote_count` descending, then registration time ascending, then
//! id ascending.
use std::{cmp::Ordering, collections::HashMap};

use serde::Serialize;
use uuid::Uuid;

use crate::{error::Rejection, models::Candidate, store::Store};

pub const TOP_CANDIDATES: usize = 5;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Standing {
    pub candidate_id: Uuid,
    pub candidate_name: String,
    pub party: String,
    pub vote_count: u64,
    pub percentage: f64,
    pub username: String,
    pub full_name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tally {
    pub results: Vec<Standing>,
    pub total_votes: u64,
    pub total_candidates: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub total_users: u64,
    pub total_candidates: usize,
    pub total_votes: u64,
    pub voter_turnout: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub overview: Overview,
    pub top_candidates: Vec<Standing>,
}

/// `part / whole` as a percentage with two decimals, zero for an empty whole.
pub fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }

    (part as f64 / whole as f64 * 10_000.0).round() / 100.0
}

pub fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    b.vote_count
        .cmp(&a.vote_count)
        .then(a.registered_at.cmp(&b.registered_at))
        .then(a.id.cmp(&b.id))
}

pub async fn tally(store: &dyn Store) -> Result<Tally, Rejection> {
    let mut candidates = store.candidates(true).await?;
    let total_votes = store.count_votes().await?;

    candidates.sort_by(rank);

    let owner_ids: Vec<Uuid> = candidates.iter().map(|candidate| candidate.owner).collect();
    let owners: HashMap<Uuid, (String, String)> = store
        .voters_by_ids(&owner_ids)
        .await?
        .into_iter()
        .map(|voter| (voter.id, (voter.username, voter.full_name)))
        .collect();

    let results: Vec<Standing> = candidates
        .into_iter()
        .map(|candidate| {
            let (username, full_name) = owners
                .get(&candidate.owner)
                .cloned()
                .unwrap_or_default();

            Standing {
                candidate_id: candidate.id,
                percentage: percentage(candidate.vote_count, total_votes),
                vote_count: candidate.vote_count,
                candidate_name: candidate.name,
                party: candidate.party,
                username,
                full_name,
            }
        })
        .collect();

    Ok(Tally {
        total_candidates: results.len(),
        results,
        total_votes,
    })
}

pub async fn stats(store: &dyn Store) -> Result<Stats, Rejection> {
    let total_users = store.count_voters().await?;
    let Tally {
        mut results,
        total_votes,
        total_candidates,
    } = tally(store).await?;

    results.truncate(TOP_CANDIDATES);

    Ok(Stats {
        overview: Overview {
            total_users,
            total_candidates,
            total_votes,
            voter_turnout: percentage(total_votes, total_users),
        },
        top_candidates: results,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use super::*;
    use crate::{
        fanout::FanOut,
        ledger::Ledger,
        memory::MemoryStore,
        models::{Candidate, Voter},
    };

    #[test]
    fn test_percentage() {
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(5, 0), 0.0);
        assert_eq!(percentage(1, 3), 33.33);
        assert_eq!(percentage(2, 3), 66.67);
        assert_eq!(percentage(4, 4), 100.0);
    }

    #[test]
    fn test_rank_breaks_ties_by_registration() {
        let owner = Uuid::new_v4();
        let mut early = Candidate::new(owner, "E".into(), "P".into(), "M".into(), true);
        let mut late = Candidate::new(owner, "L".into(), "P".into(), "M".into(), true);
        late.registered_at = early.registered_at + Duration::seconds(1);
        early.vote_count = 3;
        late.vote_count = 3;

        assert_eq!(rank(&early, &late), Ordering::Less);

        late.vote_count = 4;
        assert_eq!(rank(&early, &late), Ordering::Greater);
    }

    async fn seeded() -> (Arc<MemoryStore>, Vec<Candidate>, Vec<Voter>) {
        let store = Arc::new(MemoryStore::new());
        let mut voters = Vec::new();
        for name in ["alice", "bob", "carol", "dave", "erin"] {
            let voter = Voter::new(name.into(), name.to_uppercase(), String::new(), String::new());
            store.insert_voter(&voter).await.unwrap();
            voters.push(voter);
        }

        let mut candidates = Vec::new();
        for (offset, owner) in voters[..3].iter().enumerate() {
            let mut candidate =
                Candidate::new(owner.id, owner.username.clone(), "P".into(), "M".into(), true);
            candidate.registered_at = Utc::now() + Duration::seconds(offset as i64);
            store.insert_candidate(&candidate).await.unwrap();
            candidates.push(candidate);
        }

        (store, candidates, voters)
    }

    #[tokio::test]
    async fn test_empty_tally_is_all_zero() {
        let (store, _, _) = seeded().await;
        let tally = tally(store.as_ref()).await.unwrap();

        assert_eq!(tally.total_votes, 0);
        assert_eq!(tally.total_candidates, 3);
        assert!(tally.results.iter().all(|standing| standing.percentage == 0.0));
        // ties fall back to registration order
        let names: Vec<_> = tally.results.iter().map(|s| s.candidate_name.as_str()).collect();
        assert_eq!(names, ["alice", "bob", "carol"]);
    }

    #[tokio::test]
    async fn test_tally_after_votes() {
        let (store, candidates, voters) = seeded().await;
        let ledger = Ledger::new(
            store.clone(),
            Arc::new(FanOut::new(4)),
            std::time::Duration::from_secs(1),
        );

        // carol gets two, bob one
        ledger.cast(voters[3].id, candidates[2].id).await.unwrap();
        ledger.cast(voters[4].id, candidates[2].id).await.unwrap();
        ledger.cast(voters[0].id, candidates[1].id).await.unwrap();

        let tally = tally(store.as_ref()).await.unwrap();
        let counts: Vec<_> = tally
            .results
            .iter()
            .map(|s| (s.candidate_name.as_str(), s.vote_count))
            .collect();
        assert_eq!(counts, [("carol", 2), ("bob", 1), ("alice", 0)]);

        assert_eq!(tally.total_votes, 3);
        let sum: u64 = tally.results.iter().map(|s| s.vote_count).sum();
        assert_eq!(sum, tally.total_votes);

        let share: f64 = tally.results.iter().map(|s| s.percentage).sum();
        assert!((share - 100.0).abs() < 0.05);
        assert_eq!(tally.results[0].full_name, "CAROL");
        assert_eq!(tally.results[1].username, "bob");
    }

    #[tokio::test]
    async fn test_unapproved_hidden_from_tally() {
        let (store, candidates, _) = seeded().await;
        store.set_approval(candidates[0].id, false).await.unwrap();

        let tally = tally(store.as_ref()).await.unwrap();
        assert_eq!(tally.total_candidates, 2);
        assert!(tally.results.iter().all(|s| s.candidate_id != candidates[0].id));
    }

    #[tokio::test]
    async fn test_stats_turnout() {
        let (store, candidates, voters) = seeded().await;
        let ledger = Ledger::new(
            store.clone(),
            Arc::new(FanOut::new(4)),
            std::time::Duration::from_secs(1),
        );
        ledger.cast(voters[4].id, candidates[0].id).await.unwrap();

        let stats = stats(store.as_ref()).await.unwrap();
        assert_eq!(stats.overview.total_users, 5);
        assert_eq!(stats.overview.total_votes, 1);
        assert_eq!(stats.overview.voter_turnout, 20.0);
        assert_eq!(stats.top_candidates.len(), 3);
        assert_eq!(stats.top_candidates[0].percentage, 100.0);
    }
}
