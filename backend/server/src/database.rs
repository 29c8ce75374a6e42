//! # Redis
//!
//! RAM database, the production [`Store`].
//!
//! Holds voters, candidates and votes. Multi-record writes run as Lua scripts,
//! which Redis executes atomically, so several server instances can share one
//! Redis and still agree on who voted first.
//!
//! ## Layout
//!
//! - `voter:{id}`: hash of voter fields
//! - `voters`: sorted set of voter ids scored by registration millis
//! - `voters:username`: hash username -> voter id, unique via `HSETNX`
//! - `candidate:{id}`: hash of candidate fields, `vote_count` bumped with `HINCRBY`
//! - `candidates`: sorted set of candidate ids scored by registration millis
//! - `candidates:owner`: hash voter id -> candidate id, unique via `HSETNX`
//! - `votes:voter`: hash voter id -> vote JSON, **the single-vote index**
//! - `votes:timeline`: sorted set of voter ids scored by vote millis
//!
//! ## Scripts
//!
//! Each script checks everything it depends on before its first write. Redis
//! does not roll back a script that fails half-way, so no check may follow a
//! write.
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{
    AsyncCommands, Client, RedisError, Script,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    models::{Candidate, Vote, Voter},
    store::{Record, Store, StoreError, UniqueIndex},
};

const VOTERS: &str = "voters";
const USERNAMES: &str = "voters:username";
const CANDIDATES: &str = "candidates";
const OWNERS: &str = "candidates:owner";
const VOTES: &str = "votes:voter";
const TIMELINE: &str = "votes:timeline";

const INSERT_VOTER: &str = r#"
    if redis.call('HSETNX', KEYS[1], ARGV[1], ARGV[2]) == 0 then return 0 end
    redis.call('ZADD', KEYS[2], ARGV[3], ARGV[2])
    redis.call('HSET', KEYS[3], unpack(ARGV, 4))
    return 1
"#;

const INSERT_CANDIDATE: &str = r#"
    if redis.call('EXISTS', KEYS[4]) == 0 then return -1 end
    if redis.call('HSETNX', KEYS[1], ARGV[1], ARGV[2]) == 0 then return 0 end
    redis.call('ZADD', KEYS[2], ARGV[3], ARGV[2])
    redis.call('HSET', KEYS[3], unpack(ARGV, 4))
    return 1
"#;

const SET_APPROVAL: &str = r#"
    if redis.call('EXISTS', KEYS[1]) == 0 then return 0 end
    redis.call('HSET', KEYS[1], 'approved', ARGV[1])
    return 1
"#;

const CAST_VOTE: &str = r#"
    if redis.call('HEXISTS', KEYS[1], ARGV[1]) == 1 then return 0 end
    if redis.call('EXISTS', KEYS[3]) == 0 then return -1 end
    if redis.call('EXISTS', KEYS[2]) == 0 then return -2 end
    if redis.call('HGET', KEYS[2], 'approved') ~= '1' then return -3 end
    redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
    redis.call('HINCRBY', KEYS[2], 'vote_count', 1)
    redis.call('HSET', KEYS[3], 'has_voted', '1', 'voted_for', ARGV[3])
    redis.call('ZADD', KEYS[4], ARGV[4], ARGV[1])
    return 1
"#;

pub async fn init_redis(redis_url: &str) -> Result<ConnectionManager, RedisError> {
    let config = ConnectionManagerConfig::new().set_number_of_retries(1);

    let client = Client::open(redis_url)?;
    let connection_manager = client.get_connection_manager_with_config(config).await?;

    info!("Connected to Redis");

    Ok(connection_manager)
}

impl From<RedisError> for StoreError {
    fn from(error: RedisError) -> Self {
        StoreError::Unavailable(error.to_string())
    }
}

pub struct RedisStore {
    connection: ConnectionManager,
    insert_voter: Script,
    insert_candidate: Script,
    set_approval: Script,
    cast_vote: Script,
}

impl RedisStore {
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            insert_voter: Script::new(INSERT_VOTER),
            insert_candidate: Script::new(INSERT_CANDIDATE),
            set_approval: Script::new(SET_APPROVAL),
            cast_vote: Script::new(CAST_VOTE),
        }
    }

    async fn hashes<T>(
        &self,
        keys: Vec<String>,
        parse: fn(&HashMap<String, String>) -> Result<T, StoreError>,
    ) -> Result<Vec<T>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for key in keys {
            pipe.hgetall(key);
        }

        let mut conn = self.connection.clone();
        let maps: Vec<HashMap<String, String>> = pipe.query_async(&mut conn).await?;

        maps.iter()
            .filter(|map| !map.is_empty())
            .map(parse)
            .collect()
    }
}

fn voter_key(id: Uuid) -> String {
    format!("voter:{id}")
}

fn candidate_key(id: Uuid) -> String {
    format!("candidate:{id}")
}

fn flag(value: bool) -> &'static str {
    if value { "1" } else { "0" }
}

fn field<'a>(map: &'a HashMap<String, String>, name: &str) -> Result<&'a str, StoreError> {
    map.get(name)
        .map(String::as_str)
        .ok_or_else(|| StoreError::Corrupt(format!("missing field {name}")))
}

fn parse_id(value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn voter_fields(voter: &Voter) -> Vec<(&'static str, String)> {
    vec![
        ("id", voter.id.to_string()),
        ("username", voter.username.clone()),
        ("full_name", voter.full_name.clone()),
        ("password_hash", voter.password_hash.clone()),
        ("salt", voter.salt.clone()),
        ("is_admin", flag(voter.is_admin).to_string()),
        ("has_voted", flag(voter.has_voted).to_string()),
        (
            "voted_for",
            voter.voted_for.map(|id| id.to_string()).unwrap_or_default(),
        ),
        ("created_at", voter.created_at.to_rfc3339()),
    ]
}

fn voter_from_map(map: &HashMap<String, String>) -> Result<Voter, StoreError> {
    let voted_for = match field(map, "voted_for")? {
        "" => None,
        id => Some(parse_id(id)?),
    };

    Ok(Voter {
        id: parse_id(field(map, "id")?)?,
        username: field(map, "username")?.to_string(),
        full_name: field(map, "full_name")?.to_string(),
        password_hash: field(map, "password_hash")?.to_string(),
        salt: field(map, "salt")?.to_string(),
        is_admin: field(map, "is_admin")? == "1",
        has_voted: field(map, "has_voted")? == "1",
        voted_for,
        created_at: parse_time(field(map, "created_at")?)?,
    })
}

fn candidate_fields(candidate: &Candidate) -> Vec<(&'static str, String)> {
    vec![
        ("id", candidate.id.to_string()),
        ("owner", candidate.owner.to_string()),
        ("name", candidate.name.clone()),
        ("party", candidate.party.clone()),
        ("manifesto", candidate.manifesto.clone()),
        ("vote_count", candidate.vote_count.to_string()),
        ("approved", flag(candidate.approved).to_string()),
        ("registered_at", candidate.registered_at.to_rfc3339()),
    ]
}

fn candidate_from_map(map: &HashMap<String, String>) -> Result<Candidate, StoreError> {
    Ok(Candidate {
        id: parse_id(field(map, "id")?)?,
        owner: parse_id(field(map, "owner")?)?,
        name: field(map, "name")?.to_string(),
        party: field(map, "party")?.to_string(),
        manifesto: field(map, "manifesto")?.to_string(),
        vote_count: field(map, "vote_count")?
            .parse()
            .map_err(|e: std::num::ParseIntError| StoreError::Corrupt(e.to_string()))?,
        approved: field(map, "approved")? == "1",
        registered_at: parse_time(field(map, "registered_at")?)?,
    })
}

fn vote_from_json(json: &str) -> Result<Vote, StoreError> {
    serde_json::from_str(json).map_err(|e| StoreError::Corrupt(e.to_string()))
}

#[async_trait]
impl Store for RedisStore {
    async fn insert_voter(&self, voter: &Voter) -> Result<(), StoreError> {
        let mut invocation = self.insert_voter.prepare_invoke();
        invocation
            .key(USERNAMES)
            .key(VOTERS)
            .key(voter_key(voter.id))
            .arg(&voter.username)
            .arg(voter.id.to_string())
            .arg(voter.created_at.timestamp_millis());
        for (name, value) in voter_fields(voter) {
            invocation.arg(name).arg(value);
        }

        let mut conn = self.connection.clone();
        let outcome: i64 = invocation.invoke_async(&mut conn).await?;

        match outcome {
            1 => Ok(()),
            _ => Err(StoreError::Duplicate(UniqueIndex::VoterUsername)),
        }
    }

    async fn voter(&self, id: Uuid) -> Result<Option<Voter>, StoreError> {
        let mut conn = self.connection.clone();
        let map: HashMap<String, String> = conn.hgetall(voter_key(id)).await?;

        if map.is_empty() {
            return Ok(None);
        }

        voter_from_map(&map).map(Some)
    }

    async fn voter_by_username(&self, username: &str) -> Result<Option<Voter>, StoreError> {
        let mut conn = self.connection.clone();
        let id: Option<String> = conn.hget(USERNAMES, username).await?;

        match id {
            Some(id) => self.voter(parse_id(&id)?).await,
            None => Ok(None),
        }
    }

    async fn voters(&self) -> Result<Vec<Voter>, StoreError> {
        let mut conn = self.connection.clone();
        let ids: Vec<String> = conn.zrevrange(VOTERS, 0, -1).await?;

        self.hashes(ids.iter().map(|id| format!("voter:{id}")).collect(), voter_from_map)
            .await
    }

    async fn voters_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Voter>, StoreError> {
        self.hashes(ids.iter().copied().map(voter_key).collect(), voter_from_map)
            .await
    }

    async fn count_voters(&self) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();

        Ok(conn.zcard(VOTERS).await?)
    }

    async fn insert_candidate(&self, candidate: &Candidate) -> Result<(), StoreError> {
        let mut invocation = self.insert_candidate.prepare_invoke();
        invocation
            .key(OWNERS)
            .key(CANDIDATES)
            .key(candidate_key(candidate.id))
            .key(voter_key(candidate.owner))
            .arg(candidate.owner.to_string())
            .arg(candidate.id.to_string())
            .arg(candidate.registered_at.timestamp_millis());
        for (name, value) in candidate_fields(candidate) {
            invocation.arg(name).arg(value);
        }

        let mut conn = self.connection.clone();
        let outcome: i64 = invocation.invoke_async(&mut conn).await?;

        match outcome {
            1 => Ok(()),
            0 => Err(StoreError::Duplicate(UniqueIndex::CandidateOwner)),
            _ => Err(StoreError::Missing(Record::Voter)),
        }
    }

    async fn candidate(&self, id: Uuid) -> Result<Option<Candidate>, StoreError> {
        let mut conn = self.connection.clone();
        let map: HashMap<String, String> = conn.hgetall(candidate_key(id)).await?;

        if map.is_empty() {
            return Ok(None);
        }

        candidate_from_map(&map).map(Some)
    }

    async fn candidate_by_owner(&self, owner: Uuid) -> Result<Option<Candidate>, StoreError> {
        let mut conn = self.connection.clone();
        let id: Option<String> = conn.hget(OWNERS, owner.to_string()).await?;

        match id {
            Some(id) => self.candidate(parse_id(&id)?).await,
            None => Ok(None),
        }
    }

    async fn candidates(&self, approved_only: bool) -> Result<Vec<Candidate>, StoreError> {
        let mut conn = self.connection.clone();
        let ids: Vec<String> = conn.zrange(CANDIDATES, 0, -1).await?;

        let candidates = self
            .hashes(
                ids.iter().map(|id| format!("candidate:{id}")).collect(),
                candidate_from_map,
            )
            .await?;

        Ok(candidates
            .into_iter()
            .filter(|candidate| !approved_only || candidate.approved)
            .collect())
    }

    async fn set_approval(&self, id: Uuid, approved: bool) -> Result<Candidate, StoreError> {
        let mut conn = self.connection.clone();
        let outcome: i64 = self
            .set_approval
            .key(candidate_key(id))
            .arg(flag(approved))
            .invoke_async(&mut conn)
            .await?;

        if outcome == 0 {
            return Err(StoreError::Missing(Record::Candidate));
        }

        self.candidate(id)
            .await?
            .ok_or(StoreError::Missing(Record::Candidate))
    }

    async fn vote_by_voter(&self, voter: Uuid) -> Result<Option<Vote>, StoreError> {
        let mut conn = self.connection.clone();
        let json: Option<String> = conn.hget(VOTES, voter.to_string()).await?;

        json.as_deref().map(vote_from_json).transpose()
    }

    async fn count_votes(&self) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();

        Ok(conn.hlen(VOTES).await?)
    }

    async fn votes(&self, skip: usize, limit: usize) -> Result<Vec<Vote>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let Ok(start) = isize::try_from(skip) else {
            return Ok(Vec::new());
        };
        let stop = isize::try_from(limit - 1).map_or(isize::MAX, |span| start.saturating_add(span));

        let mut conn = self.connection.clone();
        let ids: Vec<String> = conn.zrevrange(TIMELINE, start, stop).await?;

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let jsons: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(VOTES)
            .arg(&ids)
            .query_async(&mut conn)
            .await?;

        jsons
            .iter()
            .flatten()
            .map(|json| vote_from_json(json))
            .collect()
    }

    async fn commit_vote(&self, vote: &Vote) -> Result<(), StoreError> {
        let json = serde_json::to_string(vote).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let mut conn = self.connection.clone();
        let outcome: i64 = self
            .cast_vote
            .key(VOTES)
            .key(candidate_key(vote.candidate))
            .key(voter_key(vote.voter))
            .key(TIMELINE)
            .arg(vote.voter.to_string())
            .arg(json)
            .arg(vote.candidate.to_string())
            .arg(vote.timestamp.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        debug!("Cast script outcome {outcome} for voter {}", vote.voter);

        match outcome {
            1 => Ok(()),
            0 => Err(StoreError::Duplicate(UniqueIndex::VoteVoter)),
            -1 => Err(StoreError::Missing(Record::Voter)),
            -2 => Err(StoreError::Missing(Record::Candidate)),
            _ => Err(StoreError::Unapproved(vote.candidate)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voter_fields_round_trip() {
        let mut voter = Voter::new("alice".into(), "Alice A".into(), "hash".into(), "salt".into());
        voter.voted_for = Some(Uuid::new_v4());
        voter.has_voted = true;

        let map: HashMap<String, String> = voter_fields(&voter)
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();

        assert_eq!(voter_from_map(&map).unwrap(), voter);
    }

    #[test]
    fn test_candidate_missing_field_is_corrupt() {
        let candidate = Candidate::new(Uuid::new_v4(), "C".into(), "P".into(), "M".into(), true);
        let mut map: HashMap<String, String> = candidate_fields(&candidate)
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        map.remove("vote_count");

        assert!(matches!(
            candidate_from_map(&map),
            Err(StoreError::Corrupt(_))
        ));
    }

    async fn redis_store() -> Option<RedisStore> {
        let url = std::env::var("REDIS_URL").ok()?;

        Some(RedisStore::new(init_redis(&url).await.unwrap()))
    }

    fn unique(name: &str) -> String {
        format!("{name}{}", &Uuid::new_v4().simple().to_string()[..12])
    }

    async fn stored_voter(store: &RedisStore, name: &str) -> Voter {
        let voter = Voter::new(unique(name), name.into(), "hash".into(), "salt".into());
        store.insert_voter(&voter).await.unwrap();
        voter
    }

    #[tokio::test]
    #[ignore = "needs REDIS_URL"]
    async fn test_redis_cast_vote_once() {
        let Some(store) = redis_store().await else {
            return;
        };
        let alice = stored_voter(&store, "alice").await;
        let bob = stored_voter(&store, "bob").await;
        let candidate = Candidate::new(bob.id, "Bob".into(), "P".into(), "M".into(), true);
        store.insert_candidate(&candidate).await.unwrap();

        let vote = Vote::new(&alice, &candidate);
        store.commit_vote(&vote).await.unwrap();

        assert_eq!(
            store.commit_vote(&Vote::new(&alice, &candidate)).await,
            Err(StoreError::Duplicate(UniqueIndex::VoteVoter))
        );
        assert_eq!(store.vote_by_voter(alice.id).await.unwrap(), Some(vote));

        let candidate = store.candidate(candidate.id).await.unwrap().unwrap();
        assert_eq!(candidate.vote_count, 1);

        let alice = store.voter(alice.id).await.unwrap().unwrap();
        assert!(alice.has_voted);
        assert_eq!(alice.voted_for, Some(candidate.id));
    }

    #[tokio::test]
    #[ignore = "needs REDIS_URL"]
    async fn test_redis_rejected_commit_writes_nothing() {
        let Some(store) = redis_store().await else {
            return;
        };
        let alice = stored_voter(&store, "alice").await;
        let bob = stored_voter(&store, "bob").await;
        let pending = Candidate::new(bob.id, "Bob".into(), "P".into(), "M".into(), false);
        store.insert_candidate(&pending).await.unwrap();

        assert_eq!(
            store.commit_vote(&Vote::new(&alice, &pending)).await,
            Err(StoreError::Unapproved(pending.id))
        );

        let ghost = Candidate::new(bob.id, "Ghost".into(), "P".into(), "M".into(), true);
        assert_eq!(
            store.commit_vote(&Vote::new(&alice, &ghost)).await,
            Err(StoreError::Missing(Record::Candidate))
        );

        assert_eq!(store.vote_by_voter(alice.id).await.unwrap(), None);
        assert_eq!(store.candidate(pending.id).await.unwrap().unwrap().vote_count, 0);
        assert!(!store.voter(alice.id).await.unwrap().unwrap().has_voted);
    }

    #[tokio::test]
    #[ignore = "needs REDIS_URL"]
    async fn test_redis_unique_indexes() {
        let Some(store) = redis_store().await else {
            return;
        };
        let alice = stored_voter(&store, "alice").await;

        let mut twin = Voter::new(alice.username.clone(), "Twin".into(), "h".into(), "s".into());
        twin.id = Uuid::new_v4();
        assert_eq!(
            store.insert_voter(&twin).await,
            Err(StoreError::Duplicate(UniqueIndex::VoterUsername))
        );

        let first = Candidate::new(alice.id, "A".into(), "P".into(), "M".into(), true);
        let second = Candidate::new(alice.id, "B".into(), "Q".into(), "N".into(), true);
        store.insert_candidate(&first).await.unwrap();
        assert_eq!(
            store.insert_candidate(&second).await,
            Err(StoreError::Duplicate(UniqueIndex::CandidateOwner))
        );
        assert_eq!(store.candidate(second.id).await.unwrap(), None);
        assert_eq!(store.candidate_by_owner(alice.id).await.unwrap(), Some(first));

        let orphan = Candidate::new(Uuid::new_v4(), "O".into(), "P".into(), "M".into(), true);
        assert_eq!(
            store.insert_candidate(&orphan).await,
            Err(StoreError::Missing(Record::Voter))
        );

        let found = store
            .voters_by_ids(&[alice.id, Uuid::new_v4()])
            .await
            .unwrap();
        assert_eq!(found, vec![alice]);
    }
}
