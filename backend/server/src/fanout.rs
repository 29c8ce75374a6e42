//! # Fan-out
//!
//! Pushes ledger change events to every observer connected to this process.
//!
//! ## Delivery
//!
//! - Best-effort, at-most-once per observer per event
//! - Fire-and-forget: no acknowledgment, retry or persistence
//! - An observer whose queue is full misses the event
//! - An observer whose receiver is gone is dropped from the registry
//! - No ordering across concurrent broadcasts, receivers re-fetch the tally
//!
//! Observers of other server instances are not reached.
use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{Candidate, Vote};

pub type ObserverId = u64;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Event {
    #[serde(rename_all = "camelCase")]
    VoteCast {
        voter_name: String,
        candidate_name: String,
        party: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename_all = "camelCase")]
    CandidateRegistered {
        candidate_id: Uuid,
        name: String,
        party: String,
        manifesto: String,
        vote_count: u64,
    },
}

impl Event {
    pub fn vote_cast(vote: &Vote) -> Self {
        Event::VoteCast {
            voter_name: vote.voter_name.clone(),
            candidate_name: vote.candidate_name.clone(),
            party: vote.party.clone(),
            timestamp: vote.timestamp,
        }
    }

    pub fn candidate_registered(candidate: &Candidate) -> Self {
        Event::CandidateRegistered {
            candidate_id: candidate.id,
            name: candidate.name.clone(),
            party: candidate.party.clone(),
            manifesto: candidate.manifesto.clone(),
            vote_count: candidate.vote_count,
        }
    }
}

pub struct Subscription {
    pub id: ObserverId,
    pub receiver: Receiver<Event>,
}

pub struct FanOut {
    observers: Mutex<HashMap<ObserverId, Sender<Event>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl FanOut {
    pub fn new(buffer: usize) -> Self {
        Self {
            observers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            buffer: buffer.max(1),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut observers) = self.observers.lock() {
            observers.insert(id, sender);
        }

        debug!("Observer {id} subscribed");

        Subscription { id, receiver }
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let removed = self
            .observers
            .lock()
            .map(|mut observers| observers.remove(&id).is_some())
            .unwrap_or(false);

        if removed {
            debug!("Observer {id} unsubscribed");
        }

        removed
    }

    /// Offers `event` to every observer without waiting, returns how many took it.
    pub fn broadcast(&self, event: Event) -> usize {
        let Ok(mut observers) = self.observers.lock() else {
            warn!("Observer registry poisoned, dropping event");
            return 0;
        };

        let mut delivered = 0;
        observers.retain(|id, sender| match sender.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                debug!("Observer {id} lagging, event skipped");
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Observer {id} gone, removing");
                false
            }
        });

        delivered
    }

    pub fn observer_count(&self) -> usize {
        self.observers
            .lock()
            .map(|observers| observers.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> Event {
        Event::VoteCast {
            voter_name: "Alice".into(),
            candidate_name: "Bob".into(),
            party: "Green".into(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all() {
        let fanout = FanOut::new(4);
        let mut first = fanout.subscribe();
        let mut second = fanout.subscribe();

        assert_eq!(fanout.broadcast(event()), 2);
        assert!(first.receiver.recv().await.is_some());
        assert!(second.receiver.recv().await.is_some());
    }

    #[test]
    fn test_full_queue_skips_event() {
        let fanout = FanOut::new(1);
        let mut slow = fanout.subscribe();

        assert_eq!(fanout.broadcast(event()), 1);
        assert_eq!(fanout.broadcast(event()), 0);
        assert_eq!(fanout.observer_count(), 1);

        assert!(slow.receiver.try_recv().is_ok());
        assert!(slow.receiver.try_recv().is_err());
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let fanout = FanOut::new(4);
        let gone = fanout.subscribe();
        let _live = fanout.subscribe();
        drop(gone.receiver);

        assert_eq!(fanout.broadcast(event()), 1);
        assert_eq!(fanout.observer_count(), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let fanout = FanOut::new(4);
        let subscription = fanout.subscribe();

        assert!(fanout.unsubscribe(subscription.id));
        assert!(!fanout.unsubscribe(subscription.id));
        assert_eq!(fanout.broadcast(event()), 0);
    }

    #[test]
    fn test_event_wire_shape() {
        let json = serde_json::to_value(event()).unwrap();

        assert_eq!(json["type"], "vote-cast");
        assert_eq!(json["candidateName"], "Bob");
        assert_eq!(json["voterName"], "Alice");
    }
}
