//! Single-Flight Module
//!
//! Coalesces concurrent computations of the same key. The first caller to
//! join a key becomes the leader and owns a `watch` sender; everyone else
//! subscribes and waits for the leader's outcome.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::warn;

/// Result of one computation, shared by every waiter.
pub type Outcome<V> = std::result::Result<V, Arc<anyhow::Error>>;

type Slot<V> = Option<Outcome<V>>;

// == Flight Registry ==
/// Per-key registry of in-flight computations.
#[derive(Debug)]
pub struct FlightRegistry<V> {
    flights: Mutex<HashMap<String, watch::Receiver<Slot<V>>>>,
}

/// Role handed to a caller joining a key.
pub enum Flight<'a, V> {
    Leader(FlightLeader<'a, V>),
    Follower(FlightFollower<V>),
}

impl<V> FlightRegistry<V> {
    pub fn new() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
        }
    }

    // == Join ==
    /// Joins the computation for `key`, becoming its leader if none runs.
    pub fn join(&self, key: &str) -> Flight<'_, V> {
        let mut flights = self.flights.lock();
        if let Some(rx) = flights.get(key) {
            return Flight::Follower(FlightFollower { rx: rx.clone() });
        }

        let (tx, rx) = watch::channel(None);
        flights.insert(key.to_string(), rx);
        Flight::Leader(FlightLeader {
            registry: self,
            key: key.to_string(),
            tx,
            completed: false,
        })
    }

    /// Number of keys currently being computed.
    pub fn in_flight(&self) -> usize {
        self.flights.lock().len()
    }
}

impl<V> Default for FlightRegistry<V> {
    fn default() -> Self {
        Self::new()
    }
}

// == Flight Leader ==
/// Guard held by the caller running the computation.
///
/// Dropping it (on completion, error, panic or cancellation of the owning
/// future) always unregisters the key, so no waiter can block forever.
pub struct FlightLeader<'a, V> {
    registry: &'a FlightRegistry<V>,
    key: String,
    tx: watch::Sender<Slot<V>>,
    completed: bool,
}

impl<V> FlightLeader<'_, V> {
    /// Publishes the outcome to every waiter and releases the key.
    pub fn complete(mut self, outcome: Outcome<V>) {
        self.tx.send_replace(Some(outcome));
        self.completed = true;
    }
}

impl<V> Drop for FlightLeader<'_, V> {
    fn drop(&mut self) {
        // Unregister before the sender drops so woken waiters see a free key
        self.registry.flights.lock().remove(&self.key);
        if !self.completed {
            warn!(key = %self.key, "In-flight compute abandoned before completing");
        }
    }
}

// == Flight Follower ==
/// Handle held by callers waiting on another caller's computation.
pub struct FlightFollower<V> {
    rx: watch::Receiver<Slot<V>>,
}

impl<V: Clone> FlightFollower<V> {
    /// Waits for the leader's outcome.
    ///
    /// Returns None if the leader went away without publishing one.
    pub async fn wait(mut self) -> Option<Outcome<V>> {
        match self.rx.wait_for(|slot| slot.is_some()).await {
            Ok(slot) => (*slot).clone(),
            Err(_) => None,
        }
    }
}
