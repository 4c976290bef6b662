//! Connection-set abstraction and listener plumbing
//!
//! [`ConnectionSet`] is the seam between the readiness/relay core and the
//! concrete Twilight shard pool. Listeners are called synchronously on the
//! task of the shard that received the event.

use crate::error::GatewayError;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use twilight_model::gateway::event::Event;
use twilight_model::gateway::presence::Status;

/// An inbound gateway event tagged with the shard that received it
#[derive(Debug, Clone)]
pub struct ShardEvent {
    pub shard_id: u32,
    /// 1-based arrival index on this shard
    pub sequence: u64,
    pub event: Event,
}

/// Receives every event dispatched by a [`ConnectionSet`]
///
/// Implementations run on shard tasks and must not block.
pub trait ShardListener: Send + Sync {
    fn on_event(&self, event: &Arc<ShardEvent>);
}

/// Handle returned by [`ConnectionSet::add_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

/// Visible bot status applied to every shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceUpdate {
    pub status: Status,
    /// "Playing ..." activity text, `None` clears the activity
    pub activity: Option<String>,
}

impl PresenceUpdate {
    /// Idle with a placeholder activity, used while shards connect
    pub fn starting(activity: impl Into<String>) -> Self {
        Self {
            status: Status::Idle,
            activity: Some(activity.into()),
        }
    }

    /// Online with no activity
    pub fn available() -> Self {
        Self {
            status: Status::Online,
            activity: None,
        }
    }
}

/// A multi-connection gateway client
pub trait ConnectionSet: Send + Sync {
    /// Number of shards this set runs, `None` until automatic sizing resolves
    fn shard_count(&self) -> Option<u32>;

    fn add_listener(&self, listener: Arc<dyn ShardListener>) -> SubscriptionToken;

    /// Returns false if the token was not registered (already removed)
    fn remove_listener(&self, token: SubscriptionToken) -> bool;

    /// Best-effort presence change on every shard
    fn set_presence(&self, presence: &PresenceUpdate) -> Result<(), GatewayError>;
}

/// Token-keyed listener list with snapshot dispatch
///
/// Dispatch clones the listener list before calling out, so a listener may
/// remove itself (or register others) from inside its own callback.
#[derive(Default)]
pub struct ListenerRegistry {
    next_token: AtomicU64,
    listeners: RwLock<Vec<(SubscriptionToken, Arc<dyn ShardListener>)>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn ShardListener>) -> SubscriptionToken {
        let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((token, listener));
        token
    }

    pub fn remove(&self, token: SubscriptionToken) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(registered, _)| *registered != token);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Deliver an event to every listener registered at call time
    pub fn dispatch(&self, event: &Arc<ShardEvent>) {
        let snapshot: Vec<Arc<dyn ShardListener>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in snapshot {
            listener.on_event(event);
        }
    }
}
