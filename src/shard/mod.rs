//! Shard management module
//!
//! The [`ConnectionSet`] trait is what the readiness coordinator and the
//! event relay see; [`ShardPool`] is its Twilight-backed implementation.

mod listener;
mod pool;
mod state;

pub use listener::{
    ConnectionSet, ListenerRegistry, PresenceUpdate, ShardEvent, ShardListener, SubscriptionToken,
};
pub use pool::{shard_range, ShardPlan, ShardPool, SHARDS_PER_POOL};
pub use state::{ShardHealth, ShardState};
