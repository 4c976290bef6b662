//! In-memory connection set shared by the integration tests

#![allow(dead_code)]

use botcore_gateway::error::GatewayError;
use botcore_gateway::events::EventBus;
use botcore_gateway::metrics::GatewayMetrics;
use botcore_gateway::shard::{
    ConnectionSet, ListenerRegistry, PresenceUpdate, ShardEvent, ShardListener, SubscriptionToken,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use serde_json::json;
use twilight_model::gateway::event::Event;
use twilight_model::gateway::payload::incoming::Ready;

/// Drives listeners the way a shard pool would, without a network
pub struct FakeConnections {
    listeners: ListenerRegistry,
    shard_count: Mutex<Option<u32>>,
    sequences: Mutex<Vec<AtomicU64>>,
    pub presence: Mutex<Vec<PresenceUpdate>>,
}

impl FakeConnections {
    pub fn new(shard_count: Option<u32>) -> Arc<Self> {
        let slots = shard_count.unwrap_or(0) as usize;
        Arc::new(Self {
            listeners: ListenerRegistry::new(),
            shard_count: Mutex::new(shard_count),
            sequences: Mutex::new((0..slots).map(|_| AtomicU64::new(0)).collect()),
            presence: Mutex::new(Vec::new()),
        })
    }

    pub fn resolve(&self, shard_count: u32) {
        *self.shard_count.lock() = Some(shard_count);
        let mut sequences = self.sequences.lock();
        while sequences.len() < shard_count as usize {
            sequences.push(AtomicU64::new(0));
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Deliver `event` on `shard_id`, as that shard's task would
    pub fn emit(&self, shard_id: u32, event: Event) {
        let sequence = {
            let sequences = self.sequences.lock();
            sequences
                .get(shard_id as usize)
                .map_or(0, |counter| counter.fetch_add(1, Ordering::SeqCst) + 1)
        };

        self.listeners.dispatch(&Arc::new(ShardEvent {
            shard_id,
            sequence,
            event,
        }));
    }
}

impl ConnectionSet for FakeConnections {
    fn shard_count(&self) -> Option<u32> {
        *self.shard_count.lock()
    }

    fn add_listener(&self, listener: Arc<dyn ShardListener>) -> SubscriptionToken {
        self.listeners.add(listener)
    }

    fn remove_listener(&self, token: SubscriptionToken) -> bool {
        self.listeners.remove(token)
    }

    fn set_presence(&self, presence: &PresenceUpdate) -> Result<(), GatewayError> {
        self.presence.lock().push(presence.clone());
        Ok(())
    }
}

pub fn metrics() -> Arc<GatewayMetrics> {
    Arc::new(GatewayMetrics::detached())
}

pub fn bus() -> EventBus {
    EventBus::new(metrics())
}

/// A `READY` dispatch as Discord sends it for `shard_id` of `total`
pub fn ready_event(shard_id: u32, total: u32) -> Event {
    let ready: Ready = serde_json::from_value(json!({
        "application": { "id": "1", "flags": 0 },
        "guilds": [],
        "resume_gateway_url": "wss://gateway.discord.gg",
        "session_id": format!("session-{shard_id}"),
        "shard": [shard_id, total],
        "user": {
            "id": "2",
            "username": "bot",
            "discriminator": "0000",
            "avatar": null,
            "bot": true,
            "mfa_enabled": false,
            "verified": true,
            "flags": 0,
            "public_flags": 0,
            "locale": "en-US",
            "global_name": null,
            "banner": null,
            "accent_color": null,
            "email": null
        },
        "v": 10
    }))
    .expect("valid ready payload");

    Event::Ready(ready)
}
