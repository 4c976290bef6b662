//! Shard pool implementation
//!
//! Manages multiple Discord shards per process and fans every inbound event
//! out to the registered [`ShardListener`]s.

use crate::error::GatewayError;
use crate::metrics::GatewayMetrics;
use crate::readiness::ExpectedCount;
use crate::shard::listener::{
    ConnectionSet, ListenerRegistry, PresenceUpdate, ShardEvent, ShardListener, SubscriptionToken,
};
use crate::shard::state::{ShardHealth, ShardState};

use dashmap::DashMap;
use parking_lot::Mutex;
use std::ops::Range;
use std::sync::{Arc, OnceLock};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use twilight_gateway::{Config, ConfigBuilder, EventTypeFlags, Intents, MessageSender, Shard, StreamExt as _};
use twilight_model::gateway::payload::outgoing::{update_presence::UpdatePresencePayload, UpdatePresence};
use twilight_model::gateway::presence::{Activity, ActivityType, MinimalActivity};
use twilight_model::gateway::{event::Event, OpCode, ShardId};

/// Number of shards per gateway process (pool)
pub const SHARDS_PER_POOL: u64 = 25;

/// Circuit breaker: mark shard dead after N consecutive errors without success
const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// How the pool decides which shards to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardPlan {
    /// A fixed cluster size; this pool runs its slice of it
    Fixed { total: u64 },
    /// Ask Discord for the recommended shard count at startup
    Recommended,
}

/// Shard ids owned by `pool_id` in a cluster of `total` shards
pub fn shard_range(pool_id: u64, total: u64) -> Range<u64> {
    let start = (pool_id * SHARDS_PER_POOL).min(total);
    let end = ((pool_id + 1) * SHARDS_PER_POOL).min(total);
    start..end
}

/// Shard pool managing multiple Discord shards
pub struct ShardPool {
    pool_id: u64,
    plan: ShardPlan,
    token: String,
    intents: Intents,
    state: ShardState,
    metrics: Arc<GatewayMetrics>,
    listeners: ListenerRegistry,
    senders: DashMap<u32, MessageSender>,
    presence: Mutex<Option<UpdatePresencePayload>>,
    shard_count: OnceLock<u32>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ShardPool {
    /// Create a new shard pool
    ///
    /// No connection is opened until [`ShardPool::run`].
    ///
    /// # Arguments
    /// * `pool_id` - Pool identifier (0, 1, 2, ...)
    /// * `plan` - Fixed cluster size or Discord-recommended
    /// * `token` - Discord bot token
    /// * `intents` - Discord gateway intents
    /// * `metrics` - Prometheus metrics
    pub fn new(
        pool_id: u64,
        plan: ShardPlan,
        token: String,
        intents: Intents,
        metrics: Arc<GatewayMetrics>,
    ) -> Result<Self, GatewayError> {
        let shard_count = OnceLock::new();

        let state = match plan {
            ShardPlan::Fixed { total } => {
                let range = shard_range(pool_id, total);
                let shard_ids = range
                    .map(|id| u32::try_from(id).map_err(|_| GatewayError::ShardIdOverflow { value: id }))
                    .collect::<Result<Vec<u32>, _>>()?;

                info!(
                    pool_id,
                    total_shards = total,
                    shard_count = shard_ids.len(),
                    "Creating shard pool"
                );

                let _ = shard_count.set(shard_ids.len() as u32);
                ShardState::new(pool_id, shard_ids.into_iter())
            }
            ShardPlan::Recommended => {
                info!(pool_id, "Creating shard pool with recommended shard count");
                ShardState::new(pool_id, std::iter::empty())
            }
        };

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            pool_id,
            plan,
            token,
            intents,
            state,
            metrics,
            listeners: ListenerRegistry::new(),
            senders: DashMap::new(),
            presence: Mutex::new(None),
            shard_count,
            shutdown_tx,
        })
    }

    /// Get the pool ID
    pub fn pool_id(&self) -> u64 {
        self.pool_id
    }

    /// Get shared state (for health checks)
    pub fn state(&self) -> ShardState {
        self.state.clone()
    }

    /// How many ready shards the readiness coordinator should wait for
    pub fn expected_count(&self) -> ExpectedCount {
        match self.plan {
            ShardPlan::Fixed { .. } => ExpectedCount::Fixed(self.shard_count.get().copied().unwrap_or(0)),
            ShardPlan::Recommended => ExpectedCount::Auto,
        }
    }

    /// Run all shards in the pool
    ///
    /// This spawns a task for each shard and waits for all to complete.
    pub async fn run(self: Arc<Self>) -> Result<(), GatewayError> {
        let shards = self.build_shards().await?;
        let mut handles = Vec::with_capacity(shards.len());

        for shard in shards {
            let shard_id = shard.id().number();
            self.senders.insert(shard_id, shard.sender());

            let pool = Arc::clone(&self);
            let mut shutdown_rx = self.shutdown_tx.subscribe();

            let handle = tokio::spawn(async move {
                tokio::select! {
                    result = pool.run_shard(shard) => {
                        if let Err(e) = result {
                            error!(shard_id, error = %e, "Shard task failed");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!(shard_id, "Shard received shutdown signal");
                    }
                }
                pool.senders.remove(&shard_id);
            });

            handles.push(handle);
        }

        // Wait for all shards
        for handle in handles {
            let _ = handle.await;
        }

        info!(pool_id = self.pool_id, "Shard pool shut down");
        Ok(())
    }

    /// Signal shutdown to all shards
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    async fn build_shards(&self) -> Result<Vec<Shard>, GatewayError> {
        let presence = self.presence.lock().clone();

        match self.plan {
            ShardPlan::Fixed { total } => {
                // Safe u64 → u32 cast at Twilight API boundary
                let total_u32 = u32::try_from(total)
                    .map_err(|_| GatewayError::ShardIdOverflow { value: total })?;

                shard_range(self.pool_id, total)
                    .map(|shard_id| {
                        let shard_id_u32 = u32::try_from(shard_id)
                            .map_err(|_| GatewayError::ShardIdOverflow { value: shard_id })?;
                        let config = self.shard_config(presence.clone());
                        Ok(Shard::with_config(ShardId::new(shard_id_u32, total_u32), config))
                    })
                    .collect()
            }
            ShardPlan::Recommended => {
                let http = twilight_http::Client::new(self.token.clone());
                let shards: Vec<Shard> = twilight_gateway::create_recommended(
                    &http,
                    self.shard_config(presence),
                    |_, builder| builder.build(),
                )
                .await
                .map_err(|e| GatewayError::ShardStartFailed(Box::new(e)))?
                .collect();

                for shard in &shards {
                    self.state.register(shard.id().number());
                }

                let count = u32::try_from(shards.len()).map_err(|_| GatewayError::ShardIdOverflow {
                    value: shards.len() as u64,
                })?;
                let _ = self.shard_count.set(count);
                info!(pool_id = self.pool_id, shard_count = count, "Resolved recommended shard count");

                Ok(shards)
            }
        }
    }

    fn shard_config(&self, presence: Option<UpdatePresencePayload>) -> Config {
        let builder = ConfigBuilder::new(self.token.clone(), self.intents);
        match presence {
            Some(presence) => builder.presence(presence).build(),
            None => builder.build(),
        }
    }

    /// Run a single shard's event loop
    async fn run_shard(&self, mut shard: Shard) -> Result<(), GatewayError> {
        let shard_id = shard.id().number();
        let pool_id = self.pool_id;
        let state = &self.state;
        let metrics = &self.metrics;

        state.set_health(shard_id, ShardHealth::Connecting);

        info!(shard_id, pool_id, "Shard starting");

        let mut consecutive_errors: u32 = 0;

        while let Some(item) = shard.next_event(EventTypeFlags::all()).await {
            let event = match item {
                Ok(event) => {
                    consecutive_errors = 0;
                    event
                }
                Err(source) => {
                    consecutive_errors += 1;
                    warn!(shard_id, error = %source, consecutive = consecutive_errors, "Error receiving event");

                    // Immediate fatal: reconnect failure
                    if matches!(source.kind(), twilight_gateway::error::ReceiveMessageErrorType::Reconnect) {
                        let err = GatewayError::ShardReconnectFailed {
                            shard_id,
                            source: Box::new(source),
                        };
                        metrics.record_error(shard_id, err.error_type_label());
                        state.set_health(shard_id, ShardHealth::Dead);
                        error!(shard_id, "Fatal gateway error (reconnect failed)");
                        return Err(err);
                    }

                    // Circuit breaker: too many consecutive errors
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        let err = GatewayError::ShardCircuitBroken {
                            shard_id,
                            count: consecutive_errors,
                            max: MAX_CONSECUTIVE_ERRORS,
                        };
                        metrics.record_error(shard_id, err.error_type_label());
                        state.set_health(shard_id, ShardHealth::Dead);
                        error!(shard_id, consecutive = consecutive_errors, "Shard dead: consecutive error threshold exceeded");
                        return Err(err);
                    }

                    // Non-fatal transient error
                    metrics.record_error(shard_id, "receive_error");
                    state.set_health(shard_id, ShardHealth::Disconnected);
                    continue;
                }
            };

            let sequence = state.record_event(shard_id);
            metrics.record_event(shard_id, &event);

            match &event {
                Event::Ready(ready) => {
                    state.set_health(shard_id, ShardHealth::Ready);
                    state.set_guilds(shard_id, ready.guilds.len() as u64);
                    metrics.set_guilds(shard_id, ready.guilds.len() as u64);
                    metrics.set_shards_ready(pool_id, state.ready_shards());
                    info!(
                        shard_id,
                        guilds = ready.guilds.len(),
                        session_id = %ready.session_id,
                        "Shard ready"
                    );
                }
                Event::Resumed => {
                    state.set_health(shard_id, ShardHealth::Ready);
                    metrics.set_shards_ready(pool_id, state.ready_shards());
                    info!(shard_id, "Shard resumed");
                }
                Event::GatewayReconnect => {
                    state.set_health(shard_id, ShardHealth::Resuming);
                    metrics.set_shards_ready(pool_id, state.ready_shards());
                    info!(shard_id, "Shard asked to reconnect");
                }
                Event::GatewayHeartbeatAck => {
                    state.record_heartbeat(shard_id);
                    metrics.record_heartbeat(shard_id);
                }
                Event::GuildCreate(guild) => {
                    state.adjust_guilds(shard_id, true);
                    debug!(shard_id, guild_id = %guild.id(), "Guild joined");
                }
                Event::GuildDelete(guild) => {
                    // An unavailable guild is an outage, not a leave
                    if guild.unavailable != Some(true) {
                        state.adjust_guilds(shard_id, false);
                    }
                    debug!(shard_id, guild_id = %guild.id, "Guild left");
                }
                _ => {}
            }

            let event = Arc::new(ShardEvent {
                shard_id,
                sequence,
                event,
            });
            self.listeners.dispatch(&event);
        }

        // Stream ended, shard closed
        info!(shard_id, "Shard event stream ended");
        Ok(())
    }
}

impl ConnectionSet for ShardPool {
    fn shard_count(&self) -> Option<u32> {
        self.shard_count.get().copied()
    }

    fn add_listener(&self, listener: Arc<dyn ShardListener>) -> SubscriptionToken {
        let token = self.listeners.add(listener);
        debug!(?token, listeners = self.listeners.len(), "Registered shard listener");
        token
    }

    fn remove_listener(&self, token: SubscriptionToken) -> bool {
        let removed = self.listeners.remove(token);
        debug!(?token, removed, listeners = self.listeners.len(), "Removed shard listener");
        removed
    }

    fn set_presence(&self, presence: &PresenceUpdate) -> Result<(), GatewayError> {
        let payload = presence_payload(presence);

        // Shards that have not started yet pick this up through their config
        *self.presence.lock() = Some(payload.clone());

        let command = UpdatePresence {
            d: payload,
            op: OpCode::PresenceUpdate,
        };

        let mut first_error = None;
        for entry in self.senders.iter() {
            let shard_id = *entry.key();
            if let Err(source) = entry.value().command(&command) {
                warn!(shard_id, error = %source, "Failed to queue presence update");
                if first_error.is_none() {
                    first_error = Some(GatewayError::PresenceUpdateFailed {
                        shard_id,
                        source: Box::new(source),
                    });
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Map a presence update onto Twilight's gateway payload
fn presence_payload(presence: &PresenceUpdate) -> UpdatePresencePayload {
    UpdatePresencePayload {
        activities: presence
            .activity
            .iter()
            .map(|name| {
                Activity::from(MinimalActivity {
                    kind: ActivityType::Playing,
                    name: name.clone(),
                    url: None,
                })
            })
            .collect(),
        afk: false,
        since: None,
        status: presence.status,
    }
}
