//! Gateway configuration module
//!
//! Settings are layered with the `config` crate: an optional `gateway.toml`
//! next to the binary, then environment variables (`.env` is loaded first).

use crate::error::GatewayError;
use crate::nats::DEFAULT_QUEUE_CAPACITY;
use crate::shard::{ShardPlan, SHARDS_PER_POOL};
use serde::Deserialize;
use twilight_gateway::Intents;

/// Activity shown while shards are still connecting
pub const DEFAULT_STARTUP_ACTIVITY: &str = "Starting up...";

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Discord bot token
    pub discord_token: String,

    /// Pool ID for this gateway instance (0-indexed)
    /// Each pool manages SHARDS_PER_POOL shards
    pub pool_id: u64,

    /// How many shards exist across all pools
    pub shard_plan: ShardPlan,

    /// Relay every gateway event to the in-process event bus
    pub event_relay: bool,

    /// Activity text displayed until every shard is ready
    pub startup_activity: String,

    /// NATS server URL(s) - comma-separated for multiple servers
    pub nats_url: Option<String>,

    /// Events buffered for NATS before new ones are dropped
    pub nats_queue_capacity: usize,

    /// Health/metrics HTTP port
    pub http_port: u16,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    discord_token: Option<String>,
    #[serde(default)]
    pool_id: u64,
    #[serde(default = "default_total_shards")]
    total_shards: String,
    #[serde(default = "default_event_relay")]
    event_relay: bool,
    #[serde(default = "default_startup_activity")]
    startup_activity: String,
    #[serde(default)]
    nats_url: Option<String>,
    #[serde(default = "default_nats_queue_capacity")]
    nats_queue_capacity: usize,
    #[serde(default = "default_http_port")]
    http_port: u16,
    #[serde(default = "default_log_level")]
    log_level: String,
}

fn default_total_shards() -> String {
    "auto".to_string()
}

fn default_event_relay() -> bool {
    true
}

fn default_startup_activity() -> String {
    DEFAULT_STARTUP_ACTIVITY.to_string()
}

fn default_nats_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_http_port() -> u16 {
    9090
}

fn default_log_level() -> String {
    "info".to_string()
}

impl GatewayConfig {
    /// Load configuration from `gateway.toml` (optional) and the environment
    pub fn from_env() -> Result<Self, GatewayError> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .add_source(config::File::with_name("gateway").required(false))
            .add_source(config::Environment::default())
            .build()
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        Self::from_settings(settings)
    }

    /// Build a validated configuration from already-layered settings
    pub fn from_settings(settings: config::Config) -> Result<Self, GatewayError> {
        let raw: RawConfig = settings
            .try_deserialize()
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        let discord_token = raw
            .discord_token
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| GatewayError::Config("DISCORD_TOKEN must be set".to_string()))?;

        let shard_plan = parse_shard_plan(&raw.total_shards)?;
        validate_pool(raw.pool_id, shard_plan)?;

        if raw.nats_queue_capacity == 0 {
            return Err(GatewayError::Config(
                "NATS_QUEUE_CAPACITY must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            discord_token,
            pool_id: raw.pool_id,
            shard_plan,
            event_relay: raw.event_relay,
            startup_activity: raw.startup_activity,
            nats_url: raw.nats_url.filter(|url| !url.is_empty()),
            nats_queue_capacity: raw.nats_queue_capacity,
            http_port: raw.http_port,
            log_level: raw.log_level,
        })
    }

    /// Get configured Discord intents
    ///
    /// Minimal intents:
    /// - GUILDS: Required for guild lifecycle events
    /// - GUILD_MEMBERS: Required for member events (privileged)
    pub fn intents() -> Intents {
        Intents::GUILDS | Intents::GUILD_MEMBERS
    }
}

/// Parse `TOTAL_SHARDS`: either `auto` or a non-negative integer
fn parse_shard_plan(value: &str) -> Result<ShardPlan, GatewayError> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("auto") {
        return Ok(ShardPlan::Recommended);
    }

    value
        .parse()
        .map(|total| ShardPlan::Fixed { total })
        .map_err(|e| {
            GatewayError::Config(format!(
                "TOTAL_SHARDS must be a valid number or \"auto\", got {value:?}: {e}"
            ))
        })
}

fn validate_pool(pool_id: u64, plan: ShardPlan) -> Result<(), GatewayError> {
    match plan {
        ShardPlan::Recommended if pool_id != 0 => Err(GatewayError::Config(format!(
            "POOL_ID {pool_id} requires an explicit TOTAL_SHARDS; \"auto\" only supports pool 0"
        ))),
        ShardPlan::Fixed { total } if total > 0 && pool_id * SHARDS_PER_POOL >= total => {
            Err(GatewayError::Config(format!(
                "POOL_ID {pool_id} starts at shard {} but TOTAL_SHARDS is {total}",
                pool_id * SHARDS_PER_POOL
            )))
        }
        ShardPlan::Fixed { total: 0 } if pool_id != 0 => Err(GatewayError::Config(format!(
            "POOL_ID {pool_id} is out of range for TOTAL_SHARDS 0"
        ))),
        _ => Ok(()),
    }
}
