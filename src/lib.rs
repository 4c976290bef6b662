//! Botcore Gateway - Discord gateway runtime using Twilight
//!
//! A pool of shards feeds two consumers:
//!
//! - [`events::EventRelay`] republishes every inbound event on the
//!   in-process [`events::EventBus`]
//! - [`readiness::ShardReadinessCoordinator`] waits for every shard plus the
//!   host process and then announces readiness once
//!
//! Bus events can be forwarded to NATS JetStream; health and Prometheus
//! endpoints are served over HTTP.

pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod metrics;
pub mod nats;
pub mod readiness;
pub mod shard;
