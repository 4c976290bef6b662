//! Prometheus metrics module

use crate::error::GatewayError;
use metrics::{counter, gauge, histogram, describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Duration;
use twilight_model::gateway::event::Event;

/// Gateway metrics collector
///
/// Recording goes through the global `metrics` recorder; without an
/// installed recorder (tests, embedding) every call is a no-op.
#[derive(Clone)]
pub struct GatewayMetrics {
    handle: Option<Arc<PrometheusHandle>>,
}

impl GatewayMetrics {
    /// Install the Prometheus recorder and return a rendering handle
    pub fn install() -> Result<Self, GatewayError> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| GatewayError::MetricsInstall(e.to_string()))?;

        // Register metric descriptions
        Self::register_metrics();

        Ok(Self {
            handle: Some(Arc::new(handle)),
        })
    }

    /// Collector with no exporter attached
    pub fn detached() -> Self {
        Self { handle: None }
    }

    /// Register metric descriptions
    fn register_metrics() {
        // Event counters
        describe_counter!(
            "gateway_events_received_total",
            Unit::Count,
            "Total events received from Discord"
        );
        describe_counter!(
            "gateway_events_relayed_total",
            Unit::Count,
            "Total events relayed to the event bus"
        );
        describe_counter!(
            "gateway_events_routed_total",
            Unit::Count,
            "Total events routed to NATS"
        );
        describe_counter!(
            "gateway_route_failures_total",
            Unit::Count,
            "Failed event routes to NATS"
        );
        describe_counter!(
            "gateway_subscriber_failures_total",
            Unit::Count,
            "Event bus subscriber errors and panics"
        );
        describe_counter!(
            "gateway_errors_total",
            Unit::Count,
            "Total gateway errors"
        );

        // Latency histogram
        describe_histogram!(
            "gateway_event_route_duration_seconds",
            Unit::Seconds,
            "Time to route event to NATS"
        );

        // Gauges
        describe_gauge!(
            "gateway_shards_ready",
            Unit::Count,
            "Number of shards in ready state"
        );
        describe_gauge!(
            "gateway_fully_ready",
            Unit::Count,
            "Combined readiness (1=all shards and host ready, 0=starting)"
        );
        describe_gauge!(
            "gateway_guilds_total",
            Unit::Count,
            "Total guilds across all shards"
        );
        describe_gauge!(
            "gateway_nats_connected",
            Unit::Count,
            "NATS connection status (1=connected, 0=disconnected)"
        );
    }

    /// Record an event received
    pub fn record_event(&self, shard_id: u32, event: &Event) {
        let event_type = match event {
            Event::GuildCreate(_) => "guild_create",
            Event::GuildDelete(_) => "guild_delete",
            Event::GuildUpdate(_) => "guild_update",
            Event::MemberAdd(_) => "member_add",
            Event::MemberRemove(_) => "member_remove",
            Event::MemberUpdate(_) => "member_update",
            Event::InteractionCreate(_) => "interaction_create",
            Event::Ready(_) => "ready",
            Event::Resumed => "resumed",
            Event::GatewayHeartbeatAck => "heartbeat_ack",
            _ => "other",
        };

        counter!(
            "gateway_events_received_total",
            "shard_id" => shard_id.to_string(),
            "event_type" => event_type
        )
        .increment(1);
    }

    /// Record an event handed to the event bus
    pub fn record_event_relayed(&self, shard_id: u32) {
        counter!(
            "gateway_events_relayed_total",
            "shard_id" => shard_id.to_string()
        )
        .increment(1);
    }

    /// Record a subscriber that returned an error or panicked
    pub fn record_subscriber_failure(&self, subscriber: &str) {
        counter!(
            "gateway_subscriber_failures_total",
            "subscriber" => subscriber.to_string()
        )
        .increment(1);
    }

    /// Record successful route to NATS
    pub fn record_route_success(&self, event_type: &str, duration: Duration) {
        counter!(
            "gateway_events_routed_total",
            "event_type" => event_type.to_string()
        )
        .increment(1);

        histogram!(
            "gateway_event_route_duration_seconds",
            "event_type" => event_type.to_string()
        )
        .record(duration.as_secs_f64());
    }

    /// Record failed route
    pub fn record_route_failure(&self, event_type: &str) {
        counter!(
            "gateway_route_failures_total",
            "event_type" => event_type.to_string()
        )
        .increment(1);
    }

    /// Record gateway error
    pub fn record_error(&self, shard_id: u32, error_type: &'static str) {
        counter!(
            "gateway_errors_total",
            "shard_id" => shard_id.to_string(),
            "error_type" => error_type
        )
        .increment(1);
    }

    /// Record heartbeat
    pub fn record_heartbeat(&self, shard_id: u32) {
        // Heartbeats are frequent, just update a gauge
        gauge!(
            "gateway_last_heartbeat_timestamp",
            "shard_id" => shard_id.to_string()
        )
        .set(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs() as f64,
        );
    }

    /// Set guild count for a shard
    pub fn set_guilds(&self, shard_id: u32, count: u64) {
        gauge!(
            "gateway_guilds_total",
            "shard_id" => shard_id.to_string()
        )
        .set(count as f64);
    }

    /// Set shards ready count
    pub fn set_shards_ready(&self, pool_id: u64, count: usize) {
        gauge!(
            "gateway_shards_ready",
            "pool_id" => pool_id.to_string()
        )
        .set(count as f64);
    }

    /// Set combined readiness
    pub fn set_fully_ready(&self, ready: bool) {
        gauge!("gateway_fully_ready").set(if ready { 1.0 } else { 0.0 });
    }

    /// Set NATS connection status
    pub fn set_nats_connected(&self, connected: bool) {
        gauge!("gateway_nats_connected").set(if connected { 1.0 } else { 0.0 });
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle
            .as_ref()
            .map(|handle| handle.render())
            .unwrap_or_default()
    }
}
