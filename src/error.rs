//! Domain error types for the gateway
//!
//! main.rs is the ONLY module allowed to use anyhow::Result (process boundary).
//! All library code returns Result<T, GatewayError>.

use thiserror::Error;

/// Boxed transport error carried by the variants that wrap Twilight/NATS failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Gateway domain errors
///
/// Every variant carries structured context fields for diagnostics, and
/// falls into one of three families:
///
/// - configuration: fatal at startup, never retried
/// - transport: shard or broker failures, propagated to the owning task
/// - subscriber: downstream failures, isolated and logged by the bus
///
/// Example log output:
/// ```text
/// GatewayError::ShardCircuitBroken { shard_id: 3, count: 10, max: 10 }
/// → "shard 3 exceeded consecutive error threshold (10/10)"
/// ```
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Configuration error (missing or malformed setting)
    #[error("configuration error: {0}")]
    Config(String),

    /// Shard ID overflow: u64 value exceeds u32::MAX (Twilight API boundary)
    #[error("shard ID overflow: {value} exceeds u32::MAX")]
    ShardIdOverflow { value: u64 },

    /// Shards could not be created (login or recommended-count lookup failed)
    #[error("failed to start shards")]
    ShardStartFailed(#[source] BoxError),

    /// Shard exceeded consecutive error threshold (circuit breaker tripped)
    #[error("shard {shard_id} exceeded consecutive error threshold ({count}/{max})")]
    ShardCircuitBroken { shard_id: u32, count: u32, max: u32 },

    /// Shard reconnection failed (fatal, shard marked dead)
    #[error("shard {shard_id} reconnection failed")]
    ShardReconnectFailed {
        shard_id: u32,
        #[source]
        source: BoxError,
    },

    /// Presence command could not be queued on a shard
    #[error("presence update failed on shard {shard_id}")]
    PresenceUpdateFailed {
        shard_id: u32,
        #[source]
        source: BoxError,
    },

    /// A bus subscriber rejected an event
    #[error("subscriber '{subscriber}' failed: {reason}")]
    SubscriberFailed { subscriber: String, reason: String },

    /// A downstream channel was closed while events were still flowing
    #[error("{channel} channel closed")]
    ChannelClosed { channel: &'static str },

    /// A bounded downstream queue is full; the event was dropped
    #[error("{channel} queue is full")]
    ChannelFull { channel: &'static str },

    /// NATS publish failed for a specific subject
    #[error("NATS publish failed for subject '{subject}'")]
    NatsPublishFailed {
        subject: String,
        #[source]
        source: BoxError,
    },

    /// NATS connection failed
    #[error("NATS connection failed")]
    NatsConnectionFailed(#[source] BoxError),

    /// Event serialization failed
    #[error("event serialization failed for {event_type} on shard {shard_id}")]
    SerializationFailed {
        event_type: String,
        shard_id: u64,
        #[source]
        source: serde_json::Error,
    },

    /// Prometheus recorder could not be installed
    #[error("metrics recorder installation failed: {0}")]
    MetricsInstall(String),
}

impl GatewayError {
    /// Returns a static label string suitable for Prometheus metrics.
    ///
    /// Used as the `error_type` label on `gateway_errors_total` counter,
    /// enabling per-error-type monitoring and alerting.
    pub fn error_type_label(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::ShardIdOverflow { .. } => "shard_overflow",
            Self::ShardStartFailed(_) => "shard_start",
            Self::ShardCircuitBroken { .. } => "circuit_broken",
            Self::ShardReconnectFailed { .. } => "reconnect_failed",
            Self::PresenceUpdateFailed { .. } => "presence_update",
            Self::SubscriberFailed { .. } => "subscriber",
            Self::ChannelClosed { .. } => "channel_closed",
            Self::ChannelFull { .. } => "channel_full",
            Self::NatsPublishFailed { .. } => "nats_publish",
            Self::NatsConnectionFailed(_) => "nats_connection",
            Self::SerializationFailed { .. } => "serialization",
            Self::MetricsInstall(_) => "metrics_install",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_error() -> BoxError {
        Box::new(std::io::Error::new(std::io::ErrorKind::Other, "test"))
    }

    #[test]
    fn every_variant_has_distinct_error_type_label() {
        let labels = [
            GatewayError::Config("test".to_string()).error_type_label(),
            GatewayError::ShardIdOverflow { value: u64::MAX }.error_type_label(),
            GatewayError::ShardStartFailed(test_error()).error_type_label(),
            GatewayError::ShardCircuitBroken { shard_id: 0, count: 10, max: 10 }
                .error_type_label(),
            GatewayError::ShardReconnectFailed {
                shard_id: 0,
                source: test_error(),
            }
            .error_type_label(),
            GatewayError::PresenceUpdateFailed {
                shard_id: 0,
                source: test_error(),
            }
            .error_type_label(),
            GatewayError::SubscriberFailed {
                subscriber: "audit".to_string(),
                reason: "boom".to_string(),
            }
            .error_type_label(),
            GatewayError::ChannelClosed { channel: "nats" }.error_type_label(),
            GatewayError::ChannelFull { channel: "nats" }.error_type_label(),
            GatewayError::NatsPublishFailed {
                subject: "test".to_string(),
                source: test_error(),
            }
            .error_type_label(),
            GatewayError::NatsConnectionFailed(test_error()).error_type_label(),
            GatewayError::SerializationFailed {
                event_type: "test".to_string(),
                shard_id: 0,
                source: serde_json::from_str::<()>("invalid").unwrap_err(),
            }
            .error_type_label(),
            GatewayError::MetricsInstall("test".to_string()).error_type_label(),
        ];

        let mut unique = labels.to_vec();
        unique.sort();
        unique.dedup();
        assert_eq!(labels.len(), unique.len(), "Duplicate error_type_label found");
    }

    #[test]
    fn error_messages_contain_context() {
        let err = GatewayError::ShardCircuitBroken {
            shard_id: 3,
            count: 10,
            max: 10,
        };
        let msg = err.to_string();
        assert!(msg.contains("shard 3"), "message should contain shard_id");
        assert!(msg.contains("10/10"), "message should contain count/max");

        let err = GatewayError::SubscriberFailed {
            subscriber: "audit-log".to_string(),
            reason: "disk full".to_string(),
        };
        assert_eq!(err.to_string(), "subscriber 'audit-log' failed: disk full");

        let err = GatewayError::ShardIdOverflow { value: u64::MAX };
        assert!(err.to_string().contains(&u64::MAX.to_string()));
    }

    #[test]
    fn config_error_preserves_message() {
        let err = GatewayError::Config("DISCORD_TOKEN must be set".to_string());
        assert_eq!(
            err.to_string(),
            "configuration error: DISCORD_TOKEN must be set"
        );
    }
}
