//! NATS JetStream publisher
//!
//! Owns the broker connection and maps event types onto subjects.

use crate::error::GatewayError;
use crate::events::serialize::{GatewayEvent, BOT_READY_EVENT};
use async_nats::jetstream::stream::{Config, RetentionPolicy, StorageType};
use async_nats::jetstream::{self, Context as JsContext};
use async_nats::Client;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Stream names
pub mod streams {
    /// Slash command interactions
    pub const COMMANDS: &str = "COMMANDS";
    /// Guild, member and lifecycle events
    pub const EVENTS: &str = "EVENTS";
}

/// Subject prefixes for routing
pub mod subjects {
    pub const COMMANDS: &str = "commands";
    pub const GUILD_EVENTS: &str = "events.guild";
    pub const MEMBER_EVENTS: &str = "events.member";
    pub const LIFECYCLE_EVENTS: &str = "events.lifecycle";
}

/// Map an event type to its subject
pub fn route_subject(event_type: &str) -> String {
    match event_type {
        "interaction.create" => format!("{}.interaction", subjects::COMMANDS),

        "guild.join" => format!("{}.join", subjects::GUILD_EVENTS),
        "guild.leave" => format!("{}.leave", subjects::GUILD_EVENTS),
        "guild.update" => format!("{}.update", subjects::GUILD_EVENTS),

        "member.join" => format!("{}.join", subjects::MEMBER_EVENTS),
        "member.leave" => format!("{}.leave", subjects::MEMBER_EVENTS),
        "member.update" => format!("{}.update", subjects::MEMBER_EVENTS),

        BOT_READY_EVENT => format!("{}.ready", subjects::LIFECYCLE_EVENTS),

        other => format!("events.{}", other.replace('.', "_")),
    }
}

pub struct NatsPublisher {
    client: Client,
    jetstream: JsContext,
    connected: AtomicBool,
    messages_published: AtomicU64,
    publish_failures: AtomicU64,
}

impl NatsPublisher {
    pub async fn connect(servers: &str) -> Result<Arc<Self>, GatewayError> {
        info!(servers, "Connecting to NATS");

        let client = async_nats::connect(servers)
            .await
            .map_err(|e| GatewayError::NatsConnectionFailed(Box::new(e)))?;

        let jetstream = jetstream::new(client.clone());

        info!("Connected to NATS JetStream");

        Ok(Arc::new(Self {
            client,
            jetstream,
            connected: AtomicBool::new(true),
            messages_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
        }))
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn messages_published(&self) -> u64 {
        self.messages_published.load(Ordering::Relaxed)
    }

    pub fn publish_failures(&self) -> u64 {
        self.publish_failures.load(Ordering::Relaxed)
    }

    /// Publish one event and wait for the JetStream ack
    pub async fn publish_event(&self, event: &GatewayEvent) -> Result<(), GatewayError> {
        let subject = route_subject(&event.event_type);
        let payload = serde_json::to_vec(event).map_err(|source| GatewayError::SerializationFailed {
            event_type: event.event_type.clone(),
            shard_id: event.shard_id,
            source,
        })?;

        debug!(
            event_type = %event.event_type,
            subject,
            event_id = %event.event_id,
            "Publishing event"
        );

        let ack = match self.jetstream.publish(subject.clone(), payload.into()).await {
            Ok(pending) => pending.await,
            Err(e) => Err(e),
        };

        match ack {
            Ok(ack) => {
                self.messages_published.fetch_add(1, Ordering::Relaxed);
                debug!(subject, stream = %ack.stream, seq = ack.sequence, "Event published");
                Ok(())
            }
            Err(e) => {
                self.publish_failures.fetch_add(1, Ordering::Relaxed);
                warn!(subject, error = %e, "Failed to publish event");
                Err(GatewayError::NatsPublishFailed {
                    subject,
                    source: Box::new(e),
                })
            }
        }
    }

    /// Create the COMMANDS and EVENTS streams if they do not exist
    pub async fn ensure_streams(&self) -> Result<(), GatewayError> {
        // Commands are acted on immediately; events may wait for slower consumers
        let configs = [
            (streams::COMMANDS, "commands.>", Duration::from_secs(60)),
            (streams::EVENTS, "events.>", Duration::from_secs(300)),
        ];

        for (name, subject, max_age) in configs {
            let config = Config {
                name: name.to_string(),
                subjects: vec![subject.to_string()],
                retention: RetentionPolicy::Limits,
                max_age,
                storage: StorageType::Memory,
                ..Default::default()
            };

            if let Err(e) = self.jetstream.get_or_create_stream(config).await {
                error!(stream = name, error = %e, "Failed to create stream");
                return Err(GatewayError::NatsConnectionFailed(Box::new(e)));
            }
            debug!(stream = name, "Stream ready");
        }

        info!("NATS streams configured");
        Ok(())
    }

    /// Flush buffered publishes and mark the publisher disconnected
    pub async fn close(&self) {
        info!("Closing NATS connection");
        if let Err(e) = self.client.flush().await {
            warn!(error = %e, "Failed to flush NATS connection");
        }
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interactions_route_to_commands() {
        assert_eq!(route_subject("interaction.create"), "commands.interaction");
    }

    #[test]
    fn guild_and_member_events_route_to_events() {
        assert_eq!(route_subject("guild.join"), "events.guild.join");
        assert_eq!(route_subject("member.update"), "events.member.update");
    }

    #[test]
    fn ready_notification_routes_to_lifecycle_subject() {
        assert_eq!(route_subject(BOT_READY_EVENT), "events.lifecycle.ready");
    }

    #[test]
    fn unknown_events_are_flattened_under_events() {
        assert_eq!(route_subject("channel.pins.update"), "events.channel_pins_update");
    }
}
