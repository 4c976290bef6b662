//! Event serialization for message broker
//!
//! Converts bus events to JSON payloads for NATS publishing.

use crate::events::bus::{BusEvent, ReadySummary};
use crate::shard::ShardEvent;
use serde::Serialize;
use twilight_model::gateway::event::Event;
use uuid::Uuid;

/// Event type of the one-time readiness notification
pub const BOT_READY_EVENT: &str = "bot.ready";

/// Generic gateway event payload
#[derive(Debug, Clone, Serialize)]
pub struct GatewayEvent {
    pub event_id: String,
    pub event_type: String,
    pub shard_id: u64,
    pub timestamp: u64,
    pub guild_id: Option<String>,
    pub channel_id: Option<String>,
    pub user_id: Option<String>,
    pub data: serde_json::Value,
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Serialize any bus event; `None` for events that are not forwarded
pub fn serialize_bus_event(event: &BusEvent) -> Option<GatewayEvent> {
    match event {
        BusEvent::Gateway(shard_event) => serialize_event(shard_event),
        BusEvent::FullyReady(summary) => Some(lifecycle_event(summary)),
    }
}

/// Serialize a relayed shard event to a GatewayEvent payload
///
/// Returns None for events we don't need to forward (e.g., heartbeats)
pub fn serialize_event(shard_event: &ShardEvent) -> Option<GatewayEvent> {
    let timestamp = now_millis();
    let shard_id = u64::from(shard_event.shard_id);

    match &shard_event.event {
        Event::GuildCreate(guild) => Some(GatewayEvent {
            event_id: Uuid::new_v4().to_string(),
            event_type: "guild.join".to_string(),
            shard_id,
            timestamp,
            guild_id: Some(guild.id().to_string()),
            channel_id: None,
            user_id: None,
            data: serde_json::json!({
                "id": guild.id().to_string(),
            }),
        }),

        Event::GuildDelete(guild) => Some(GatewayEvent {
            event_id: Uuid::new_v4().to_string(),
            event_type: "guild.leave".to_string(),
            shard_id,
            timestamp,
            guild_id: Some(guild.id.to_string()),
            channel_id: None,
            user_id: None,
            data: serde_json::json!({
                "unavailable": guild.unavailable,
            }),
        }),

        Event::MemberAdd(member) => Some(GatewayEvent {
            event_id: Uuid::new_v4().to_string(),
            event_type: "member.join".to_string(),
            shard_id,
            timestamp,
            guild_id: Some(member.guild_id.to_string()),
            channel_id: None,
            user_id: Some(member.user.id.to_string()),
            data: serde_json::json!({
                "username": member.user.name,
                "discriminator": member.user.discriminator,
            }),
        }),

        Event::MemberRemove(member) => Some(GatewayEvent {
            event_id: Uuid::new_v4().to_string(),
            event_type: "member.leave".to_string(),
            shard_id,
            timestamp,
            guild_id: Some(member.guild_id.to_string()),
            channel_id: None,
            user_id: Some(member.user.id.to_string()),
            data: serde_json::Value::Null,
        }),

        Event::MemberUpdate(member) => Some(GatewayEvent {
            event_id: Uuid::new_v4().to_string(),
            event_type: "member.update".to_string(),
            shard_id,
            timestamp,
            guild_id: Some(member.guild_id.to_string()),
            channel_id: None,
            user_id: Some(member.user.id.to_string()),
            data: serde_json::json!({
                "roles": member.roles.iter().map(|r| r.to_string()).collect::<Vec<_>>(),
                "nick": member.nick,
            }),
        }),

        Event::InteractionCreate(interaction) => Some(GatewayEvent {
            event_id: Uuid::new_v4().to_string(),
            event_type: "interaction.create".to_string(),
            shard_id,
            timestamp,
            guild_id: interaction.guild_id.map(|id| id.to_string()),
            channel_id: interaction.channel.as_ref().map(|c| c.id.to_string()),
            user_id: interaction.author_id().map(|id| id.to_string()),
            data: serde_json::json!({
                "interaction_id": interaction.id.to_string(),
                "interaction_type": format!("{:?}", interaction.kind),
                "interaction_token": interaction.token,
            }),
        }),

        // Gateway plumbing and shard lifecycle stay inside the process;
        // readiness is published once as `bot.ready` instead
        _ => None,
    }
}

/// Serialize the combined readiness notification
///
/// Lifecycle events are not shard-scoped; `shard_id` is 0.
pub fn lifecycle_event(summary: &ReadySummary) -> GatewayEvent {
    GatewayEvent {
        event_id: Uuid::new_v4().to_string(),
        event_type: BOT_READY_EVENT.to_string(),
        shard_id: 0,
        timestamp: now_millis(),
        guild_id: None,
        channel_id: None,
        user_id: None,
        data: serde_json::json!({
            "shards_ready": summary.shards_ready,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn shard_event(event: Event) -> ShardEvent {
        ShardEvent {
            shard_id: 3,
            sequence: 1,
            event,
        }
    }

    #[test]
    fn test_serialize_returns_none_for_heartbeat() {
        assert!(serialize_event(&shard_event(Event::GatewayHeartbeatAck)).is_none());
        assert!(serialize_event(&shard_event(Event::Resumed)).is_none());
        assert!(serialize_event(&shard_event(Event::GatewayReconnect)).is_none());
    }

    #[test]
    fn lifecycle_event_has_required_envelope() {
        let event = lifecycle_event(&ReadySummary { shards_ready: 4 });
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event_type"], "bot.ready");
        assert_eq!(json["data"]["shards_ready"], 4);
        assert!(json["guild_id"].is_null());
        assert!(Uuid::parse_str(json["event_id"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn bus_events_dispatch_to_the_right_serializer() {
        let ready = BusEvent::FullyReady(ReadySummary { shards_ready: 1 });
        assert_eq!(serialize_bus_event(&ready).unwrap().event_type, BOT_READY_EVENT);

        let heartbeat = BusEvent::Gateway(Arc::new(shard_event(Event::GatewayHeartbeatAck)));
        assert!(serialize_bus_event(&heartbeat).is_none());
    }
}
