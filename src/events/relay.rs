//! Gateway → event bus relay

use crate::events::bus::{BusEvent, EventBus};
use crate::metrics::GatewayMetrics;
use crate::shard::{ConnectionSet, ShardEvent, ShardListener, SubscriptionToken};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Forwards every inbound shard event to the [`EventBus`]
///
/// Runs on the shard task that received the event. There is no queue: the
/// event is published before `on_event` returns, so per-shard order is the
/// arrival order.
pub struct EventRelay {
    bus: EventBus,
    metrics: Arc<GatewayMetrics>,
}

impl EventRelay {
    pub fn new(bus: EventBus, metrics: Arc<GatewayMetrics>) -> Self {
        Self { bus, metrics }
    }

    /// Register a relay on `connections` when `enabled`
    ///
    /// A disabled relay is never registered and costs nothing per event.
    pub fn install(
        connections: &dyn ConnectionSet,
        bus: &EventBus,
        enabled: bool,
        metrics: Arc<GatewayMetrics>,
    ) -> Option<SubscriptionToken> {
        if !enabled {
            info!("Event relay disabled");
            return None;
        }

        let token = connections.add_listener(Arc::new(Self::new(bus.clone(), metrics)));
        info!(?token, "Relaying gateway events to the event bus");
        Some(token)
    }
}

impl ShardListener for EventRelay {
    fn on_event(&self, event: &Arc<ShardEvent>) {
        trace!(
            shard_id = event.shard_id,
            sequence = event.sequence,
            kind = ?event.event.kind(),
            "Relaying event"
        );

        let report = self.bus.publish(&BusEvent::Gateway(Arc::clone(event)));
        self.metrics.record_event_relayed(event.shard_id);

        if report.failed > 0 {
            debug!(
                shard_id = event.shard_id,
                sequence = event.sequence,
                delivered = report.delivered,
                failed = report.failed,
                "Relayed event with subscriber failures"
            );
        }
    }
}
