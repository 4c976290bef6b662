//! Bus subscriber that forwards serialized events to NATS
//!
//! Bus delivery is synchronous and runs on shard tasks, so the subscriber
//! only enqueues. A single background task drains the queue and publishes in
//! enqueue order, which keeps per-shard ordering on the broker.
//!
//! The queue is bounded. While the broker is slow or down, events beyond the
//! capacity are dropped and reported to the bus as [`GatewayError::ChannelFull`].

use crate::error::GatewayError;
use crate::events::{serialize_bus_event, BusEvent, GatewayEvent, Subscriber};
use crate::metrics::GatewayMetrics;
use crate::nats::publisher::NatsPublisher;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Events waiting for a JetStream ack before new ones are rejected
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

pub struct NatsForwarder {
    tx: mpsc::Sender<GatewayEvent>,
}

impl NatsForwarder {
    /// Spawn the publishing task; it ends once every forwarder is dropped
    ///
    /// `capacity` must be non-zero.
    pub fn spawn(
        publisher: Arc<NatsPublisher>,
        metrics: Arc<GatewayMetrics>,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<GatewayEvent>(capacity);

        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let start = Instant::now();
                match publisher.publish_event(&event).await {
                    Ok(()) => metrics.record_route_success(&event.event_type, start.elapsed()),
                    Err(e) => {
                        metrics.record_route_failure(&event.event_type);
                        warn!(
                            shard_id = event.shard_id,
                            event_type = %event.event_type,
                            error = %e,
                            "Failed to publish event to NATS"
                        );
                    }
                }
            }
            info!("NATS forwarder stopped");
        });

        (Self { tx }, handle)
    }

    #[cfg(test)]
    fn from_sender(tx: mpsc::Sender<GatewayEvent>) -> Self {
        Self { tx }
    }
}

impl Subscriber for NatsForwarder {
    fn handle(&self, event: &BusEvent) -> Result<(), GatewayError> {
        let Some(payload) = serialize_bus_event(event) else {
            return Ok(());
        };

        debug!(event_type = %payload.event_type, "Queueing event for NATS");
        self.tx.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => GatewayError::ChannelFull { channel: "nats forwarder" },
            TrySendError::Closed(_) => GatewayError::ChannelClosed { channel: "nats forwarder" },
        })
    }
}
