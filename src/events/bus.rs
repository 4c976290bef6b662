//! In-process event bus
//!
//! Synchronous fan-out to named subscribers. Every subscriber call is
//! isolated: an `Err` or a panic is logged and counted, and delivery moves on
//! to the next subscriber. Publishing never holds the subscriber lock while
//! calling out.

use crate::error::GatewayError;
use crate::metrics::GatewayMetrics;
use crate::shard::ShardEvent;
use parking_lot::RwLock;
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, trace, warn};

/// Payload of the one-time combined readiness notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReadySummary {
    pub shards_ready: u32,
}

/// Everything published on the bus
#[derive(Debug, Clone)]
pub enum BusEvent {
    /// An inbound gateway event relayed from a shard
    Gateway(Arc<ShardEvent>),
    /// Every shard and the host process are ready; published exactly once
    FullyReady(ReadySummary),
}

/// A bus consumer
pub trait Subscriber: Send + Sync {
    fn handle(&self, event: &BusEvent) -> Result<(), GatewayError>;
}

impl<F> Subscriber for F
where
    F: Fn(&BusEvent) -> Result<(), GatewayError> + Send + Sync,
{
    fn handle(&self, event: &BusEvent) -> Result<(), GatewayError> {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Outcome of a single publish call
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
}

struct Registration {
    id: SubscriberId,
    name: Arc<str>,
    subscriber: Arc<dyn Subscriber>,
}

struct BusInner {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<Registration>>,
    metrics: Arc<GatewayMetrics>,
}

/// Cloneable handle to a shared bus
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new(metrics: Arc<GatewayMetrics>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                next_id: AtomicU64::new(0),
                subscribers: RwLock::new(Vec::new()),
                metrics,
            }),
        }
    }

    /// Subscribe a closure
    pub fn subscribe<F>(&self, name: &str, handler: F) -> SubscriberId
    where
        F: Fn(&BusEvent) -> Result<(), GatewayError> + Send + Sync + 'static,
    {
        self.subscribe_arc(name, Arc::new(handler))
    }

    pub fn subscribe_arc(&self, name: &str, subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.subscribers.write().push(Registration {
            id,
            name: Arc::from(name),
            subscriber,
        });
        id
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.inner.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|registration| registration.id != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Deliver `event` to every current subscriber, isolating failures
    pub fn publish(&self, event: &BusEvent) -> PublishReport {
        let snapshot: Vec<(Arc<str>, Arc<dyn Subscriber>)> = self
            .inner
            .subscribers
            .read()
            .iter()
            .map(|registration| (Arc::clone(&registration.name), Arc::clone(&registration.subscriber)))
            .collect();

        let mut report = PublishReport::default();

        for (name, subscriber) in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| subscriber.handle(event))) {
                Ok(Ok(())) => {
                    trace!(subscriber = %name, "Delivered bus event");
                    report.delivered += 1;
                }
                Ok(Err(e)) => {
                    report.failed += 1;
                    self.inner.metrics.record_subscriber_failure(&name);
                    warn!(
                        subscriber = %name,
                        error = %e,
                        error_type = e.error_type_label(),
                        "Subscriber failed to handle event"
                    );
                }
                Err(payload) => {
                    report.failed += 1;
                    self.inner.metrics.record_subscriber_failure(&name);
                    let err = GatewayError::SubscriberFailed {
                        subscriber: name.to_string(),
                        reason: panic_message(payload.as_ref()),
                    };
                    error!(subscriber = %name, error = %err, "Subscriber panicked while handling event");
                }
            }
        }

        report
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
