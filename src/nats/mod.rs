//! NATS JetStream integration
//!
//! Bus events are serialized and published to JetStream streams.

mod forwarder;
mod publisher;

pub use forwarder::{NatsForwarder, DEFAULT_QUEUE_CAPACITY};
pub use publisher::{route_subject, streams, subjects, NatsPublisher};
