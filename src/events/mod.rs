//! Event handling module
//!
//! The in-process event bus, the relay that feeds it from the shards, and
//! serialization of bus events for the message broker.

pub mod bus;
pub mod relay;
pub mod serialize;

pub use bus::{BusEvent, EventBus, PublishReport, ReadySummary, Subscriber, SubscriberId};
pub use relay::EventRelay;
pub use serialize::{lifecycle_event, serialize_bus_event, serialize_event, GatewayEvent};
