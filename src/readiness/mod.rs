//! Startup readiness
//!
//! The gateway is "fully ready" once every expected shard has completed its
//! handshake and the host process has finished bootstrapping. The
//! coordinator publishes that transition once; the presence controller shows
//! it on Discord.

pub mod coordinator;
pub mod presence;

pub use coordinator::{
    ExpectedCount, ReadinessPhase, ReadinessSnapshot, ShardReadinessCoordinator, Transition,
};
pub use presence::PresenceController;
