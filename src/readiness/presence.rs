//! Bot presence during startup

use crate::shard::{ConnectionSet, PresenceUpdate};
use std::sync::Arc;
use tracing::{debug, warn};

/// Shows "idle, starting up" while shards connect and "online" once ready
///
/// Presence is cosmetic: failures are logged and swallowed.
pub struct PresenceController {
    connections: Arc<dyn ConnectionSet>,
    startup_activity: String,
}

impl PresenceController {
    pub fn new(connections: Arc<dyn ConnectionSet>, startup_activity: impl Into<String>) -> Self {
        Self {
            connections,
            startup_activity: startup_activity.into(),
        }
    }

    /// Call once, before any shard connects
    pub fn announce_starting(&self) {
        self.apply(PresenceUpdate::starting(self.startup_activity.clone()), "starting");
    }

    /// Called by the readiness coordinator on the combined transition
    pub fn announce_ready(&self) {
        self.apply(PresenceUpdate::available(), "ready");
    }

    fn apply(&self, update: PresenceUpdate, phase: &'static str) {
        match self.connections.set_presence(&update) {
            Ok(()) => debug!(phase, status = ?update.status, activity = ?update.activity, "Presence updated"),
            Err(e) => warn!(phase, error = %e, "Failed to update presence"),
        }
    }
}
