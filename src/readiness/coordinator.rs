//! Shard readiness coordination
//!
//! Combines two independent signals into one "fully ready" notification:
//!
//! - host ready: the surrounding process finished its own bootstrap
//! - shards ready: every expected shard delivered its first `Ready`
//!
//! Both signals arrive on arbitrary threads. All state lives behind one
//! mutex and the combined check runs in the same critical section as the
//! mutation, so exactly one caller observes the transition. Side effects of
//! the transition (presence, bus publish, listener removal) run after the
//! lock is released.

use crate::events::{BusEvent, EventBus, ReadySummary};
use crate::metrics::GatewayMetrics;
use crate::readiness::presence::PresenceController;
use crate::shard::{ConnectionSet, ShardEvent, ShardListener, SubscriptionToken};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};
use twilight_model::gateway::event::Event;

/// Number of shards that must report ready
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedCount {
    Fixed(u32),
    /// Resolved from [`ConnectionSet::shard_count`] once the set knows it
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessPhase {
    Init,
    AwaitingSignals,
    /// Terminal
    FullyReady,
}

/// What a single signal did to the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// This call completed the combined transition
    Fired,
    /// State changed, still waiting on the other signal(s)
    Deferred,
    /// Duplicate, late or out-of-range signal; nothing changed
    Ignored,
}

/// Point-in-time copy of the coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReadinessSnapshot {
    /// `None` while automatic sizing has not resolved
    pub expected: Option<u32>,
    pub ready: u32,
    pub host_ready: bool,
    pub phase: ReadinessPhase,
}

struct ReadinessState {
    expected: ExpectedCount,
    resolved: Option<u32>,
    ready: HashSet<u32>,
    host_ready: bool,
    phase: ReadinessPhase,
    subscription: Option<SubscriptionToken>,
}

/// Work left to do after the lock is released
struct Completion {
    shards_ready: u32,
    subscription: Option<SubscriptionToken>,
}

impl ReadinessState {
    fn new(expected: ExpectedCount) -> Self {
        let resolved = match expected {
            ExpectedCount::Fixed(count) => Some(count),
            ExpectedCount::Auto => None,
        };

        Self {
            expected,
            resolved,
            ready: HashSet::new(),
            host_ready: false,
            phase: ReadinessPhase::Init,
            subscription: None,
        }
    }

    fn ready_count(&self) -> u32 {
        u32::try_from(self.ready.len()).unwrap_or(u32::MAX)
    }

    /// Resolve an `Auto` count; a resolved count never changes
    ///
    /// Automatic sizing runs shards `0..count`. Ids counted before resolution
    /// that fall outside that range are dropped.
    fn resolve(&mut self, connections: &dyn ConnectionSet) {
        if self.resolved.is_some() {
            return;
        }

        let Some(count) = connections.shard_count() else {
            return;
        };

        info!(expected = count, "Resolved automatic shard count");
        self.resolved = Some(count);

        let before = self.ready.len();
        self.ready.retain(|shard_id| *shard_id < count);
        if self.ready.len() != before {
            warn!(
                expected = count,
                dropped = before - self.ready.len(),
                "Ignoring ready shards outside the resolved shard range"
            );
        }
    }

    /// Whether `shard_id` can belong to the resolved automatic range
    fn in_auto_range(&self, shard_id: u32) -> bool {
        match (self.expected, self.resolved) {
            (ExpectedCount::Auto, Some(count)) => shard_id < count,
            _ => true,
        }
    }

    /// Combined check-and-act; the caller holds the state lock
    fn try_complete(&mut self) -> Option<Completion> {
        if self.phase == ReadinessPhase::FullyReady {
            return None;
        }

        let ready = self.ready_count();
        let shards_ready = self.resolved == Some(ready);

        if self.host_ready && shards_ready {
            self.phase = ReadinessPhase::FullyReady;
            return Some(Completion {
                shards_ready: ready,
                subscription: self.subscription.take(),
            });
        }

        self.phase = ReadinessPhase::AwaitingSignals;
        if !self.host_ready {
            debug!(ready, expected = ?self.resolved, "Deferring ready event: host is not ready");
        }
        if !shards_ready {
            debug!(
                ready,
                expected = ?self.resolved,
                host_ready = self.host_ready,
                "Deferring ready event: shards are not ready"
            );
        }
        None
    }

    fn snapshot(&self) -> ReadinessSnapshot {
        ReadinessSnapshot {
            expected: self.resolved,
            ready: self.ready_count(),
            host_ready: self.host_ready,
            phase: self.phase,
        }
    }
}

/// Fires [`BusEvent::FullyReady`] exactly once
pub struct ShardReadinessCoordinator {
    connections: Arc<dyn ConnectionSet>,
    bus: EventBus,
    presence: PresenceController,
    metrics: Arc<GatewayMetrics>,
    state: Mutex<ReadinessState>,
}

impl ShardReadinessCoordinator {
    /// Create a coordinator and register its shard-ready listener on `connections`
    pub fn attach(
        connections: Arc<dyn ConnectionSet>,
        expected: ExpectedCount,
        bus: EventBus,
        presence: PresenceController,
        metrics: Arc<GatewayMetrics>,
    ) -> Arc<Self> {
        let coordinator = Arc::new(Self {
            connections,
            bus,
            presence,
            metrics,
            state: Mutex::new(ReadinessState::new(expected)),
        });
        coordinator.metrics.set_fully_ready(false);

        let listener = Arc::new(ShardReadyListener {
            coordinator: Arc::downgrade(&coordinator),
        });
        let token = coordinator.connections.add_listener(listener);

        // A signal may have completed the transition before the token was stored
        let already_ready = {
            let mut state = coordinator.state.lock();
            if state.phase == ReadinessPhase::FullyReady {
                true
            } else {
                state.subscription = Some(token);
                false
            }
        };
        if already_ready {
            coordinator.connections.remove_listener(token);
        }

        info!(?expected, ?token, "Shard readiness coordinator attached");
        coordinator
    }

    /// A shard completed its handshake
    ///
    /// Each shard id counts once; redelivery is ignored.
    pub fn on_connection_ready(&self, shard_id: u32) -> Transition {
        let completion = {
            let mut state = self.state.lock();

            if state.phase == ReadinessPhase::FullyReady {
                debug!(shard_id, "Shard ready after full readiness, ignoring");
                return Transition::Ignored;
            }

            state.resolve(self.connections.as_ref());

            if state.ready.contains(&shard_id) {
                debug!(shard_id, "Shard already counted ready");
                return Transition::Ignored;
            }

            if !state.in_auto_range(shard_id) {
                warn!(shard_id, expected = ?state.resolved, "Ready signal outside resolved shard range, ignoring");
                return Transition::Ignored;
            }

            if let Some(expected) = state.resolved {
                if state.ready_count() >= expected {
                    warn!(shard_id, expected, "Ready signal beyond expected shard count, ignoring");
                    return Transition::Ignored;
                }
            }

            state.ready.insert(shard_id);
            match state.resolved {
                Some(expected) => info!(shard_id, "{}/{} shards ready", state.ready_count(), expected),
                None => info!(shard_id, ready = state.ready_count(), "Shard ready, shard count not yet known"),
            }

            state.try_complete()
        };

        self.finish(completion)
    }

    /// The host process finished bootstrapping
    pub fn on_host_ready(&self) -> Transition {
        let completion = {
            let mut state = self.state.lock();

            if state.host_ready {
                debug!("Host ready already recorded");
                return Transition::Ignored;
            }

            state.host_ready = true;
            state.resolve(self.connections.as_ref());
            debug!(ready = state.ready_count(), expected = ?state.resolved, "Host application is ready");

            state.try_complete()
        };

        self.finish(completion)
    }

    pub fn snapshot(&self) -> ReadinessSnapshot {
        self.state.lock().snapshot()
    }

    pub fn phase(&self) -> ReadinessPhase {
        self.state.lock().phase
    }

    /// True from the moment the combined transition is claimed
    ///
    /// The phase flips under the state lock; presence, the
    /// [`BusEvent::FullyReady`] publish and listener removal follow on the
    /// firing thread. A reader may see `true` shortly before the notification
    /// reaches subscribers, never the reverse: subscribers always observe
    /// `true`.
    pub fn is_fully_ready(&self) -> bool {
        self.phase() == ReadinessPhase::FullyReady
    }

    /// The configured (not resolved) expected count
    pub fn expected(&self) -> ExpectedCount {
        self.state.lock().expected
    }

    fn finish(&self, completion: Option<Completion>) -> Transition {
        let Some(completion) = completion else {
            return Transition::Deferred;
        };

        info!(shards_ready = completion.shards_ready, "All shards ready and host ready, bot is online");
        self.metrics.set_fully_ready(true);

        self.presence.announce_ready();

        let report = self.bus.publish(&BusEvent::FullyReady(ReadySummary {
            shards_ready: completion.shards_ready,
        }));
        debug!(
            delivered = report.delivered,
            failed = report.failed,
            "Published ready notification"
        );

        if let Some(token) = completion.subscription {
            if !self.connections.remove_listener(token) {
                debug!(?token, "Shard ready listener was already removed");
            }
        }

        Transition::Fired
    }
}

/// Per-connection listener feeding `Ready` events to the coordinator
struct ShardReadyListener {
    coordinator: Weak<ShardReadinessCoordinator>,
}

impl ShardListener for ShardReadyListener {
    fn on_event(&self, event: &Arc<ShardEvent>) {
        let Event::Ready(ready) = &event.event else {
            return;
        };

        info!(shard_id = event.shard_id, user = %ready.user.name, "Shard has logged in");

        if let Some(coordinator) = self.coordinator.upgrade() {
            coordinator.on_connection_ready(event.shard_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::shard::{ListenerRegistry, PresenceUpdate};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use twilight_model::gateway::presence::Status;

    #[derive(Default)]
    struct FakeConnections {
        listeners: ListenerRegistry,
        shard_count: Mutex<Option<u32>>,
        presence: Mutex<Vec<PresenceUpdate>>,
        removals: AtomicUsize,
    }

    impl ConnectionSet for FakeConnections {
        fn shard_count(&self) -> Option<u32> {
            *self.shard_count.lock()
        }

        fn add_listener(&self, listener: Arc<dyn ShardListener>) -> SubscriptionToken {
            self.listeners.add(listener)
        }

        fn remove_listener(&self, token: SubscriptionToken) -> bool {
            self.removals.fetch_add(1, Ordering::SeqCst);
            self.listeners.remove(token)
        }

        fn set_presence(&self, presence: &PresenceUpdate) -> Result<(), GatewayError> {
            self.presence.lock().push(presence.clone());
            Ok(())
        }
    }

    struct Harness {
        connections: Arc<FakeConnections>,
        coordinator: Arc<ShardReadinessCoordinator>,
        notifications: Arc<Mutex<Vec<ReadySummary>>>,
    }

    fn harness(expected: ExpectedCount, shard_count: Option<u32>) -> Harness {
        let connections = Arc::new(FakeConnections::default());
        *connections.shard_count.lock() = shard_count;

        let metrics = Arc::new(GatewayMetrics::detached());
        let bus = EventBus::new(Arc::clone(&metrics));
        let notifications = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&notifications);
        bus.subscribe("ready-recorder", move |event: &BusEvent| {
            if let BusEvent::FullyReady(summary) = event {
                sink.lock().push(*summary);
            }
            Ok(())
        });

        let presence = PresenceController::new(connections.clone(), "Starting up...");
        let coordinator =
            ShardReadinessCoordinator::attach(connections.clone(), expected, bus, presence, metrics);

        Harness {
            connections,
            coordinator,
            notifications,
        }
    }

    #[test]
    fn fires_after_last_shard_when_host_ready_arrives_midway() {
        let h = harness(ExpectedCount::Fixed(3), Some(3));
        let (a, b, c) = (0, 1, 2);

        assert_eq!(h.coordinator.on_connection_ready(a), Transition::Deferred);
        assert_eq!(h.coordinator.on_host_ready(), Transition::Deferred);
        assert_eq!(h.coordinator.on_connection_ready(c), Transition::Deferred);
        assert!(h.notifications.lock().is_empty());

        assert_eq!(h.coordinator.on_connection_ready(b), Transition::Fired);
        assert_eq!(*h.notifications.lock(), vec![ReadySummary { shards_ready: 3 }]);
        assert!(h.coordinator.is_fully_ready());
    }

    #[test]
    fn fires_on_host_ready_when_shards_finished_first() {
        let h = harness(ExpectedCount::Fixed(2), Some(2));

        h.coordinator.on_connection_ready(0);
        h.coordinator.on_connection_ready(1);
        assert!(h.notifications.lock().is_empty());
        assert_eq!(h.coordinator.phase(), ReadinessPhase::AwaitingSignals);

        assert_eq!(h.coordinator.on_host_ready(), Transition::Fired);
        assert_eq!(h.notifications.lock().len(), 1);
    }

    #[test]
    fn repeated_signals_are_ignored() {
        let h = harness(ExpectedCount::Fixed(2), Some(2));

        assert_eq!(h.coordinator.on_connection_ready(0), Transition::Deferred);
        assert_eq!(h.coordinator.on_connection_ready(0), Transition::Ignored);
        assert_eq!(h.coordinator.on_host_ready(), Transition::Deferred);
        assert_eq!(h.coordinator.on_host_ready(), Transition::Ignored);

        let snapshot = h.coordinator.snapshot();
        assert_eq!(snapshot.ready, 1);
        assert!(snapshot.host_ready);
        assert!(h.notifications.lock().is_empty());

        assert_eq!(h.coordinator.on_connection_ready(1), Transition::Fired);
        assert_eq!(h.coordinator.on_connection_ready(1), Transition::Ignored);
        assert_eq!(h.coordinator.on_host_ready(), Transition::Ignored);
        assert_eq!(h.notifications.lock().len(), 1);
    }

    #[test]
    fn zero_expected_shards_fire_on_host_ready() {
        let h = harness(ExpectedCount::Fixed(0), Some(0));

        assert_eq!(h.coordinator.phase(), ReadinessPhase::Init);
        assert_eq!(h.coordinator.on_host_ready(), Transition::Fired);
        assert_eq!(*h.notifications.lock(), vec![ReadySummary { shards_ready: 0 }]);
    }

    #[test]
    fn shards_beyond_expected_count_are_not_counted() {
        let h = harness(ExpectedCount::Fixed(1), Some(5));

        assert_eq!(h.coordinator.on_connection_ready(4), Transition::Deferred);
        assert_eq!(h.coordinator.on_connection_ready(2), Transition::Ignored);
        assert_eq!(h.coordinator.snapshot().ready, 1);
    }

    #[test]
    fn auto_count_resolves_lazily() {
        let h = harness(ExpectedCount::Auto, None);

        assert_eq!(h.coordinator.on_host_ready(), Transition::Deferred);
        assert_eq!(h.coordinator.snapshot().expected, None);

        // Recommended count arrives once the pool has built its shards
        *h.connections.shard_count.lock() = Some(2);
        assert_eq!(h.coordinator.on_connection_ready(0), Transition::Deferred);
        assert_eq!(h.coordinator.snapshot().expected, Some(2));

        // Resolution is sticky
        *h.connections.shard_count.lock() = Some(7);
        assert_eq!(h.coordinator.on_connection_ready(1), Transition::Fired);
        assert_eq!(h.coordinator.snapshot().expected, Some(2));
        assert_eq!(h.coordinator.expected(), ExpectedCount::Auto);
    }

    #[test]
    fn auto_count_resolving_to_zero_does_not_wait_for_shards() {
        let h = harness(ExpectedCount::Auto, Some(0));

        assert_eq!(h.coordinator.on_host_ready(), Transition::Fired);
        assert_eq!(h.notifications.lock().len(), 1);
    }

    #[test]
    fn ready_shards_outside_resolved_auto_range_are_dropped() {
        let h = harness(ExpectedCount::Auto, None);

        for shard_id in 0..3 {
            assert_eq!(h.coordinator.on_connection_ready(shard_id), Transition::Deferred);
        }
        assert_eq!(h.coordinator.snapshot().ready, 3);

        *h.connections.shard_count.lock() = Some(2);
        assert_eq!(h.coordinator.on_host_ready(), Transition::Fired);

        assert_eq!(*h.notifications.lock(), vec![ReadySummary { shards_ready: 2 }]);
        let snapshot = h.coordinator.snapshot();
        assert_eq!(snapshot.expected, Some(2));
        assert_eq!(snapshot.ready, 2);
    }

    #[test]
    fn shard_outside_resolved_auto_range_is_ignored() {
        let h = harness(ExpectedCount::Auto, Some(2));

        assert_eq!(h.coordinator.on_connection_ready(5), Transition::Ignored);
        assert_eq!(h.coordinator.on_connection_ready(1), Transition::Deferred);
        assert_eq!(h.coordinator.snapshot().ready, 1);
    }

    #[test]
    fn fully_ready_gauge_is_zero_until_transition() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let gauge = || {
            handle
                .render()
                .lines()
                .find_map(|line| line.strip_prefix("gateway_fully_ready "))
                .and_then(|value| value.trim().parse::<f64>().ok())
        };

        let h = ::metrics::with_local_recorder(&recorder, || harness(ExpectedCount::Fixed(0), Some(0)));
        assert_eq!(gauge(), Some(0.0));

        ::metrics::with_local_recorder(&recorder, || h.coordinator.on_host_ready());
        assert_eq!(gauge(), Some(1.0));
    }

    #[test]
    fn ready_subscribers_see_fully_ready_phase() {
        let h = harness(ExpectedCount::Fixed(0), Some(0));
        let coordinator = Arc::downgrade(&h.coordinator);
        let observed = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&observed);
        h.coordinator.bus.subscribe("phase-observer", move |event: &BusEvent| {
            if let BusEvent::FullyReady(_) = event {
                *sink.lock() = coordinator.upgrade().map(|c| c.is_fully_ready());
            }
            Ok(())
        });

        h.coordinator.on_host_ready();

        assert_eq!(*observed.lock(), Some(true));
    }

    #[test]
    fn transition_sets_presence_online_and_removes_listener_once() {
        let h = harness(ExpectedCount::Fixed(1), Some(1));
        assert_eq!(h.connections.listeners.len(), 1);

        h.coordinator.on_host_ready();
        h.coordinator.on_connection_ready(0);

        assert!(h.connections.listeners.is_empty());
        assert_eq!(h.connections.removals.load(Ordering::SeqCst), 1);

        let presence = h.connections.presence.lock();
        assert_eq!(presence.len(), 1);
        assert_eq!(presence[0].status, Status::Online);
        assert!(presence[0].activity.is_none());
        drop(presence);

        // Later signals never reach the listener logic again
        h.coordinator.on_connection_ready(0);
        assert_eq!(h.connections.removals.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_ready_subscriber_does_not_block_transition() {
        let h = harness(ExpectedCount::Fixed(0), Some(0));
        h.coordinator.bus.subscribe("broken", |_: &BusEvent| panic!("subscriber bug"));

        assert_eq!(h.coordinator.on_host_ready(), Transition::Fired);
        assert_eq!(h.notifications.lock().len(), 1);
        assert!(h.connections.listeners.is_empty());
    }

    #[test]
    fn coordinator_instances_are_independent() {
        let first = harness(ExpectedCount::Fixed(0), Some(0));
        let second = harness(ExpectedCount::Fixed(0), Some(0));

        first.coordinator.on_host_ready();

        assert!(first.coordinator.is_fully_ready());
        assert!(!second.coordinator.is_fully_ready());
    }
}
