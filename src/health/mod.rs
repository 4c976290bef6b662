//! Health check endpoints
//!
//! `/health` is liveness, `/ready` reports the combined readiness transition,
//! `/metrics` renders Prometheus text.

use crate::metrics::GatewayMetrics;
use crate::nats::NatsPublisher;
use crate::readiness::{ReadinessPhase, ShardReadinessCoordinator};
use crate::shard::ShardState;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub pool_id: u64,
    pub shards_healthy: usize,
}

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub phase: ReadinessPhase,
    pub pool_id: u64,
    /// `None` until an automatic shard count resolves
    pub shards_expected: Option<u32>,
    pub shards_ready: u32,
    pub host_ready: bool,
    pub nats_connected: bool,
    pub guilds_total: u64,
}

#[derive(Clone)]
pub struct AppState {
    pub shard_state: ShardState,
    pub readiness: Arc<ShardReadinessCoordinator>,
    pub nats: Option<Arc<NatsPublisher>>,
    pub metrics: Arc<GatewayMetrics>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Always 200 while the process runs; `degraded` until every shard is ready
/// or resuming
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let status = if state.shard_state.is_healthy() {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        pool_id: state.shard_state.pool_id(),
        shards_healthy: state.shard_state.healthy_shards(),
    })
}

/// 200 once fully ready (and NATS is up, when configured), 503 otherwise
async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    let nats_connected = state.nats.as_ref().map_or(true, |n| n.is_connected());
    let response = ready_response(&state, nats_connected);

    if response.ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

fn ready_response(state: &AppState, nats_connected: bool) -> ReadyResponse {
    let snapshot = state.readiness.snapshot();

    ReadyResponse {
        ready: snapshot.phase == ReadinessPhase::FullyReady && nats_connected,
        phase: snapshot.phase,
        pool_id: state.shard_state.pool_id(),
        shards_expected: snapshot.expected,
        shards_ready: snapshot.ready,
        host_ready: snapshot.host_ready,
        nats_connected,
        guilds_total: state.shard_state.total_guilds(),
    }
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.set_shards_ready(
        state.shard_state.pool_id(),
        state.shard_state.ready_shards(),
    );

    if let Some(ref nats) = state.nats {
        state.metrics.set_nats_connected(nats.is_connected());
    }

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::events::EventBus;
    use crate::readiness::{ExpectedCount, PresenceController};
    use crate::shard::{
        ConnectionSet, ListenerRegistry, PresenceUpdate, ShardListener, SubscriptionToken,
    };

    #[derive(Default)]
    struct NoShards {
        listeners: ListenerRegistry,
    }

    impl ConnectionSet for NoShards {
        fn shard_count(&self) -> Option<u32> {
            Some(0)
        }

        fn add_listener(&self, listener: Arc<dyn ShardListener>) -> SubscriptionToken {
            self.listeners.add(listener)
        }

        fn remove_listener(&self, token: SubscriptionToken) -> bool {
            self.listeners.remove(token)
        }

        fn set_presence(&self, _presence: &PresenceUpdate) -> Result<(), GatewayError> {
            Ok(())
        }
    }

    fn app_state() -> AppState {
        let metrics = Arc::new(GatewayMetrics::detached());
        let connections = Arc::new(NoShards::default());
        let readiness = ShardReadinessCoordinator::attach(
            connections.clone(),
            ExpectedCount::Fixed(0),
            EventBus::new(Arc::clone(&metrics)),
            PresenceController::new(connections, "Starting up..."),
            Arc::clone(&metrics),
        );

        AppState {
            shard_state: ShardState::new(0, std::iter::empty()),
            readiness,
            nats: None,
            metrics,
        }
    }

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "healthy",
            version: "0.3.0",
            pool_id: 0,
            shards_healthy: 0,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("healthy"));
    }

    #[test]
    fn not_ready_until_host_signals() {
        let state = app_state();

        let response = ready_response(&state, true);
        assert!(!response.ready);
        assert!(!response.host_ready);

        state.readiness.on_host_ready();

        let response = ready_response(&state, true);
        assert!(response.ready);
        assert_eq!(response.shards_expected, Some(0));

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["phase"], "fully_ready");
    }

    #[test]
    fn disconnected_nats_blocks_readiness() {
        let state = app_state();
        state.readiness.on_host_ready();

        assert!(!ready_response(&state, false).ready);
    }
}
