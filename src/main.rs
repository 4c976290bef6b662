//! Botcore Gateway - Rust Discord Gateway using Twilight
//!
//! This process:
//! - Manages a pool of shards (fixed slice or Discord-recommended count)
//! - Shows an "idle, starting up" presence until every shard and the host are ready
//! - Relays gateway events onto an in-process bus and forwards them to NATS JetStream
//! - Exposes health/ready endpoints and Prometheus metrics

use anyhow::Result;
use botcore_gateway::config::GatewayConfig;
use botcore_gateway::events::{EventBus, EventRelay};
use botcore_gateway::health::{self, AppState};
use botcore_gateway::metrics::GatewayMetrics;
use botcore_gateway::nats::{NatsForwarder, NatsPublisher};
use botcore_gateway::readiness::{PresenceController, ShardReadinessCoordinator};
use botcore_gateway::shard::{ConnectionSet, ShardPool};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

const FORWARDER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first to get log level
    let gateway_config = GatewayConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("botcore_gateway={}", gateway_config.log_level).parse()?)
                .add_directive("twilight_gateway=info".parse()?)
                .add_directive("async_nats=warn".parse()?),
        )
        .json()
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pool_id = gateway_config.pool_id,
        shard_plan = ?gateway_config.shard_plan,
        event_relay = gateway_config.event_relay,
        "Starting Botcore Gateway"
    );

    let metrics = Arc::new(GatewayMetrics::install()?);
    info!("Prometheus metrics initialized");

    let bus = EventBus::new(Arc::clone(&metrics));

    // NATS is optional; without it the bus only serves in-process subscribers
    let nats = match gateway_config.nats_url {
        Some(ref url) => match NatsPublisher::connect(url).await {
            Ok(publisher) => {
                metrics.set_nats_connected(true);
                if let Err(e) = publisher.ensure_streams().await {
                    warn!(error = %e, "Could not configure NATS streams, publishing anyway");
                }
                Some(publisher)
            }
            Err(e) => {
                error!(error = %e, "Failed to connect to NATS - running in local mode");
                metrics.set_nats_connected(false);
                None
            }
        },
        None => {
            info!("No NATS_URL configured - running in local mode");
            None
        }
    };

    let forwarder = nats.as_ref().map(|publisher| {
        let (forwarder, handle) = NatsForwarder::spawn(
            Arc::clone(publisher),
            Arc::clone(&metrics),
            gateway_config.nats_queue_capacity,
        );
        (bus.subscribe_arc("nats", Arc::new(forwarder)), handle)
    });

    let intents = GatewayConfig::intents();
    info!(?intents, "Using Discord intents");

    let pool = Arc::new(ShardPool::new(
        gateway_config.pool_id,
        gateway_config.shard_plan,
        gateway_config.discord_token.clone(),
        intents,
        Arc::clone(&metrics),
    )?);
    let connections: Arc<dyn ConnectionSet> = pool.clone();

    // Everything that listens to shards is wired before the first shard connects
    let presence = PresenceController::new(Arc::clone(&connections), gateway_config.startup_activity.clone());
    presence.announce_starting();

    EventRelay::install(connections.as_ref(), &bus, gateway_config.event_relay, Arc::clone(&metrics));

    let readiness = ShardReadinessCoordinator::attach(
        Arc::clone(&connections),
        pool.expected_count(),
        bus.clone(),
        presence,
        Arc::clone(&metrics),
    );

    let app_state = AppState {
        shard_state: pool.state(),
        readiness: Arc::clone(&readiness),
        nats: nats.clone(),
        metrics: Arc::clone(&metrics),
    };

    let health_router = health::router(app_state);
    let addr: SocketAddr = ([0, 0, 0, 0], gateway_config.http_port).into();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(port = gateway_config.http_port, "HTTP server listening");

    // The host is up once its own surfaces are bound; shards may still be connecting
    readiness.on_host_ready();

    let http_server = axum::serve(listener, health_router);

    tokio::select! {
        result = Arc::clone(&pool).run() => {
            if let Err(e) = result {
                error!(error = %e, "Shard pool error");
            }
        }
        result = http_server => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    info!("Shutting down gateway...");
    pool.shutdown();

    // Unsubscribing drops the last queue sender; the task drains and exits
    if let Some((subscriber, handle)) = forwarder {
        bus.unsubscribe(subscriber);
        match tokio::time::timeout(FORWARDER_DRAIN_TIMEOUT, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "NATS forwarder task failed"),
            Err(_) => warn!("Timed out draining NATS forwarder"),
        }
    }

    if let Some(ref nats) = nats {
        nats.close().await;
    }

    info!("Gateway shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
