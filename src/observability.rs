//! Observability module for warden.
//!
//! Provides logging initialization and the Prometheus metrics endpoint.

use crate::config::ObservabilityConfig;
use crate::error::{Result, WardenError};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize observability (logging and metrics).
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| WardenError::Internal(format!("Failed to init logging: {}", e)))?;
    } else {
        subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| WardenError::Internal(format!("Failed to init logging: {}", e)))?;
    }

    info!("Observability initialized");
    Ok(())
}

/// Run the Prometheus metrics server.
pub async fn run_metrics_server(config: ObservabilityConfig) -> Result<()> {
    let builder = PrometheusBuilder::new();

    let handle = builder
        .install_recorder()
        .map_err(|e| WardenError::Internal(format!("Failed to install metrics recorder: {}", e)))?;

    register_metrics();

    let app = axum::Router::new()
        .route(
            "/metrics",
            axum::routing::get(move || async move { handle.render() }),
        )
        .route("/health", axum::routing::get(|| async { "OK" }));

    let listener = TcpListener::bind(config.metrics_addr).await?;
    info!(addr = %config.metrics_addr, "Metrics server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| WardenError::Internal(e.to_string()))?;

    Ok(())
}

/// Register standard metrics.
fn register_metrics() {
    // Grant activity
    counter!("warden_locks_requested_total").absolute(0);
    counter!("warden_locks_awarded_total").absolute(0);
    counter!("warden_locks_rejected_total").absolute(0);
    counter!("warden_locks_released_total").absolute(0);

    // Monitor semantics
    counter!("warden_lock_waits_total").absolute(0);
    counter!("warden_lock_notifies_total").absolute(0);
    counter!("warden_lock_wait_timeouts_total").absolute(0);

    // Recovery and cleanup
    counter!("warden_locks_reestablished_total").absolute(0);
    counter!("warden_locks_cleared_total").absolute(0);
    counter!("warden_lock_hops_total").absolute(0);

    // Table size
    gauge!("warden_locks_active").set(0.0);
}

/// Update the active-lock gauge for one dispatch shard.
pub fn update_lock_gauge(shard: usize, active: usize) {
    gauge!("warden_locks_active", "shard" => shard.to_string()).set(active as f64);
}
