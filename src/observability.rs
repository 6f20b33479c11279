//! Logging and metrics bootstrap for the host process.

use metrics_exporter_prometheus::PrometheusBuilder;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::ManagerConfig;

#[derive(Debug, Error)]
pub enum ObservabilityError {
    #[error("failed to initialize logging: {0}")]
    LoggingInitFailed(String),

    #[error("failed to initialize metrics: {0}")]
    MetricsInitFailed(String),
}

/// Initialize the global tracing subscriber from the configured filter.
pub fn init_logging(cfg: &ManagerConfig) -> Result<(), ObservabilityError> {
    let filter = EnvFilter::try_new(&cfg.log_level)
        .map_err(|e| ObservabilityError::LoggingInitFailed(e.to_string()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| ObservabilityError::LoggingInitFailed(e.to_string()))?;

    Ok(())
}

/// Install the Prometheus metrics exporter when an address is configured.
///
/// Must run inside a tokio runtime; the exporter serves `/metrics` on the
/// configured address.
pub fn init_metrics(cfg: &ManagerConfig) -> Result<(), ObservabilityError> {
    let Some(addr) = cfg.prometheus_addr else {
        return Ok(());
    };

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| ObservabilityError::MetricsInitFailed(e.to_string()))?;

    info!("Prometheus metrics exporter listening on {}", addr);
    Ok(())
}
