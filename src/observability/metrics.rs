//! Prometheus metrics for retention runs.
//!
//! Provides counters for:
//! - Rows removed and rows declined by removal guards
//! - Skipped runs (lock contention) and failed runs
//! - Backlog rounds and how chains ended

#[cfg(feature = "prometheus")]
use std::sync::OnceLock;

#[cfg(feature = "prometheus")]
use metrics::counter;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::MetricsConfig;

/// Global Prometheus handle.
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the metrics system and start the scrape listener.
///
/// Must be called from within a tokio runtime.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let listen: std::net::SocketAddr = config
        .listen
        .parse()
        .map_err(|e| MetricsError::Setup(format!("Invalid listen address '{}': {}", config.listen, e)))?;

    let (recorder, exporter) = PrometheusBuilder::new()
        .with_http_listener(listen)
        .build()
        .map_err(MetricsError::Install)?;
    let handle = recorder.handle();

    metrics::set_global_recorder(recorder)
        .map_err(|_| MetricsError::Setup("Metrics already initialized".to_string()))?;
    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::Setup("Metrics already initialized".to_string()))?;

    tokio::spawn(async move {
        if let Err(e) = exporter.await {
            tracing::error!(error = ?e, "Prometheus exporter stopped");
        }
    });

    tracing::info!(listen = %listen, "Prometheus metrics enabled");
    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if config.enabled {
        tracing::warn!(
            "Metrics are enabled in config but the 'prometheus' feature is not compiled. \
            Rebuild with: cargo build --features prometheus"
        );
    }
    Ok(())
}

/// Get the Prometheus handle for rendering metrics.
#[cfg(feature = "prometheus")]
pub fn get_prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record rows removed by one cleanup run.
pub fn record_retention_removed(table: &str, strategy: &str, count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "retention_rows_removed_total",
            "table" => table.to_string(),
            "strategy" => strategy.to_string()
        )
        .increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (table, strategy, count);
    }
}

/// Record rows a removal guard declined.
pub fn record_retention_refused(table: &str, count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("retention_rows_refused_total", "table" => table.to_string()).increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (table, count);
    }
}

/// Record a cleanup run skipped because its lock was held.
pub fn record_retention_skip(table: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "retention_skips_total",
            "table" => table.to_string(),
            "reason" => "locked"
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = table;
    }
}

/// Record a failed cleanup run.
pub fn record_retention_error(table: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("retention_errors_total", "table" => table.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = table;
    }
}

/// Record the rounds of a finished backlog chain.
pub fn record_backlog_chain(rounds: u64, outcome: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "retention_backlog_rounds_total",
            "outcome" => outcome.to_string()
        )
        .increment(rounds);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (rounds, outcome);
    }
}

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_metrics_is_noop() {
        let config = MetricsConfig {
            enabled: false,
            listen: "not an address".to_string(),
        };
        assert!(init_metrics(&config).is_ok());
    }

    #[cfg(feature = "prometheus")]
    #[test]
    fn test_invalid_listen_address() {
        let config = MetricsConfig {
            enabled: true,
            listen: "not an address".to_string(),
        };
        assert!(matches!(init_metrics(&config), Err(MetricsError::Setup(_))));
    }

    #[test]
    fn test_recording_without_recorder_is_harmless() {
        record_retention_removed("events", "destroy", 3);
        record_retention_refused("events", 1);
        record_retention_skip("events");
        record_retention_error("events");
        record_backlog_chain(2, "drained");
    }
}
