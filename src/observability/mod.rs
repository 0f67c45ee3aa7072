// src/observability/mod.rs
//! Tracing and metrics setup
//!
//! Metric names are exported as constants so the recording sites and any
//! dashboards agree. Without an installed recorder the `metrics` macros
//! are no-ops, which is what tests rely on.

use crate::utils::config::ObservabilityConfig;
use crate::utils::errors::{EngineError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

pub const RUNS_SUBMITTED: &str = "run_engine_runs_submitted_total";
/// Labelled by final `status`
pub const RUNS_FINISHED: &str = "run_engine_runs_finished_total";
pub const RUN_RETRIES: &str = "run_engine_run_retries_total";
pub const RUN_EXEC_SECONDS: &str = "run_engine_run_exec_seconds";
pub const RUN_QUEUE_SECONDS: &str = "run_engine_run_queue_seconds";
pub const ADMISSION_QUEUE_DEPTH: &str = "run_engine_admission_queue_depth";
pub const STREAM_SUBSCRIBERS: &str = "run_engine_stream_subscribers";

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| EngineError::Config(format!("Invalid log filter: {}", e)))?;

    let builder = fmt().with_env_filter(filter).with_target(true);
    let installed = if config.json_logs {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| EngineError::Config(format!("Failed to install tracing subscriber: {}", e)))
}

/// Install the Prometheus exporter when a listen address is configured
pub fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    let Some(addr) = &config.metrics_addr else {
        return Ok(());
    };

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| EngineError::Config(format!("Invalid metrics address {}: {}", addr, e)))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| EngineError::Config(format!("Failed to install metrics exporter: {}", e)))?;

    info!("Prometheus metrics listening on {}", addr);
    Ok(())
}
