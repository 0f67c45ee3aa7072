// src/main.rs
//! Agent Run Engine daemon
//!
//! Loads configuration, registers the configured agents, and drives runs
//! until Ctrl-C. With `storage.persist` set, state survives restarts.

use agent_run_engine::observability::{init_metrics, init_tracing};
use agent_run_engine::{AgentRegistry, Engine, EngineConfig};
use anyhow::{Context, Result};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = EngineConfig::load().context("Failed to load configuration")?;

    // Initialize observability (tracing, metrics)
    init_tracing(&config.observability)?;
    init_metrics(&config.observability)?;

    info!("Starting Agent Run Engine v{}", agent_run_engine::VERSION);
    info!("Configuration loaded: {:?}", config.runtime);

    let registry = AgentRegistry::from_configs(&config.agents).context("Failed to register agents")?;
    if registry.is_empty() {
        warn!("No agents configured; submitted runs will be rejected");
    }
    for entry in registry.list() {
        info!(
            "Agent {} ready: {} {}",
            entry.id, entry.descriptor.name, entry.descriptor.version
        );
    }

    let engine = Engine::open(config, registry).await;
    engine.start();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to install CTRL+C signal handler")?;
    info!("Received shutdown signal, cleaning up...");

    engine.shutdown().await?;
    info!("Engine stopped gracefully");
    Ok(())
}
