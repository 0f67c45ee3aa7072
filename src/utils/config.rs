// src/utils/config.rs
//! Layered engine configuration
//!
//! Sources, lowest precedence first:
//!
//! 1. Built-in defaults ([`EngineConfig::default`])
//! 2. Optional config file (`$RUN_ENGINE_CONFIG`, else `run-engine.toml`)
//! 3. Environment variables, e.g. `RUN_ENGINE__RUNTIME__NUM_WORKERS=8`

use crate::agents::AgentConfig;
use crate::utils::errors::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Environment prefix for configuration overrides
pub const ENV_PREFIX: &str = "RUN_ENGINE";

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "RUN_ENGINE_CONFIG";

const DEFAULT_CONFIG_FILE: &str = "run-engine.toml";

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub runtime: RuntimeConfig,
    pub storage: StorageConfig,
    pub observability: ObservabilityConfig,
    pub agents: Vec<AgentConfig>,
}

/// Worker pool and streaming settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of worker tasks draining the admission queue (default: 5)
    pub num_workers: usize,

    /// Dequeues allowed per run before it fails permanently (default: 3)
    pub max_attempts: u32,

    /// Per-item wait in `join` before a heartbeat is emitted (default: 10s)
    pub join_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            num_workers: 5,
            max_attempts: 3,
            join_timeout_ms: 10_000,
        }
    }
}

impl RuntimeConfig {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

/// Snapshot persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Load on start, snapshot periodically and on shutdown
    pub persist: bool,

    /// Snapshot file path
    pub path: PathBuf,

    /// Seconds between periodic snapshots (0 = shutdown only)
    pub snapshot_interval_secs: u64,

    /// Include thread records in snapshots
    pub persist_threads: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            persist: false,
            path: PathBuf::from("run_engine_storage.json.zst"),
            snapshot_interval_secs: 30,
            persist_threads: false,
        }
    }
}

/// Logging and metrics settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,

    /// Emit JSON log lines
    pub json_logs: bool,

    /// Prometheus listener address (e.g. "0.0.0.0:9000")
    pub metrics_addr: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_addr: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(&path)
    }

    /// Load configuration using an explicit file path
    pub fn load_from(path: &str) -> Result<Self> {
        debug!("Loading configuration from {} and environment", path);

        let defaults = Config::try_from(&EngineConfig::default())?;

        let config = Config::builder()
            .add_source(defaults)
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let loaded: EngineConfig = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.runtime.num_workers == 0 {
            return Err(crate::EngineError::Config(
                "runtime.num_workers must be at least 1".to_string(),
            ));
        }
        if self.runtime.max_attempts == 0 {
            return Err(crate::EngineError::Config(
                "runtime.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.runtime.join_timeout_ms == 0 {
            return Err(crate::EngineError::Config(
                "runtime.join_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
