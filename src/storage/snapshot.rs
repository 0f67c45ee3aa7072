// src/storage/snapshot.rs
//! Best-effort snapshot persistence for the run store
//!
//! ```text
//! MemoryRunStore → Snapshot (serde_json) → zstd → tmp file → rename
//! ```
//!
//! Loading never fails the engine: a missing or unreadable file yields an
//! empty store and a log line.

use crate::model::{Run, RunInfo, Thread};
use crate::storage::run_store::{MemoryRunStore, RunStore};
use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, info};

/// zstd level used for snapshots
const COMPRESSION_LEVEL: i32 = 3;

/// Serialisable image of the store tables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub runs: Vec<Run>,
    pub run_infos: Vec<RunInfo>,
    pub outputs: Vec<(String, Value)>,
    #[serde(default)]
    pub threads: Vec<Thread>,
}

impl Snapshot {
    /// Capture the current contents of a store
    pub fn capture(store: &dyn RunStore, include_threads: bool) -> Self {
        Self {
            runs: store.list_runs(),
            run_infos: store.list_run_infos(),
            outputs: store.list_outputs(),
            threads: if include_threads {
                store.list_threads()
            } else {
                Vec::new()
            },
        }
    }

    pub fn into_store(self) -> MemoryRunStore {
        MemoryRunStore::from_parts(self.runs, self.run_infos, self.outputs, self.threads)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let compressed = zstd::encode_all(json.as_slice(), COMPRESSION_LEVEL)
            .map_err(|e| EngineError::Compression(format!("Compression error: {}", e)))?;

        debug!("Compressed snapshot {} bytes -> {} bytes", json.len(), compressed.len());
        Ok(compressed)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let json = zstd::decode_all(data)
            .map_err(|e| EngineError::Compression(format!("Decompression error: {}", e)))?;
        Ok(serde_json::from_slice(&json)?)
    }
}

/// Reads and writes snapshots at a fixed path
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    path: PathBuf,
    include_threads: bool,
}

impl SnapshotWriter {
    pub fn new(path: impl Into<PathBuf>, include_threads: bool) -> Self {
        Self {
            path: path.into(),
            include_threads,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the store's current contents atomically
    pub async fn save(&self, store: &dyn RunStore) -> Result<()> {
        let snapshot = Snapshot::capture(store, self.include_threads);
        let encoded = snapshot.encode()?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &encoded).await?;
        fs::rename(&tmp, &self.path).await?;

        info!(
            "Snapshot saved to {:?} ({} runs, {} bytes)",
            self.path,
            snapshot.runs.len(),
            encoded.len()
        );
        Ok(())
    }

    /// Load the last snapshot; any failure yields an empty store
    pub async fn load(&self) -> MemoryRunStore {
        let data = match fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No existing snapshot found at {:?}", self.path);
                return MemoryRunStore::new();
            }
            Err(e) => {
                error!("Failed to read snapshot {:?}: {}", self.path, e);
                return MemoryRunStore::new();
            }
        };

        match Snapshot::decode(&data) {
            Ok(snapshot) => {
                info!(
                    "Snapshot loaded from {:?}: {} runs, {} threads",
                    self.path,
                    snapshot.runs.len(),
                    snapshot.threads.len()
                );
                snapshot.into_store()
            }
            Err(e) => {
                error!("Failed to load snapshot {:?}: {}", self.path, e);
                MemoryRunStore::new()
            }
        }
    }
}
