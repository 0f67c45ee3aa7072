// src/storage/mod.rs
//! Run persistence
//!
//! - **Run Store**: keyed tables for runs, run statistics, outputs and threads
//! - **Snapshot**: best-effort zstd-compressed JSON image of the store
//!
//! The engine only talks to the [`RunStore`] trait; durability is the
//! snapshot writer's concern and invisible to workers.

pub mod run_store;
pub mod snapshot;

pub use run_store::{MemoryRunStore, RunStore};
pub use snapshot::{Snapshot, SnapshotWriter};
