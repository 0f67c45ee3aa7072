// src/utils/mod.rs
//! Common utilities shared by every engine component
//!
//! - **errors**: the crate-wide [`EngineError`](errors::EngineError) and `Result` alias
//! - **config**: layered [`EngineConfig`](config::EngineConfig) loading

pub mod config;
pub mod errors;

pub use config::EngineConfig;
pub use errors::{EngineError, Result};
