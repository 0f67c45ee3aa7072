// src/utils/errors.rs
//! Engine error types
//!
//! Every fallible operation in the crate returns [`Result`]. Variants fall
//! into four groups:
//!
//! | Group | Variants | Retried |
//! |-------|----------|---------|
//! | Caller | `RunNotFound`, `AgentNotFound`, `ThreadNotFound`, `InvalidStatus`, `InvalidInput`, `DuplicatedThread`, `PendingRun`, `ThreadsNotSupported` | No |
//! | Agent | `Agent`, `InvalidFormat` (from output validation) | Up to the attempts ceiling |
//! | Outcome | `AttemptsExceeded`, `Timeout` | No |
//! | Infrastructure | `Storage`, `Serialization`, `Compression`, `Config` | No |

use thiserror::Error;

/// Result alias used throughout the engine
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Run {0} not found")]
    RunNotFound(String),

    #[error("Agent \"{0}\" not found")]
    AgentNotFound(String),

    #[error("Thread {0} not found")]
    ThreadNotFound(String),

    #[error("Run {run_id} is {actual}, expected {expected}")]
    InvalidStatus {
        run_id: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    InvalidFormat(String),

    #[error("Thread with ID {0} already exists")]
    DuplicatedThread(String),

    #[error("Thread with ID {0} has pending runs")]
    PendingRun(String),

    #[error("This agent does not support threads")]
    ThreadsNotSupported,

    #[error("{0}")]
    Agent(String),

    #[error("Run {0} exceeded its retry attempts")]
    AttemptsExceeded(String),

    #[error("Timeout reached while waiting for run {0}")]
    Timeout(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Errors caused by the request itself; surfaced synchronously, never retried.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            EngineError::RunNotFound(_)
                | EngineError::AgentNotFound(_)
                | EngineError::ThreadNotFound(_)
                | EngineError::InvalidStatus { .. }
                | EngineError::InvalidInput(_)
                | EngineError::InvalidFormat(_)
                | EngineError::DuplicatedThread(_)
                | EngineError::PendingRun(_)
                | EngineError::ThreadsNotSupported
        )
    }

    /// Shorthand for an agent-side failure carrying the error text.
    pub fn agent(message: impl Into<String>) -> Self {
        EngineError::Agent(message.into())
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_error_classification() {
        assert!(EngineError::RunNotFound("r1".into()).is_caller_error());
        assert!(EngineError::ThreadsNotSupported.is_caller_error());
        assert!(!EngineError::agent("boom").is_caller_error());
        assert!(!EngineError::Timeout("r1".into()).is_caller_error());
        assert!(!EngineError::AttemptsExceeded("r1".into()).is_caller_error());
    }

    #[test]
    fn test_error_messages() {
        let err = EngineError::InvalidStatus {
            run_id: "r1".into(),
            expected: "interrupted".into(),
            actual: "success".into(),
        };
        assert_eq!(err.to_string(), "Run r1 is success, expected interrupted");
        assert_eq!(EngineError::agent("boom").to_string(), "boom");
    }
}
