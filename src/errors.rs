//! Error types for the resilog toolkit.
//!
//! Every failure surfaced by a public API is one of these variants. Each
//! variant belongs to exactly one [`ErrorKind`], which callers can use to
//! decide whether a failure is retryable without matching on individual
//! variants.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad failure categories used for retry/propagation decisions.
///
/// - `Validation` and `State` errors fail fast and are never retried.
/// - `Timeout` errors are retried where the owning component defines a
///   retry policy, otherwise surfaced.
/// - `Capacity` errors are recoverable conditions the caller decides how
///   to handle.
/// - `Transport` errors are logged and only propagate when they abort the
///   in-flight operation tied to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Timeout,
    Capacity,
    State,
    Transport,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{0} acquisition timeout")]
    AcquisitionTimeout(&'static str),
    #[error("Operation timeout")]
    OperationTimeout,
    #[error("Log operation timeout")]
    LogOperationTimeout,
    #[error("Initialization timeout")]
    InitializationTimeout,

    #[error("Rate limit exceeded")]
    RateLimitExceeded,
    #[error("Buffer full and flush failed")]
    BufferFull,
    #[error("Entry too large even after eviction: {size} bytes (max total: {max_total})")]
    EntryTooLarge { size: usize, max_total: usize },
    #[error("Batch size too large: {size} bytes (max: {max})")]
    BatchTooLarge { size: usize, max: usize },

    #[error("{0} has been disposed")]
    Disposed(&'static str),
    #[error("Circuit breaker is OPEN")]
    CircuitOpen,
    #[error("Invalid lock release attempt")]
    InvalidRelease,
    #[error("Mutex is not locked")]
    NotLocked,
    #[error("Worker manager not initialized")]
    NotInitialized,

    #[error("Worker error: {0}")]
    Worker(String),
    #[error("Transport error: {0}")]
    Transport(String),
}

impl Error {
    /// The taxonomy category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::AcquisitionTimeout(_)
            | Error::OperationTimeout
            | Error::LogOperationTimeout
            | Error::InitializationTimeout => ErrorKind::Timeout,
            Error::RateLimitExceeded
            | Error::BufferFull
            | Error::EntryTooLarge { .. }
            | Error::BatchTooLarge { .. } => ErrorKind::Capacity,
            Error::Disposed(_)
            | Error::CircuitOpen
            | Error::InvalidRelease
            | Error::NotLocked
            | Error::NotInitialized => ErrorKind::State,
            Error::Worker(_) | Error::Transport(_) => ErrorKind::Transport,
        }
    }

    /// Whether a component-local retry policy may retry this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Timeout | ErrorKind::Transport)
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Validation(format!("JSON serialization error: {error}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_cover_the_taxonomy() {
        assert_eq!(Error::Validation("x".into()).kind(), ErrorKind::Validation);
        assert_eq!(Error::OperationTimeout.kind(), ErrorKind::Timeout);
        assert_eq!(Error::RateLimitExceeded.kind(), ErrorKind::Capacity);
        assert_eq!(Error::Disposed("Mutex").kind(), ErrorKind::State);
        assert_eq!(Error::Transport("boom".into()).kind(), ErrorKind::Transport);
    }

    #[test]
    fn retryability_follows_kind() {
        assert!(Error::OperationTimeout.is_retryable());
        assert!(Error::Worker("died".into()).is_retryable());
        assert!(!Error::CircuitOpen.is_retryable());
        assert!(!Error::Validation("bad".into()).is_retryable());
        assert!(!Error::BufferFull.is_retryable());
    }

    #[test]
    fn disposed_messages_name_the_component() {
        assert_eq!(
            Error::Disposed("Circuit breaker").to_string(),
            "Circuit breaker has been disposed"
        );
        assert_eq!(
            Error::AcquisitionTimeout("Mutex").to_string(),
            "Mutex acquisition timeout"
        );
    }
}
