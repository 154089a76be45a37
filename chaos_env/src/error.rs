//! Error types for the environment abstraction.

use thiserror::Error;

/// Errors raised by the environment and by remote transports.
///
/// These are the "action could not be sent/received at all" failures.
/// Explicit negative feedback from a backend is never an `EnvError`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    /// Send or receive failed (link closed, HTTP failure, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Target could not be reached at all
    #[error("Target unreachable: {0}")]
    TargetUnreachable(String),

    /// Frame or payload serialization/deserialization failed
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The request was refused before anything was sent
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl EnvError {
    /// Creates a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::NetworkError(msg.into())
    }

    /// Creates an unreachable error.
    pub fn unreachable(target: impl std::fmt::Display) -> Self {
        Self::TargetUnreachable(target.to_string())
    }

    /// Creates a serialization error.
    pub fn serialization(err: impl std::fmt::Display) -> Self {
        Self::SerializationError(err.to_string())
    }

    /// Creates a rejection error.
    pub fn rejected(msg: impl std::fmt::Display) -> Self {
        Self::Rejected(msg.to_string())
    }

    /// Creates a timeout error for the given bound.
    pub fn timeout(after: std::time::Duration) -> Self {
        Self::Timeout(after.as_millis() as u64)
    }

    /// Returns true for timeouts.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
