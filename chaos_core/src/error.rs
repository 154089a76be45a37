//! Error taxonomy for the engine.

use chaos_env::TargetRef;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Stage of the experiment timeline a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    RampingUp,
    Injecting,
    Converging,
    Probing,
    Reverting,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::RampingUp => "ramping-up",
            Stage::Injecting => "injecting",
            Stage::Converging => "converging",
            Stage::Probing => "probing",
            Stage::Reverting => "reverting",
        };
        f.write_str(name)
    }
}

/// Every way an experiment can fail.
///
/// Transport, timeout and fatal errors always name the target and the
/// attempted action kind so the abort reason is self-describing.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
pub enum ChaosError {
    /// The action could not be sent or its reply could not be received
    #[error("transport failure sending {action} to {target}: {message}")]
    Transport {
        target: TargetRef,
        action: String,
        message: String,
    },

    /// No reply within the per-call bound
    #[error("{action} on {target} timed out after {after:?}")]
    Timeout {
        target: TargetRef,
        action: String,
        after: Duration,
    },

    /// Explicit error feedback, malformed feedback, or unrecognized feedback
    #[error("{action} on {target} failed: {message}")]
    Fatal {
        target: TargetRef,
        action: String,
        message: String,
    },

    /// Observed state never matched the expected post-action state
    #[error(
        "{target} did not reach {expected} after {attempts} samples (last observed: {})",
        .last_observed.as_deref().unwrap_or("<none>")
    )]
    NotConverged {
        target: TargetRef,
        expected: String,
        attempts: u32,
        last_observed: Option<String>,
    },

    /// The caller-supplied probe policy asked to stop
    #[error("probe policy aborted the experiment: {0}")]
    ProbePolicy(String),

    /// Configuration values are unusable
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The action description is unusable
    #[error("invalid action: {0}")]
    InvalidAction(String),
}

impl ChaosError {
    /// Creates an invalid configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Creates an invalid action error.
    pub fn action(msg: impl Into<String>) -> Self {
        Self::InvalidAction(msg.into())
    }
}
