//! Action model - one inject or revert instruction for one target.

use chaos_env::TargetRef;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Which half of the fault an action performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ActionPhase {
    Inject,
    Revert,
}

impl std::fmt::Display for ActionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionPhase::Inject => f.write_str("inject"),
            ActionPhase::Revert => f.write_str("revert"),
        }
    }
}

/// A single fault-inducing or fault-reverting instruction.
///
/// Immutable once built: builder methods consume `self`. The engine never
/// interprets `kind` or `parameters`; they are handed to the backend as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChaosAction {
    kind: String,
    phase: ActionPhase,
    target: TargetRef,
    parameters: BTreeMap<String, String>,
    timeout: Duration,
}

impl ChaosAction {
    /// Creates an inject action with no parameters.
    pub fn inject(kind: impl Into<String>, target: TargetRef, timeout: Duration) -> Self {
        Self {
            kind: kind.into(),
            phase: ActionPhase::Inject,
            target,
            parameters: BTreeMap::new(),
            timeout,
        }
    }

    /// Adds one parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Adds a batch of parameters.
    pub fn with_params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.parameters
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Builds the symmetric revert action (same kind, target, parameters, timeout).
    pub fn to_revert(&self) -> Self {
        Self {
            phase: ActionPhase::Revert,
            ..self.clone()
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn phase(&self) -> ActionPhase {
        self.phase
    }

    pub fn target(&self) -> &TargetRef {
        &self.target
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    /// Looks up a single parameter.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Short label used in logs and error messages, e.g. `disk-loss/inject`.
    pub fn label(&self) -> String {
        format!("{}/{}", self.kind, self.phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revert_is_symmetric() {
        let inject = ChaosAction::inject("os-network-latency", TargetRef::agent("eth0"), Duration::from_secs(60))
            .with_param("NetworkLatency", "2000");
        let revert = inject.to_revert();

        assert_eq!(revert.phase(), ActionPhase::Revert);
        assert_eq!(revert.kind(), inject.kind());
        assert_eq!(revert.target(), inject.target());
        assert_eq!(revert.param("NetworkLatency"), Some("2000"));
        assert_eq!(revert.timeout(), inject.timeout());
        assert_eq!(revert.label(), "os-network-latency/revert");
    }
}
