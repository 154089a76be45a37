//! Common types for the environment abstraction.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which backend family owns a target.
///
/// The engine carries this end-to-end and only uses it once, to pick the
/// backend that serves the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetKind {
    /// A member of a VM scale set, addressed as `<scaleSet>_<vmId>`
    ScaleSetMember,

    /// A standalone VM instance
    Instance,

    /// A remote agent reached over a persistent connection
    AgentConnection,
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TargetKind::ScaleSetMember => "scale-set-member",
            TargetKind::Instance => "instance",
            TargetKind::AgentConnection => "agent-connection",
        };
        f.write_str(name)
    }
}

/// Opaque reference to the remote resource an action is applied to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetRef {
    /// Backend-specific identifier (instance name, interface, endpoint)
    pub id: String,

    /// Backend family that owns the target
    pub kind: TargetKind,
}

impl TargetRef {
    /// Creates a target reference.
    pub fn new(id: impl Into<String>, kind: TargetKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }

    /// Shorthand for a scale-set member target.
    pub fn scale_set_member(id: impl Into<String>) -> Self {
        Self::new(id, TargetKind::ScaleSetMember)
    }

    /// Shorthand for a standalone instance target.
    pub fn instance(id: impl Into<String>) -> Self {
        Self::new(id, TargetKind::Instance)
    }

    /// Shorthand for an agent-connection target.
    pub fn agent(id: impl Into<String>) -> Self {
        Self::new(id, TargetKind::AgentConnection)
    }

    /// Splits a scale-set member id into `(scale_set, vm_id)`.
    ///
    /// Returns `None` when the id is not of the form `<scaleSet>_<vmId>`
    /// or either half is empty.
    pub fn scale_set_parts(&self) -> Option<(&str, &str)> {
        let (scale_set, vm_id) = self.id.split_once('_')?;
        if scale_set.is_empty() || vm_id.is_empty() {
            return None;
        }
        Some((scale_set, vm_id))
    }
}

impl std::fmt::Display for TargetRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Unique identifier for one experiment run.
///
/// Uses UUID v4 for global uniqueness without coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Creates a new random RunId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a deterministic RunId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 8 chars for readability
        write!(f, "{}", &self.0.to_string()[..8])
    }
}
