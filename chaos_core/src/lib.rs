//! Chaos Core - Action Execution and Convergence Engine
//!
//! This library injects a fault into a remote target, verifies the target
//! reached the expected state, watches it with health probes, and reverts:
//! 1. **Dispatch**: one bounded remote call per action, over an agent link or a control plane
//! 2. **Interpretation**: feedback tokens parsed into a structured outcome
//! 3. **Convergence**: bounded-retry polling of the observed target state
//! 4. **Timeline**: ramp, repeated cycles and best-effort revert on abort

pub mod action;
pub mod agent_link;
pub mod catalog;
pub mod config;
pub mod control_plane;
pub mod convergence;
pub mod dispatch;
pub mod error;
pub mod feedback;
pub mod probe;
pub mod timeline;
pub mod ws_link;

// Re-export key types for convenience
pub use action::{ActionPhase, ChaosAction};
pub use agent_link::{AgentBackend, AgentLink, ChannelLink};
pub use catalog::FaultSpec;
pub use config::ExperimentConfig;
pub use control_plane::{ControlPlane, ControlPlaneBackend};
pub use convergence::{wait_for_convergence, ConvergencePolicy, StateObserver, StatePredicate};
pub use dispatch::{ActionBackend, ActionDispatcher, BackendRegistry, DispatchError};
pub use error::{ChaosError, Stage};
pub use feedback::{classify, interpret, ActionOutcome, RawResponse};
pub use probe::{Probe, ProbeHandle, ProbeMode, ProbeResult, ProbeRunner, ProbeVerdict};
pub use timeline::{ExperimentOutcome, ExperimentPlan, ExperimentReport, TimelineController};
pub use ws_link::WsLink;
