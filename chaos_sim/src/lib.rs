//! Chaos Deterministic Simulation Harness
//!
//! Runs the engine end to end against simulated targets, with every source
//! of non-determinism under control:
//! - **Time**: tokio's paused clock, advanced only when every task is idle
//! - **Targets**: an in-process agent and an in-memory cloud control plane
//! - **Randomness**: all jitter and failure draws come from a single 64-bit seed
//!
//! # Usage
//!
//! ```ignore
//! use chaos_sim::{ScenarioRunner, ScenarioId};
//!
//! let result = ScenarioRunner::new(42).with_duration(120).run(ScenarioId::DiskLoss);
//! assert!(result.passed);
//! ```

pub mod agent;
pub mod cloud;
mod context;
mod exporter;
pub mod probes;
mod runner;
pub mod scenarios;

pub use agent::{AgentBehavior, SimAgent};
pub use cloud::{CloudBehavior, SimControlPlane};
pub use context::{sim_runtime, SimContext};
pub use exporter::ReportExport;
pub use probes::SimHealthProbe;
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use scenarios::{Expectation, ScenarioId};
