//! Fault-injection scenarios for the simulator.

use chaos_core::Stage;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// SIM-001: Agent adds latency on an interface, status confirms it
    NetworkLatency,

    /// SIM-002: Agent drops packets, status lags behind the change
    NetworkLoss,

    /// SIM-003: Data disks detached and re-attached through the control plane
    DiskLoss,

    /// SIM-004: CPU stressor via run-command, with health probes
    CpuHog,

    /// SIM-005: HTTP latency toxic via run-command, with a continuous probe
    HttpLatency,

    // ═══════════════════════════════════════════════════
    // FAILURE SCENARIOS - the engine must abort cleanly
    // ═══════════════════════════════════════════════════

    /// SIM-006: Agent rejects the inject with a tool error
    AgentError,

    /// SIM-007: Detached disk never reports Unattached
    StuckDisk,

    /// SIM-008: Agent replies slower than the action timeout
    SlowAgent,

    /// SIM-009: Agent answers with a feedback token nobody knows
    GarbledFeedback,

    /// SIM-010: A third of the state observations fail
    FlakyObserver,
}

/// What a scenario must end with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    Completes,
    AbortsWhile(Stage),
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::NetworkLatency,
            ScenarioId::NetworkLoss,
            ScenarioId::DiskLoss,
            ScenarioId::CpuHog,
            ScenarioId::HttpLatency,
            // Failure scenarios
            ScenarioId::AgentError,
            ScenarioId::StuckDisk,
            ScenarioId::SlowAgent,
            ScenarioId::GarbledFeedback,
            ScenarioId::FlakyObserver,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::NetworkLatency => "network-latency",
            ScenarioId::NetworkLoss => "network-loss",
            ScenarioId::DiskLoss => "disk-loss",
            ScenarioId::CpuHog => "cpu-hog",
            ScenarioId::HttpLatency => "http-latency",
            ScenarioId::AgentError => "agent-error",
            ScenarioId::StuckDisk => "stuck-disk",
            ScenarioId::SlowAgent => "slow-agent",
            ScenarioId::GarbledFeedback => "garbled-feedback",
            ScenarioId::FlakyObserver => "flaky-observer",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::NetworkLatency => "2000ms latency on eth0 through the agent, every cycle converges",
            ScenarioId::NetworkLoss => "100% packet loss, status reports the change two checks late",
            ScenarioId::DiskLoss => "Detach/attach a scale-set member's data disks with slow operations",
            ScenarioId::CpuHog => "stress-ng --cpu 2 via RunShellScript, per-cycle health probe",
            ScenarioId::HttpLatency => "Proxy latency toxic on the downstream stream, continuous probe",
            ScenarioId::AgentError => "tc cannot find the device: inject fails, revert still sent",
            ScenarioId::StuckDisk => "Disk stays Detaching: convergence exhausts its attempts",
            ScenarioId::SlowAgent => "Agent takes 90s per reply against a 60s action timeout",
            ScenarioId::GarbledFeedback => "Agent replies ACTION_DONE: unrecognized feedback is fatal",
            ScenarioId::FlakyObserver => "30% of disk observations fail, convergence still succeeds",
        }
    }

    /// Returns how the experiment must end.
    pub fn expectation(&self) -> Expectation {
        match self {
            ScenarioId::AgentError | ScenarioId::SlowAgent | ScenarioId::GarbledFeedback => {
                Expectation::AbortsWhile(Stage::Injecting)
            }
            ScenarioId::StuckDisk => Expectation::AbortsWhile(Stage::Converging),
            _ => Expectation::Completes,
        }
    }

    /// Returns true if the engine is expected to abort.
    pub fn is_failure_scenario(&self) -> bool {
        matches!(self.expectation(), Expectation::AbortsWhile(_))
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "network-latency" | "sim-001" => Ok(ScenarioId::NetworkLatency),
            "network-loss" | "sim-002" => Ok(ScenarioId::NetworkLoss),
            "disk-loss" | "sim-003" => Ok(ScenarioId::DiskLoss),
            "cpu-hog" | "sim-004" => Ok(ScenarioId::CpuHog),
            "http-latency" | "sim-005" => Ok(ScenarioId::HttpLatency),
            "agent-error" | "sim-006" => Ok(ScenarioId::AgentError),
            "stuck-disk" | "sim-007" => Ok(ScenarioId::StuckDisk),
            "slow-agent" | "sim-008" => Ok(ScenarioId::SlowAgent),
            "garbled-feedback" | "sim-009" => Ok(ScenarioId::GarbledFeedback),
            "flaky-observer" | "sim-010" => Ok(ScenarioId::FlakyObserver),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
        }
        assert_eq!("stuck_disk".parse::<ScenarioId>(), Ok(ScenarioId::StuckDisk));
        assert!("split-brain".parse::<ScenarioId>().is_err());
    }
}
