//! Scenario runner - executes fault-injection scenarios against simulated targets.

use crate::agent::{AgentBehavior, AgentStats, SimAgent};
use crate::cloud::{CloudBehavior, SimControlPlane};
use crate::context::{sim_runtime, SimContext};
use crate::probes::SimHealthProbe;
use crate::scenarios::{Expectation, ScenarioId};

use chaos_core::agent_link::AgentBackend;
use chaos_core::catalog::{HttpFault, HttpToxic, NetworkFault};
use chaos_core::control_plane::ControlPlaneBackend;
use chaos_core::probe::ProbeHandle;
use chaos_core::timeline::ExperimentPlan;
use chaos_core::{BackendRegistry, ChaosError, ExperimentConfig, ExperimentOutcome, ExperimentReport, FaultSpec, TimelineController};
use chaos_env::{ChaosContext, RunId, TargetKind, TargetRef};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether the experiment ended the way the scenario expects
    pub passed: bool,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,

    /// Engine report, when the experiment ran at all
    pub report: Option<ExperimentReport>,
}

impl ScenarioResult {
    fn failed(scenario: ScenarioId, seed: u64, reason: String) -> Self {
        Self {
            scenario,
            seed,
            passed: false,
            failure_reason: Some(reason),
            metrics: ScenarioMetrics::default(),
            report: None,
        }
    }
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScenarioMetrics {
    pub cycles_completed: u32,
    pub inject_dispatches: u32,
    pub revert_dispatches: u32,

    /// Frames answered by the simulated agent
    pub agent_requests: u32,

    /// Operations submitted to the simulated control plane
    pub operations_submitted: u32,
    pub observations: u32,
    pub failed_observations: u32,
    pub probe_failures: u32,

    /// Virtual time the experiment took
    pub sim_time_secs: f64,
}

/// Backends and plan wired up for one scenario.
struct Harness {
    registry: BackendRegistry,
    plan: ExperimentPlan,
    agent_stats: Option<Arc<Mutex<AgentStats>>>,
    cloud: Option<Arc<SimControlPlane>>,
}

/// Runs fault-injection scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Experiment timing
    config: ExperimentConfig,

    /// Run-command script; a one-line launcher when unset
    script: Option<PathBuf>,
}

impl ScenarioRunner {
    /// Creates a new scenario runner with simulation-friendly timing.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            config: ExperimentConfig {
                chaos_duration: 60,
                chaos_interval: 20,
                status_check_timeout: 30,
                ..ExperimentConfig::default()
            },
            script: None,
        }
    }

    /// Sends the lines of `path` as the run-command script.
    pub fn with_script_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.script = Some(path.into());
        self
    }

    /// Replaces the whole experiment configuration.
    pub fn with_config(mut self, config: ExperimentConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the total chaos duration.
    pub fn with_duration(mut self, secs: u64) -> Self {
        self.config.chaos_duration = secs;
        self
    }

    /// Sets the chaos interval.
    pub fn with_interval(mut self, secs: u64) -> Self {
        self.config.chaos_interval = secs;
        self
    }

    /// Sets the ramp time.
    pub fn with_ramp(mut self, secs: u64) -> Self {
        self.config.ramp_time = secs;
        self
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        if scenario.is_failure_scenario() {
            warn!("Failure scenario - the engine is expected to abort");
        }

        match sim_runtime() {
            Ok(rt) => rt.block_on(self.run_async(scenario)),
            Err(e) => ScenarioResult::failed(scenario, self.seed, format!("could not start simulation runtime: {}", e)),
        }
    }

    async fn run_async(&self, scenario: ScenarioId) -> ScenarioResult {
        let ctx = SimContext::shared(self.seed);

        let harness = match self.setup(scenario, ctx.clone()) {
            Ok(harness) => harness,
            Err(e) => return ScenarioResult::failed(scenario, self.seed, format!("setup failed: {}", e)),
        };

        let mut controller = match TimelineController::new(ctx.clone(), Arc::new(harness.registry), &self.config) {
            Ok(controller) => controller.with_run_id(RunId::from_seed(self.seed)),
            Err(e) => return ScenarioResult::failed(scenario, self.seed, e.to_string()),
        };

        let report = controller.run(&harness.plan).await;
        debug!("{} finished in state {:?} at t={:?}", scenario.name(), report.final_state, ctx.now());

        let mut metrics = ScenarioMetrics {
            cycles_completed: report.cycles_completed,
            inject_dispatches: report.inject_dispatches,
            revert_dispatches: report.revert_dispatches,
            probe_failures: report.probe_failures().count() as u32,
            sim_time_secs: report.elapsed.as_secs_f64(),
            ..ScenarioMetrics::default()
        };
        if let Some(stats) = &harness.agent_stats {
            let stats = stats.lock().unwrap_or_else(|e| e.into_inner());
            metrics.agent_requests = stats.total();
            metrics.observations = stats.status_checks;
        }
        if let Some(cloud) = &harness.cloud {
            let stats = cloud.stats();
            metrics.operations_submitted = stats.submitted;
            metrics.observations = stats.observations;
            metrics.failed_observations = stats.failed_observations;
        }

        let verdict = evaluate(scenario, &report);
        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: verdict.is_ok(),
            failure_reason: verdict.err(),
            metrics,
            report: Some(report),
        }
    }

    fn setup(&self, scenario: ScenarioId, ctx: Arc<SimContext>) -> Result<Harness, ChaosError> {
        match scenario {
            ScenarioId::NetworkLatency => self.agent_harness(
                ctx,
                AgentBehavior {
                    jitter: Duration::from_millis(500),
                    ..AgentBehavior::default()
                },
                FaultSpec::NetworkLatency(NetworkFault {
                    latency_ms: 2000,
                    destination_hosts: vec!["api.internal".to_string()],
                    ..NetworkFault::default()
                }),
            ),
            ScenarioId::NetworkLoss => self.agent_harness(
                ctx,
                AgentBehavior {
                    status_lag: 2,
                    ..AgentBehavior::default()
                },
                FaultSpec::NetworkLoss(NetworkFault::default()),
            ),
            ScenarioId::AgentError => self.agent_harness(
                ctx,
                AgentBehavior {
                    inject_error: Some("cannot find device \"eth9\"".to_string()),
                    ..AgentBehavior::default()
                },
                FaultSpec::NetworkLatency(NetworkFault {
                    interface: "eth9".to_string(),
                    ..NetworkFault::default()
                }),
            ),
            ScenarioId::SlowAgent => self.agent_harness(
                ctx,
                AgentBehavior {
                    response_delay: Duration::from_secs(90),
                    ..AgentBehavior::default()
                },
                FaultSpec::NetworkLoss(NetworkFault::default()),
            ),
            ScenarioId::GarbledFeedback => self.agent_harness(
                ctx,
                AgentBehavior {
                    garbled_feedback: true,
                    ..AgentBehavior::default()
                },
                FaultSpec::NetworkLatency(NetworkFault::default()),
            ),
            ScenarioId::DiskLoss => self.cloud_harness(
                ctx,
                CloudBehavior {
                    pending_polls: 2,
                    disk_lag: 1,
                    ..CloudBehavior::default()
                },
                TargetRef::scale_set_member("web-vmss_2"),
                disk_loss(),
                Vec::new(),
            ),
            ScenarioId::StuckDisk => self.cloud_harness(
                ctx,
                CloudBehavior {
                    stuck_detach: true,
                    ..CloudBehavior::default()
                },
                TargetRef::instance("vm-db-1"),
                disk_loss(),
                Vec::new(),
            ),
            ScenarioId::FlakyObserver => self.cloud_harness(
                ctx,
                CloudBehavior {
                    observe_failure_rate: 0.3,
                    disk_lag: 2,
                    ..CloudBehavior::default()
                },
                TargetRef::instance("vm-db-1"),
                disk_loss(),
                Vec::new(),
            ),
            ScenarioId::CpuHog => {
                let probe = SimHealthProbe::new("http-health", ctx.clone(), 0.1, Duration::from_secs(1));
                self.cloud_harness(
                    ctx,
                    CloudBehavior {
                        pending_polls: 1,
                        ..CloudBehavior::default()
                    },
                    TargetRef::instance("vm-app-1"),
                    FaultSpec::CpuHog {
                        cores: 2,
                        install_dependency: true,
                    },
                    vec![ProbeHandle::once_per_cycle(Arc::new(probe))],
                )
            }
            ScenarioId::HttpLatency => {
                let probe = SimHealthProbe::new("latency-watch", ctx.clone(), 0.05, Duration::from_secs(2));
                self.cloud_harness(
                    ctx,
                    CloudBehavior::default(),
                    TargetRef::instance("vm-proxy-1"),
                    FaultSpec::Http(HttpFault {
                        toxic: HttpToxic::Latency(500),
                        listen_port: 20000,
                        stream_type: "downstream".to_string(),
                        stream_port: 8080,
                        install_dependency: false,
                    }),
                    vec![ProbeHandle::continuous(Arc::new(probe))],
                )
            }
        }
    }

    fn agent_harness(&self, ctx: Arc<SimContext>, behavior: AgentBehavior, fault: FaultSpec) -> Result<Harness, ChaosError> {
        let (link, stats) = SimAgent::spawn(ctx, behavior);
        let backend = Arc::new(AgentBackend::new(Arc::new(link)));
        let registry = BackendRegistry::new().with_backend(TargetKind::AgentConnection, backend);

        Ok(Harness {
            registry,
            plan: fault.plan(TargetRef::agent("agent-0"), &self.config)?,
            agent_stats: Some(stats),
            cloud: None,
        })
    }

    fn cloud_harness(
        &self,
        ctx: Arc<SimContext>,
        behavior: CloudBehavior,
        target: TargetRef,
        fault: FaultSpec,
        probes: Vec<ProbeHandle>,
    ) -> Result<Harness, ChaosError> {
        let cloud = Arc::new(SimControlPlane::new(ctx.clone(), behavior));
        let backend = ControlPlaneBackend::new(ctx, cloud.clone(), self.config.poll_interval());
        let backend = Arc::new(match &self.script {
            Some(path) => backend.with_script_file(path)?,
            None => backend.with_script(vec!["/opt/chaos/run.sh \"$@\"".to_string()]),
        });
        let registry = BackendRegistry::new()
            .with_backend(TargetKind::Instance, backend.clone())
            .with_backend(TargetKind::ScaleSetMember, backend);

        let plan = probes
            .into_iter()
            .fold(fault.plan(target, &self.config)?, ExperimentPlan::with_probe);

        Ok(Harness {
            registry,
            plan,
            agent_stats: None,
            cloud: Some(cloud),
        })
    }
}

fn disk_loss() -> FaultSpec {
    FaultSpec::DiskLoss {
        disks: vec!["data-0".to_string(), "data-1".to_string()],
    }
}

/// Checks the report against what the scenario expects.
fn evaluate(scenario: ScenarioId, report: &ExperimentReport) -> Result<(), String> {
    match (scenario.expectation(), &report.outcome) {
        (Expectation::Completes, ExperimentOutcome::Completed) => {
            if report.inject_dispatches != report.revert_dispatches {
                return Err(format!(
                    "{} injects but {} reverts",
                    report.inject_dispatches, report.revert_dispatches
                ));
            }
            if report.cycles_completed != report.cycles_started {
                return Err(format!(
                    "{} cycles started, {} completed",
                    report.cycles_started, report.cycles_completed
                ));
            }
            Ok(())
        }
        (Expectation::AbortsWhile(expected), ExperimentOutcome::Aborted { stage, .. }) if *stage == expected => {
            if report.revert_dispatches == 0 {
                return Err("aborted without attempting a revert".to_string());
            }
            Ok(())
        }
        (Expectation::Completes, ExperimentOutcome::Aborted { stage, error, .. }) => {
            Err(format!("aborted while {}: {}", stage, error))
        }
        (Expectation::AbortsWhile(expected), ExperimentOutcome::Aborted { stage, error, .. }) => Err(format!(
            "expected abort while {}, aborted while {}: {}",
            expected, stage, error
        )),
        (Expectation::AbortsWhile(expected), ExperimentOutcome::Completed) => {
            Err(format!("expected abort while {}, completed instead", expected))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaos_core::timeline::RevertAttempt;
    use proptest::prelude::*;

    #[test]
    fn test_all_scenarios_pass() {
        let runner = ScenarioRunner::new(42);
        for scenario in ScenarioId::all() {
            let result = runner.run(scenario);
            assert!(
                result.passed,
                "{} failed: {}",
                scenario,
                result.failure_reason.unwrap_or_default()
            );
        }
    }

    #[test]
    fn test_network_latency_cycle_count() {
        let result = ScenarioRunner::new(7).run(ScenarioId::NetworkLatency);

        assert!(result.passed);
        assert_eq!(result.metrics.cycles_completed, 3);
        assert_eq!(result.metrics.revert_dispatches, 3);
    }

    #[test]
    fn test_stuck_disk_exhausts_attempts() {
        let result = ScenarioRunner::new(1).run(ScenarioId::StuckDisk);
        let report = result.report.unwrap();

        match report.outcome {
            ExperimentOutcome::Aborted { error, revert, .. } => {
                assert!(matches!(
                    error,
                    ChaosError::NotConverged { attempts: 15, last_observed: Some(ref s), .. } if s == "Detaching"
                ));
                assert_eq!(revert, RevertAttempt::Reverted);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(result.metrics.observations, 15);
    }

    #[test]
    fn test_slow_agent_times_out() {
        let result = ScenarioRunner::new(1).run(ScenarioId::SlowAgent);
        let report = result.report.unwrap();

        assert!(matches!(
            report.outcome,
            ExperimentOutcome::Aborted {
                error: ChaosError::Timeout { .. },
                revert: RevertAttempt::Failed(_),
                ..
            }
        ));
        assert_eq!(report.elapsed, Duration::from_secs(120));
    }

    #[test]
    fn test_ramp_extends_the_run() {
        let result = ScenarioRunner::new(5)
            .with_ramp(10)
            .with_duration(20)
            .with_interval(20)
            .run(ScenarioId::NetworkLoss);

        assert!(result.passed);
        assert_eq!(result.metrics.cycles_completed, 1);
        assert!(result.metrics.sim_time_secs >= 40.0);
    }

    #[test]
    fn test_unreadable_script_fails_setup() {
        let result = ScenarioRunner::new(1)
            .with_script_file("/nonexistent/chaos/script.sh")
            .run(ScenarioId::CpuHog);

        assert!(!result.passed);
        assert!(result.report.is_none());
        assert!(result.failure_reason.unwrap().starts_with("setup failed: invalid configuration"));
    }

    #[test]
    fn test_report_start_is_the_sim_epoch() {
        let report = ScenarioRunner::new(4).run(ScenarioId::DiskLoss).report.unwrap();

        let since_epoch = report.started.duration_since(std::time::UNIX_EPOCH).unwrap();
        assert_eq!(since_epoch, Duration::from_secs(1704067200));
    }

    #[test]
    fn test_same_seed_same_metrics() {
        let a = ScenarioRunner::new(99).run(ScenarioId::FlakyObserver);
        let b = ScenarioRunner::new(99).run(ScenarioId::FlakyObserver);

        assert_eq!(a.metrics, b.metrics);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_flaky_observer_converges_for_any_seed(seed in any::<u64>()) {
            let result = ScenarioRunner::new(seed).run(ScenarioId::FlakyObserver);
            prop_assert!(result.passed, "{:?}", result.failure_reason);
        }

        #[test]
        fn prop_agent_error_always_reverts(seed in any::<u64>()) {
            let result = ScenarioRunner::new(seed).run(ScenarioId::AgentError);
            prop_assert!(result.passed);
            prop_assert_eq!(result.metrics.revert_dispatches, 1);
        }
    }
}
