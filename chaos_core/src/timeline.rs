//! Timeline Controller - drives ramp, cycles and revert for one experiment.
//!
//! # State Machine
//!
//! ```text
//! Idle ─► RampingUp ─► Injecting ─► Converging(Inject) ─► Probing ─► IntervalWait
//!                          ▲                                              │
//!                          │                                              ▼
//!                    CycleComplete ◄── Converging(Revert) ◄──────── Reverting
//!                          │
//!                          └─► Done            (any failure) ─► Aborted
//! ```
//!
//! The elapsed-time check runs at every cycle boundary against the moment
//! the first cycle could start, so slow remote calls shift the schedule
//! by at most one cycle. Dispatches for the target are strictly serialized:
//! the controller is the only issuer and never overlaps two actions.
//!
//! On abort the controller makes one best-effort revert dispatch, without
//! a convergence wait, so a fault is not left behind.

use crate::action::{ActionPhase, ChaosAction};
use crate::config::ExperimentConfig;
use crate::convergence::{wait_for_convergence, ConvergencePolicy, StatePredicate};
use crate::dispatch::{ActionDispatcher, BackendRegistry};
use crate::error::{ChaosError, Stage};
use crate::feedback::classify;
use crate::probe::{ProbeBatch, ProbeHandle, ProbeResult, ProbeRunner};
use chaos_env::{ChaosContext, RunId, TargetRef};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

/// Where the controller is in the experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ControllerState {
    Idle,
    RampingUp,
    Injecting,
    Converging(ActionPhase),
    Probing,
    IntervalWait,
    Reverting,
    CycleComplete,
    Aborted,
    Done,
}

/// Timing of one experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExperimentWindow {
    pub ramp_time: Duration,
    pub chaos_duration: Duration,
    pub chaos_interval: Duration,
    started_at: Option<Duration>,
}

impl ExperimentWindow {
    pub fn new(ramp_time: Duration, chaos_duration: Duration, chaos_interval: Duration) -> Self {
        Self {
            ramp_time,
            chaos_duration,
            chaos_interval,
            started_at: None,
        }
    }

    /// Marks the start of the chaos duration (after ramp-up).
    pub fn start(&mut self, now: Duration) {
        self.started_at = Some(now);
    }

    pub fn started_at(&self) -> Option<Duration> {
        self.started_at
    }

    /// Time since [`start`](Self::start); zero before it.
    pub fn elapsed(&self, now: Duration) -> Duration {
        self.started_at
            .map(|started| now.saturating_sub(started))
            .unwrap_or_default()
    }

    /// True once `now - started_at >= chaos_duration`.
    pub fn is_over(&self, now: Duration) -> bool {
        self.started_at.is_some() && self.elapsed(now) >= self.chaos_duration
    }
}

/// Caller decision after each cycle's probe results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeDecision {
    Continue,
    Abort(String),
}

/// Caller-supplied policy over one cycle's probe results.
pub type ProbePolicy = Arc<dyn Fn(&[ProbeResult]) -> ProbeDecision + Send + Sync>;

/// What to inject, what to expect, and what to watch.
#[derive(Clone)]
pub struct ExperimentPlan {
    pub inject: ChaosAction,
    pub fault_active: StatePredicate,
    pub fault_cleared: StatePredicate,
    pub probes: Vec<ProbeHandle>,
    pub probe_policy: Option<ProbePolicy>,
}

impl ExperimentPlan {
    pub fn new(inject: ChaosAction, fault_active: StatePredicate, fault_cleared: StatePredicate) -> Self {
        Self {
            inject,
            fault_active,
            fault_cleared,
            probes: Vec::new(),
            probe_policy: None,
        }
    }

    pub fn with_probe(mut self, probe: ProbeHandle) -> Self {
        self.probes.push(probe);
        self
    }

    pub fn with_probe_policy<F>(mut self, policy: F) -> Self
    where
        F: Fn(&[ProbeResult]) -> ProbeDecision + Send + Sync + 'static,
    {
        self.probe_policy = Some(Arc::new(policy));
        self
    }

    /// Stops the experiment on the first failed probe.
    pub fn abort_on_probe_failure(self) -> Self {
        self.with_probe_policy(|results| {
            match results.iter().find(|r| r.verdict.is_failure()) {
                Some(failed) => ProbeDecision::Abort(format!("probe {} failed", failed.probe)),
                None => ProbeDecision::Continue,
            }
        })
    }

    /// The symmetric revert action.
    pub fn revert(&self) -> ChaosAction {
        self.inject.to_revert()
    }

    pub fn target(&self) -> &TargetRef {
        self.inject.target()
    }
}

impl std::fmt::Debug for ExperimentPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentPlan")
            .field("inject", &self.inject)
            .field("fault_active", &self.fault_active)
            .field("fault_cleared", &self.fault_cleared)
            .field("probes", &self.probes)
            .field("probe_policy", &self.probe_policy.is_some())
            .finish()
    }
}

/// What happened to the fault after an abort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RevertAttempt {
    /// Revert dispatched and acknowledged (not verified by convergence)
    Reverted,

    /// Revert acknowledged but the target never reported the fault cleared
    Unconfirmed(String),

    /// Revert dispatch failed
    Failed(String),

    /// No revert could be sent
    NotAttempted(String),
}

/// Terminal outcome of an experiment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ExperimentOutcome {
    /// Full duration elapsed and every cycle converged
    Completed,

    Aborted {
        stage: Stage,
        error: ChaosError,
        revert: RevertAttempt,
    },
}

impl ExperimentOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ExperimentOutcome::Completed)
    }
}

/// Everything a caller needs to know about a finished experiment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentReport {
    pub run_id: RunId,

    /// Wall-clock start of the run
    pub started: SystemTime,
    pub target: TargetRef,
    pub action_kind: String,
    pub outcome: ExperimentOutcome,
    pub final_state: ControllerState,
    pub cycles_started: u32,
    pub cycles_completed: u32,
    pub inject_dispatches: u32,
    pub revert_dispatches: u32,
    pub probe_results: Vec<ProbeResult>,
    pub elapsed: Duration,
}

impl ExperimentReport {
    /// Probe results that failed.
    pub fn probe_failures(&self) -> impl Iterator<Item = &ProbeResult> {
        self.probe_results.iter().filter(|r| r.verdict.is_failure())
    }
}

#[derive(Default)]
struct Tally {
    cycles_started: u32,
    cycles_completed: u32,
    inject_dispatches: u32,
    revert_dispatches: u32,
    probe_results: Vec<ProbeResult>,
}

struct CycleFailure {
    stage: Stage,
    error: ChaosError,

    /// Set when the failure happened on the revert itself
    revert: Option<RevertAttempt>,
}

impl CycleFailure {
    fn new(stage: Stage, error: ChaosError) -> Self {
        Self {
            stage,
            error,
            revert: None,
        }
    }
}

/// Runs experiments against the targets served by a backend registry.
pub struct TimelineController<Ctx: ChaosContext> {
    ctx: Arc<Ctx>,
    registry: Arc<BackendRegistry>,
    window: ExperimentWindow,
    policy: ConvergencePolicy,
    probe_grace: Duration,
    run_id: RunId,
    state: ControllerState,
}

impl<Ctx: ChaosContext> TimelineController<Ctx> {
    pub fn new(ctx: Arc<Ctx>, registry: Arc<BackendRegistry>, config: &ExperimentConfig) -> Result<Self, ChaosError> {
        config.validate()?;
        Ok(Self {
            ctx,
            registry,
            window: config.window(),
            policy: config.convergence_policy()?,
            probe_grace: config.probe_grace(),
            run_id: RunId::new(),
            state: ControllerState::Idle,
        })
    }

    /// Overrides the generated run id.
    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn window(&self) -> &ExperimentWindow {
        &self.window
    }

    /// Runs the whole experiment and reports its terminal outcome.
    pub async fn run(&mut self, plan: &ExperimentPlan) -> ExperimentReport {
        let begun = self.ctx.now();
        let started = self.ctx.system_time();
        let mut tally = Tally::default();

        info!(
            "[Info]: Run {} starting {} on {} (duration {:?}, interval {:?}, ramp {:?})",
            self.run_id,
            plan.inject.kind(),
            plan.target(),
            self.window.chaos_duration,
            self.window.chaos_interval,
            self.window.ramp_time
        );

        let outcome = self.drive(plan, &mut tally).await;

        match &outcome {
            ExperimentOutcome::Completed => info!(
                "[Info]: Run {} completed after {} cycles",
                self.run_id, tally.cycles_completed
            ),
            ExperimentOutcome::Aborted { stage, error, revert } => error!(
                "[Abort]: Run {} aborted while {}: {} (revert: {:?})",
                self.run_id, stage, error, revert
            ),
        }

        ExperimentReport {
            run_id: self.run_id,
            started,
            target: plan.target().clone(),
            action_kind: plan.inject.kind().to_string(),
            outcome,
            final_state: self.state,
            cycles_started: tally.cycles_started,
            cycles_completed: tally.cycles_completed,
            inject_dispatches: tally.inject_dispatches,
            revert_dispatches: tally.revert_dispatches,
            probe_results: tally.probe_results,
            elapsed: self.ctx.now().saturating_sub(begun),
        }
    }

    async fn drive(&mut self, plan: &ExperimentPlan, tally: &mut Tally) -> ExperimentOutcome {
        self.enter(ControllerState::Idle);

        let dispatcher = match ActionDispatcher::resolve(self.ctx.clone(), &self.registry, plan.target()) {
            Ok(dispatcher) => dispatcher,
            Err(err) => {
                self.enter(ControllerState::Aborted);
                return ExperimentOutcome::Aborted {
                    stage: Stage::Injecting,
                    error: ChaosError::Fatal {
                        target: plan.target().clone(),
                        action: plan.inject.label(),
                        message: err.to_string(),
                    },
                    revert: RevertAttempt::NotAttempted("no backend serves the target".to_string()),
                };
            }
        };

        if !self.window.ramp_time.is_zero() {
            self.enter(ControllerState::RampingUp);
            info!("[Ramp]: Waiting for the {:?} ramp time before injecting chaos", self.window.ramp_time);
            self.ctx.sleep(self.window.ramp_time).await;
        }

        self.window.start(self.ctx.now());
        let runner = ProbeRunner::new(self.ctx.clone(), plan.target().clone());
        let mut continuous: Option<ProbeBatch> = None;
        let mut cycle = 0u32;

        while !self.window.is_over(self.ctx.now()) {
            cycle += 1;
            tally.cycles_started += 1;

            if let Err(failure) = self.run_cycle(&dispatcher, &runner, plan, cycle, &mut continuous, tally).await {
                let revert = match failure.revert {
                    Some(revert) => revert,
                    None => self.best_effort_revert(&dispatcher, plan, tally).await,
                };
                self.collect_continuous(continuous, tally).await;
                self.enter(ControllerState::Aborted);
                return ExperimentOutcome::Aborted {
                    stage: failure.stage,
                    error: failure.error,
                    revert,
                };
            }

            tally.cycles_completed += 1;
            self.enter(ControllerState::CycleComplete);
            debug!(
                "cycle {} complete, {:?} of {:?} elapsed",
                cycle,
                self.window.elapsed(self.ctx.now()),
                self.window.chaos_duration
            );
        }

        self.collect_continuous(continuous, tally).await;

        if !self.window.ramp_time.is_zero() {
            self.enter(ControllerState::RampingUp);
            info!("[Ramp]: Waiting for the {:?} ramp time after injecting chaos", self.window.ramp_time);
            self.ctx.sleep(self.window.ramp_time).await;
        }

        self.enter(ControllerState::Done);
        ExperimentOutcome::Completed
    }

    async fn run_cycle(
        &mut self,
        dispatcher: &ActionDispatcher<Ctx>,
        runner: &ProbeRunner<Ctx>,
        plan: &ExperimentPlan,
        cycle: u32,
        continuous: &mut Option<ProbeBatch>,
        tally: &mut Tally,
    ) -> Result<(), CycleFailure> {
        let target = plan.target();

        self.enter(ControllerState::Injecting);
        info!("[Chaos]: Injecting {} on {} (cycle {})", plan.inject.kind(), target, cycle);
        tally.inject_dispatches += 1;
        self.perform(dispatcher, &plan.inject)
            .await
            .map_err(|e| CycleFailure::new(Stage::Injecting, e))?;

        self.enter(ControllerState::Converging(ActionPhase::Inject));
        wait_for_convergence(self.ctx.as_ref(), dispatcher.backend(), target, &plan.fault_active, &self.policy)
            .await
            .map_err(|e| CycleFailure::new(Stage::Converging, e))?;

        if continuous.is_none() {
            *continuous = Some(runner.start_continuous(&plan.probes));
        }

        // once-per-cycle probes run inside the interval wait
        self.enter(ControllerState::Probing);
        self.enter(ControllerState::IntervalWait);
        info!("[Wait]: Waiting for the {:?} chaos interval", self.window.chaos_interval);
        let results = runner.run_during(&plan.probes, cycle, self.window.chaos_interval).await;
        tally.probe_results.extend(results.iter().cloned());
        if let Some(policy) = &plan.probe_policy {
            if let ProbeDecision::Abort(reason) = policy(&results) {
                warn!("[Probe]: policy stopped the experiment in cycle {}: {}", cycle, reason);
                return Err(CycleFailure::new(Stage::Probing, ChaosError::ProbePolicy(reason)));
            }
        }

        let revert = plan.revert();
        self.enter(ControllerState::Reverting);
        info!("[Chaos]: Reverting {} on {} (cycle {})", revert.kind(), target, cycle);
        tally.revert_dispatches += 1;
        self.perform(dispatcher, &revert).await.map_err(|e| CycleFailure {
            stage: Stage::Reverting,
            revert: Some(RevertAttempt::Failed(e.to_string())),
            error: e,
        })?;

        self.enter(ControllerState::Converging(ActionPhase::Revert));
        wait_for_convergence(self.ctx.as_ref(), dispatcher.backend(), target, &plan.fault_cleared, &self.policy)
            .await
            .map_err(|e| CycleFailure {
                stage: Stage::Converging,
                revert: Some(RevertAttempt::Unconfirmed(e.to_string())),
                error: e,
            })?;

        Ok(())
    }

    /// One dispatch, interpreted.
    async fn perform(&self, dispatcher: &ActionDispatcher<Ctx>, action: &ChaosAction) -> Result<(), ChaosError> {
        let result = dispatcher.dispatch(action).await;
        classify(&result).into_result(action).map_err(|err| {
            warn!("[Chaos]: {} failed: {}", action.label(), err);
            err
        })
    }

    async fn best_effort_revert(
        &mut self,
        dispatcher: &ActionDispatcher<Ctx>,
        plan: &ExperimentPlan,
        tally: &mut Tally,
    ) -> RevertAttempt {
        let revert = plan.revert();
        self.enter(ControllerState::Reverting);
        warn!("[Abort]: Attempting best-effort revert of {} on {}", revert.kind(), plan.target());
        tally.revert_dispatches += 1;

        match self.perform(dispatcher, &revert).await {
            Ok(()) => RevertAttempt::Reverted,
            Err(err) => RevertAttempt::Failed(err.to_string()),
        }
    }

    async fn collect_continuous(&self, continuous: Option<ProbeBatch>, tally: &mut Tally) {
        if let Some(batch) = continuous {
            if !batch.is_empty() {
                let results = batch.collect(self.ctx.as_ref(), self.probe_grace).await;
                tally.probe_results.extend(results);
            }
        }
    }

    fn enter(&mut self, state: ControllerState) {
        debug!("controller {:?} -> {:?}", self.state, state);
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convergence::StateObserver;
    use crate::dispatch::ActionBackend;
    use crate::feedback::RawResponse;
    use crate::probe::{Probe, ProbeMode, ProbeVerdict, StopSignal};
    use async_trait::async_trait;
    use chaos_env::{EnvError, TargetKind, TokioContext};
    use proptest::prelude::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Counters {
        injects: u32,
        reverts: u32,
        observes: u32,
    }

    /// Disk-like backend: inject detaches, revert attaches.
    struct FakeDisk {
        inject_reply: RawResponse,
        revert_reply: RawResponse,
        stuck_state: Option<&'static str>,
        latency: Duration,
        attached: Mutex<bool>,
        counters: Mutex<Counters>,
    }

    impl FakeDisk {
        fn healthy() -> Self {
            Self {
                inject_reply: RawResponse::success(),
                revert_reply: RawResponse::success(),
                stuck_state: None,
                latency: Duration::ZERO,
                attached: Mutex::new(true),
                counters: Mutex::new(Counters::default()),
            }
        }

        fn counts(&self) -> (u32, u32, u32) {
            let c = self.counters.lock().unwrap();
            (c.injects, c.reverts, c.observes)
        }
    }

    #[async_trait]
    impl StateObserver for FakeDisk {
        async fn observe_state(&self, _target: &TargetRef) -> Result<String, EnvError> {
            self.counters.lock().unwrap().observes += 1;
            if let Some(state) = self.stuck_state {
                return Ok(state.to_string());
            }
            let attached = *self.attached.lock().unwrap();
            Ok(if attached { "Attached" } else { "Unattached" }.to_string())
        }
    }

    #[async_trait]
    impl ActionBackend for FakeDisk {
        fn name(&self) -> &str {
            "fake-disk"
        }

        async fn dispatch(&self, action: &ChaosAction) -> Result<RawResponse, EnvError> {
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let reply = match action.phase() {
                ActionPhase::Inject => {
                    self.counters.lock().unwrap().injects += 1;
                    self.inject_reply.clone()
                }
                ActionPhase::Revert => {
                    self.counters.lock().unwrap().reverts += 1;
                    self.revert_reply.clone()
                }
            };
            if reply.status == crate::feedback::SUCCESS_TOKEN {
                *self.attached.lock().unwrap() = action.phase() == ActionPhase::Revert;
            }
            Ok(reply)
        }
    }

    struct FailingProbe;

    #[async_trait]
    impl Probe for FailingProbe {
        fn name(&self) -> &str {
            "http-health"
        }

        async fn run(&self, _target: &TargetRef, _mode: ProbeMode, _stop: StopSignal) -> ProbeVerdict {
            ProbeVerdict::Failed("status 503".to_string())
        }
    }

    fn plan() -> ExperimentPlan {
        let inject = ChaosAction::inject("disk-loss", TargetRef::instance("vm-1"), Duration::from_secs(60))
            .with_param("disks", "data-0");
        ExperimentPlan::new(inject, StatePredicate::equals("Unattached"), StatePredicate::equals("Attached"))
    }

    fn config(duration: u64, interval: u64) -> ExperimentConfig {
        ExperimentConfig {
            chaos_duration: duration,
            chaos_interval: interval,
            ..ExperimentConfig::default()
        }
    }

    fn controller(backend: Arc<FakeDisk>, config: &ExperimentConfig) -> (Arc<TokioContext>, TimelineController<TokioContext>) {
        let ctx = TokioContext::shared();
        let registry = Arc::new(BackendRegistry::new().with_backend(TargetKind::Instance, backend));
        let controller = TimelineController::new(ctx.clone(), registry, config).unwrap();
        (ctx, controller)
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_cycle_when_interval_equals_duration() {
        let disk = Arc::new(FakeDisk::healthy());
        let (_ctx, mut controller) = controller(disk.clone(), &config(60, 60));

        let report = controller.run(&plan()).await;

        assert_eq!(report.outcome, ExperimentOutcome::Completed);
        assert_eq!(report.final_state, ControllerState::Done);
        assert_eq!(report.cycles_completed, 1);
        assert_eq!(report.revert_dispatches, 1);
        assert_eq!(disk.counts().1, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_count_rounds_up() {
        let disk = Arc::new(FakeDisk::healthy());
        let (_ctx, mut controller) = controller(disk.clone(), &config(60, 25));

        let report = controller.run(&plan()).await;

        assert!(report.outcome.is_completed());
        assert_eq!(report.cycles_started, 3);
        assert_eq!(report.cycles_completed, 3);
        assert_eq!(disk.counts(), (3, 3, 6));
        assert_eq!(report.elapsed, Duration::from_secs(75));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_duration_runs_no_cycles() {
        let disk = Arc::new(FakeDisk::healthy());
        let (_ctx, mut controller) = controller(disk.clone(), &config(0, 10));

        let report = controller.run(&plan()).await;

        assert!(report.outcome.is_completed());
        assert_eq!(report.cycles_started, 0);
        assert_eq!(disk.counts(), (0, 0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ramp_time_wraps_the_cycles() {
        let disk = Arc::new(FakeDisk::healthy());
        let config = ExperimentConfig {
            ramp_time: 5,
            ..config(10, 10)
        };
        let (_ctx, mut controller) = controller(disk, &config);

        let report = controller.run(&plan()).await;

        assert_eq!(report.cycles_completed, 1);
        assert_eq!(report.elapsed, Duration::from_secs(20));
        assert_eq!(controller.window().started_at(), Some(Duration::from_secs(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inject_error_aborts_and_still_reverts() {
        let disk = Arc::new(FakeDisk {
            inject_reply: RawResponse::error("[stdout]\n\n[stderr]\nerror: disk busy"),
            ..FakeDisk::healthy()
        });
        let (_ctx, mut controller) = controller(disk.clone(), &config(60, 60));

        let report = controller.run(&plan()).await;

        match &report.outcome {
            ExperimentOutcome::Aborted { stage, error, revert } => {
                assert_eq!(*stage, Stage::Injecting);
                assert!(matches!(error, ChaosError::Fatal { message, .. } if message == "disk busy"));
                assert_eq!(*revert, RevertAttempt::Reverted);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(report.final_state, ControllerState::Aborted);
        assert_eq!(disk.counts(), (1, 1, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_converging_samples_exactly_max_attempts() {
        let disk = Arc::new(FakeDisk {
            stuck_state: Some("Attached"),
            ..FakeDisk::healthy()
        });
        let config = ExperimentConfig {
            status_check_delay: 2,
            status_check_timeout: 10,
            ..config(60, 60)
        };
        let (_ctx, mut controller) = controller(disk.clone(), &config);

        let report = controller.run(&plan()).await;

        match &report.outcome {
            ExperimentOutcome::Aborted { stage, error, .. } => {
                assert_eq!(*stage, Stage::Converging);
                assert!(matches!(
                    error,
                    ChaosError::NotConverged { attempts: 5, last_observed: Some(state), .. } if state == "Attached"
                ));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(disk.counts(), (1, 1, 5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_revert_failure_is_not_retried() {
        let disk = Arc::new(FakeDisk {
            revert_reply: RawResponse::new("OPERATION_CANCELED", ""),
            ..FakeDisk::healthy()
        });
        let (_ctx, mut controller) = controller(disk.clone(), &config(60, 20));

        let report = controller.run(&plan()).await;

        match &report.outcome {
            ExperimentOutcome::Aborted { stage, revert, .. } => {
                assert_eq!(*stage, Stage::Reverting);
                assert!(matches!(revert, RevertAttempt::Failed(msg) if msg.contains("unrecognized feedback")));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(disk.counts().1, 1);
        assert_eq!(report.cycles_completed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unserved_target_aborts_without_dispatch() {
        let disk = Arc::new(FakeDisk::healthy());
        let (_ctx, mut controller) = controller(disk.clone(), &config(60, 60));
        let inject = ChaosAction::inject("os-network-loss", TargetRef::agent("eth0"), Duration::from_secs(60));
        let plan = ExperimentPlan::new(inject, StatePredicate::any(), StatePredicate::any());

        let report = controller.run(&plan).await;

        assert!(matches!(
            report.outcome,
            ExperimentOutcome::Aborted {
                stage: Stage::Injecting,
                revert: RevertAttempt::NotAttempted(_),
                ..
            }
        ));
        assert_eq!(report.inject_dispatches, 0);
        assert_eq!(disk.counts(), (0, 0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_failure_is_reported_not_fatal() {
        let disk = Arc::new(FakeDisk::healthy());
        let (_ctx, mut controller) = controller(disk, &config(20, 10));
        let plan = plan().with_probe(ProbeHandle::once_per_cycle(Arc::new(FailingProbe)));

        let report = controller.run(&plan).await;

        assert!(report.outcome.is_completed());
        assert_eq!(report.probe_failures().count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_policy_can_abort() {
        let disk = Arc::new(FakeDisk::healthy());
        let (_ctx, mut controller) = controller(disk.clone(), &config(60, 10));
        let plan = plan()
            .with_probe(ProbeHandle::once_per_cycle(Arc::new(FailingProbe)))
            .abort_on_probe_failure();

        let report = controller.run(&plan).await;

        assert!(matches!(
            report.outcome,
            ExperimentOutcome::Aborted {
                stage: Stage::Probing,
                error: ChaosError::ProbePolicy(_),
                revert: RevertAttempt::Reverted,
            }
        ));
        assert_eq!(disk.counts().1, 1);
    }

    #[test]
    fn test_window_is_over() {
        let mut window = ExperimentWindow::new(Duration::ZERO, Duration::from_secs(30), Duration::from_secs(10));
        assert!(!window.is_over(Duration::from_secs(100)));

        window.start(Duration::from_secs(5));
        assert!(!window.is_over(Duration::from_secs(34)));
        assert!(window.is_over(Duration::from_secs(35)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_cycle_count_is_duration_over_cycle_length_rounded_up(
            duration in 0u64..200,
            interval in 1u64..70,
            latency_ms in 0u64..3_000,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();
            let report = rt.block_on(async {
                let disk = Arc::new(FakeDisk {
                    latency: Duration::from_millis(latency_ms),
                    ..FakeDisk::healthy()
                });
                let (_ctx, mut controller) = controller(disk, &config(duration, interval));
                controller.run(&plan()).await
            });

            // each cycle: inject dispatch, interval wait, revert dispatch; samples answer at once
            let cycle_ms = interval * 1000 + 2 * latency_ms;
            let expected = (duration * 1000).div_ceil(cycle_ms) as u32;

            prop_assert!(report.outcome.is_completed());
            prop_assert_eq!(report.cycles_started, expected);
            prop_assert_eq!(report.cycles_completed, expected);
            prop_assert_eq!(report.revert_dispatches, expected);
        }
    }
}
