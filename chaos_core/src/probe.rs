//! Probe Runner - schedules externally owned health checks around a fault window.
//!
//! The runner never looks inside a probe. It starts probe tasks through the
//! context, tells them when the window closes, and turns whatever they
//! report (or fail to report) into [`ProbeResult`]s.
//!
//! # Modes
//!
//! - **OncePerCycle**: started after inject convergence, collected at the end
//!   of that cycle's interval wait
//! - **Continuous**: started once, at the first confirmed injection, and
//!   collected when the experiment ends

use async_trait::async_trait;
use chaos_env::{ChaosContext, TargetRef};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// When a probe runs relative to the experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ProbeMode {
    Continuous,
    OncePerCycle,
}

/// What a probe reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ProbeVerdict {
    Passed,
    Failed(String),

    /// Still running when its window closed
    Unfinished,
}

impl ProbeVerdict {
    pub fn is_failure(&self) -> bool {
        matches!(self, ProbeVerdict::Failed(_))
    }
}

/// Close notification handed to every probe.
///
/// Continuous probes should return once [`StopSignal::stopped`] resolves.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    /// Resolves once the window has closed (or the runner is gone).
    pub async fn stopped(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// An externally supplied health check.
#[async_trait]
pub trait Probe: Send + Sync {
    fn name(&self) -> &str;

    /// Checks `target` and reports pass or fail.
    async fn run(&self, target: &TargetRef, mode: ProbeMode, stop: StopSignal) -> ProbeVerdict;
}

/// A probe plus its scheduling tags.
#[derive(Clone)]
pub struct ProbeHandle {
    pub probe: Arc<dyn Probe>,
    pub mode: ProbeMode,

    /// Revert waits for a blocking probe instead of abandoning it
    pub blocking: bool,
}

impl ProbeHandle {
    pub fn continuous(probe: Arc<dyn Probe>) -> Self {
        Self {
            probe,
            mode: ProbeMode::Continuous,
            blocking: false,
        }
    }

    pub fn once_per_cycle(probe: Arc<dyn Probe>) -> Self {
        Self {
            probe,
            mode: ProbeMode::OncePerCycle,
            blocking: false,
        }
    }

    /// Marks the probe as blocking.
    pub fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }
}

impl std::fmt::Debug for ProbeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeHandle")
            .field("probe", &self.probe.name())
            .field("mode", &self.mode)
            .field("blocking", &self.blocking)
            .finish()
    }
}

/// Outcome of one probe run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub probe: String,
    pub mode: ProbeMode,

    /// Cycle number for per-cycle probes; `None` for continuous ones
    pub cycle: Option<u32>,
    pub verdict: ProbeVerdict,
}

struct ProbeTask {
    name: String,
    mode: ProbeMode,
    blocking: bool,
    cycle: Option<u32>,
    handle: JoinHandle<ProbeVerdict>,
}

/// Probes started together and stopped together.
pub struct ProbeBatch {
    stop_tx: watch::Sender<bool>,
    tasks: Vec<ProbeTask>,
}

impl ProbeBatch {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Closes the window and gathers every probe's verdict.
    ///
    /// Blocking probes are awaited to completion. Non-blocking probes get
    /// `grace` to finish; the rest are aborted and reported `Unfinished`.
    pub async fn collect<Ctx: ChaosContext>(self, ctx: &Ctx, grace: Duration) -> Vec<ProbeResult> {
        let _ = self.stop_tx.send(true);

        let mut results = Vec::with_capacity(self.tasks.len());
        for mut task in self.tasks {
            let verdict = if task.blocking {
                join_verdict(&task.name, (&mut task.handle).await)
            } else {
                match ctx.timeout(grace, &mut task.handle).await {
                    Ok(joined) => join_verdict(&task.name, joined),
                    Err(_) => {
                        task.handle.abort();
                        debug!("probe {} abandoned at window close", task.name);
                        ProbeVerdict::Unfinished
                    }
                }
            };

            match &verdict {
                ProbeVerdict::Failed(reason) => warn!("probe {} failed: {}", task.name, reason),
                other => info!("probe {} finished: {:?}", task.name, other),
            }

            results.push(ProbeResult {
                probe: task.name,
                mode: task.mode,
                cycle: task.cycle,
                verdict,
            });
        }
        results
    }
}

fn join_verdict(name: &str, joined: Result<ProbeVerdict, tokio::task::JoinError>) -> ProbeVerdict {
    joined.unwrap_or_else(|err| {
        warn!("probe {} task did not complete: {}", name, err);
        ProbeVerdict::Failed(format!("probe task did not complete: {}", err))
    })
}

/// Starts probes against one target.
pub struct ProbeRunner<Ctx: ChaosContext> {
    ctx: Arc<Ctx>,
    target: TargetRef,
}

impl<Ctx: ChaosContext> ProbeRunner<Ctx> {
    pub fn new(ctx: Arc<Ctx>, target: TargetRef) -> Self {
        Self { ctx, target }
    }

    /// Starts every continuous probe in `probes`.
    pub fn start_continuous(&self, probes: &[ProbeHandle]) -> ProbeBatch {
        self.start(probes.iter().filter(|p| p.mode == ProbeMode::Continuous), None)
    }

    /// Starts every once-per-cycle probe in `probes` for `cycle`.
    pub fn start_cycle(&self, probes: &[ProbeHandle], cycle: u32) -> ProbeBatch {
        self.start(probes.iter().filter(|p| p.mode == ProbeMode::OncePerCycle), Some(cycle))
    }

    /// Runs the once-per-cycle probes alongside a `window`-long wait.
    ///
    /// Returns after the window has elapsed and the probes are collected.
    pub async fn run_during(&self, probes: &[ProbeHandle], cycle: u32, window: Duration) -> Vec<ProbeResult> {
        let batch = self.start_cycle(probes, cycle);
        self.ctx.sleep(window).await;
        if batch.is_empty() {
            return Vec::new();
        }
        batch.collect(self.ctx.as_ref(), Duration::ZERO).await
    }

    fn start<'a, I>(&self, probes: I, cycle: Option<u32>) -> ProbeBatch
    where
        I: Iterator<Item = &'a ProbeHandle>,
    {
        let (stop_tx, stop_rx) = watch::channel(false);

        let tasks = probes
            .map(|handle| {
                let probe = handle.probe.clone();
                let target = self.target.clone();
                let mode = handle.mode;
                let stop = StopSignal { rx: stop_rx.clone() };
                let name = probe.name().to_string();

                debug!("starting probe {} ({:?}) on {}", name, mode, target);
                let task = self
                    .ctx
                    .spawn(&name, async move { probe.run(&target, mode, stop).await });

                ProbeTask {
                    name,
                    mode,
                    blocking: handle.blocking,
                    cycle,
                    handle: task,
                }
            })
            .collect();

        ProbeBatch { stop_tx, tasks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaos_env::TokioContext;

    /// Sleeps, then reports a fixed verdict.
    struct TimedProbe {
        name: &'static str,
        delay: Duration,
        verdict: ProbeVerdict,
    }

    #[async_trait]
    impl Probe for TimedProbe {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(&self, _target: &TargetRef, _mode: ProbeMode, _stop: StopSignal) -> ProbeVerdict {
            tokio::time::sleep(self.delay).await;
            self.verdict.clone()
        }
    }

    /// Runs until told to stop.
    struct WatchProbe;

    #[async_trait]
    impl Probe for WatchProbe {
        fn name(&self) -> &str {
            "watch"
        }

        async fn run(&self, _target: &TargetRef, mode: ProbeMode, mut stop: StopSignal) -> ProbeVerdict {
            assert_eq!(mode, ProbeMode::Continuous);
            stop.stopped().await;
            ProbeVerdict::Passed
        }
    }

    fn timed(name: &'static str, secs: u64, verdict: ProbeVerdict) -> Arc<dyn Probe> {
        Arc::new(TimedProbe {
            name,
            delay: Duration::from_secs(secs),
            verdict,
        })
    }

    fn runner(ctx: Arc<TokioContext>) -> ProbeRunner<TokioContext> {
        ProbeRunner::new(ctx, TargetRef::instance("vm-1"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_probes_report_pass_and_fail() {
        let ctx = TokioContext::shared();
        let probes = vec![
            ProbeHandle::once_per_cycle(timed("http", 1, ProbeVerdict::Passed)),
            ProbeHandle::once_per_cycle(timed("db", 2, ProbeVerdict::Failed("503".into()))),
        ];

        let results = runner(ctx.clone()).run_during(&probes, 1, Duration::from_secs(10)).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].verdict, ProbeVerdict::Passed);
        assert_eq!(results[1].verdict, ProbeVerdict::Failed("503".into()));
        assert_eq!(results[1].cycle, Some(1));
        assert_eq!(ctx.now(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_probe_does_not_hold_the_window() {
        let ctx = TokioContext::shared();
        let probes = vec![ProbeHandle::once_per_cycle(timed("slow", 600, ProbeVerdict::Passed))];

        let results = runner(ctx.clone()).run_during(&probes, 1, Duration::from_secs(10)).await;

        assert_eq!(results[0].verdict, ProbeVerdict::Unfinished);
        assert!(ctx.now() < Duration::from_secs(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_probe_is_awaited() {
        let ctx = TokioContext::shared();
        let probes = vec![ProbeHandle::once_per_cycle(timed("slow", 30, ProbeVerdict::Passed)).blocking()];

        let results = runner(ctx.clone()).run_during(&probes, 1, Duration::from_secs(10)).await;

        assert_eq!(results[0].verdict, ProbeVerdict::Passed);
        assert_eq!(ctx.now(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_probe_runs_until_stopped() {
        let ctx = TokioContext::shared();
        let probes = vec![
            ProbeHandle::continuous(Arc::new(WatchProbe)),
            ProbeHandle::once_per_cycle(timed("http", 1, ProbeVerdict::Passed)),
        ];
        let runner = runner(ctx.clone());

        let batch = runner.start_continuous(&probes);
        assert_eq!(batch.len(), 1);

        ctx.sleep(Duration::from_secs(120)).await;
        let results = batch.collect(ctx.as_ref(), Duration::from_secs(5)).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].probe, "watch");
        assert_eq!(results[0].cycle, None);
        assert_eq!(results[0].verdict, ProbeVerdict::Passed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_probes_still_waits_the_window() {
        let ctx = TokioContext::shared();

        let results = runner(ctx.clone()).run_during(&[], 3, Duration::from_secs(7)).await;

        assert!(results.is_empty());
        assert_eq!(ctx.now(), Duration::from_secs(7));
    }
}
