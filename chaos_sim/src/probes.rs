//! Simulated health probes.

use crate::context::SimContext;
use async_trait::async_trait;
use chaos_core::probe::{Probe, ProbeMode, ProbeVerdict, StopSignal};
use chaos_env::{ChaosContext, TargetRef};
use std::sync::Arc;
use std::time::Duration;

/// An HTTP-style health check whose answers come from the seeded RNG.
pub struct SimHealthProbe {
    name: String,
    ctx: Arc<SimContext>,

    /// Probability that one check fails
    failure_rate: f64,

    /// Time one check takes (continuous probes also wait this long between checks)
    check_time: Duration,
}

impl SimHealthProbe {
    pub fn new(name: impl Into<String>, ctx: Arc<SimContext>, failure_rate: f64, check_time: Duration) -> Self {
        Self {
            name: name.into(),
            ctx,
            failure_rate,
            check_time,
        }
    }

    async fn check(&self) -> bool {
        self.ctx.sleep(self.check_time).await;
        !self.ctx.chance(self.failure_rate)
    }
}

#[async_trait]
impl Probe for SimHealthProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, target: &TargetRef, mode: ProbeMode, mut stop: StopSignal) -> ProbeVerdict {
        match mode {
            ProbeMode::OncePerCycle => {
                if self.check().await {
                    ProbeVerdict::Passed
                } else {
                    ProbeVerdict::Failed(format!("{} unhealthy", target))
                }
            }
            ProbeMode::Continuous => {
                let mut checks = 0u32;
                let mut failures = 0u32;
                loop {
                    tokio::select! {
                        _ = stop.stopped() => break,
                        healthy = self.check() => {
                            checks += 1;
                            if !healthy {
                                failures += 1;
                            }
                        }
                    }
                }
                if failures == 0 {
                    ProbeVerdict::Passed
                } else {
                    ProbeVerdict::Failed(format!("{}/{} checks of {} failed", failures, checks, target))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::sim_runtime;
    use chaos_core::probe::{ProbeHandle, ProbeRunner};

    #[test]
    fn test_continuous_probe_counts_until_stopped() {
        let rt = sim_runtime().unwrap();
        rt.block_on(async {
            let ctx = SimContext::shared(9);
            let probe = Arc::new(SimHealthProbe::new("always-down", ctx.clone(), 1.0, Duration::from_secs(1)));
            let runner = ProbeRunner::new(ctx.clone(), TargetRef::instance("vm-1"));

            let batch = runner.start_continuous(&[ProbeHandle::continuous(probe)]);
            ctx.sleep(Duration::from_millis(10_500)).await;
            let results = batch.collect(ctx.as_ref(), Duration::from_secs(5)).await;

            assert_eq!(
                results[0].verdict,
                ProbeVerdict::Failed("10/10 checks of instance:vm-1 failed".to_string())
            );
        });
    }

    #[test]
    fn test_healthy_probe_passes() {
        let rt = sim_runtime().unwrap();
        rt.block_on(async {
            let ctx = SimContext::shared(9);
            let probe = SimHealthProbe::new("http", ctx.clone(), 0.0, Duration::from_millis(200));
            let runner = ProbeRunner::new(ctx.clone(), TargetRef::instance("vm-1"));

            let results = runner
                .run_during(&[ProbeHandle::once_per_cycle(Arc::new(probe))], 1, Duration::from_secs(5))
                .await;

            assert_eq!(results[0].verdict, ProbeVerdict::Passed);
        });
    }
}
