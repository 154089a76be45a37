//! Simulation context implementing ChaosContext for deterministic testing.

use async_trait::async_trait;
use chaos_env::{ChaosContext, EnvError};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Instrument;

/// Simulation context backed by a paused clock and a seeded RNG.
///
/// This implements `ChaosContext` using:
/// - The runtime's paused clock, which jumps forward whenever every task is idle
/// - A seeded ChaCha8 RNG for jitter and fault decisions
/// - A fixed epoch so report timestamps are reproducible
///
/// Must be created inside a runtime from [`sim_runtime`], otherwise `now()`
/// measures real time.
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Virtual time zero
    origin: Instant,

    /// Deterministic RNG shared by every simulated component
    rng: Arc<Mutex<ChaCha8Rng>>,

    /// Epoch offset (virtual time 0 maps to this wall-clock time)
    epoch: SystemTime,
}

/// Builds the single-threaded, paused-clock runtime simulations run on.
pub fn sim_runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            origin: Instant::now(),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            epoch: UNIX_EPOCH + Duration::from_secs(1704067200), // 2024-01-01 00:00:00 UTC
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Uniform jitter in `[0, max]`.
    pub fn jitter(&self, max: Duration) -> Duration {
        if max.is_zero() {
            return Duration::ZERO;
        }
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        Duration::from_millis(rng.gen_range(0..=max.as_millis() as u64))
    }

    /// True with probability `p`.
    pub fn chance(&self, p: f64) -> bool {
        if p <= 0.0 {
            return false;
        }
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        rng.gen_bool(p.min(1.0))
    }
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            origin: self.origin,
            rng: Arc::clone(&self.rng),
            epoch: self.epoch,
        }
    }
}

#[async_trait]
impl ChaosContext for SimContext {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        self.epoch + self.now()
    }

    async fn sleep(&self, duration: Duration) {
        // Paused clock: completes instantly once every task is parked
        tokio::time::sleep(duration).await;
    }

    async fn timeout<F>(&self, duration: Duration, future: F) -> Result<F::Output, EnvError>
    where
        F: std::future::Future + Send,
        F::Output: Send,
    {
        tokio::time::timeout(duration, future)
            .await
            .map_err(|_| EnvError::timeout(duration))
    }

    fn spawn<F>(&self, name: &str, future: F) -> JoinHandle<F::Output>
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let span = tracing::debug_span!("sim_task", name = %name, seed = self.seed);
        tokio::spawn(future.instrument(span))
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_context_virtual_time() {
        let rt = sim_runtime().unwrap();
        rt.block_on(async {
            let ctx = SimContext::new(42);
            assert_eq!(ctx.now(), Duration::ZERO);

            ctx.sleep(Duration::from_secs(3600)).await;
            assert_eq!(ctx.now(), Duration::from_secs(3600));

            ctx.sleep(Duration::from_millis(500)).await;
            assert_eq!(ctx.now(), Duration::from_millis(3_600_500));
        });
    }

    #[test]
    fn test_sim_context_timeout() {
        let rt = sim_runtime().unwrap();
        rt.block_on(async {
            let ctx = SimContext::new(42);
            let slow = tokio::time::sleep(Duration::from_secs(90));

            let result = ctx.timeout(Duration::from_secs(60), slow).await;

            assert_eq!(result, Err(EnvError::Timeout(60_000)));
            assert_eq!(ctx.now(), Duration::from_secs(60));
        });
    }

    #[test]
    fn test_sim_context_deterministic_jitter() {
        let ctx1 = SimContext::new(42);
        let ctx2 = SimContext::new(42);

        let a: Vec<Duration> = (0..8).map(|_| ctx1.jitter(Duration::from_secs(1))).collect();
        let b: Vec<Duration> = (0..8).map(|_| ctx2.jitter(Duration::from_secs(1))).collect();

        // Same seed = same jitter sequence
        assert_eq!(a, b);
        assert!(a.iter().all(|d| *d <= Duration::from_secs(1)));
    }

    #[test]
    fn test_sim_context_epoch() {
        let rt = sim_runtime().unwrap();
        rt.block_on(async {
            let ctx = SimContext::new(7);
            ctx.sleep(Duration::from_secs(10)).await;
            assert_eq!(
                ctx.system_time(),
                UNIX_EPOCH + Duration::from_secs(1704067210)
            );
            assert_eq!(ctx.seed(), 7);
        });
    }

    #[test]
    fn test_sim_context_clone_shares_rng() {
        let ctx1 = SimContext::new(42);
        let ctx2 = ctx1.clone();
        let fresh = SimContext::new(42);

        let first = ctx1.jitter(Duration::from_secs(10));
        let second = ctx2.jitter(Duration::from_secs(10));

        assert_eq!(first, fresh.jitter(Duration::from_secs(10)));
        assert_eq!(second, fresh.jitter(Duration::from_secs(10)));
    }
}
