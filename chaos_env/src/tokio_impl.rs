//! Production implementation of ChaosContext using Tokio.

use crate::{ChaosContext, EnvError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Instrument;

/// Production context backed by Tokio.
///
/// Monotonic time comes from `tokio::time::Instant`, so a runtime started
/// with a paused clock drives this context virtually as well.
pub struct TokioContext {
    /// Start time for monotonic duration calculations
    start: Instant,
}

impl TokioContext {
    /// Creates a new TokioContext.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Creates an Arc-wrapped context for sharing across tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChaosContext for TokioContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    async fn sleep(&self, duration: Duration) {
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
        let span = tracing::debug_span!("task", name = %name);
        tokio::spawn(future.instrument(span))
    }

    fn seed(&self) -> u64 {
        // Production is not seeded
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_tokio_context_time() {
        let ctx = TokioContext::new();
        let t1 = ctx.now();
        ctx.sleep(Duration::from_millis(10)).await;
        let t2 = ctx.now();

        assert!(t2 > t1);
        assert!(t2 - t1 >= Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_context_timeout_elapses() {
        let ctx = TokioContext::new();
        let slow = tokio::time::sleep(Duration::from_secs(90));

        let result = ctx.timeout(Duration::from_secs(60), slow).await;

        assert_eq!(result, Err(EnvError::Timeout(60_000)));
        assert!(ctx.now() >= Duration::from_secs(60));
        assert!(ctx.now() < Duration::from_secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_context_timeout_passes_output() {
        let ctx = TokioContext::new();
        let result = ctx.timeout(Duration::from_secs(1), async { 7 }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn test_tokio_context_spawn() {
        let ctx = TokioContext::new();
        let handle = ctx.spawn("probe", async { "done" });
        assert_eq!(handle.await.unwrap(), "done");
    }

    #[test]
    fn test_tokio_context_seed() {
        let ctx = TokioContext::new();
        assert_eq!(ctx.seed(), 0);
    }
}
