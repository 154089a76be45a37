//! Core environment context trait for the fault-injection engine.

use async_trait::async_trait;
use crate::error::EnvError;
use std::future::Future;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;

/// The central interface for Environment Interaction.
///
/// This trait abstracts the "real world" so that the timeline controller,
/// the convergence poller and the dispatcher can run in both production
/// (tokio) and simulation (virtual clock) environments.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`
/// - **Simulation**: `SimContext` - virtual clock advanced by `sleep`
///
/// # Determinism
///
/// Experiment elapsed-time checks are made against `now()`, never against
/// the OS clock directly, so a simulated experiment of any length runs in
/// microseconds and always produces the same cycle count.
#[async_trait]
pub trait ChaosContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// Used for the experiment window and for convergence timing.
    /// In simulation, this is the virtual clock time.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time for report timestamps.
    fn system_time(&self) -> SystemTime;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances virtual clock
    async fn sleep(&self, duration: Duration);

    /// Runs `future` to completion unless `duration` elapses first.
    ///
    /// # Returns
    /// * `Ok(output)` - The future finished within the bound
    /// * `Err(EnvError::Timeout)` - The bound elapsed first
    async fn timeout<F>(&self, duration: Duration, future: F) -> Result<F::Output, EnvError>
    where
        F: Future + Send,
        F::Output: Send;

    /// Spawns a background task and returns its handle.
    ///
    /// Used by the probe runner; the controller itself never spawns.
    fn spawn<F>(&self, name: &str, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static;

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    /// In simulation, returns the master seed.
    fn seed(&self) -> u64;
}
