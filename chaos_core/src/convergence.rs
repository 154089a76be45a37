//! Convergence Poller - bounded-retry wait for an expected target state.
//!
//! Stateless: every call starts from scratch, so a wait can be restarted
//! or run for inject and revert with the same code.

use crate::error::ChaosError;
use async_trait::async_trait;
use chaos_env::{ChaosContext, EnvError, TargetRef};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reports the current state token of a target.
#[async_trait]
pub trait StateObserver: Send + Sync {
    /// Samples the target once.
    ///
    /// # Returns
    /// * `Ok(token)` - The observed state, converged or not
    /// * `Err(_)` - The state could not be observed this time
    async fn observe_state(&self, target: &TargetRef) -> Result<String, EnvError>;
}

/// Expected post-action state, as a predicate over observed tokens.
#[derive(Clone)]
pub struct StatePredicate {
    description: String,
    matcher: Arc<dyn Fn(&str) -> bool + Send + Sync>,
}

impl StatePredicate {
    /// Predicate from an arbitrary matcher.
    pub fn new<F>(description: impl Into<String>, matcher: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            matcher: Arc::new(matcher),
        }
    }

    /// Matches exactly one token.
    pub fn equals(expected: impl Into<String>) -> Self {
        let expected = expected.into();
        let description = format!("state {}", expected);
        Self::new(description, move |state| state == expected)
    }

    /// Matches any of the given tokens.
    pub fn one_of<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tokens: Vec<String> = tokens.into_iter().map(Into::into).collect();
        let description = format!("one of [{}]", tokens.join(", "));
        Self::new(description, move |state| tokens.iter().any(|t| t == state))
    }

    /// Matches any observable state (target merely has to answer).
    pub fn any() -> Self {
        Self::new("any observable state", |_| true)
    }

    pub fn matches(&self, state: &str) -> bool {
        (self.matcher)(state)
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl std::fmt::Debug for StatePredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatePredicate")
            .field("description", &self.description)
            .finish()
    }
}

/// How many times to sample, and how far apart.
///
/// `max_attempts` is always at least 1. A single sample that takes longer
/// than `sample_timeout` counts as a failed observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvergencePolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    pub sample_timeout: Duration,
}

impl ConvergencePolicy {
    /// Policy whose samples are bounded by the interval itself.
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
            sample_timeout: interval,
        }
    }

    pub fn with_sample_timeout(mut self, sample_timeout: Duration) -> Self {
        self.sample_timeout = sample_timeout;
        self
    }

    /// Derives `max_attempts = timeout / delay` (at least 1).
    pub fn from_check_window(timeout: Duration, delay: Duration) -> Result<Self, ChaosError> {
        if delay.is_zero() {
            return Err(ChaosError::config("status check delay must be greater than zero"));
        }
        let attempts = (timeout.as_millis() / delay.as_millis().max(1)).min(u32::MAX as u128) as u32;
        Ok(Self::new(attempts, delay))
    }
}

/// Successful convergence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Converged {
    /// Samples taken, including the matching one
    pub attempts: u32,

    /// The matching state
    pub state: String,
}

/// Samples `target` until `expected` holds or the policy runs out.
///
/// A failed or timed-out sample counts as a non-matching attempt; it never
/// aborts the wait on its own. The sleep happens only between samples, so a
/// wait that never converges takes `(max_attempts - 1) * interval` plus at
/// most `max_attempts * sample_timeout` of sampling.
pub async fn wait_for_convergence<Ctx, O>(
    ctx: &Ctx,
    observer: &O,
    target: &TargetRef,
    expected: &StatePredicate,
    policy: &ConvergencePolicy,
) -> Result<Converged, ChaosError>
where
    Ctx: ChaosContext,
    O: StateObserver + ?Sized,
{
    let mut last_observed: Option<String> = None;

    for attempt in 1..=policy.max_attempts {
        let sample = ctx
            .timeout(policy.sample_timeout, observer.observe_state(target))
            .await
            .and_then(|observed| observed);

        match sample {
            Ok(state) if expected.matches(&state) => {
                debug!("{} reached {} after {} samples", target, expected.description(), attempt);
                return Ok(Converged { attempts: attempt, state });
            }
            Ok(state) => {
                info!(
                    "[Status]: {} has not reached {} yet, state: {} (attempt {}/{})",
                    target,
                    expected.description(),
                    state,
                    attempt,
                    policy.max_attempts
                );
                last_observed = Some(state);
            }
            Err(err) => {
                warn!(
                    "[Status]: failed to observe {} (attempt {}/{}): {}",
                    target, attempt, policy.max_attempts, err
                );
            }
        }

        if attempt < policy.max_attempts {
            ctx.sleep(policy.interval).await;
        }
    }

    Err(ChaosError::NotConverged {
        target: target.clone(),
        expected: expected.description().to_string(),
        attempts: policy.max_attempts,
        last_observed,
    })
}
