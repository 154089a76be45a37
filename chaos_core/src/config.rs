//! Experiment configuration.
//!
//! All values are whole seconds, matching the environment variables the
//! experiment runners are deployed with.

use crate::convergence::ConvergencePolicy;
use crate::error::ChaosError;
use crate::timeline::ExperimentWindow;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing knobs for one experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Wait before the first cycle and after the last one (default: 0)
    pub ramp_time: u64,

    /// Total time to keep starting cycles (default: 30)
    pub chaos_duration: u64,

    /// Time the fault stays active in each cycle (default: 10)
    pub chaos_interval: u64,

    /// Delay between convergence samples (default: 2)
    pub status_check_delay: u64,

    /// Budget for one convergence wait (default: 180)
    pub status_check_timeout: u64,

    /// Bound on a single dispatch (default: 60)
    pub action_timeout: u64,

    /// Delay between polls of a submitted control-plane operation (default: 5)
    pub poll_interval: u64,

    /// How long continuous probes get to report after being told to stop (default: 5)
    pub probe_grace: u64,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            ramp_time: 0,
            chaos_duration: 30,
            chaos_interval: 10,
            status_check_delay: 2,
            status_check_timeout: 180,
            action_timeout: 60,
            poll_interval: 5,
            probe_grace: 5,
        }
    }
}

impl ExperimentConfig {
    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ChaosError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Loads the configuration through an arbitrary variable lookup.
    ///
    /// Unset variables keep their defaults; set but non-numeric ones are errors.
    pub fn from_env_with<F>(lookup: F) -> Result<Self, ChaosError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let fields: [(&str, &mut u64); 8] = [
            ("RAMP_TIME", &mut config.ramp_time),
            ("TOTAL_CHAOS_DURATION", &mut config.chaos_duration),
            ("CHAOS_INTERVAL", &mut config.chaos_interval),
            ("STATUS_CHECK_DELAY", &mut config.status_check_delay),
            ("STATUS_CHECK_TIMEOUT", &mut config.status_check_timeout),
            ("ACTION_TIMEOUT", &mut config.action_timeout),
            ("POLL_INTERVAL", &mut config.poll_interval),
            ("PROBE_GRACE", &mut config.probe_grace),
        ];

        for (key, slot) in fields {
            if let Some(raw) = lookup(key) {
                *slot = raw.trim().parse().map_err(|_| {
                    ChaosError::config(format!(
                        "{} must be a whole number of seconds, got '{}'",
                        key, raw
                    ))
                })?;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Parses a JSON document; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ChaosError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ChaosError::config(format!("malformed config document: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the controller cannot run with.
    pub fn validate(&self) -> Result<(), ChaosError> {
        if self.status_check_delay == 0 {
            return Err(ChaosError::config("status_check_delay must be greater than zero"));
        }
        if self.action_timeout == 0 {
            return Err(ChaosError::config("action_timeout must be greater than zero"));
        }
        if self.chaos_interval == 0 && self.chaos_duration > 0 {
            return Err(ChaosError::config(
                "chaos_interval must be greater than zero when chaos_duration is set",
            ));
        }
        Ok(())
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn probe_grace(&self) -> Duration {
        Duration::from_secs(self.probe_grace)
    }

    /// Timing window for the timeline controller.
    pub fn window(&self) -> ExperimentWindow {
        ExperimentWindow::new(
            Duration::from_secs(self.ramp_time),
            Duration::from_secs(self.chaos_duration),
            Duration::from_secs(self.chaos_interval),
        )
    }

    /// Retry policy for convergence waits.
    pub fn convergence_policy(&self) -> Result<ConvergencePolicy, ChaosError> {
        ConvergencePolicy::from_check_window(
            Duration::from_secs(self.status_check_timeout),
            Duration::from_secs(self.status_check_delay),
        )
    }
}
