//! Simulated cloud control plane with data disks and run-command.

use crate::context::SimContext;
use async_trait::async_trait;
use chaos_core::catalog::{DISK_ATTACHED, DISK_UNATTACHED};
use chaos_core::control_plane::{
    ControlPlane, ControlPlaneRequest, InstanceViewStatus, OperationHandle, OperationResult, OperationState, PollStatus,
};
use chaos_core::feedback::{ERROR_LINE_MARKER, ERROR_SECTION_MARKER};
use chaos_env::{EnvError, TargetRef};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// State reported for a VM without data disks under test.
pub const VM_RUNNING: &str = "VM running";

const DISK_DETACHING: &str = "Detaching";
const DISK_ATTACHING: &str = "Attaching";

/// How the simulated control plane misbehaves.
#[derive(Debug, Clone, Default)]
pub struct CloudBehavior {
    /// Polls answered `Pending` before an operation finishes
    pub pending_polls: u32,

    /// Observations that still show the transitional disk state
    pub disk_lag: u32,

    /// Detached disks never report `Unattached`
    pub stuck_detach: bool,

    /// Probability that an observation fails
    pub observe_failure_rate: f64,

    /// Every run-command script fails with this tool error
    pub command_error: Option<String>,
}

/// Operations seen by the control plane.
#[derive(Debug, Clone, Default)]
pub struct CloudStats {
    pub submitted: u32,
    pub polls: u32,
    pub observations: u32,
    pub failed_observations: u32,
}

#[derive(Debug, Clone)]
struct DiskSet {
    attached: bool,
    lag_remaining: u32,
}

struct PendingOperation {
    polls_left: u32,
    state: OperationState,
    result: OperationResult,
}

#[derive(Default)]
struct CloudState {
    disks: HashMap<String, DiskSet>,
    operations: HashMap<String, PendingOperation>,
    next_operation: u64,
    stats: CloudStats,
}

/// In-memory control plane; targets are keyed by id.
pub struct SimControlPlane {
    ctx: Arc<SimContext>,
    behavior: CloudBehavior,
    state: Mutex<CloudState>,
}

impl SimControlPlane {
    pub fn new(ctx: Arc<SimContext>, behavior: CloudBehavior) -> Self {
        Self {
            ctx,
            behavior,
            state: Mutex::new(CloudState::default()),
        }
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> CloudStats {
        self.lock().stats.clone()
    }

    fn lock(&self) -> MutexGuard<'_, CloudState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn execute(&self, state: &mut CloudState, target: &TargetRef, request: &ControlPlaneRequest) -> (OperationState, String) {
        match request {
            ControlPlaneRequest::DetachDisks { disks } => {
                let set = state.disks.entry(target.id.clone()).or_insert(DiskSet {
                    attached: true,
                    lag_remaining: 0,
                });
                set.attached = false;
                set.lag_remaining = self.behavior.disk_lag;
                (OperationState::Succeeded, format!("detached {}", disks.join(",")))
            }
            ControlPlaneRequest::AttachDisks { disks } => {
                let set = state.disks.entry(target.id.clone()).or_insert(DiskSet {
                    attached: false,
                    lag_remaining: 0,
                });
                set.attached = true;
                set.lag_remaining = self.behavior.disk_lag;
                (OperationState::Succeeded, format!("attached {}", disks.join(",")))
            }
            ControlPlaneRequest::RunCommand { command_id, parameters, .. } => {
                let phase = parameters
                    .iter()
                    .find(|(name, _)| name == chaos_core::control_plane::PHASE_PARAM)
                    .map(|(_, value)| value.as_str())
                    .unwrap_or("inject");
                match &self.behavior.command_error {
                    Some(message) if phase == "inject" => (
                        OperationState::Succeeded,
                        format!(
                            "Enable succeeded: \n[stdout]\n\n{}\nstress-ng: {} {}\n",
                            ERROR_SECTION_MARKER, ERROR_LINE_MARKER, message
                        ),
                    ),
                    _ => (
                        OperationState::Succeeded,
                        format!(
                            "Enable succeeded: \n[stdout]\n{} {} completed\n{}\n",
                            command_id, phase, ERROR_SECTION_MARKER
                        ),
                    ),
                }
            }
        }
    }
}

#[async_trait]
impl ControlPlane for SimControlPlane {
    async fn submit(&self, target: &TargetRef, request: ControlPlaneRequest) -> Result<OperationHandle, EnvError> {
        let mut state = self.lock();
        state.stats.submitted += 1;

        let (op_state, message) = self.execute(&mut state, target, &request);
        state.next_operation += 1;
        let handle = OperationHandle(format!("op-{}", state.next_operation));
        debug!("{:?} accepted {:?} for {}", handle, request, target);

        state.operations.insert(
            handle.0.clone(),
            PendingOperation {
                polls_left: self.behavior.pending_polls,
                state: op_state,
                result: OperationResult {
                    value: vec![InstanceViewStatus {
                        code: "ProvisioningState/succeeded".to_string(),
                        message,
                    }],
                },
            },
        );
        Ok(handle)
    }

    async fn poll(&self, handle: &OperationHandle) -> Result<PollStatus, EnvError> {
        let mut state = self.lock();
        state.stats.polls += 1;

        let op = state
            .operations
            .get_mut(&handle.0)
            .ok_or_else(|| EnvError::network(format!("unknown operation {}", handle.0)))?;
        if op.polls_left > 0 {
            op.polls_left -= 1;
            return Ok(PollStatus::Pending);
        }

        let done = state
            .operations
            .remove(&handle.0)
            .ok_or_else(|| EnvError::network(format!("unknown operation {}", handle.0)))?;
        Ok(PollStatus::Done {
            state: done.state,
            result: done.result,
        })
    }

    async fn observe(&self, target: &TargetRef) -> Result<String, EnvError> {
        let flaky = self.ctx.chance(self.behavior.observe_failure_rate);
        let mut state = self.lock();
        state.stats.observations += 1;
        if flaky {
            state.stats.failed_observations += 1;
            return Err(EnvError::network("control plane throttled the request"));
        }

        let stuck = self.behavior.stuck_detach;
        let Some(set) = state.disks.get_mut(&target.id) else {
            return Ok(VM_RUNNING.to_string());
        };

        let settled = if set.attached { DISK_ATTACHED } else { DISK_UNATTACHED };
        let transitional = if set.attached { DISK_ATTACHING } else { DISK_DETACHING };

        if stuck && !set.attached {
            return Ok(DISK_DETACHING.to_string());
        }
        if set.lag_remaining > 0 {
            set.lag_remaining -= 1;
            return Ok(transitional.to_string());
        }
        Ok(settled.to_string())
    }
}
