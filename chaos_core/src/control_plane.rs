//! Control-plane transport - submit an operation, then poll its handle.
//!
//! Disk detach/attach and run-command are long-running operations on the
//! cloud control plane. The backend submits one operation per action and
//! polls it every `poll_interval` until it finishes; the dispatcher's
//! timeout bounds the whole sequence.

use crate::action::{ActionPhase, ChaosAction};
use crate::convergence::StateObserver;
use crate::dispatch::ActionBackend;
use crate::error::ChaosError;
use crate::feedback::{RawResponse, ERROR_LINE_MARKER, ERROR_SECTION_MARKER};
use async_trait::async_trait;
use chaos_env::{ChaosContext, EnvError, TargetRef};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Parameter holding the comma-separated disk names of a disk action.
pub const DISKS_PARAM: &str = "disks";

/// Parameter telling the run-command script which half of the fault to apply.
pub const PHASE_PARAM: &str = "Phase";

/// Status token for a canceled operation (never a success).
pub const CANCELED_TOKEN: &str = "OPERATION_CANCELED";

/// Operating system family of a VM; picks the run-command flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Linux,
    Windows,
}

impl OsFamily {
    /// Run-command id for scripts on this OS.
    pub fn command_id(&self) -> &'static str {
        match self {
            OsFamily::Linux => "RunShellScript",
            OsFamily::Windows => "RunPowerShellScript",
        }
    }
}

/// A long-running operation to submit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlPlaneRequest {
    /// Remove the named data disks from the VM, keeping the rest
    DetachDisks { disks: Vec<String> },

    /// Attach the named data disks to the VM
    AttachDisks { disks: Vec<String> },

    /// Run a script on the VM
    RunCommand {
        command_id: String,
        script: Vec<String>,
        parameters: Vec<(String, String)>,
    },
}

/// Opaque handle returned by a submit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationHandle(pub String);

/// Terminal state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationState {
    Succeeded,
    Failed,
    Canceled,
}

/// One status entry of an operation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceViewStatus {
    pub code: String,
    pub message: String,
}

/// Result object of a finished operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub value: Vec<InstanceViewStatus>,
}

impl OperationResult {
    /// Message of the first status entry, if any.
    pub fn first_message(&self) -> Option<&str> {
        self.value.first().map(|status| status.message.as_str())
    }
}

/// Answer to a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    Pending,
    Done {
        state: OperationState,
        result: OperationResult,
    },
}

/// Client for the cloud control plane.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Starts an operation against `target`.
    async fn submit(&self, target: &TargetRef, request: ControlPlaneRequest) -> Result<OperationHandle, EnvError>;

    /// Reports progress of a submitted operation.
    async fn poll(&self, handle: &OperationHandle) -> Result<PollStatus, EnvError>;

    /// Reads the fault-relevant state of `target` (e.g. its disk state).
    async fn observe(&self, target: &TargetRef) -> Result<String, EnvError>;
}

/// Backend that maps actions onto control-plane operations.
pub struct ControlPlaneBackend<Ctx: ChaosContext> {
    ctx: Arc<Ctx>,
    api: Arc<dyn ControlPlane>,
    poll_interval: Duration,
    os: OsFamily,
    script: Vec<String>,
}

impl<Ctx: ChaosContext> ControlPlaneBackend<Ctx> {
    pub fn new(ctx: Arc<Ctx>, api: Arc<dyn ControlPlane>, poll_interval: Duration) -> Self {
        Self {
            ctx,
            api,
            poll_interval,
            os: OsFamily::Linux,
            script: Vec::new(),
        }
    }

    /// Sets the OS family of the targets this backend serves.
    pub fn with_os(mut self, os: OsFamily) -> Self {
        self.os = os;
        self
    }

    /// Sets the script lines sent with every run-command.
    pub fn with_script(mut self, script: Vec<String>) -> Self {
        self.script = script;
        self
    }

    /// Loads the run-command script from a file, one line per entry.
    pub fn with_script_file(self, path: impl AsRef<Path>) -> Result<Self, ChaosError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ChaosError::config(format!("cannot read script {}: {}", path.display(), e)))?;
        let script: Vec<String> = contents.lines().map(str::to_string).collect();
        if script.is_empty() {
            return Err(ChaosError::config(format!("script {} is empty", path.display())));
        }
        info!("Loaded {} script lines from {}", script.len(), path.display());
        Ok(self.with_script(script))
    }

    /// Builds the operation for an action.
    ///
    /// Actions carrying a `disks` parameter become detach (inject) or
    /// attach (revert); everything else becomes a run-command whose
    /// parameters are the action's, plus the phase.
    pub fn request_for(&self, action: &ChaosAction) -> Result<ControlPlaneRequest, ChaosError> {
        if let Some(disks) = action.param(DISKS_PARAM) {
            let disks: Vec<String> = disks
                .split(',')
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string)
                .collect();
            if disks.is_empty() {
                return Err(ChaosError::action(format!("{} names no disks", action.label())));
            }
            return Ok(match action.phase() {
                ActionPhase::Inject => ControlPlaneRequest::DetachDisks { disks },
                ActionPhase::Revert => ControlPlaneRequest::AttachDisks { disks },
            });
        }

        let mut parameters: Vec<(String, String)> = action
            .parameters()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        parameters.push((PHASE_PARAM.to_string(), action.phase().to_string()));

        Ok(ControlPlaneRequest::RunCommand {
            command_id: self.os.command_id().to_string(),
            script: self.script.clone(),
            parameters,
        })
    }

    /// Converts a finished operation into a raw reply.
    pub fn response_for(state: OperationState, result: &OperationResult) -> RawResponse {
        let message = result.first_message().unwrap_or_default();
        match state {
            OperationState::Succeeded => RawResponse::from_command_output(message),
            OperationState::Failed => {
                let reply = RawResponse::from_command_output(message);
                if reply.status == crate::feedback::ERROR_TOKEN {
                    reply
                } else {
                    // Failed without a parsable detail section: wrap the whole message.
                    let detail = if message.trim().is_empty() { "operation failed" } else { message.trim() };
                    RawResponse::error(format!(
                        "{}\n{} {}",
                        ERROR_SECTION_MARKER,
                        ERROR_LINE_MARKER,
                        detail.replace('\n', " ")
                    ))
                }
            }
            OperationState::Canceled => RawResponse::new(CANCELED_TOKEN, message),
        }
    }
}

#[async_trait]
impl<Ctx: ChaosContext> StateObserver for ControlPlaneBackend<Ctx> {
    async fn observe_state(&self, target: &TargetRef) -> Result<String, EnvError> {
        self.api.observe(target).await
    }
}

#[async_trait]
impl<Ctx: ChaosContext> ActionBackend for ControlPlaneBackend<Ctx> {
    fn name(&self) -> &str {
        "control-plane"
    }

    async fn dispatch(&self, action: &ChaosAction) -> Result<RawResponse, EnvError> {
        let request = self.request_for(action).map_err(EnvError::rejected)?;

        let handle = self.api.submit(action.target(), request).await?;
        debug!("submitted {} for {} as {:?}", action.label(), action.target(), handle);

        let mut polls = 0u32;
        loop {
            polls += 1;
            match self.api.poll(&handle).await? {
                PollStatus::Pending => self.ctx.sleep(self.poll_interval).await,
                PollStatus::Done { state, result } => {
                    for status in &result.value {
                        info!("RunCommand result: {}", status.message);
                    }
                    debug!("{:?} finished as {:?} after {} polls", handle, state, polls);
                    return Ok(Self::response_for(state, &result));
                }
            }
        }
    }
}
