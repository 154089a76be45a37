//! Action Dispatcher - exactly one remote call per action, bounded by its timeout.
//!
//! Backends are selected once per experiment through [`BackendRegistry`];
//! the timeline never branches on the target kind after that.
//!
//! ```text
//! TimelineController ──dispatch(action)──► ActionDispatcher ──► dyn ActionBackend
//!                                              │                   ├─ AgentBackend (persistent link)
//!                                              │                   └─ ControlPlaneBackend (submit + poll)
//!                                              └── ctx.timeout(action.timeout)
//! ```

use crate::action::ChaosAction;
use crate::convergence::StateObserver;
use crate::feedback::RawResponse;
use async_trait::async_trait;
use chaos_env::{ChaosContext, EnvError, TargetKind, TargetRef};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// A remote executor able to apply actions to, and observe, its targets.
#[async_trait]
pub trait ActionBackend: StateObserver {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Performs the remote call for `action`.
    ///
    /// Implementations make exactly one logical remote request and never retry.
    async fn dispatch(&self, action: &ChaosAction) -> Result<RawResponse, EnvError>;
}

/// Why a dispatch produced no reply to interpret.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// No backend serves the target, or the backend reports it unreachable
    #[error("target unreachable: {0}")]
    Unreachable(String),

    /// The per-call bound elapsed
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    /// The request or reply was lost
    #[error(transparent)]
    Transport(EnvError),

    /// The action violates its input constraints
    #[error("{0}")]
    InvalidAction(String),
}

/// Maps target kinds to the backend that serves them.
#[derive(Default, Clone)]
pub struct BackendRegistry {
    backends: HashMap<TargetKind, Arc<dyn ActionBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `backend` for every target of `kind`.
    pub fn with_backend(mut self, kind: TargetKind, backend: Arc<dyn ActionBackend>) -> Self {
        self.backends.insert(kind, backend);
        self
    }

    /// Selects the backend for `target`.
    pub fn resolve(&self, target: &TargetRef) -> Result<Arc<dyn ActionBackend>, DispatchError> {
        if target.kind == TargetKind::ScaleSetMember && target.scale_set_parts().is_none() {
            return Err(DispatchError::Unreachable(format!(
                "{} is not a <scaleSet>_<vmId> name",
                target
            )));
        }

        self.backends
            .get(&target.kind)
            .cloned()
            .ok_or_else(|| DispatchError::Unreachable(format!("no backend serves {}", target)))
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.backends.keys().collect();
        kinds.sort();
        f.debug_struct("BackendRegistry").field("kinds", &kinds).finish()
    }
}

/// Sends actions to one resolved backend.
pub struct ActionDispatcher<Ctx: ChaosContext> {
    ctx: Arc<Ctx>,
    backend: Arc<dyn ActionBackend>,
}

impl<Ctx: ChaosContext> ActionDispatcher<Ctx> {
    pub fn new(ctx: Arc<Ctx>, backend: Arc<dyn ActionBackend>) -> Self {
        Self { ctx, backend }
    }

    /// Resolves `target` through `registry` and binds the dispatcher to it.
    pub fn resolve(ctx: Arc<Ctx>, registry: &BackendRegistry, target: &TargetRef) -> Result<Self, DispatchError> {
        let backend = registry.resolve(target)?;
        debug!("{} served by backend {}", target, backend.name());
        Ok(Self::new(ctx, backend))
    }

    /// The backend, for state observation.
    pub fn backend(&self) -> &dyn ActionBackend {
        self.backend.as_ref()
    }

    /// Performs one remote call for `action`.
    pub async fn dispatch(&self, action: &ChaosAction) -> Result<RawResponse, DispatchError> {
        if action.timeout().is_zero() {
            return Err(DispatchError::InvalidAction(format!(
                "{} has a zero timeout",
                action.label()
            )));
        }

        debug!(
            "dispatching {} to {} via {} (timeout {:?})",
            action.label(),
            action.target(),
            self.backend.name(),
            action.timeout()
        );

        match self.ctx.timeout(action.timeout(), self.backend.dispatch(action)).await {
            Ok(Ok(raw)) => Ok(raw),
            Ok(Err(EnvError::TargetUnreachable(target))) => Err(DispatchError::Unreachable(target)),
            Ok(Err(EnvError::Rejected(reason))) => Err(DispatchError::InvalidAction(reason)),
            Ok(Err(err)) if err.is_timeout() => Err(DispatchError::Timeout(action.timeout())),
            Ok(Err(err)) => {
                warn!("{} to {} failed in transport: {}", action.label(), action.target(), err);
                Err(DispatchError::Transport(err))
            }
            Err(_) => {
                warn!("{} to {} timed out after {:?}", action.label(), action.target(), action.timeout());
                Err(DispatchError::Timeout(action.timeout()))
            }
        }
    }
}
