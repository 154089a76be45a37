//! Agent channel transport - request/feedback framing over a persistent link.
//!
//! # Frames
//!
//! ```text
//! engine ──► agent   {"id": <uuid>, "action": "EXECUTE_EXPERIMENT", "payload": {...}}
//! engine ◄── agent   {"id": <uuid>, "feedback": "ACTION_SUCCESSFUL", "payload": ""}
//! ```
//!
//! One request is outstanding per link at a time. Replies whose id does not
//! match the outstanding request are leftovers from a call that timed out
//! and are discarded.

use crate::action::{ActionPhase, ChaosAction};
use crate::convergence::StateObserver;
use crate::dispatch::ActionBackend;
use crate::feedback::RawResponse;
use async_trait::async_trait;
use chaos_env::{EnvError, TargetRef};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;
use uuid::Uuid;

/// Action name that applies the fault.
pub const EXECUTE_EXPERIMENT: &str = "EXECUTE_EXPERIMENT";

/// Action name that removes the fault.
pub const REVERT_EXPERIMENT: &str = "REVERT_EXPERIMENT";

/// Action name that asks for the current state; the feedback is the state token.
pub const CHECK_STATUS: &str = "CHECK_STATUS";

/// State reported while the fault is applied.
pub const STATE_INJECTED: &str = "CHAOS_INJECTED";

/// State reported once the fault is gone.
pub const STATE_REVERTED: &str = "CHAOS_REVERTED";

/// Request frame sent to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    pub id: Uuid,
    pub action: String,
    pub payload: serde_json::Value,
}

/// Reply frame received from an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentReply {
    pub id: Uuid,
    pub feedback: String,
    #[serde(default)]
    pub payload: String,
}

/// A persistent, bidirectional text-frame connection to one agent.
///
/// # Implementations
///
/// - **In-process**: [`ChannelLink`] over tokio mpsc channels
/// - **Remote**: [`crate::WsLink`] over WebSocket text messages
#[async_trait]
pub trait AgentLink: Send + Sync {
    /// Sends one frame.
    async fn send(&self, frame: String) -> Result<(), EnvError>;

    /// Receives the next frame; `Err` once the link is closed.
    async fn recv(&self) -> Result<String, EnvError>;
}

/// In-process link endpoint backed by a pair of mpsc channels.
pub struct ChannelLink {
    tx: mpsc::Sender<String>,
    rx: Mutex<mpsc::Receiver<String>>,
}

impl ChannelLink {
    /// Creates two connected endpoints: `(engine side, agent side)`.
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (to_agent, from_engine) = mpsc::channel(capacity);
        let (to_engine, from_agent) = mpsc::channel(capacity);
        (
            Self {
                tx: to_agent,
                rx: Mutex::new(from_agent),
            },
            Self {
                tx: to_engine,
                rx: Mutex::new(from_engine),
            },
        )
    }
}

#[async_trait]
impl AgentLink for ChannelLink {
    async fn send(&self, frame: String) -> Result<(), EnvError> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| EnvError::network("agent link closed"))
    }

    async fn recv(&self) -> Result<String, EnvError> {
        let mut rx = self.rx.lock().await;
        rx.recv()
            .await
            .ok_or_else(|| EnvError::network("agent link closed"))
    }
}

/// Backend that drives a remote agent over an [`AgentLink`].
pub struct AgentBackend {
    link: Arc<dyn AgentLink>,

    /// Serializes request/reply exchanges on the shared link
    exchange_lock: Mutex<()>,
}

impl AgentBackend {
    pub fn new(link: Arc<dyn AgentLink>) -> Self {
        Self {
            link,
            exchange_lock: Mutex::new(()),
        }
    }

    /// Sends one request and waits for the reply carrying the same id.
    pub async fn exchange(&self, action: &str, payload: serde_json::Value) -> Result<AgentReply, EnvError> {
        let _guard = self.exchange_lock.lock().await;

        let request = AgentRequest {
            id: Uuid::new_v4(),
            action: action.to_string(),
            payload,
        };
        let frame = serde_json::to_string(&request).map_err(EnvError::serialization)?;
        self.link.send(frame).await?;

        loop {
            let frame = self.link.recv().await?;
            let reply: AgentReply = serde_json::from_str(&frame).map_err(EnvError::serialization)?;
            if reply.id == request.id {
                return Ok(reply);
            }
            debug!("discarding stale agent reply {} while waiting for {}", reply.id, request.id);
        }
    }

    /// Builds the request payload for an action.
    fn action_payload(action: &ChaosAction) -> serde_json::Value {
        let mut payload = serde_json::Map::new();
        payload.insert("experimentName".to_string(), action.kind().into());
        payload.insert("target".to_string(), action.target().id.clone().into());
        for (key, value) in action.parameters() {
            payload.insert(key.clone(), value.clone().into());
        }
        serde_json::Value::Object(payload)
    }
}

#[async_trait]
impl StateObserver for AgentBackend {
    async fn observe_state(&self, target: &TargetRef) -> Result<String, EnvError> {
        let reply = self
            .exchange(CHECK_STATUS, serde_json::json!({ "target": target.id }))
            .await?;
        Ok(reply.feedback)
    }
}

#[async_trait]
impl ActionBackend for AgentBackend {
    fn name(&self) -> &str {
        "agent"
    }

    async fn dispatch(&self, action: &ChaosAction) -> Result<RawResponse, EnvError> {
        let name = match action.phase() {
            ActionPhase::Inject => EXECUTE_EXPERIMENT,
            ActionPhase::Revert => REVERT_EXPERIMENT,
        };
        let reply = self.exchange(name, Self::action_payload(action)).await?;
        debug!("agent feedback for {}: {}", action.label(), reply.feedback);
        Ok(RawResponse::new(reply.feedback, reply.payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::{ERROR_TOKEN, SUCCESS_TOKEN};
    use std::time::Duration;

    /// Answers every request on `link` with `feedback`, optionally preceded by a stale reply.
    fn spawn_agent(link: ChannelLink, feedback: &'static str, send_stale_first: bool) -> tokio::task::JoinHandle<Vec<AgentRequest>> {
        tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Ok(frame) = link.recv().await {
                let request: AgentRequest = serde_json::from_str(&frame).unwrap();
                if send_stale_first {
                    let stale = AgentReply {
                        id: Uuid::new_v4(),
                        feedback: ERROR_TOKEN.to_string(),
                        payload: String::new(),
                    };
                    link.send(serde_json::to_string(&stale).unwrap()).await.unwrap();
                }
                let reply = AgentReply {
                    id: request.id,
                    feedback: feedback.to_string(),
                    payload: String::new(),
                };
                seen.push(request);
                link.send(serde_json::to_string(&reply).unwrap()).await.unwrap();
            }
            seen
        })
    }

    #[tokio::test]
    async fn test_dispatch_uses_phase_action_names() {
        let (engine, agent) = ChannelLink::pair(8);
        let server = spawn_agent(agent, SUCCESS_TOKEN, false);
        let backend = AgentBackend::new(Arc::new(engine));

        let inject = ChaosAction::inject("os-network-latency", TargetRef::agent("eth0"), Duration::from_secs(60))
            .with_param("NetworkLatency", "2000");
        assert_eq!(backend.dispatch(&inject).await.unwrap().status, SUCCESS_TOKEN);
        assert_eq!(backend.dispatch(&inject.to_revert()).await.unwrap().status, SUCCESS_TOKEN);
        drop(backend);

        let seen = server.await.unwrap();
        assert_eq!(seen[0].action, EXECUTE_EXPERIMENT);
        assert_eq!(seen[1].action, REVERT_EXPERIMENT);
        assert_eq!(seen[0].payload["experimentName"], "os-network-latency");
        assert_eq!(seen[0].payload["NetworkLatency"], "2000");
    }

    #[tokio::test]
    async fn test_stale_replies_are_discarded() {
        let (engine, agent) = ChannelLink::pair(8);
        let _server = spawn_agent(agent, STATE_INJECTED, true);
        let backend = AgentBackend::new(Arc::new(engine));

        let state = backend.observe_state(&TargetRef::agent("eth0")).await.unwrap();
        assert_eq!(state, STATE_INJECTED);
    }

    #[tokio::test]
    async fn test_closed_link_is_transport_error() {
        let (engine, agent) = ChannelLink::pair(1);
        drop(agent);
        let backend = AgentBackend::new(Arc::new(engine));

        let err = backend
            .dispatch(&ChaosAction::inject("os-network-loss", TargetRef::agent("eth0"), Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, EnvError::NetworkError(_)));
    }
}
