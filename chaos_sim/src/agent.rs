//! Simulated fault-injection agent speaking the agent frame protocol.

use crate::context::SimContext;
use chaos_core::agent_link::{
    AgentLink, AgentReply, AgentRequest, ChannelLink, CHECK_STATUS, EXECUTE_EXPERIMENT, REVERT_EXPERIMENT,
    STATE_INJECTED, STATE_REVERTED,
};
use chaos_core::feedback::{ERROR_LINE_MARKER, ERROR_SECTION_MARKER, ERROR_TOKEN, SUCCESS_TOKEN};
use chaos_env::ChaosContext;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// How the simulated agent misbehaves.
#[derive(Debug, Clone, Default)]
pub struct AgentBehavior {
    /// Fixed delay before every reply
    pub response_delay: Duration,

    /// Extra random delay in `[0, jitter]`
    pub jitter: Duration,

    /// Reject every inject with this tool error
    pub inject_error: Option<String>,

    /// Answer injects with a token the engine does not know
    pub garbled_feedback: bool,

    /// Status checks that still report the old state after a change
    pub status_lag: u32,
}

/// Requests seen by the agent.
#[derive(Debug, Clone, Default)]
pub struct AgentStats {
    pub executes: u32,
    pub reverts: u32,
    pub status_checks: u32,
    pub malformed_frames: u32,
}

impl AgentStats {
    pub fn total(&self) -> u32 {
        self.executes + self.reverts + self.status_checks
    }
}

struct AgentState {
    reported: &'static str,
    actual: &'static str,
    lag_remaining: u32,
}

/// A remote agent applying network chaos on one interface.
pub struct SimAgent {
    ctx: Arc<SimContext>,
    link: ChannelLink,
    behavior: AgentBehavior,
    state: AgentState,
    stats: Arc<Mutex<AgentStats>>,
}

impl SimAgent {
    /// Starts an agent task and returns the engine's end of its link.
    pub fn spawn(ctx: Arc<SimContext>, behavior: AgentBehavior) -> (ChannelLink, Arc<Mutex<AgentStats>>) {
        let (engine_side, agent_side) = ChannelLink::pair(16);
        let stats = Arc::new(Mutex::new(AgentStats::default()));

        let agent = SimAgent {
            ctx: ctx.clone(),
            link: agent_side,
            behavior,
            state: AgentState {
                reported: STATE_REVERTED,
                actual: STATE_REVERTED,
                lag_remaining: 0,
            },
            stats: stats.clone(),
        };
        ctx.spawn("sim-agent", agent.serve());

        (engine_side, stats)
    }

    /// Answers requests until the engine drops its end of the link.
    async fn serve(mut self) {
        while let Ok(frame) = self.link.recv().await {
            let request: AgentRequest = match serde_json::from_str(&frame) {
                Ok(request) => request,
                Err(e) => {
                    warn!("agent dropped malformed frame: {}", e);
                    self.with_stats(|s| s.malformed_frames += 1);
                    continue;
                }
            };

            let delay = self.behavior.response_delay + self.ctx.jitter(self.behavior.jitter);
            self.ctx.sleep(delay).await;

            let (feedback, payload) = self.handle(&request);
            let reply = AgentReply {
                id: request.id,
                feedback,
                payload,
            };
            let frame = match serde_json::to_string(&reply) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("agent could not encode reply: {}", e);
                    continue;
                }
            };
            if self.link.send(frame).await.is_err() {
                break;
            }
        }
        debug!("sim agent link closed");
    }

    fn handle(&mut self, request: &AgentRequest) -> (String, String) {
        match request.action.as_str() {
            EXECUTE_EXPERIMENT => {
                self.with_stats(|s| s.executes += 1);
                if let Some(message) = &self.behavior.inject_error {
                    let payload = format!("[stdout]\n\n{}\ntc: {} {}", ERROR_SECTION_MARKER, ERROR_LINE_MARKER, message);
                    return (ERROR_TOKEN.to_string(), payload);
                }
                if self.behavior.garbled_feedback {
                    return ("ACTION_DONE".to_string(), String::new());
                }
                self.transition(STATE_INJECTED);
                (SUCCESS_TOKEN.to_string(), String::new())
            }
            REVERT_EXPERIMENT => {
                self.with_stats(|s| s.reverts += 1);
                self.transition(STATE_REVERTED);
                (SUCCESS_TOKEN.to_string(), String::new())
            }
            CHECK_STATUS => {
                self.with_stats(|s| s.status_checks += 1);
                if self.state.lag_remaining > 0 {
                    self.state.lag_remaining -= 1;
                } else {
                    self.state.reported = self.state.actual;
                }
                (self.state.reported.to_string(), String::new())
            }
            other => (ERROR_TOKEN.to_string(), format!("{}\n{} unknown action {}", ERROR_SECTION_MARKER, ERROR_LINE_MARKER, other)),
        }
    }

    fn transition(&mut self, to: &'static str) {
        if self.state.actual != to {
            self.state.actual = to;
            self.state.lag_remaining = self.behavior.status_lag;
        }
    }

    fn with_stats(&self, f: impl FnOnce(&mut AgentStats)) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::sim_runtime;
    use chaos_core::agent_link::AgentBackend;
    use chaos_core::convergence::StateObserver;
    use chaos_core::dispatch::ActionBackend;
    use chaos_core::feedback::{interpret, ActionOutcome};
    use chaos_core::ChaosAction;
    use chaos_env::TargetRef;

    fn inject() -> ChaosAction {
        ChaosAction::inject("os-network-latency", TargetRef::agent("agent-0"), Duration::from_secs(60))
    }

    #[test]
    fn test_status_lags_behind_inject() {
        let rt = sim_runtime().unwrap();
        rt.block_on(async {
            let ctx = SimContext::shared(1);
            let behavior = AgentBehavior {
                status_lag: 2,
                ..AgentBehavior::default()
            };
            let (link, stats) = SimAgent::spawn(ctx, behavior);
            let backend = AgentBackend::new(Arc::new(link));
            let target = TargetRef::agent("agent-0");

            assert_eq!(backend.dispatch(&inject()).await.unwrap().status, SUCCESS_TOKEN);
            assert_eq!(backend.observe_state(&target).await.unwrap(), STATE_REVERTED);
            assert_eq!(backend.observe_state(&target).await.unwrap(), STATE_REVERTED);
            assert_eq!(backend.observe_state(&target).await.unwrap(), STATE_INJECTED);

            let stats = stats.lock().unwrap().clone();
            assert_eq!(stats.executes, 1);
            assert_eq!(stats.status_checks, 3);
        });
    }

    #[test]
    fn test_inject_error_carries_tool_message() {
        let rt = sim_runtime().unwrap();
        rt.block_on(async {
            let behavior = AgentBehavior {
                inject_error: Some("cannot find device \"eth9\"".to_string()),
                ..AgentBehavior::default()
            };
            let (link, _) = SimAgent::spawn(SimContext::shared(1), behavior);
            let backend = AgentBackend::new(Arc::new(link));

            let raw = backend.dispatch(&inject()).await.unwrap();
            assert_eq!(
                interpret(&raw),
                ActionOutcome::FatalFailure("cannot find device \"eth9\"".to_string())
            );
        });
    }

    #[test]
    fn test_response_delay_uses_virtual_time() {
        let rt = sim_runtime().unwrap();
        rt.block_on(async {
            let ctx = SimContext::shared(1);
            let behavior = AgentBehavior {
                response_delay: Duration::from_secs(30),
                ..AgentBehavior::default()
            };
            let (link, _) = SimAgent::spawn(ctx.clone(), behavior);
            let backend = AgentBackend::new(Arc::new(link));

            backend.dispatch(&inject()).await.unwrap();
            assert_eq!(ctx.now(), Duration::from_secs(30));
        });
    }
}
