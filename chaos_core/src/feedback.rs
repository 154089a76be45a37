//! Feedback Interpreter - turns a raw backend reply into an [`ActionOutcome`].
//!
//! # Feedback grammar
//!
//! A raw response is a status token plus a free-form payload. Only two
//! tokens are recognised:
//!
//! ```text
//! ACTION_SUCCESSFUL             -> Success
//! ERROR   + payload             -> FatalFailure(<message>)
//! <anything else>               -> FatalFailure("unrecognized feedback: <token>")
//! ```
//!
//! An error payload is newline-delimited. The error detail starts at a line
//! that is exactly the section marker; the message is the text after the
//! first `error:` marker on any later line:
//!
//! ```text
//! payload  := line* marker-line line* error-line line*
//! marker   := "[stderr]"                  (whole line, surrounding blanks ignored)
//! error    := <prefix> "error:" <message> (message trimmed, non-empty)
//! ```
//!
//! A payload without a marker line, or without a non-empty message after
//! it, is malformed. Everything here is pure: no I/O, no clocks.

use crate::action::ChaosAction;
use crate::dispatch::DispatchError;
use crate::error::ChaosError;
use serde::{Deserialize, Serialize};

/// Status token for a completed action.
pub const SUCCESS_TOKEN: &str = "ACTION_SUCCESSFUL";

/// Status token for a failed action; the payload carries the reason.
pub const ERROR_TOKEN: &str = "ERROR";

/// Line that opens the error detail section of a payload.
pub const ERROR_SECTION_MARKER: &str = "[stderr]";

/// Marker preceding the error message inside the detail section.
pub const ERROR_LINE_MARKER: &str = "error:";

/// Message used when an error payload cannot be parsed.
pub const MALFORMED_ERROR_PAYLOAD: &str = "malformed error payload";

/// Message used when the target has no reachable backend.
pub const TARGET_UNREACHABLE: &str = "target unreachable";

/// Reply from a backend, before interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawResponse {
    /// Feedback token
    pub status: String,

    /// Free-form payload (error detail, command output)
    pub payload: String,
}

impl RawResponse {
    pub fn new(status: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            payload: payload.into(),
        }
    }

    /// A success reply with an empty payload.
    pub fn success() -> Self {
        Self::new(SUCCESS_TOKEN, "")
    }

    /// An error reply carrying `payload`.
    pub fn error(payload: impl Into<String>) -> Self {
        Self::new(ERROR_TOKEN, payload)
    }

    /// An error reply whose payload is a well-formed detail section for `message`.
    pub fn error_message(message: &str) -> Self {
        Self::error(format!("{}\n{} {}", ERROR_SECTION_MARKER, ERROR_LINE_MARKER, message))
    }

    /// Converts command output (stdout/stderr sections) into a reply.
    ///
    /// The output is an error exactly when the grammar yields a message.
    pub fn from_command_output(output: &str) -> Self {
        if extract_error_message(output).is_some() {
            Self::error(output)
        } else {
            Self::new(SUCCESS_TOKEN, output)
        }
    }
}

/// Structured result of one dispatch.
///
/// Built only by [`interpret`] and [`classify`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ActionOutcome {
    Success,
    TransientFailure(String),
    FatalFailure(String),
    Timeout,
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ActionOutcome::Success)
    }

    /// Maps the outcome onto the engine's error taxonomy.
    pub fn into_result(self, action: &ChaosAction) -> Result<(), ChaosError> {
        let target = action.target().clone();
        let label = action.label();
        match self {
            ActionOutcome::Success => Ok(()),
            ActionOutcome::TransientFailure(message) => Err(ChaosError::Transport {
                target,
                action: label,
                message,
            }),
            ActionOutcome::FatalFailure(message) => Err(ChaosError::Fatal {
                target,
                action: label,
                message,
            }),
            ActionOutcome::Timeout => Err(ChaosError::Timeout {
                target,
                action: label,
                after: action.timeout(),
            }),
        }
    }
}

/// Interprets a backend reply.
pub fn interpret(raw: &RawResponse) -> ActionOutcome {
    match raw.status.as_str() {
        SUCCESS_TOKEN => ActionOutcome::Success,
        ERROR_TOKEN => match extract_error_message(&raw.payload) {
            Some(message) => ActionOutcome::FatalFailure(message),
            None => ActionOutcome::FatalFailure(MALFORMED_ERROR_PAYLOAD.to_string()),
        },
        other => ActionOutcome::FatalFailure(format!("unrecognized feedback: {}", other)),
    }
}

/// Interprets a whole dispatch result, including failures to get a reply at all.
pub fn classify(result: &Result<RawResponse, DispatchError>) -> ActionOutcome {
    match result {
        Ok(raw) => interpret(raw),
        Err(DispatchError::Timeout(_)) => ActionOutcome::Timeout,
        Err(DispatchError::Unreachable(_)) => ActionOutcome::FatalFailure(TARGET_UNREACHABLE.to_string()),
        Err(DispatchError::InvalidAction(msg)) => ActionOutcome::FatalFailure(msg.clone()),
        Err(DispatchError::Transport(err)) => ActionOutcome::TransientFailure(err.to_string()),
    }
}

/// Extracts the error message from a payload, per the module grammar.
pub fn extract_error_message(payload: &str) -> Option<String> {
    payload
        .lines()
        .skip_while(|line| line.trim() != ERROR_SECTION_MARKER)
        .skip(1)
        .filter_map(|line| {
            let at = line.find(ERROR_LINE_MARKER)?;
            let message = line[at + ERROR_LINE_MARKER.len()..].trim();
            (!message.is_empty()).then(|| message.to_string())
        })
        .next()
}
