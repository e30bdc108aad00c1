//! Typed push-event payloads.
//!
//! [`GatewayEvent::parse`] is the schema boundary: a raw [`EventFrame`] is
//! turned into a discriminated union over the event name, and every
//! payload is validated by `serde` before any field is trusted.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::frames::EventFrame;
use crate::handshake::ConnectChallenge;

/// Event names the client understands.
pub mod names {
    /// Handshake challenge.
    pub const CONNECT_CHALLENGE: &str = "connect.challenge";
    /// Chat run progress.
    pub const CHAT: &str = "chat";
    /// Agent stream progress.
    pub const AGENT: &str = "agent";
    /// Process started.
    pub const EXEC_STARTED: &str = "exec.started";
    /// Process output chunk.
    pub const EXEC_OUTPUT: &str = "exec.output";
    /// Process finished.
    pub const EXEC_COMPLETED: &str = "exec.completed";
    /// Health snapshot.
    pub const HEALTH: &str = "health";
    /// Keepalive tick.
    pub const TICK: &str = "tick";
    /// Presence snapshot.
    pub const PRESENCE: &str = "presence";
}

/// Events that carry no session/action semantics.
pub const SYSTEM_EVENTS: [&str; 3] = [names::HEALTH, names::TICK, names::PRESENCE];

/// Whether an event name is a system event.
pub fn is_system_event(name: &str) -> bool {
    SYSTEM_EVENTS.contains(&name)
}

/// A push payload failed schema validation.
#[derive(Debug, Error)]
#[error("invalid '{event}' payload: {reason}")]
pub struct PayloadError {
    /// Event name.
    pub event: String,
    /// What was wrong.
    pub reason: String,
}

/// Push event, discriminated by name.
#[derive(Clone, Debug, PartialEq)]
pub enum GatewayEvent {
    /// `connect.challenge`.
    Challenge(ConnectChallenge),
    /// `chat`.
    Chat(ChatEvent),
    /// `agent`.
    Agent(AgentEvent),
    /// `exec.started`.
    ExecStarted(ExecStarted),
    /// `exec.output`.
    ExecOutput(ExecOutput),
    /// `exec.completed`.
    ExecCompleted(ExecCompleted),
    /// `health`.
    Health(Value),
    /// `tick`.
    Tick(Value),
    /// `presence`.
    Presence(Value),
    /// Anything else.
    Unknown {
        /// Event name as received.
        name: String,
    },
}

impl GatewayEvent {
    /// Validate and type a raw event frame.
    pub fn parse(frame: &EventFrame) -> Result<Self, PayloadError> {
        let payload = frame.payload.clone().unwrap_or(Value::Null);
        let name = frame.event.as_str();
        Ok(match name {
            names::CONNECT_CHALLENGE => Self::Challenge(typed(name, payload)?),
            names::CHAT => Self::Chat(typed(name, payload)?),
            names::AGENT => Self::Agent(typed(name, payload)?),
            names::EXEC_STARTED => Self::ExecStarted(typed(name, payload)?),
            names::EXEC_OUTPUT => Self::ExecOutput(typed(name, payload)?),
            names::EXEC_COMPLETED => Self::ExecCompleted(typed(name, payload)?),
            names::HEALTH => Self::Health(payload),
            names::TICK => Self::Tick(payload),
            names::PRESENCE => Self::Presence(payload),
            other => Self::Unknown {
                name: other.to_string(),
            },
        })
    }
}

fn typed<T: DeserializeOwned>(event: &str, payload: Value) -> Result<T, PayloadError> {
    serde_json::from_value(payload).map_err(|e| PayloadError {
        event: event.to_string(),
        reason: e.to_string(),
    })
}

/// Token usage attached to a finished run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Usage {
    /// Prompt tokens.
    #[serde(alias = "input")]
    pub input_tokens: u64,
    /// Completion tokens.
    #[serde(alias = "output")]
    pub output_tokens: u64,
    /// Prompt tokens served from cache.
    #[serde(alias = "cacheRead")]
    pub cache_read_tokens: u64,
    /// Prompt tokens written to cache.
    #[serde(alias = "cacheWrite")]
    pub cache_write_tokens: u64,
    /// Total tokens as reported by the gateway.
    #[serde(alias = "total")]
    pub total_tokens: u64,
}

/// State of a chat run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatState {
    /// Partial output.
    Delta,
    /// Run finished.
    Final,
    /// Run aborted.
    Aborted,
    /// Run failed.
    Error,
}

/// `chat` payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    /// Run id.
    pub run_id: String,
    /// Session key.
    pub session_key: String,
    /// Per-run sequence number.
    #[serde(default)]
    pub seq: u64,
    /// Run state.
    pub state: ChatState,
    /// Message (string or object with `content`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    /// Error text for `error` state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Token usage (meaningful on `final`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Stop reason (meaningful on `final`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

/// `agent` payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEvent {
    /// Run id.
    pub run_id: String,
    /// Per-run sequence number.
    #[serde(default)]
    pub seq: u64,
    /// Stream name (`lifecycle`, `assistant`, `tool`, ...).
    #[serde(default)]
    pub stream: String,
    /// Event time (ms since epoch).
    #[serde(default)]
    pub ts: Option<i64>,
    /// Stream-specific data.
    #[serde(default)]
    pub data: Value,
    /// Session key, when the gateway includes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
}

/// `exec.started` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecStarted {
    /// Owning run.
    #[serde(default)]
    pub run_id: Option<String>,
    /// Owning session (often omitted).
    #[serde(default)]
    pub session_key: Option<String>,
    /// OS process id.
    #[serde(default)]
    pub pid: Option<u64>,
    /// Command line.
    #[serde(default)]
    pub command: Option<String>,
    /// Start time (ms since epoch).
    #[serde(default)]
    pub ts: Option<i64>,
}

/// `exec.output` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecOutput {
    /// Owning run.
    #[serde(default)]
    pub run_id: Option<String>,
    /// Owning session (often omitted).
    #[serde(default)]
    pub session_key: Option<String>,
    /// OS process id.
    #[serde(default)]
    pub pid: Option<u64>,
    /// `stdout` or `stderr`.
    #[serde(default)]
    pub stream: Option<String>,
    /// Output chunk.
    #[serde(alias = "chunk")]
    pub output: String,
    /// Chunk time (ms since epoch).
    #[serde(default)]
    pub ts: Option<i64>,
}

/// `exec.completed` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecCompleted {
    /// Owning run.
    #[serde(default)]
    pub run_id: Option<String>,
    /// Owning session (often omitted).
    #[serde(default)]
    pub session_key: Option<String>,
    /// OS process id.
    #[serde(default)]
    pub pid: Option<u64>,
    /// Exit code.
    #[serde(default)]
    pub exit_code: Option<i64>,
    /// Wall-clock duration.
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// Completion time (ms since epoch).
    #[serde(default)]
    pub ts: Option<i64>,
}
