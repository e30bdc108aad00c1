//! Event normalizer: raw event frame → optional reconciler update.
//!
//! Pure and total. Payloads are validated through
//! [`GatewayEvent::parse`]; anything that fails validation, any system
//! event and any unrecognised event yields `None` and touches nothing.

use chrono::{DateTime, Utc};
use overseer_protocol::{
    AgentEvent, ChatEvent, ChatState, EventFrame, ExecCompleted, ExecOutput, ExecStarted,
    GatewayEvent, Usage, extract_message_text, is_system_event,
};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::model::{ActionKind, SessionStatus};

/// Bucket name used in keys when an exec event carries no run id.
pub const UNRESOLVED: &str = "unresolved";

/// Session-side effect of one event.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionDelta {
    /// Session key as carried by the event, if any.
    pub key: Option<String>,
    /// Status implied by the event; `None` only touches activity.
    pub status: Option<SessionStatus>,
    /// Activity instant.
    pub last_activity: DateTime<Utc>,
}

/// Action-side effect of one event.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionUpdate {
    /// Record id (run id, or run id + sequence for tool records).
    pub id: String,
    /// Event sequence number.
    pub seq: u64,
    /// New state.
    pub kind: ActionKind,
    /// New content; `None` keeps the previous content.
    pub content: Option<String>,
    /// Tool name.
    pub tool_name: Option<String>,
    /// Tool arguments.
    pub tool_args: Option<Value>,
    /// Explicit start instant.
    pub started_at: Option<DateTime<Utc>>,
    /// Explicit end instant.
    pub ended_at: Option<DateTime<Utc>>,
    /// Usage (final chat events only).
    pub usage: Option<Usage>,
    /// Stop reason (final chat events only).
    pub stop_reason: Option<String>,
}

impl ActionUpdate {
    fn new(id: String, seq: u64, kind: ActionKind) -> Self {
        Self {
            id,
            seq,
            kind,
            content: None,
            tool_name: None,
            tool_args: None,
            started_at: None,
            ended_at: None,
            usage: None,
            stop_reason: None,
        }
    }
}

/// Process-side effect of one exec event.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessUpdate {
    /// `<runId|unresolved>:<pid|->`.
    pub key: String,
    /// OS process id.
    pub pid: Option<u64>,
    /// What happened.
    pub event: ProcessEvent,
}

/// Process lifecycle step.
#[derive(Clone, Debug, PartialEq)]
pub enum ProcessEvent {
    /// `exec.started`.
    Started {
        /// Command line.
        command: Option<String>,
        /// Start instant.
        at: DateTime<Utc>,
    },
    /// `exec.output`.
    Output {
        /// Stream name.
        stream: Option<String>,
        /// Chunk text.
        text: String,
        /// Arrival instant.
        at: DateTime<Utc>,
    },
    /// `exec.completed`.
    Completed {
        /// Exit code.
        exit_code: Option<i64>,
        /// Reported duration.
        duration_ms: Option<u64>,
        /// Completion instant.
        at: DateTime<Utc>,
    },
}

/// Everything one event contributes to the reconciled state.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedUpdate {
    /// Run the event belongs to.
    pub run_id: Option<String>,
    /// Session effect.
    pub session: SessionDelta,
    /// Action effect.
    pub action: Option<ActionUpdate>,
    /// Process effect.
    pub process: Option<ProcessUpdate>,
}

/// Normalize one event frame observed at `now`.
pub fn normalize(frame: &EventFrame, now: DateTime<Utc>) -> Option<NormalizedUpdate> {
    if is_system_event(&frame.event) {
        return None;
    }
    let event = match GatewayEvent::parse(frame) {
        Ok(event) => event,
        Err(err) => {
            warn!(event = %frame.event, error = %err, "ignoring malformed event");
            return None;
        }
    };
    match event {
        GatewayEvent::Chat(chat) => Some(from_chat(chat, now)),
        GatewayEvent::Agent(agent) => from_agent(agent, now),
        GatewayEvent::ExecStarted(exec) => Some(from_exec_started(exec, frame.seq, now)),
        GatewayEvent::ExecOutput(exec) => Some(from_exec_output(exec, frame.seq, now)),
        GatewayEvent::ExecCompleted(exec) => Some(from_exec_completed(exec, frame.seq, now)),
        GatewayEvent::Unknown { name } => {
            debug!(event = %name, "ignoring unrecognised event");
            None
        }
        GatewayEvent::Challenge(_)
        | GatewayEvent::Health(_)
        | GatewayEvent::Tick(_)
        | GatewayEvent::Presence(_) => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// chat
// ─────────────────────────────────────────────────────────────────────────────

fn from_chat(chat: ChatEvent, now: DateTime<Utc>) -> NormalizedUpdate {
    let kind = match chat.state {
        ChatState::Delta => ActionKind::Streaming,
        ChatState::Final => ActionKind::Complete,
        ChatState::Aborted => ActionKind::Aborted,
        ChatState::Error => ActionKind::Error,
    };
    let status = if chat.state == ChatState::Delta {
        SessionStatus::Thinking
    } else {
        SessionStatus::Active
    };

    let mut action = ActionUpdate::new(chat.run_id.clone(), chat.seq, kind);
    action.content = chat
        .message
        .as_ref()
        .and_then(extract_message_text)
        .or(chat.error_message);
    if chat.state == ChatState::Final {
        action.usage = chat.usage;
        action.stop_reason = chat.stop_reason;
    }
    if chat.state != ChatState::Delta {
        action.ended_at = Some(now);
    }

    NormalizedUpdate {
        run_id: Some(chat.run_id),
        session: SessionDelta {
            key: Some(chat.session_key),
            status: Some(status),
            last_activity: now,
        },
        action: Some(action),
        process: None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// agent
// ─────────────────────────────────────────────────────────────────────────────

fn from_agent(agent: AgentEvent, now: DateTime<Utc>) -> Option<NormalizedUpdate> {
    let data = &agent.data;
    let event_ts = agent.ts.and_then(DateTime::from_timestamp_millis);
    let instant = |field: &str| {
        data.get(field)
            .and_then(Value::as_i64)
            .and_then(DateTime::from_timestamp_millis)
            .or(event_ts)
    };

    let (action, status) = if agent.stream == "lifecycle" {
        match data.get("phase").and_then(Value::as_str) {
            Some("start") => {
                let mut action =
                    ActionUpdate::new(agent.run_id.clone(), agent.seq, ActionKind::Start);
                action.started_at = instant("startedAt");
                (action, Some(SessionStatus::Thinking))
            }
            Some("end") => {
                let mut action =
                    ActionUpdate::new(agent.run_id.clone(), agent.seq, ActionKind::Complete);
                action.ended_at = instant("endedAt");
                (action, Some(SessionStatus::Active))
            }
            _ => return None,
        }
    } else if let Some(text) = data
        .get("text")
        .and_then(Value::as_str)
        .filter(|_| agent.stream == "assistant")
    {
        let mut action =
            ActionUpdate::new(agent.run_id.clone(), agent.seq, ActionKind::Streaming);
        action.content = Some(text.to_string());
        (action, Some(SessionStatus::Thinking))
    } else {
        let tool_id = format!("{}:{}", agent.run_id, agent.seq);
        match data.get("type").and_then(Value::as_str) {
            Some("tool_use") => {
                let mut action = ActionUpdate::new(tool_id, agent.seq, ActionKind::ToolCall);
                action.tool_name = data.get("name").and_then(Value::as_str).map(str::to_string);
                action.tool_args = data.get("input").cloned();
                action.started_at = event_ts;
                (action, None)
            }
            Some("tool_result") => {
                let mut action = ActionUpdate::new(tool_id, agent.seq, ActionKind::ToolResult);
                action.content = data.get("content").map(|content| match content {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                });
                action.ended_at = event_ts;
                (action, None)
            }
            _ => return None,
        }
    };

    Some(NormalizedUpdate {
        run_id: Some(agent.run_id),
        session: SessionDelta {
            key: agent.session_key,
            status,
            last_activity: now,
        },
        action: Some(action),
        process: None,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// exec
// ─────────────────────────────────────────────────────────────────────────────

/// Process key for a run/pid pair. Without a pid the frame `seq` stands in.
pub fn process_key(run_id: Option<&str>, pid: Option<u64>, seq: Option<u64>) -> String {
    format!("{}:{}", run_id.unwrap_or(UNRESOLVED), exec_discriminator(pid, seq))
}

fn exec_action_id(run_id: Option<&str>, pid: Option<u64>, seq: Option<u64>) -> String {
    format!("{}:exec:{}", run_id.unwrap_or(UNRESOLVED), exec_discriminator(pid, seq))
}

fn exec_discriminator(pid: Option<u64>, seq: Option<u64>) -> String {
    pid.or(seq).map_or_else(|| "-".to_string(), |n| n.to_string())
}

fn exec_update(
    run_id: Option<String>,
    session_key: Option<String>,
    now: DateTime<Utc>,
    action: Option<ActionUpdate>,
    process: ProcessUpdate,
) -> NormalizedUpdate {
    NormalizedUpdate {
        run_id,
        session: SessionDelta {
            key: session_key,
            status: None,
            last_activity: now,
        },
        action,
        process: Some(process),
    }
}

fn from_exec_started(
    exec: ExecStarted,
    seq: Option<u64>,
    now: DateTime<Utc>,
) -> NormalizedUpdate {
    let at = exec.ts.and_then(DateTime::from_timestamp_millis).unwrap_or(now);
    let run = exec.run_id.as_deref();

    let mut action = ActionUpdate::new(
        exec_action_id(run, exec.pid, seq),
        seq.unwrap_or(0),
        ActionKind::ToolCall,
    );
    action.tool_name = Some("exec".to_string());
    action.tool_args = Some(json!({ "command": exec.command }));
    action.started_at = Some(at);

    let process = ProcessUpdate {
        key: process_key(run, exec.pid, seq),
        pid: exec.pid,
        event: ProcessEvent::Started {
            command: exec.command,
            at,
        },
    };
    exec_update(exec.run_id, exec.session_key, now, Some(action), process)
}

fn from_exec_output(
    exec: ExecOutput,
    seq: Option<u64>,
    now: DateTime<Utc>,
) -> NormalizedUpdate {
    let at = exec.ts.and_then(DateTime::from_timestamp_millis).unwrap_or(now);
    let process = ProcessUpdate {
        key: process_key(exec.run_id.as_deref(), exec.pid, seq),
        pid: exec.pid,
        event: ProcessEvent::Output {
            stream: exec.stream,
            text: exec.output,
            at,
        },
    };
    exec_update(exec.run_id, exec.session_key, now, None, process)
}

fn from_exec_completed(
    exec: ExecCompleted,
    seq: Option<u64>,
    now: DateTime<Utc>,
) -> NormalizedUpdate {
    let at = exec.ts.and_then(DateTime::from_timestamp_millis).unwrap_or(now);
    let run = exec.run_id.as_deref();

    let mut action = ActionUpdate::new(
        format!("{}:exit", exec_action_id(run, exec.pid, seq)),
        seq.unwrap_or(0),
        ActionKind::ToolResult,
    );
    action.tool_name = Some("exec".to_string());
    action.content = exec.exit_code.map(|code| format!("exit code {code}"));
    action.ended_at = Some(at);

    let process = ProcessUpdate {
        key: process_key(run, exec.pid, seq),
        pid: exec.pid,
        event: ProcessEvent::Completed {
            exit_code: exec.exit_code,
            duration_ms: exec.duration_ms,
            at,
        },
    };
    exec_update(exec.run_id, exec.session_key, now, Some(action), process)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
