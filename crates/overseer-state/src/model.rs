//! Reconciled records exposed to readers.
//!
//! Everything here is a plain value: readers always receive clones, never
//! references into the reconciler.

use std::fmt;

use chrono::{DateTime, Utc};
use overseer_protocol::{SessionKey, Usage};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::retention::ProcessOutput;

/// Consumer-facing status of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// A run is producing output.
    Thinking,
    /// Recently finished a run.
    Active,
    /// Updated within the idle threshold.
    Idle,
    /// Updated recently and still consuming tokens.
    Working,
    /// Last run was aborted.
    Error,
    /// Not updated for a long time.
    Stopped,
}

impl SessionStatus {
    /// Lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Thinking => "thinking",
            Self::Active => "active",
            Self::Idle => "idle",
            Self::Working => "working",
            Self::Error => "error",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One conversation/agent context, identified by its full key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Canonical key.
    pub key: String,
    /// Parsed view of the key.
    pub parsed: SessionKey,
    /// Current status.
    pub status: SessionStatus,
    /// Model in use, from listings.
    pub model: Option<String>,
    /// Display label, from listings.
    pub display_name: Option<String>,
    /// Cumulative prompt tokens.
    pub input_tokens: Option<u64>,
    /// Cumulative completion tokens.
    pub output_tokens: Option<u64>,
    /// Cumulative total tokens.
    pub total_tokens: Option<u64>,
    /// Last time anything happened in this session.
    pub last_activity: Option<DateTime<Utc>>,
    /// Parent session, for sub-agents.
    pub parent_key: Option<String>,
    /// True when `parent_key` was inferred rather than reported.
    pub parent_inferred: bool,
}

impl Session {
    /// A fresh session with no observations yet.
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            parsed: SessionKey::parse(key),
            status: SessionStatus::Active,
            model: None,
            display_name: None,
            input_tokens: None,
            output_tokens: None,
            total_tokens: None,
            last_activity: None,
            parent_key: None,
            parent_inferred: false,
        }
    }
}

/// What an [`Action`] currently represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Run started.
    Start,
    /// Run is emitting output.
    Streaming,
    /// Run finished.
    Complete,
    /// Run aborted.
    Aborted,
    /// Run failed.
    Error,
    /// Tool invocation.
    ToolCall,
    /// Tool output.
    ToolResult,
}

impl ActionKind {
    /// Tool records are keyed separately from the run's primary record.
    pub fn is_tool(self) -> bool {
        matches!(self, Self::ToolCall | Self::ToolResult)
    }

    /// Lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Streaming => "streaming",
            Self::Complete => "complete",
            Self::Aborted => "aborted",
            Self::Error => "error",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reconciled record of one run's lifecycle or one tool call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    /// Run id for lifecycle records, `<runId>:<seq>` for tool records.
    pub id: String,
    /// Owning run.
    pub run_id: Option<String>,
    /// Owning session; `None` while unresolved.
    pub session_key: Option<String>,
    /// Sequence number of the latest event applied.
    pub seq: u64,
    /// Current state.
    pub kind: ActionKind,
    /// Latest text.
    pub content: Option<String>,
    /// Tool name, for tool records.
    pub tool_name: Option<String>,
    /// Tool arguments, for tool records.
    pub tool_args: Option<Value>,
    /// When the action began.
    pub started_at: DateTime<Utc>,
    /// When the action ended.
    pub ended_at: Option<DateTime<Utc>>,
    /// Last time the record changed.
    pub updated_at: DateTime<Utc>,
    /// Token usage of a finished run.
    pub usage: Option<Usage>,
    /// Stop reason of a finished run.
    pub stop_reason: Option<String>,
}

/// A process (exec) observed through exec events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    /// `<runId|unresolved>:<pid|->`.
    pub key: String,
    /// Owning run.
    pub run_id: Option<String>,
    /// Owning session; `None` while unresolved.
    pub session_key: Option<String>,
    /// OS process id.
    pub pid: Option<u64>,
    /// Command line.
    pub command: Option<String>,
    /// Start time.
    pub started_at: Option<DateTime<Utc>>,
    /// Completion time.
    pub ended_at: Option<DateTime<Utc>>,
    /// Exit code.
    pub exit_code: Option<i64>,
    /// Reported duration.
    pub duration_ms: Option<u64>,
    /// Retained output.
    pub output: ProcessOutput,
}

impl Process {
    /// An empty process record.
    pub fn new(key: String, run_id: Option<String>, pid: Option<u64>) -> Self {
        Self {
            key,
            run_id,
            session_key: None,
            pid,
            command: None,
            started_at: None,
            ended_at: None,
            exit_code: None,
            duration_ms: None,
            output: ProcessOutput::default(),
        }
    }

    /// Whether no completion has been seen yet.
    pub fn is_running(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// Change notification published by the reconciler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StateChange {
    /// A session was created or modified.
    SessionUpserted(String),
    /// An action was created or modified.
    ActionUpserted(String),
    /// A process was created or modified.
    ProcessUpdated(String),
    /// The oldest action was evicted to stay under the cap.
    ActionRemoved(String),
    /// The oldest process was evicted to stay under the cap.
    ProcessRemoved(String),
    /// All state was discarded.
    Reset,
}
