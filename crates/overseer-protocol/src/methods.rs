//! RPC method names and the result shapes the client consumes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::content::extract_text;

/// Method names the client issues.
pub mod names {
    /// Handshake.
    pub const CONNECT: &str = "connect";
    /// Bulk session listing.
    pub const SESSIONS_LIST: &str = "sessions.list";
    /// Message history of one session.
    pub const CHAT_HISTORY: &str = "chat.history";
    /// Usage/cost summary (passed through untouched).
    pub const USAGE_COST: &str = "usage.cost";
    /// Gateway status (passed through untouched).
    pub const STATUS: &str = "status";
}

/// Result of `sessions.list`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsList {
    /// One row per known session.
    pub sessions: Vec<SessionRow>,
}

/// One row of `sessions.list`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRow {
    /// Session key.
    pub key: String,
    /// Last update (ms since epoch).
    #[serde(default)]
    pub updated_at: Option<i64>,
    /// Model in use.
    #[serde(default)]
    pub model: Option<String>,
    /// Cumulative prompt tokens.
    #[serde(default)]
    pub input_tokens: Option<u64>,
    /// Cumulative completion tokens.
    #[serde(default)]
    pub output_tokens: Option<u64>,
    /// Cumulative total tokens.
    #[serde(default)]
    pub total_tokens: Option<u64>,
    /// Whether the most recent run was aborted.
    #[serde(default)]
    pub aborted_last_run: bool,
    /// Explicit parent session, for spawned sub-agents.
    #[serde(default, alias = "spawnedBy")]
    pub parent_session_key: Option<String>,
    /// Optional display label.
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Parameters of `chat.history`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistoryParams {
    /// Session to read.
    pub session_key: String,
    /// Maximum number of messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

/// Result of `chat.history`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatHistory {
    /// Session the history belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    /// Messages, oldest first.
    pub messages: Vec<ChatMessage>,
}

/// One message of a chat history.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatMessage {
    /// `user`, `assistant`, `tool`, ...
    pub role: String,
    /// Raw content (string or typed blocks).
    pub content: Value,
    /// Message time (ms since epoch).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl ChatMessage {
    /// Text of this message, by the standard extraction rule.
    pub fn text(&self) -> Option<String> {
        extract_text(&self.content)
    }
}
