//! Session key parsing.
//!
//! Grammar: `agent:<agentId>:<platform>:<relationKind>:<recipient>`.
//!
//! The full key string is the canonical identity of a session; the parsed
//! fields only feed display and classification. Parsing is total: malformed
//! keys degrade to best-effort fields (`"unknown"`) and never fail.
//!
//! Recipient rule: when token 3 is a known relation kind, the recipient is
//! tokens 4.. joined with `:`; otherwise it is tokens 3.. joined with `:`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Placeholder for fields a malformed key does not provide.
pub const UNKNOWN: &str = "unknown";

/// How a session relates to its recipient.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    /// Public channel.
    Channel,
    /// Group conversation.
    Group,
    /// Direct message.
    Dm,
    /// Thread inside a channel.
    Thread,
    /// Spawned sub-agent.
    Subagent,
}

impl RelationKind {
    /// Parse a relation token.
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "channel" => Some(Self::Channel),
            "group" => Some(Self::Group),
            "dm" => Some(Self::Dm),
            "thread" => Some(Self::Thread),
            "subagent" => Some(Self::Subagent),
            _ => None,
        }
    }

    /// Wire token for this relation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Channel => "channel",
            Self::Group => "group",
            Self::Dm => "dm",
            Self::Thread => "thread",
            Self::Subagent => "subagent",
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed view of a session key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKey {
    /// The key exactly as received.
    pub raw: String,
    /// Agent id (token 1).
    pub agent_id: String,
    /// Platform (token 2).
    pub platform: String,
    /// Relation kind (token 3), when recognised.
    pub relation: Option<RelationKind>,
    /// Recipient portion (see module docs for the slicing rule).
    pub recipient: String,
    /// True iff the relation is `group` or `channel`.
    pub is_group: bool,
}

impl SessionKey {
    /// Parse a key. Never fails.
    pub fn parse(key: &str) -> Self {
        let tokens: Vec<&str> = key.split(':').collect();
        let well_formed = tokens.first() == Some(&"agent");

        let field = |idx: usize| -> String {
            tokens
                .get(idx)
                .filter(|t| well_formed && !t.is_empty())
                .map_or_else(|| UNKNOWN.to_string(), |t| (*t).to_string())
        };
        let agent_id = field(1);
        let platform = field(2);

        let relation = tokens
            .get(3)
            .filter(|_| well_formed)
            .and_then(|t| RelationKind::parse(t));
        let recipient_start = if relation.is_some() { 4 } else { 3 };
        let recipient = if well_formed && tokens.len() > recipient_start {
            tokens[recipient_start..].join(":")
        } else {
            String::new()
        };
        let is_group = matches!(relation, Some(RelationKind::Group | RelationKind::Channel));

        Self {
            raw: key.to_string(),
            agent_id,
            platform,
            relation,
            recipient,
            is_group,
        }
    }

    /// Whether the key names a spawned sub-agent.
    ///
    /// Accepts both the full grammar (`agent:<id>:<platform>:subagent:<x>`)
    /// and the short form `agent:<id>:subagent:<x>`.
    pub fn is_subagent(&self) -> bool {
        self.relation == Some(RelationKind::Subagent) || self.platform == "subagent"
    }

    /// Rebuild a key from its parts.
    pub fn format(
        agent_id: &str,
        platform: &str,
        relation: RelationKind,
        recipient: &str,
    ) -> String {
        format!("agent:{agent_id}:{platform}:{relation}:{recipient}")
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
