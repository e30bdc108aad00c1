//! Connection status and the gateway-level snapshot.

use std::fmt;

use chrono::{DateTime, Utc};
use overseer_protocol::events::names as event_names;
use overseer_protocol::{EventFrame, HelloOk, StateVersion};
use serde::Serialize;
use serde_json::Value;

/// Lifecycle of the gateway link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No link.
    Disconnected,
    /// Socket opening or handshake in flight.
    Connecting,
    /// Handshake completed.
    Connected,
    /// The last attempt failed.
    Error,
}

impl ConnectionStatus {
    /// Lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Presence and health as last reported by the gateway.
///
/// Seeded from the handshake and kept current by the `health`, `presence`
/// and `tick` system events.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySnapshot {
    /// Presence entries.
    pub presence: Vec<Value>,
    /// Health summary.
    pub health: Value,
    /// Latest version counters seen.
    pub state_version: Option<StateVersion>,
    /// When the last keepalive tick arrived.
    pub last_tick: Option<DateTime<Utc>>,
}

impl GatewaySnapshot {
    /// Initial snapshot from a successful handshake.
    pub fn from_hello(hello: &HelloOk) -> Self {
        Self {
            presence: hello.snapshot.presence.clone(),
            health: hello.snapshot.health.clone(),
            state_version: hello.snapshot.state_version.clone(),
            last_tick: None,
        }
    }

    /// Fold one system event in. Returns whether it was a system event.
    pub fn apply_system_event(&mut self, frame: &EventFrame, now: DateTime<Utc>) -> bool {
        match frame.event.as_str() {
            event_names::HEALTH => {
                if let Some(payload) = &frame.payload {
                    self.health = payload.clone();
                }
            }
            event_names::PRESENCE => {
                let entries = match &frame.payload {
                    Some(Value::Array(entries)) => Some(entries.clone()),
                    Some(Value::Object(map)) => {
                        map.get("presence").and_then(Value::as_array).cloned()
                    }
                    _ => None,
                };
                if let Some(entries) = entries {
                    self.presence = entries;
                }
            }
            event_names::TICK => self.last_tick = Some(now),
            _ => return false,
        }
        if let Some(version) = &frame.state_version {
            let current = self.state_version.get_or_insert_with(StateVersion::default);
            if version.presence.is_some() {
                current.presence = version.presence;
            }
            if version.health.is_some() {
                current.health = version.health;
            }
        }
        true
    }
}
