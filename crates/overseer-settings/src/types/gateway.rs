//! Gateway connection settings.

use serde::{Deserialize, Serialize};

/// How to reach and authenticate with the gateway.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// WebSocket URL of the gateway.
    pub url: String,
    /// Opaque gateway token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Identity announced in the connect request.
    pub client: ClientIdentity,
    /// Requested role.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Requested scopes.
    pub scopes: Vec<String>,
    /// Client locale.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    /// User agent string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Window for the whole challenge/connect/hello exchange.
    pub handshake_timeout_ms: u64,
    /// Per-request deadline.
    pub request_timeout_ms: u64,
    /// Delay before the single reconnect attempt after an abnormal close.
    pub reconnect_delay_ms: u64,
    /// Whether to reconnect at all after an abnormal close.
    pub auto_reconnect: bool,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:18789".to_string(),
            token: None,
            client: ClientIdentity::default(),
            role: Some("operator".to_string()),
            scopes: vec!["operator.read".to_string()],
            locale: None,
            user_agent: Some(format!("overseer/{}", env!("CARGO_PKG_VERSION"))),
            handshake_timeout_ms: 10_000,
            request_timeout_ms: 30_000,
            reconnect_delay_ms: 5_000,
            auto_reconnect: true,
        }
    }
}

/// Client identity block.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientIdentity {
    /// Client identifier.
    pub id: String,
    /// Client version.
    pub version: String,
    /// Host OS.
    pub platform: String,
    /// Client mode.
    pub mode: String,
    /// Optional display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            id: "overseer".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            platform: std::env::consts::OS.to_string(),
            mode: "ui".to_string(),
            display_name: None,
        }
    }
}
