//! Challenge-response handshake payloads.
//!
//! The gateway opens every connection by pushing a `connect.challenge`
//! event. The client answers with a `connect` request carrying
//! [`ConnectParams`]; a successful response carries [`HelloOk`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::frames::StateVersion;

/// The only protocol version this client speaks.
pub const PROTOCOL_VERSION: u32 = 3;

/// Discriminant carried by a successful handshake payload.
pub const HELLO_OK: &str = "hello-ok";

/// Payload of the `connect.challenge` event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectChallenge {
    /// Server-issued nonce.
    pub nonce: String,
    /// Server timestamp (ms since epoch).
    #[serde(default)]
    pub ts: i64,
}

/// Client identity announced during the handshake.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Client identifier.
    pub id: String,
    /// Client version string.
    pub version: String,
    /// Host platform (e.g. `linux`).
    pub platform: String,
    /// Client mode (e.g. `ui`, `cli`).
    pub mode: String,
    /// Optional human-facing name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Credentials block of the connect request. The token is opaque.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectAuth {
    /// Gateway token, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Parameters of the `connect` request.
///
/// Protocol bounds are pinned to [`PROTOCOL_VERSION`]; everything else is
/// declarative metadata passed through verbatim.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    /// Lowest accepted protocol version.
    pub min_protocol: u32,
    /// Highest accepted protocol version.
    pub max_protocol: u32,
    /// Client identity.
    pub client: ClientInfo,
    /// Credentials.
    pub auth: ConnectAuth,
    /// Requested role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Requested scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    /// Advertised capabilities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caps: Option<Vec<String>>,
    /// Advertised commands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<Vec<String>>,
    /// Permission grants.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Map<String, Value>>,
    /// Client locale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    /// Client user agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl ConnectParams {
    /// Build connect params for a client with an optional token.
    pub fn new(client: ClientInfo, token: Option<String>) -> Self {
        Self {
            min_protocol: PROTOCOL_VERSION,
            max_protocol: PROTOCOL_VERSION,
            client,
            auth: ConnectAuth { token },
            role: None,
            scopes: None,
            caps: None,
            commands: None,
            permissions: None,
            locale: None,
            user_agent: None,
        }
    }
}

/// Successful handshake payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HelloOk {
    /// Always [`HELLO_OK`].
    #[serde(rename = "type")]
    pub kind: String,
    /// Negotiated protocol version.
    pub protocol: u32,
    /// Server identity.
    #[serde(default)]
    pub server: ServerInfo,
    /// Initial presence/health state.
    #[serde(default)]
    pub snapshot: Snapshot,
    /// Methods and events the server supports.
    #[serde(default)]
    pub features: Features,
}

impl HelloOk {
    /// Check the discriminant and protocol version.
    pub fn validate(&self) -> Result<(), String> {
        if self.kind != HELLO_OK {
            return Err(format!("unexpected handshake payload type '{}'", self.kind));
        }
        if self.protocol != PROTOCOL_VERSION {
            return Err(format!(
                "server negotiated protocol {} (client speaks {PROTOCOL_VERSION})",
                self.protocol
            ));
        }
        Ok(())
    }
}

/// Server identity block of [`HelloOk`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerInfo {
    /// Server version.
    pub version: String,
    /// Server host name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Connection id assigned by the server.
    pub conn_id: String,
}

/// Presence/health bundle returned at handshake completion.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Snapshot {
    /// Presence entries (one per connected client/node).
    pub presence: Vec<Value>,
    /// Health summary.
    pub health: Value,
    /// Snapshot version counters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_version: Option<StateVersion>,
}

/// Methods and events the server advertises.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Features {
    /// Supported RPC methods.
    pub methods: Vec<String>,
    /// Events the server may push.
    pub events: Vec<String>,
}
