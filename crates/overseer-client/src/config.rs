//! Client configuration resolved from settings.

use std::time::Duration;

use overseer_protocol::{ClientInfo, ConnectParams};
use overseer_settings::GatewaySettings;

/// Everything the client needs to open and maintain a gateway link.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Gateway WebSocket URL.
    pub url: String,
    /// Opaque gateway token.
    pub token: Option<String>,
    /// Identity sent in the connect request.
    pub client: ClientInfo,
    /// Requested role.
    pub role: Option<String>,
    /// Requested scopes (omitted from the request when empty).
    pub scopes: Vec<String>,
    /// Client locale.
    pub locale: Option<String>,
    /// User agent string.
    pub user_agent: Option<String>,
    /// Window for challenge, connect and hello together.
    pub handshake_timeout: Duration,
    /// Deadline for each request.
    pub request_timeout: Duration,
    /// Delay before reconnecting after an abnormal close.
    pub reconnect_delay: Duration,
    /// Whether to reconnect after an abnormal close.
    pub auto_reconnect: bool,
}

impl ClientConfig {
    /// Defaults pointed at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Resolve from the `gateway` settings section.
    pub fn from_settings(settings: &GatewaySettings) -> Self {
        Self {
            url: settings.url.clone(),
            token: settings.token.clone(),
            client: ClientInfo {
                id: settings.client.id.clone(),
                version: settings.client.version.clone(),
                platform: settings.client.platform.clone(),
                mode: settings.client.mode.clone(),
                display_name: settings.client.display_name.clone(),
            },
            role: settings.role.clone(),
            scopes: settings.scopes.clone(),
            locale: settings.locale.clone(),
            user_agent: settings.user_agent.clone(),
            handshake_timeout: Duration::from_millis(settings.handshake_timeout_ms),
            request_timeout: Duration::from_millis(settings.request_timeout_ms),
            reconnect_delay: Duration::from_millis(settings.reconnect_delay_ms),
            auto_reconnect: settings.auto_reconnect,
        }
    }

    /// Connect request parameters for `token`.
    pub fn connect_params(&self, token: Option<String>) -> ConnectParams {
        let mut params = ConnectParams::new(self.client.clone(), token);
        params.role.clone_from(&self.role);
        params.scopes = (!self.scopes.is_empty()).then(|| self.scopes.clone());
        params.locale.clone_from(&self.locale);
        params.user_agent.clone_from(&self.user_agent);
        params
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_settings(&GatewaySettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_settings() {
        let config = ClientConfig::default();
        assert_eq!(config.url, "ws://127.0.0.1:18789");
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert!(config.auto_reconnect);
        assert_eq!(config.client.id, "overseer");
    }

    #[test]
    fn new_overrides_url_only() {
        let config = ClientConfig::new("ws://gw:1");
        assert_eq!(config.url, "ws://gw:1");
        assert_eq!(config.role.as_deref(), Some("operator"));
    }

    #[test]
    fn connect_params_carry_metadata() {
        let config = ClientConfig::default();
        let params = config.connect_params(Some("T".into()));
        assert_eq!(params.min_protocol, 3);
        assert_eq!(params.max_protocol, 3);
        assert_eq!(params.auth.token.as_deref(), Some("T"));
        assert_eq!(params.role.as_deref(), Some("operator"));
        assert_eq!(params.scopes, Some(vec!["operator.read".to_string()]));
    }

    #[test]
    fn empty_scopes_are_omitted() {
        let mut config = ClientConfig::default();
        config.scopes.clear();
        assert!(config.connect_params(None).scopes.is_none());
    }

    #[test]
    fn from_settings_converts_durations() {
        let settings = GatewaySettings {
            request_timeout_ms: 250,
            auto_reconnect: false,
            ..GatewaySettings::default()
        };
        let config = ClientConfig::from_settings(&settings);
        assert_eq!(config.request_timeout, Duration::from_millis(250));
        assert!(!config.auto_reconnect);
    }
}
