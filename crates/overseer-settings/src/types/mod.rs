//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and
//! `#[serde(default)]`, so a partial JSON file only needs the fields it
//! changes.

mod gateway;
mod reconciler;

pub use gateway::*;
pub use reconciler::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Upper bound for any configured window or threshold (one week).
pub const MAX_INTERVAL_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Root settings type.
///
/// ```json
/// {
///   "gateway": { "url": "wss://gw.example:18789", "token": "..." },
///   "reconciler": { "subagentWindowMs": 15000 },
///   "logging": { "level": "info" }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OverseerSettings {
    /// Settings schema version.
    pub version: String,
    /// Gateway connection settings.
    pub gateway: GatewaySettings,
    /// State reconciler tuning.
    pub reconciler: ReconcilerSettings,
    /// Process output retention limits.
    pub output: OutputSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for OverseerSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            gateway: GatewaySettings::default(),
            reconciler: ReconcilerSettings::default(),
            output: OutputSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl OverseerSettings {
    /// Reject combinations the client cannot run with.
    pub fn validate(&self) -> Result<()> {
        let url = &self.gateway.url;
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(SettingsError::InvalidValue(format!(
                "gateway.url must use ws:// or wss:// (got '{url}')"
            )));
        }
        if self.gateway.handshake_timeout_ms == 0 || self.gateway.request_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "gateway timeouts must be non-zero".into(),
            ));
        }
        let r = &self.reconciler;
        for (name, value) in [
            ("subagentWindowMs", r.subagent_window_ms),
            ("workingThresholdMs", r.working_threshold_ms),
            ("idleThresholdMs", r.idle_threshold_ms),
        ] {
            if value > MAX_INTERVAL_MS {
                return Err(SettingsError::InvalidValue(format!(
                    "reconciler.{name} must be at most {MAX_INTERVAL_MS} (got {value})"
                )));
            }
        }
        if r.idle_threshold_ms < r.working_threshold_ms {
            return Err(SettingsError::InvalidValue(
                "reconciler.idleThresholdMs must not be below workingThresholdMs".into(),
            ));
        }
        if r.change_capacity == 0 || r.max_actions == 0 || r.max_processes == 0 {
            return Err(SettingsError::InvalidValue(
                "reconciler capacities must be at least 1".into(),
            ));
        }
        if self.output.max_chunk_chars == 0 || self.output.max_chunks == 0 {
            return Err(SettingsError::InvalidValue(
                "output limits must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
