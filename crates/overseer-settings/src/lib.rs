//! # overseer-settings
//!
//! Configuration for the overseer gateway client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`OverseerSettings::default()`]
//! 2. **User file**: `~/.overseer/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `OVERSEER_*` overrides (highest priority)
//!
//! There is no global instance. Callers load settings once and hand the
//! relevant sections to the client and reconciler constructors.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, parse_bool,
    parse_u64_range, settings_path,
};
pub use types::*;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = OverseerSettings::default();
        let path = settings_path();
        assert!(path.ends_with(".overseer/settings.json"));
    }

    #[test]
    fn default_settings_are_valid() {
        let settings = OverseerSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.gateway.url, "ws://127.0.0.1:18789");
        assert_eq!(settings.gateway.handshake_timeout_ms, 10_000);
        assert_eq!(settings.gateway.request_timeout_ms, 30_000);
        assert_eq!(settings.gateway.reconnect_delay_ms, 5_000);
        assert!(settings.gateway.auto_reconnect);
        assert_eq!(settings.reconciler.subagent_window_ms, 10_000);
        assert_eq!(settings.reconciler.activity_history, 10);
        assert_eq!(settings.output.max_chunks, 200);
        assert_eq!(settings.logging.level, "warn");
    }
}
