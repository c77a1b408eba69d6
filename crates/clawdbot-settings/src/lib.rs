//! # clawdbot-settings
//!
//! Configuration for the Clawdbot Gateway client, loaded from three layers
//! (in priority order):
//! 1. **Compiled defaults**: [`GatewaySettings::default()`]
//! 2. **User file**: `~/.clawdbot/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `CLAWDBOT_*` overrides (highest priority)
//!
//! There is no process-wide instance: load once and hand the value to the
//! client constructor.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    deep_merge, load_settings, load_settings_from_path, load_settings_with_env, settings_path,
};
pub use types::{GatewaySettings, ReconnectSettings};
