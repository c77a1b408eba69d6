//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`GatewaySettings::default()`]
//! 2. If `~/.clawdbot/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `CLAWDBOT_*` environment overrides (highest priority)
//! 4. Validate the result

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::GatewaySettings;

/// Gateway URL override.
pub const ENV_URL: &str = "CLAWDBOT_GATEWAY_URL";
/// Auth token override.
pub const ENV_TOKEN: &str = "CLAWDBOT_GATEWAY_TOKEN";
/// Per-call deadline override (ms).
pub const ENV_REQUEST_TIMEOUT: &str = "CLAWDBOT_REQUEST_TIMEOUT_MS";
/// Connect deadline override (ms).
pub const ENV_CONNECT_TIMEOUT: &str = "CLAWDBOT_CONNECT_TIMEOUT_MS";
/// Log filter override.
pub const ENV_LOG_LEVEL: &str = "CLAWDBOT_LOG_LEVEL";
/// Auto-reconnect toggle.
pub const ENV_AUTO_RECONNECT: &str = "CLAWDBOT_AUTO_RECONNECT";

/// Shortest connect deadline accepted from any layer.
pub const MIN_CONNECT_TIMEOUT_MS: u64 = 100;

/// Resolve the path to the settings file (`~/.clawdbot/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".clawdbot").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<GatewaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<GatewaySettings> {
    load_settings_with_env(path, |name| std::env::var(name).ok())
}

/// Load settings from `path`, reading env overrides through `lookup`.
pub fn load_settings_with_env<F>(path: &Path, lookup: F) -> Result<GatewaySettings>
where
    F: Fn(&str) -> Option<String>,
{
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings, lookup);
    validate(&settings)?;
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<GatewaySettings> {
    let defaults = serde_json::to_value(GatewaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment overrides read through `lookup`.
///
/// Invalid values are logged and ignored (the file/default value stays).
pub fn apply_env_overrides<F>(settings: &mut GatewaySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read(ENV_URL) {
        settings.url = v;
    }
    if let Some(v) = read(ENV_TOKEN) {
        settings.token = Some(v);
    }
    if let Some(v) = read(ENV_REQUEST_TIMEOUT) {
        match parse_u64_range(&v, 1000, 600_000) {
            Some(ms) => settings.request_timeout_ms = ms,
            None => warn!(key = ENV_REQUEST_TIMEOUT, value = %v, "invalid u64 env var, ignoring"),
        }
    }
    if let Some(v) = read(ENV_CONNECT_TIMEOUT) {
        match parse_u64_range(&v, MIN_CONNECT_TIMEOUT_MS, 120_000) {
            Some(ms) => settings.connect_timeout_ms = ms,
            None => warn!(key = ENV_CONNECT_TIMEOUT, value = %v, "invalid u64 env var, ignoring"),
        }
    }
    if let Some(v) = read(ENV_LOG_LEVEL) {
        settings.log_level = v;
    }
    if let Some(v) = read(ENV_AUTO_RECONNECT) {
        match parse_bool(&v) {
            Some(enabled) => settings.reconnect.enabled = enabled,
            None => warn!(key = ENV_AUTO_RECONNECT, value = %v, "invalid boolean env var, ignoring"),
        }
    }
}

/// Reject settings the client cannot work with.
pub fn validate(settings: &GatewaySettings) -> Result<()> {
    if !(settings.url.starts_with("ws://") || settings.url.starts_with("wss://")) {
        return Err(SettingsError::InvalidValue(format!(
            "url must use ws:// or wss://, got {}",
            settings.url
        )));
    }
    if settings.request_timeout_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "requestTimeoutMs must be positive".into(),
        ));
    }
    if settings.connect_timeout_ms < MIN_CONNECT_TIMEOUT_MS {
        return Err(SettingsError::InvalidValue(format!(
            "connectTimeoutMs must be at least {MIN_CONNECT_TIMEOUT_MS}, got {}",
            settings.connect_timeout_ms
        )));
    }
    if settings.outbound_queue_capacity == 0 {
        return Err(SettingsError::InvalidValue(
            "outboundQueueCapacity must be positive".into(),
        ));
    }
    if !(0.0..=1.0).contains(&settings.reconnect.jitter_factor) {
        return Err(SettingsError::InvalidValue(format!(
            "reconnect.jitterFactor must be within 0..=1, got {}",
            settings.reconnect.jitter_factor
        )));
    }
    Ok(())
}

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"reconnect": {"enabled": true, "maxRetries": 5}});
        let source = serde_json::json!({"reconnect": {"maxRetries": 9}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["reconnect"]["maxRetries"], 9);
        assert_eq!(merged["reconnect"]["enabled"], true);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"url": "ws://a"});
        let source = serde_json::json!({"url": null});
        assert_eq!(deep_merge(target, source)["url"], "ws://a");
    }

    #[test]
    fn merge_new_keys_added() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"b": 2}));
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    // ── file layer ──────────────────────────────────────────────────

    #[test]
    fn missing_file_returns_defaults() {
        let settings = load_file_layer(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings, GatewaySettings::default());
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"url": "wss://gw.example:443", "reconnect": {"maxRetries": 2}}"#,
        )
        .unwrap();

        let settings = load_file_layer(&path).unwrap();
        assert_eq!(settings.url, "wss://gw.example:443");
        assert_eq!(settings.reconnect.max_retries, 2);
        assert_eq!(settings.reconnect.base_delay_ms, 1000);
        assert_eq!(settings.request_timeout_ms, 30_000);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{nope").unwrap();
        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)));
    }

    #[test]
    fn wrong_type_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"requestTimeoutMs": "soon"}"#).unwrap();
        assert!(load_file_layer(&path).is_err());
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_apply() {
        let mut s = GatewaySettings::default();
        apply_env_overrides(
            &mut s,
            env(&[
                (ENV_URL, "ws://10.0.0.2:18789"),
                (ENV_TOKEN, "tok"),
                (ENV_REQUEST_TIMEOUT, "5000"),
                (ENV_AUTO_RECONNECT, "off"),
                (ENV_LOG_LEVEL, "debug"),
            ]),
        );
        assert_eq!(s.url, "ws://10.0.0.2:18789");
        assert_eq!(s.token.as_deref(), Some("tok"));
        assert_eq!(s.request_timeout_ms, 5000);
        assert!(!s.reconnect.enabled);
        assert_eq!(s.log_level, "debug");
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut s = GatewaySettings::default();
        apply_env_overrides(
            &mut s,
            env(&[
                (ENV_REQUEST_TIMEOUT, "10"),
                (ENV_CONNECT_TIMEOUT, "abc"),
                (ENV_AUTO_RECONNECT, "maybe"),
                (ENV_TOKEN, ""),
            ]),
        );
        assert_eq!(s, GatewaySettings::default());
    }

    // ── validation ──────────────────────────────────────────────────

    #[test]
    fn rejects_non_websocket_url() {
        let s = GatewaySettings {
            url: "http://127.0.0.1:18789".into(),
            ..GatewaySettings::default()
        };
        assert!(matches!(validate(&s), Err(SettingsError::InvalidValue(_))));
    }

    #[test]
    fn rejects_out_of_range_jitter() {
        let mut s = GatewaySettings::default();
        s.reconnect.jitter_factor = 1.5;
        assert!(validate(&s).is_err());
    }

    #[test]
    fn rejects_connect_timeout_below_floor_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"connectTimeoutMs": 0}"#).unwrap();
        let err = load_settings_with_env(&path, env(&[])).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(ref m) if m.contains("connectTimeoutMs")));

        std::fs::write(&path, r#"{"connectTimeoutMs": 100}"#).unwrap();
        let settings = load_settings_with_env(&path, env(&[])).unwrap();
        assert_eq!(settings.connect_timeout_ms, 100);
    }

    #[test]
    fn env_layer_applies_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"url": "ws://file:1", "token": "from-file"}"#).unwrap();
        let settings =
            load_settings_with_env(&path, env(&[(ENV_URL, "wss://env:443")])).unwrap();
        assert_eq!(settings.url, "wss://env:443");
        assert_eq!(settings.token.as_deref(), Some("from-file"));
    }

    #[test]
    fn defaults_validate() {
        assert!(validate(&GatewaySettings::default()).is_ok());
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for v in ["true", "1", "YES", "On"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "0", "no", "OFF"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_u64_range_bounds() {
        assert_eq!(parse_u64_range("1000", 1000, 2000), Some(1000));
        assert_eq!(parse_u64_range("2000", 1000, 2000), Some(2000));
        assert_eq!(parse_u64_range("999", 1000, 2000), None);
        assert_eq!(parse_u64_range("-1", 0, 10), None);
    }
}
