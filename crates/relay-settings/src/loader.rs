//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. If `~/.relay/settings.json` exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::RelaySettings;

/// Resolve the path to the settings file (`~/.relay/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".relay").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides, then validate.
///
/// If the file does not exist, defaults are used. Invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    load_with_env(path, |name| std::env::var(name).ok())
}

fn load_with_env(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: RelaySettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, env);
    settings.server.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
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

/// Apply `RELAY_*` environment variable overrides.
///
/// Invalid values are ignored with a warning (falling back to file/default).
pub fn apply_env_overrides(settings: &mut RelaySettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

fn apply_overrides(settings: &mut RelaySettings, env: impl Fn(&str) -> Option<String>) {
    let string = |name: &str| env(name).filter(|v| !v.is_empty());
    let server = &mut settings.server;

    if let Some(v) = string("RELAY_HOST") {
        server.host = v;
    }
    if let Some(v) = string("RELAY_PORT").and_then(|v| checked("RELAY_PORT", &v, parse_u16_range(&v, 0, 65535))) {
        server.port = v;
    }
    if let Some(v) = string("RELAY_CONNECTION_ID") {
        server.connection_id = v;
    }
    if let Some(v) = string("RELAY_TARGET_SKILL_ID") {
        server.target_skill_id = v;
    }
    if let Some(v) = string("RELAY_API_SPEC_PATH") {
        server.api_spec_path = Some(v);
    }
    if let Some(v) = string("RELAY_SSL_CERT_PATH") {
        server.ssl_cert_path = Some(v);
    }
    if let Some(v) = string("RELAY_SSL_KEY_PATH") {
        server.ssl_key_path = Some(v);
    }
    if let Some(v) = string("RELAY_RESPONSE_TIMEOUT_MS").and_then(|v| {
        checked("RELAY_RESPONSE_TIMEOUT_MS", &v, parse_u64_range(&v, 1, 3_600_000))
    }) {
        server.response_timeout_ms = v;
    }
    if let Some(v) = string("RELAY_INBOX_CAPACITY").and_then(|v| {
        checked("RELAY_INBOX_CAPACITY", &v, parse_usize_range(&v, 0, 1_000_000))
    }) {
        server.inbox_capacity = v;
    }
}

fn checked<T>(name: &str, raw: &str, parsed: Option<T>) -> Option<T> {
    if parsed.is_none() {
        warn!(key = name, value = %raw, "invalid env var, ignoring");
    }
    parsed
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
