//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`TetherSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply `TETHER_*` environment overrides (highest priority)
//!
//! Objects merge recursively. Arrays and primitives are replaced by the
//! user value. A `null` in the user file keeps the default.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{LogFormat, LogLevel, TetherSettings};

/// Resolve the path to the settings file (`~/.tether/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tether").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TetherSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON, or values that fail
/// validation, are errors.
pub fn load_settings_from_path(path: &Path) -> Result<TetherSettings> {
    let defaults = serde_json::to_value(TetherSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: TetherSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
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
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are logged and ignored, leaving the file/default value.
pub fn apply_env_overrides(settings: &mut TetherSettings) {
    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("TETHER_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("TETHER_PORT", 0, 65535) {
        settings.server.port = v;
    }

    // ── Socket ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("TETHER_BASE_URL") {
        settings.socket.base_url = v;
    }
    if let Some(v) = read_env_bool("TETHER_EDITABLE") {
        settings.socket.editable = v;
    }
    if let Some(v) = read_env_string("TETHER_ALLOWED_ORIGINS") {
        settings.socket.allowed_origins = Some(parse_list(&v));
    }
    if let Some(v) = read_env_string("TETHER_FORWARDED_HEADERS") {
        settings.socket.forwarded_headers = parse_list(&v);
    }
    if let Some(v) = read_env_u64("TETHER_PING_INTERVAL_MS", 100, 3_600_000) {
        settings.socket.ping_interval_ms = v;
    }
    if let Some(v) = read_env_u64("TETHER_RECONNECT_TIMEOUT_MS", 0, 3_600_000) {
        settings.socket.reconnect_timeout_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("TETHER_LOG_LEVEL") {
        match parse_log_level(&v) {
            Some(level) => settings.logging.level = level,
            None => tracing::warn!(key = "TETHER_LOG_LEVEL", value = %v, "invalid log level, ignoring"),
        }
    }
    if let Some(v) = read_env_string("TETHER_LOG_FORMAT") {
        match parse_log_format(&v) {
            Some(format) => settings.logging.format = format,
            None => tracing::warn!(key = "TETHER_LOG_FORMAT", value = %v, "invalid log format, ignoring"),
        }
    }
}

fn validate(settings: &TetherSettings) -> Result<()> {
    if settings.socket.ping_interval_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "socket.pingIntervalMs must be positive".to_string(),
        ));
    }
    if !settings.socket.base_url.ends_with('/') {
        return Err(SettingsError::InvalidValue(format!(
            "socket.baseUrl must end with '/': {}",
            settings.socket.base_url
        )));
    }
    if settings.server.max_message_size == 0 {
        return Err(SettingsError::InvalidValue(
            "server.maxMessageSize must be positive".to_string(),
        ));
    }
    Ok(())
}

// ── Pure parsing functions ──────────────────────────────────────────────────

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

/// Split a comma-separated list, trimming entries and dropping empties.
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn parse_log_level(val: &str) -> Option<LogLevel> {
    serde_json::from_value(Value::String(val.to_lowercase())).ok()
}

pub fn parse_log_format(val: &str) -> Option<LogFormat> {
    serde_json::from_value(Value::String(val.to_lowercase())).ok()
}

// ── Env var readers ─────────────────────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}
