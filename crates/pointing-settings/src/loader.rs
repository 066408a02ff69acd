//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`PointingSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate cross-field constraints
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{LogFormat, PointingSettings};

/// Resolve the default settings file path (`~/.pointing/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".pointing").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<PointingSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<PointingSettings> {
    load_settings_with_env(path, |name| std::env::var(name).ok())
}

/// Load settings from `path`, reading overrides through `lookup` instead
/// of the process environment.
pub fn load_settings_with_env(
    path: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<PointingSettings> {
    let defaults = serde_json::to_value(PointingSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: PointingSettings = serde_json::from_value(merged)?;
    apply_env_overrides_with(&mut settings, lookup);
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

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut PointingSettings) {
    apply_env_overrides_with(settings, |name| std::env::var(name).ok());
}

/// Apply environment overrides read through `lookup`.
///
/// `PORT` and `FRONTEND_URL` are honoured for compatibility with common
/// hosting setups; the `POINTING_*` variables win over them. Invalid values
/// are ignored with a warning.
pub fn apply_env_overrides_with(
    settings: &mut PointingSettings,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let env = EnvReader { lookup };

    // ── Server settings ─────────────────────────────────────────────
    if let Some(v) = env.u16("PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("FRONTEND_URL") {
        settings.server.allowed_origins = vec![v];
    }
    if let Some(v) = env.string("POINTING_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("POINTING_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("POINTING_ALLOWED_ORIGINS") {
        settings.server.allowed_origins = parse_list(&v);
    }
    if let Some(v) = env.string("POINTING_STATIC_DIR") {
        settings.server.static_dir = Some(v);
    }
    if let Some(v) = env.u64("POINTING_HEARTBEAT_INTERVAL_MS", 100, 3_600_000) {
        settings.server.heartbeat_interval_ms = v;
    }
    if let Some(v) = env.u64("POINTING_HEARTBEAT_TIMEOUT_MS", 100, 3_600_000) {
        settings.server.heartbeat_timeout_ms = v;
    }
    if let Some(v) = env.usize("POINTING_MAX_SEND_QUEUE", 1, 1_000_000) {
        settings.server.max_send_queue = v;
    }

    // ── Room settings ───────────────────────────────────────────────
    if let Some(v) = env.bool("POINTING_ALLOW_VOTES_WITHOUT_TICKET") {
        settings.room.allow_votes_without_ticket = v;
    }

    // ── Logging settings ────────────────────────────────────────────
    if let Some(v) = env.string("POINTING_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.string("POINTING_LOG_FORMAT") {
        match parse_log_format(&v) {
            Some(format) => settings.logging.format = format,
            None => tracing::warn!(key = "POINTING_LOG_FORMAT", value = %v, "invalid log format, ignoring"),
        }
    }
}

/// Reject combinations that cannot work at runtime.
pub fn validate(settings: &PointingSettings) -> Result<()> {
    let server = &settings.server;
    if server.heartbeat_interval_ms == 0 {
        return Err(SettingsError::InvalidValue("heartbeatIntervalMs must be at least 1".into()));
    }
    if server.heartbeat_timeout_ms < server.heartbeat_interval_ms {
        return Err(SettingsError::InvalidValue(format!(
            "heartbeatTimeoutMs ({}) must be at least heartbeatIntervalMs ({})",
            server.heartbeat_timeout_ms, server.heartbeat_interval_ms
        )));
    }
    if server.max_send_queue == 0 {
        return Err(SettingsError::InvalidValue("maxSendQueue must be at least 1".into()));
    }
    if settings.room.command_queue == 0 {
        return Err(SettingsError::InvalidValue("room.commandQueue must be at least 1".into()));
    }
    Ok(())
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

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

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Split a comma-separated list, trimming entries and dropping empty ones.
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Parse a log format name.
pub fn parse_log_format(val: &str) -> Option<LogFormat> {
    match val.trim().to_lowercase().as_str() {
        "pretty" | "text" | "compact" => Some(LogFormat::Pretty),
        "json" => Some(LogFormat::Json),
        _ => None,
    }
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = (self.lookup)(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = (self.lookup)(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
