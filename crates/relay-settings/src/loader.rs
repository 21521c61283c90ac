//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `RELAY_*` environment overrides (highest priority)

use std::path::{Path, PathBuf};

use relay_core::logging::LogFormat;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{MAX_MAILBOX_CAPACITY, RelaySettings};

/// Resolve the default settings file (`~/.relay/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".relay").join("settings.json")
}

/// Load settings from the default path with env overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path` with env overrides.
///
/// A missing file yields defaults; a malformed one is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    let mut settings = read_file_layer(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

fn read_file_layer(path: &Path) -> Result<RelaySettings> {
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
    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key, arrays and primitives are replaced, and nulls in
/// `source` leave `target` untouched.
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

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut RelaySettings) {
    apply_env_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Empty values are treated as unset. Values that fail to parse or fall
/// outside their range are ignored with a warning.
pub fn apply_env_overrides_from<F>(settings: &mut RelaySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };
    let server = &mut settings.server;

    if let Some(v) = env.string("RELAY_HOST") {
        server.host = v;
    }
    if let Some(v) = env.parsed("RELAY_PORT", |s| parse_u16_range(s, 0, u16::MAX)) {
        server.port = v;
    }
    if let Some(v) = env.parsed("RELAY_MAX_CONNECTIONS", |s| {
        parse_usize_range(s, 1, 1_000_000)
    }) {
        server.max_connections = v;
    }
    if let Some(v) = env.parsed("RELAY_MAILBOX_CAPACITY", |s| {
        parse_usize_range(s, 1, MAX_MAILBOX_CAPACITY)
    }) {
        server.mailbox_capacity = v;
    }
    if let Some(v) = env.parsed("RELAY_HEARTBEAT_INTERVAL_MS", |s| {
        parse_u64_range(s, 0, 3_600_000)
    }) {
        server.heartbeat_interval_ms = v;
    }
    if let Some(v) = env.parsed("RELAY_HEARTBEAT_TIMEOUT_MS", |s| {
        parse_u64_range(s, 1, 3_600_000)
    }) {
        server.heartbeat_timeout_ms = v;
    }
    if let Some(v) = env.parsed("RELAY_MAX_MESSAGE_SIZE", |s| {
        parse_usize_range(s, 1, 64 * 1024 * 1024)
    }) {
        server.max_message_size = v;
    }
    if let Some(v) = env.parsed("RELAY_RELAY_INBOUND", parse_bool) {
        server.relay_inbound = v;
    }
    if let Some(v) = env.string("RELAY_CORS_ORIGINS") {
        server.cors_origins = parse_list(&v);
    }
    if let Some(v) = env.parsed("RELAY_SHUTDOWN_TIMEOUT_MS", |s| {
        parse_u64_range(s, 0, 600_000)
    }) {
        server.shutdown_timeout_ms = v;
    }

    if let Some(v) = env.string("RELAY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.parsed("RELAY_LOG_FORMAT", LogFormat::parse) {
        settings.logging.format = v;
    }
    if let Some(v) = env.string("RELAY_LOG_FILE") {
        settings.logging.file = Some(PathBuf::from(v));
    }
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
    (min..=max).contains(&n).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Split a comma-separated list, trimming entries and dropping empties.
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let val = self.string(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid env var, ignoring");
        }
        result
    }
}
