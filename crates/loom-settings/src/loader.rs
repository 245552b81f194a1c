//! Layered settings loading.
//!
//! Compiled defaults are serialized to JSON, the user file (if any) is
//! deep-merged on top, the result is deserialized and finally `LOOM_*`
//! environment variables override individual fields.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::LoomSettings;

/// Longest accepted tool call deadline from the environment (one day).
const MAX_TOOL_CALL_TIMEOUT_MS: u64 = 86_400_000;

/// Path of the user settings file (`~/.loom/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".loom").join("settings.json")
}

/// Load settings from [`settings_path`].
pub fn load_settings() -> Result<LoomSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path`, merged over defaults, with env overrides.
///
/// A missing file yields defaults. Malformed JSON or values that fail
/// [`LoomSettings::validate`] are errors.
pub fn load_settings_from_path(path: &Path) -> Result<LoomSettings> {
    let defaults = serde_json::to_value(LoomSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings file");
        let raw = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&raw)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "no settings file, using defaults");
        defaults
    };

    let mut settings: LoomSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Merge `source` into `target`.
///
/// Objects merge key by key, anything else in `source` replaces the
/// target value. `null` in `source` leaves the target untouched.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut into), Value::Object(from)) => {
            for (key, value) in from {
                if value.is_null() {
                    continue;
                }
                let merged = match into.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                let _ = into.insert(key, merged);
            }
            Value::Object(into)
        }
        (_, source) => source,
    }
}

/// Apply `LOOM_*` environment overrides.
///
/// Values that fail to parse or fall outside their range are logged and
/// ignored.
pub fn apply_env_overrides(settings: &mut LoomSettings) {
    // ── kernel ──────────────────────────────────────────────────────
    if let Some(v) = read_env_usize("LOOM_MESSAGE_LIMIT", 1, 1_000_000) {
        settings.kernel.message_limit = v;
    }
    if let Some(v) = read_env_usize("LOOM_EVENT_CAPACITY", 1, 1_048_576) {
        settings.kernel.event_capacity = v;
    }
    if let Some(v) = read_env_u64("LOOM_TOOL_CALL_TIMEOUT_MS", 0, MAX_TOOL_CALL_TIMEOUT_MS) {
        settings.kernel.tool_call_timeout_ms = v;
    }
    if let Some(v) = read_env_string("LOOM_INSTRUCTIONS") {
        settings.kernel.instructions = Some(v);
    }

    // ── logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("LOOM_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("LOOM_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Parsing helpers ─────────────────────────────────────────────────────────

/// Parse a boolean flag: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a `u64` in `min..=max`.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a `usize` in `min..=max`.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let raw = std::env::var(name).ok()?;
    let parsed = parse_bool(&raw);
    if parsed.is_none() {
        tracing::warn!(key = name, value = %raw, "ignoring invalid boolean env var");
    }
    parsed
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    let parsed = parse_u64_range(&raw, min, max);
    if parsed.is_none() {
        tracing::warn!(key = name, value = %raw, min, max, "ignoring out-of-range env var");
    }
    parsed
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let raw = std::env::var(name).ok()?;
    let parsed = parse_usize_range(&raw, min, max);
    if parsed.is_none() {
        tracing::warn!(key = name, value = %raw, min, max, "ignoring out-of-range env var");
    }
    parsed
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
