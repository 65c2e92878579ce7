//! Layered settings loading.
//!
//! 1. Compiled [`FluxSettings::default()`]
//! 2. Optional JSON file, deep-merged over the defaults
//! 3. `FLUX_*` environment variables
//!
//! [`FluxSettings::validate`] runs last.

use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::FluxSettings;

/// Load settings, optionally from a JSON file, then apply env overrides.
pub fn load_settings(path: Option<&Path>) -> Result<FluxSettings> {
    match path {
        Some(path) => load_settings_from_path(path),
        None => {
            let mut settings = FluxSettings::default();
            apply_env_overrides(&mut settings);
            settings.validate();
            Ok(settings)
        }
    }
}

/// Load settings from `path` with env var overrides.
///
/// The file must exist and hold valid JSON. Callers without a file use
/// [`load_settings`] with `None`.
pub fn load_settings_from_path(path: &Path) -> Result<FluxSettings> {
    load_with_lookup(path, |key| std::env::var(key).ok())
}

fn load_with_lookup(
    path: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<FluxSettings> {
    let defaults = serde_json::to_value(FluxSettings::default())?;

    if !path.exists() {
        return Err(SettingsError::NotFound(path.to_path_buf()));
    }
    debug!(?path, "loading settings from file");
    let content = std::fs::read_to_string(path)?;
    let user: Value = serde_json::from_str(&content)?;
    let merged = deep_merge(defaults, user);

    let mut settings: FluxSettings = serde_json::from_value(merged)?;
    apply_overrides_from(&mut settings, lookup);
    settings.validate();
    Ok(settings)
}

/// Recursive merge of two JSON values.
///
/// Objects merge per key. Arrays and primitives from `source` replace the
/// target. `null` in `source` leaves the target untouched.
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

/// Apply `FLUX_*` environment variable overrides.
pub fn apply_env_overrides(settings: &mut FluxSettings) {
    apply_overrides_from(settings, |key| std::env::var(key).ok());
}

/// Apply overrides using an arbitrary key lookup.
///
/// Empty values are ignored. Values that fail to parse are logged and
/// ignored, keeping the file/default value.
pub fn apply_overrides_from(settings: &mut FluxSettings, lookup: impl Fn(&str) -> Option<String>) {
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    // ── Gateway ─────────────────────────────────────────────────────
    if let Some(v) = get("FLUX_LISTEN_ADDR") {
        settings.gateway.listen_addr = v;
    }
    if let Some(v) = get("FLUX_TOPIC") {
        settings.gateway.topic = v;
    }
    if let Some(v) = parsed(&get, "FLUX_MAX_FRAME_BYTES", |s| s.parse::<usize>().ok()) {
        settings.gateway.max_frame_bytes = v;
    }
    if let Some(v) = parsed(&get, "FLUX_SHUTDOWN_GRACE_SECS", |s| s.parse::<u64>().ok()) {
        settings.gateway.shutdown_grace_secs = v;
    }

    // ── Bus ─────────────────────────────────────────────────────────
    if let Some(v) = parsed(&get, "FLUX_BUS_KIND", |s| s.parse().ok()) {
        settings.bus.kind = v;
    }
    if let Some(v) = get("FLUX_BUS_URL") {
        settings.bus.proxy_url = v;
    }
    if let Some(v) = get("FLUX_CONSUMER_GROUP") {
        settings.bus.consumer_group = v;
    }

    // ── Blob ────────────────────────────────────────────────────────
    if let Some(v) = parsed(&get, "FLUX_BLOB_KIND", |s| s.parse().ok()) {
        settings.blob.kind = v;
    }
    if let Some(v) = get("FLUX_BLOB_URL") {
        settings.blob.base_url = v;
    }
    if let Some(v) = parsed(&get, "FLUX_BLOB_TIMEOUT_SECS", |s| s.parse::<u64>().ok()) {
        settings.blob.timeout_secs = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = get("FLUX_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = parsed(&get, "FLUX_LOG_JSON", parse_bool) {
        settings.logging.json = v;
    }
}

fn parsed<T>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let raw = get(key)?;
    let value = parse(raw.trim());
    if value.is_none() {
        tracing::warn!(key, value = %raw, "invalid env override, ignoring");
    }
    value
}

/// Parse a boolean: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
