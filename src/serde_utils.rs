//! Shared serialization utilities for backend payloads.

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;

use crate::infra::logging::targets;

/// Offset-less layouts the backend has been seen to emit; read as UTC.
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

fn parse_timestamp_text(text: &str) -> Option<i64> {
    if let Ok(ms) = text.parse::<i64>() {
        return Some(ms);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp_millis());
    }
    NAIVE_FORMATS.iter().find_map(|format| {
        NaiveDateTime::parse_from_str(text, format)
            .ok()
            .map(|dt| dt.and_utc().timestamp_millis())
    })
}

fn timestamp_to_ms(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|ms| ms as i64)),
        Value::String(text) => parse_timestamp_text(text.trim()),
        _ => None,
    }
}

/// Deserialize an optional timestamp given as epoch milliseconds, RFC 3339
/// text, or an offset-less `YYYY-MM-DD HH:MM:SS` form.
///
/// `null` maps to `None`. An unreadable value is logged and also maps to
/// `None` so one odd field never costs the whole message.
pub fn deserialize_opt_timestamp_ms<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|raw| {
        if raw.is_null() {
            return None;
        }
        let parsed = timestamp_to_ms(&raw);
        if parsed.is_none() {
            warn!(target: targets::DISPATCH, value = %raw, "Ignoring unreadable timestamp");
        }
        parsed
    }))
}
