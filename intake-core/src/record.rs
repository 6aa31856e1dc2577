//! Record and batch types that flow through extraction and the pipeline.

use serde_json::Value;

/// A single source record: field name → value.
///
/// Source schemas are unknown until runtime, so the dynamic JSON map is the
/// honest representation. Canonical meaning is assigned by the mapper.
pub type Record = serde_json::Map<String, Value>;

/// One extraction batch. Finite, at most the connector's configured batch
/// size, ordered by the source's natural order.
pub type Batch = Vec<Record>;

/// Borrow a string field from a record, if present and a string.
pub fn record_str<'a>(record: &'a Record, key: &str) -> Option<&'a str> {
    record.get(key).and_then(Value::as_str)
}

/// Read a numeric field from a record, coercing integers to float.
pub fn record_f64(record: &Record, key: &str) -> Option<f64> {
    record.get(key).and_then(Value::as_f64)
}

/// Render any field as its string form, for watermark pickup.
///
/// Strings come back unquoted; other values use their JSON rendering.
pub fn record_value_string(record: &Record, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}
