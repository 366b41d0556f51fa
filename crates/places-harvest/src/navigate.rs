//! Null-propagating positional lookup into nested records.

use serde_json::Value;

use crate::types::FieldPath;

/// Walk `record` along `path`, returning the value reached.
///
/// Returns `None` when the record is absent or null, when the path is empty,
/// or as soon as a segment is out of range, lands on a non-indexable value,
/// or yields null. Never panics.
pub fn navigate<'a>(record: Option<&'a Value>, path: &FieldPath) -> Option<&'a Value> {
    navigate_segments(record, path.segments())
}

/// Same as [`navigate`], over a raw index slice.
pub fn navigate_segments<'a>(record: Option<&'a Value>, segments: &[usize]) -> Option<&'a Value> {
    let mut current = record.filter(|v| !v.is_null())?;
    if segments.is_empty() {
        return None;
    }

    for &index in segments {
        current = step(current, index)?;
    }
    Some(current)
}

/// Whether `index` exists on `value`, even if it holds null.
pub fn has_index(value: &Value, index: usize) -> bool {
    match value {
        Value::Array(items) => index < items.len(),
        Value::Object(map) => map.contains_key(&index.to_string()),
        _ => false,
    }
}

fn step(value: &Value, index: usize) -> Option<&Value> {
    let next = match value {
        Value::Array(items) => items.get(index),
        // Sparse records arrive as objects keyed by position.
        Value::Object(map) => map.get(&index.to_string()),
        _ => None,
    }?;
    (!next.is_null()).then_some(next)
}
