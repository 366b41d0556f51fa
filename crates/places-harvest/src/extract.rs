//! Field extraction: raw positional record to named record.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::navigate::{navigate, navigate_segments};
use crate::types::field_names::*;
use crate::types::{FieldTable, NormalizedRecord};

const LIST_SEPARATOR: &str = ", ";
const MAPS_URL_PREFIX: &str = "https://www.google.com/maps?cid=";
const KNOWLEDGE_URL_PREFIX: &str = "https://www.google.com/maps/search/*?kgmid=";
const KNOWLEDGE_URL_SUFFIX: &str = "&kponly";

/// Extract a normalized record, stamping it with the current time.
pub fn extract(raw: &Value, table: &FieldTable) -> NormalizedRecord {
    extract_at(raw, table, Utc::now())
}

/// Extract a normalized record with an explicit `scrapedAt` timestamp.
///
/// Every table entry is looked up relative to the table root; misses become
/// null. Derived fields are then computed from the base fields.
pub fn extract_at(raw: &Value, table: &FieldTable, scraped_at: DateTime<Utc>) -> NormalizedRecord {
    let root = if table.root().is_empty() {
        Some(raw)
    } else {
        navigate(Some(raw), table.root())
    };

    let mut record = NormalizedRecord::default();
    for spec in table.fields() {
        let value = navigate(root, &spec.path).cloned().unwrap_or(Value::Null);
        record.insert(spec.name.clone(), value);
    }

    let phones = navigate(root, table.phones())
        .map(render_phones)
        .unwrap_or_default();
    record.insert(PHONES, Value::String(phones));

    let opening_hours = navigate(root, table.opening_hours())
        .map(render_opening_hours)
        .unwrap_or_default();
    record.insert(OPENING_HOURS, Value::String(opening_hours));

    let maps_url = truthy_field(&record, CID)
        .map(|cid| format!("{MAPS_URL_PREFIX}{}", display_value(cid)))
        .unwrap_or_default();
    record.insert(GOOGLE_MAPS_URL, Value::String(maps_url));

    let knowledge_url = truthy_field(&record, KGMID)
        .map(|kgmid| {
            format!(
                "{KNOWLEDGE_URL_PREFIX}{}{KNOWLEDGE_URL_SUFFIX}",
                display_value(kgmid)
            )
        })
        .unwrap_or_default();
    record.insert(GOOGLE_KNOWLEDGE_URL, Value::String(knowledge_url));

    let categories = match record.get(CATEGORIES) {
        Some(Value::Array(items)) => join_display(items, LIST_SEPARATOR),
        _ => String::new(),
    };
    record.insert(CATEGORIES, Value::String(categories));

    record.insert(
        SCRAPED_AT,
        Value::String(scraped_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );

    record
}

/// Loose JSON truthiness: null, false, zero and empty strings are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Render a value as text the way it would appear inside a joined list.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f == 0.0 => "0".to_string(),
            // Integral floats print without a fraction up to the exponent cutoff.
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e21 => format!("{f}"),
            _ => n.to_string(),
        },
        Value::String(s) => s.clone(),
        Value::Array(items) => join_display(items, ","),
        Value::Object(_) => value.to_string(),
    }
}

fn join_display(items: &[Value], separator: &str) -> String {
    items
        .iter()
        .map(display_value)
        .collect::<Vec<_>>()
        .join(separator)
}

fn truthy_field<'a>(record: &'a NormalizedRecord, field: &str) -> Option<&'a Value> {
    record.get(field).filter(|v| is_truthy(v))
}

/// Phone entries are tuples; the first element holds the display number.
fn render_phones(value: &Value) -> String {
    let Value::Array(entries) = value else {
        return String::new();
    };

    entries
        .iter()
        .map(|entry| {
            navigate_segments(Some(entry), &[0])
                .map(display_value)
                .unwrap_or_default()
        })
        .collect::<Vec<_>>()
        .join(LIST_SEPARATOR)
}

/// Opening hours are `[label, [schedule...]]` pairs, rendered `label:[schedule]`.
fn render_opening_hours(value: &Value) -> String {
    let Value::Array(entries) = value else {
        return String::new();
    };

    entries
        .iter()
        .map(|entry| {
            let label = navigate_segments(Some(entry), &[0])
                .map(display_value)
                .unwrap_or_default();
            let schedule = navigate_segments(Some(entry), &[1])
                .map(display_value)
                .unwrap_or_default();
            format!("{label}:[{schedule}]")
        })
        .collect::<Vec<_>>()
        .join(LIST_SEPARATOR)
}
