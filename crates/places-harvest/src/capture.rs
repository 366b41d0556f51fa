//! Search payload decoding: envelope unwrapping and candidate selection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::navigate::{has_index, navigate, navigate_segments};
use crate::types::{FieldPath, HarvestError, HarvestResult, RawRecord};

/// Where place records live inside a captured search response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureLayout {
    /// Substring the request URL must contain (path part).
    pub path_marker: String,
    /// Substring the request URL must contain (query part).
    pub query_marker: String,
    /// Literal artifact stripped from the raw body before parsing.
    pub body_artifact: String,
    /// Envelope field holding the payload as a string.
    pub envelope_field: String,
    /// Literal artifact stripped from the payload string before parsing.
    pub payload_artifact: String,
    /// Path to the primary candidate list.
    pub primary_list: FieldPath,
    /// Index that must be present on a primary entry for it to count as a place.
    pub sentinel_index: usize,
    /// Top-level payload index holding the alternate candidate list.
    pub fallback_index: usize,
}

impl Default for CaptureLayout {
    fn default() -> Self {
        Self {
            path_marker: "/search".to_string(),
            query_marker: "tbm=map".to_string(),
            body_artifact: "/*\"\"*/".to_string(),
            envelope_field: "d".to_string(),
            payload_artifact: ")]}'".to_string(),
            primary_list: FieldPath::from([0, 1]),
            sentinel_index: 14,
            fallback_index: 64,
        }
    }
}

impl CaptureLayout {
    /// Whether a request URL carries a search payload worth decoding.
    pub fn matches(&self, url: &str) -> bool {
        url.contains(&self.path_marker) && url.contains(&self.query_marker)
    }

    /// Unwrap the envelope and parse the inner payload.
    pub fn decode_payload(&self, body: &str) -> HarvestResult<Value> {
        let cleaned = body.replacen(&self.body_artifact, "", 1);
        let envelope: Value = serde_json::from_str(&cleaned).map_err(HarvestError::Envelope)?;

        let inner = envelope
            .get(&self.envelope_field)
            .and_then(Value::as_str)
            .ok_or_else(|| HarvestError::MissingPayload(self.envelope_field.clone()))?;

        let cleaned = inner.replacen(&self.payload_artifact, "", 1);
        serde_json::from_str(&cleaned).map_err(HarvestError::Payload)
    }

    /// Decode a response body into its candidate raw records.
    pub fn candidates(&self, body: &str) -> HarvestResult<Vec<RawRecord>> {
        let payload = self.decode_payload(body)?;
        self.select_candidates(&payload)
    }

    /// Pick candidate records out of a decoded payload.
    ///
    /// Primary entries must carry the sentinel index. When that leaves
    /// nothing, the fallback list is used as-is.
    pub fn select_candidates(&self, payload: &Value) -> HarvestResult<Vec<RawRecord>> {
        let primary: Vec<RawRecord> = match navigate(Some(payload), &self.primary_list) {
            Some(Value::Array(items)) => items
                .iter()
                .filter(|item| has_index(item, self.sentinel_index))
                .cloned()
                .collect(),
            Some(other) => {
                return Err(HarvestError::Shape(format!(
                    "primary list at {:?} is {}, expected an array",
                    self.primary_list.segments(),
                    kind(other)
                )))
            }
            None => Vec::new(),
        };

        if !primary.is_empty() {
            return Ok(primary);
        }

        match navigate_segments(Some(payload), &[self.fallback_index]) {
            Some(Value::Array(items)) => {
                tracing::debug!(
                    "Primary list empty, using fallback index {} ({} entries)",
                    self.fallback_index,
                    items.len()
                );
                Ok(items.clone())
            }
            Some(other) => Err(HarvestError::Shape(format!(
                "fallback list at [{}] is {}, expected an array",
                self.fallback_index,
                kind(other)
            ))),
            None => Ok(Vec::new()),
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
