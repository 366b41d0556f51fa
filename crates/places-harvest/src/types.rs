//! Core data types for positional place records.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One uninterpreted nested-array record as captured from a search payload.
pub type RawRecord = Value;

/// Names of the fields the extractor reads or derives.
pub mod field_names {
    pub const NAME: &str = "name";
    pub const CID: &str = "cid";
    pub const KGMID: &str = "kgmid";
    pub const CATEGORIES: &str = "categories";
    pub const PHONES: &str = "phones";
    pub const OPENING_HOURS: &str = "openingHours";
    pub const GOOGLE_MAPS_URL: &str = "googleMapsURL";
    pub const GOOGLE_KNOWLEDGE_URL: &str = "googleKnowledgeURL";
    pub const SCRAPED_AT: &str = "scrapedAt";
}

/// Ordered index sequence locating one value inside a raw record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldPath(Vec<usize>);

impl FieldPath {
    pub fn new(segments: impl Into<Vec<usize>>) -> Self {
        Self(segments.into())
    }

    pub fn segments(&self) -> &[usize] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<const N: usize> From<[usize; N]> for FieldPath {
    fn from(segments: [usize; N]) -> Self {
        Self(segments.to_vec())
    }
}

impl From<Vec<usize>> for FieldPath {
    fn from(segments: Vec<usize>) -> Self {
        Self(segments)
    }
}

/// A named entry of the field table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub path: FieldPath,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, path: impl Into<FieldPath>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// On-disk shape of a field table, validated into [`FieldTable`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FieldTableDef {
    #[serde(default)]
    root: FieldPath,
    fields: Vec<FieldSpec>,
    #[serde(default)]
    phones: FieldPath,
    #[serde(default)]
    opening_hours: FieldPath,
}

/// Read-only mapping from field name to positional path.
///
/// Paths are applied relative to `root`, which selects the place payload
/// inside each raw record. `phones` and `opening_hours` feed the derived
/// fields of the same name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FieldTableDef", into = "FieldTableDef")]
pub struct FieldTable {
    root: FieldPath,
    fields: Vec<FieldSpec>,
    phones: FieldPath,
    opening_hours: FieldPath,
}

impl FieldTable {
    /// Build a table, rejecting empty or duplicate field names.
    pub fn new(
        root: FieldPath,
        fields: Vec<FieldSpec>,
        phones: FieldPath,
        opening_hours: FieldPath,
    ) -> HarvestResult<Self> {
        let mut seen = HashSet::new();
        for spec in &fields {
            if spec.name.trim().is_empty() {
                return Err(HarvestError::FieldTable(
                    "field names must not be empty".to_string(),
                ));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(HarvestError::FieldTable(format!(
                    "duplicate field name '{}'",
                    spec.name
                )));
            }
        }

        Ok(Self {
            root,
            fields,
            phones,
            opening_hours,
        })
    }

    /// The table for Google Maps search results.
    pub fn google_maps() -> Self {
        let fields = vec![
            FieldSpec::new("fullAddress", [39]),
            FieldSpec::new("placeId", [78]),
            FieldSpec::new("kgmid", [89]),
            FieldSpec::new("categories", [13]),
            FieldSpec::new("cid", [10]),
            FieldSpec::new("featuredImage", [37, 0, 0, 6, 0]),
            FieldSpec::new("name", [11]),
            FieldSpec::new("latitude", [9, 2]),
            FieldSpec::new("longitude", [9, 3]),
            FieldSpec::new("reviewCount", [4, 8]),
            FieldSpec::new("averageRating", [4, 7]),
            FieldSpec::new("website", [7, 0]),
            FieldSpec::new("domain", [7, 1]),
        ];

        Self {
            root: FieldPath::from([1]),
            fields,
            phones: FieldPath::from([178, 0, 1]),
            opening_hours: FieldPath::from([34, 1]),
        }
    }

    /// Parse a table from its JSON form.
    pub fn from_json_str(json: &str) -> HarvestResult<Self> {
        serde_json::from_str(json).map_err(|e| HarvestError::FieldTable(e.to_string()))
    }

    /// Load a table from a JSON file.
    pub fn load(path: &Path) -> HarvestResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn root(&self) -> &FieldPath {
        &self.root
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn phones(&self) -> &FieldPath {
        &self.phones
    }

    pub fn opening_hours(&self) -> &FieldPath {
        &self.opening_hours
    }

    /// Look up the path of a named field.
    pub fn get(&self, name: &str) -> Option<&FieldPath> {
        self.fields
            .iter()
            .find(|spec| spec.name == name)
            .map(|spec| &spec.path)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Default for FieldTable {
    fn default() -> Self {
        Self::google_maps()
    }
}

impl TryFrom<FieldTableDef> for FieldTable {
    type Error = HarvestError;

    fn try_from(def: FieldTableDef) -> HarvestResult<Self> {
        Self::new(def.root, def.fields, def.phones, def.opening_hours)
    }
}

impl From<FieldTable> for FieldTableDef {
    fn from(table: FieldTable) -> Self {
        Self {
            root: table.root,
            fields: table.fields,
            phones: table.phones,
            opening_hours: table.opening_hours,
        }
    }
}

/// Flat named record produced by extraction, ready for delivery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedRecord(Map<String, Value>);

impl NormalizedRecord {
    /// Get a field value. Missing fields and JSON null both read as `None`.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field).filter(|v| !v.is_null())
    }

    /// Get a field as a string slice, if it is a string.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.get_str(field_names::NAME)
    }

    /// Whether the record may enter the delivery queue (its `name` is truthy).
    pub fn is_deliverable(&self) -> bool {
        self.get(field_names::NAME).is_some_and(crate::extract::is_truthy)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }
}

impl From<Map<String, Value>> for NormalizedRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Errors that can occur while decoding payloads or loading field tables.
#[derive(thiserror::Error, Debug)]
pub enum HarvestError {
    #[error("Malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("Envelope field '{0}' is missing or not a string")]
    MissingPayload(String),

    #[error("Malformed payload: {0}")]
    Payload(#[source] serde_json::Error),

    #[error("Unexpected payload shape: {0}")]
    Shape(String),

    #[error("Invalid field table: {0}")]
    FieldTable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarvestError {
    /// Whether the error came from a captured payload rather than configuration.
    pub fn is_malformed_payload(&self) -> bool {
        matches!(
            self,
            HarvestError::Envelope(_)
                | HarvestError::MissingPayload(_)
                | HarvestError::Payload(_)
                | HarvestError::Shape(_)
        )
    }
}

/// Convenience result type.
pub type HarvestResult<T> = Result<T, HarvestError>;
