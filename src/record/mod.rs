//! Record representation and NDJSON I/O
//!
//! A [`Record`] is an ordered mapping from field name to a JSON value. Field
//! order survives parsing, every pipeline stage and writing. Records are read
//! from and written to newline-delimited JSON part files laid out as
//! `<root>/<category>/<project>/part-NNNNN.json`.

mod reader;
mod writer;

pub use reader::{open_records, read_category, read_records, RecordReader};
pub use writer::{commit_all, write_records, StagedWriter};

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::category::Category;

/// Donor identifier field
pub const DONOR_ID: &str = "_donor_id";
/// Project identifier field
pub const PROJECT_ID: &str = "_project_id";
/// Specimen identifier field, set by enrichment
pub const SPECIMEN_ID: &str = "_specimen_id";
/// Sample identifier field, set by enrichment
pub const SAMPLE_ID: &str = "_sample_id";
/// Category identifier field, set by enrichment
pub const TYPE: &str = "_type";
/// Analysis identifier field
pub const ANALYSIS_ID: &str = "analysis_id";
/// Submitted analyzed sample identifier field
pub const ANALYZED_SAMPLE_ID: &str = "analyzed_sample_id";
/// Nested observation array field
pub const OBSERVATIONS: &str = "observations";

/// A single genomic observation or donor-level record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a JSON value, which must be an object
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Parse a single JSON object
    pub fn parse(s: &str) -> Result<Self, String> {
        let value: Value = serde_json::from_str(s).map_err(|e| e.to_string())?;
        Self::from_value(value).ok_or_else(|| "expected a JSON object".to_string())
    }

    /// Borrow the underlying map
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Unwrap into the underlying map
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Number of top-level fields
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the record has no fields
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get a field value
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Check whether a field is present
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Set a field. An existing field keeps its position; a new one is appended.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    /// Builder-style [`Record::insert`]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }

    /// Field names in order
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Iterate over fields in order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Textual value of a scalar field.
    ///
    /// Strings are returned as-is, numbers and booleans as their JSON text.
    /// Absent, null, empty-string, array and object values yield `None`.
    pub fn text_value(&self, field: &str) -> Option<String> {
        match self.0.get(field)? {
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// Copy every field of `other` into this record, overwriting on collision.
    ///
    /// Shallow: nested objects and arrays are replaced, never merged.
    pub fn merge_from(&mut self, other: &Record) {
        for (field, value) in other.iter() {
            self.0.insert(field.clone(), value.clone());
        }
    }

    /// Remove every listed field, keeping the order of the others
    pub fn remove_fields(&mut self, fields: &HashSet<String>) {
        if fields.is_empty() {
            return;
        }
        self.0.retain(|field, _| !fields.contains(field));
    }

    /// Mutable access to the nested observation array, if present
    pub fn observations_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self.0.get_mut(OBSERVATIONS) {
            Some(Value::Array(items)) => Some(items),
            _ => None,
        }
    }

    /// Serialize as a single JSON line
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.0)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Object(record.0)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.0) {
            Ok(s) => write!(f, "{}", s),
            Err(_) => write!(f, "<unprintable record>"),
        }
    }
}

/// Directory holding the part files of a category for one project
pub fn category_path(root: &Path, category: &Category, project: &str) -> PathBuf {
    root.join(category.dir_name()).join(project)
}
