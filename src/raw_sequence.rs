//! Raw-sequencing reference table
//!
//! Every meta category carries, per analyzed sample, the accession of the
//! raw sequencing data it was derived from. The reference table is the union
//! of those records across meta categories, projected to a common shape and
//! deduplicated by structural equality.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::category::Category;
use crate::error::JoinError;
use crate::parallel::{Executor, ParallelCollection};
use crate::record::Record;

/// Meta categories left out of the reference table by default
pub const DEFAULT_EXCLUDED_CATEGORIES: &[&str] = &["METH_ARRAY_M", "EXP_ARRAY_M", "PEXP_M"];

/// The default excluded set as categories
pub fn default_excluded() -> HashSet<Category> {
    DEFAULT_EXCLUDED_CATEGORIES
        .iter()
        .filter_map(|name| Category::new(name).ok())
        .collect()
}

/// Copy of one source field to an output field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub source: String,
    pub target: String,
}

impl FieldMapping {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Projection of a meta record to the reference shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceProjection {
    pub fields: Vec<FieldMapping>,
}

impl Default for ReferenceProjection {
    fn default() -> Self {
        Self {
            fields: vec![
                FieldMapping::new("analyzed_sample_id", "analyzed_sample_id"),
                FieldMapping::new("raw_data_accession", "raw_data_accession"),
                FieldMapping::new("raw_data_repository", "repository"),
                FieldMapping::new("sequencing_strategy", "library_strategy"),
            ],
        }
    }
}

impl ReferenceProjection {
    /// Project a record. Absent source fields become `null`.
    pub fn project(&self, record: &Record) -> Record {
        let mut out = Record::new();
        for mapping in &self.fields {
            let value = record.get(&mapping.source).cloned().unwrap_or(Value::Null);
            out.insert(mapping.target.clone(), value);
        }
        out
    }

    /// Output field names in order
    pub fn output_fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|m| m.target.as_str())
    }
}

/// Order-insensitive rendering of a value, used as its identity for dedup
fn canonical_key(record: &Record) -> Result<String, JoinError> {
    fn canonicalize(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut fields: Vec<_> = map.iter().collect();
                fields.sort_by(|a, b| a.0.cmp(b.0));
                let sorted: Map<String, Value> = fields
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect();
                Value::Object(sorted)
            }
            Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
            other => other.clone(),
        }
    }

    let canonical = canonicalize(&Value::Object(record.as_map().clone()));
    Ok(serde_json::to_string(&canonical)?)
}

/// Folds meta category collections into deduplicated reference records
#[derive(Debug, Clone)]
pub struct RawSequenceResolver {
    projection: ReferenceProjection,
    excluded: HashSet<Category>,
}

impl Default for RawSequenceResolver {
    fn default() -> Self {
        Self::new(ReferenceProjection::default(), default_excluded())
    }
}

impl RawSequenceResolver {
    pub fn new(projection: ReferenceProjection, excluded: HashSet<Category>) -> Self {
        Self {
            projection,
            excluded,
        }
    }

    pub fn projection(&self) -> &ReferenceProjection {
        &self.projection
    }

    pub fn excluded(&self) -> &HashSet<Category> {
        &self.excluded
    }

    /// Whether records of a category contribute to the reference table
    pub fn selects(&self, category: &Category) -> bool {
        category.is_meta() && !self.excluded.contains(category)
    }

    /// Project, union and deduplicate the selected collections.
    ///
    /// Non-meta and excluded categories are ignored. The first occurrence
    /// of each distinct record is kept.
    pub fn resolve(
        &self,
        executor: &Executor,
        collections: BTreeMap<Category, ParallelCollection<Record>>,
    ) -> Result<ParallelCollection<Record>, JoinError> {
        let mut selected = Vec::new();
        let mut combined = ParallelCollection::empty();
        for (category, records) in collections {
            if self.selects(&category) {
                selected.push(category.name().to_string());
                combined = combined.union(records);
            }
        }
        if selected.is_empty() {
            return Ok(ParallelCollection::empty());
        }

        let projection = &self.projection;
        let keyed = executor.try_map(combined, |record| {
            let projected = projection.project(&record);
            Ok((canonical_key(&projected)?, projected))
        })?;

        let total = keyed.len();
        let (_, distinct) = executor.collect_fold(
            keyed,
            (HashSet::new(), Vec::new()),
            |(mut seen, mut distinct), (key, record)| {
                if seen.insert(key) {
                    distinct.push(record);
                }
                Ok((seen, distinct))
            },
        )?;

        debug!(
            categories = ?selected,
            records = total,
            distinct = distinct.len(),
            "Resolved raw sequence reference"
        );
        Ok(executor.partition(distinct))
    }
}

/// Resolve with a given excluded set and projection.
/// See [`RawSequenceResolver::resolve`].
pub fn resolve_reference(
    executor: &Executor,
    collections: BTreeMap<Category, ParallelCollection<Record>>,
    excluded: &HashSet<Category>,
    projection: &ReferenceProjection,
) -> Result<ParallelCollection<Record>, JoinError> {
    RawSequenceResolver::new(projection.clone(), excluded.clone()).resolve(executor, collections)
}

/// Resolved reference records per project
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceTable {
    projects: BTreeMap<String, Vec<Record>>,
}

impl ReferenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the records of a project, replacing any earlier entry
    pub fn insert(&mut self, project: impl Into<String>, records: ParallelCollection<Record>) {
        self.projects.insert(project.into(), records.into_vec());
    }

    pub fn get(&self, project: &str) -> Option<&[Record]> {
        self.projects.get(project).map(Vec::as_slice)
    }

    /// Project names in sorted order
    pub fn projects(&self) -> impl Iterator<Item = &str> {
        self.projects.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    /// Records across all projects
    pub fn total_records(&self) -> usize {
        self.projects.values().map(Vec::len).sum()
    }

    pub fn into_inner(self) -> BTreeMap<String, Vec<Record>> {
        self.projects
    }
}
