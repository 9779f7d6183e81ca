//! Per-category export transforms
//!
//! Each exported data type is described by a [`TransformDescriptor`]: which
//! records belong to it, how first-level fields are renamed and which fields
//! survive into the tab-separated output. Descriptors are held in a
//! [`TransformRegistry`] keyed by output category name. The `export`
//! subcommand renders a joined category through its descriptor.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use crate::error::JoinError;
use crate::key::donor_data_type_key;
use crate::parallel::{Executor, ParallelCollection};
use crate::record::{Record, DONOR_ID};

/// Field holding the donor identifier in exported rows
pub const EXPORT_DONOR_ID: &str = "donor_id";

/// Describes how records of one category are exported
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformDescriptor {
    /// Output directory name, also the data type of the donor key
    pub data_type_dir: String,
    /// Records lacking this field are not of this type
    pub type_field: String,
    /// Ordered first-level `source → output` renames; unlisted fields are dropped
    pub projection: Vec<(String, String)>,
    /// Fields added after projection
    pub extra_fields: Vec<String>,
}

impl TransformDescriptor {
    /// Array-based DNA methylation
    pub fn meth_array() -> Self {
        #[rustfmt::skip]
        let projection = [
            ("_donor_id",                      "icgc_donor_id"),
            ("_project_id",                    "project_code"),
            ("_specimen_id",                   "icgc_specimen_id"),
            ("_sample_id",                     "icgc_sample_id"),
            ("analyzed_sample_id",             "submitted_sample_id"),
            ("analysis_id",                    "analysis_id"),
            ("array_platform",                 "array_platform"),
            ("probe_id",                       "probe_id"),
            ("methylation_value",              "methylation_value"),
            ("metric_used",                    "metric_used"),
            ("methylated_probe_intensity",     "methylated_probe_intensity"),
            ("unmethylated_probe_intensity",   "unmethylated_probe_intensity"),
            ("verification_status",            "verification_status"),
            ("verification_platform",          "verification_platform"),
            ("fraction_wgw_cpg_sites_covered", "fraction_wg_cpg_sites_covered"),
            ("conversion_rate",                "conversion_rate"),
            ("experimental_protocol",          "experimental_protocol"),
            ("other_analysis_algorithm",       "other_analysis_algorithm"),
            ("raw_data_repository",            "raw_data_repository"),
            ("raw_data_accession",             "raw_data_accession"),
        ];

        Self {
            data_type_dir: "meth_array".to_string(),
            type_field: "meth_array".to_string(),
            projection: projection
                .iter()
                .map(|(source, target)| (source.to_string(), target.to_string()))
                .collect(),
            extra_fields: vec![EXPORT_DONOR_ID.to_string()],
        }
    }

    /// Output columns: projected fields followed by the extra fields
    pub fn fields(&self) -> Vec<&str> {
        self.projection
            .iter()
            .map(|(_, target)| target.as_str())
            .chain(self.extra_fields.iter().map(String::as_str))
            .collect()
    }

    /// Whether a record is of this descriptor's type
    pub fn matches(&self, record: &Record) -> bool {
        record.contains(&self.type_field)
    }

    /// Transform one record, or `None` if it is not of this type.
    ///
    /// Projected fields absent from the source are omitted rather than set
    /// to null.
    pub fn apply(&self, record: &Record) -> Option<Record> {
        if !self.matches(record) {
            return None;
        }

        let mut out = Record::new();
        for (source, target) in &self.projection {
            if let Some(value) = record.get(source) {
                out.insert(target.clone(), value.clone());
            }
        }
        if self.extra_fields.iter().any(|f| f == EXPORT_DONOR_ID) {
            if let Some(donor_id) = record.get(DONOR_ID) {
                out.insert(EXPORT_DONOR_ID, donor_id.clone());
            }
        }

        let fields = self.fields();
        let mut map = out.into_map();
        map.retain(|field, _| fields.contains(&field.as_str()));
        Some(Record::from(map))
    }

    /// Filter, key by donor and data type, transform and render every record.
    ///
    /// Every record of this type must carry a donor identifier.
    pub fn export(
        &self,
        executor: &Executor,
        records: ParallelCollection<Record>,
    ) -> Result<ParallelCollection<(String, String)>, JoinError> {
        let fields = self.fields();
        let rows = executor.try_map_partitions(records, |partition| {
            let mut rows = Vec::with_capacity(partition.len());
            for record in partition {
                let Some(transformed) = self.apply(&record) else {
                    continue;
                };
                let key = donor_data_type_key(&record, &self.data_type_dir)?;
                rows.push((key, to_tsv_row(&transformed, &fields)));
            }
            Ok(rows)
        })?;
        debug!(data_type = %self.data_type_dir, rows = rows.len(), "Exported rows");
        Ok(rows)
    }

    /// Export into table lines: a header of [`fields`](Self::fields), then
    /// one row per record grouped by donor.
    pub fn export_table(
        &self,
        executor: &Executor,
        records: ParallelCollection<Record>,
    ) -> Result<Vec<String>, JoinError> {
        let mut rows = self.export(executor, records)?.into_vec();
        rows.sort_by(|a, b| a.0.cmp(&b.0));

        let mut lines = Vec::with_capacity(rows.len() + 1);
        lines.push(self.fields().join("\t"));
        lines.extend(rows.into_iter().map(|(_, row)| row));
        Ok(lines)
    }
}

/// Descriptors by output category name
#[derive(Debug, Clone)]
pub struct TransformRegistry {
    descriptors: BTreeMap<String, TransformDescriptor>,
}

impl Default for TransformRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("METH_ARRAY", TransformDescriptor::meth_array());
        registry
    }
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn empty() -> Self {
        Self {
            descriptors: BTreeMap::new(),
        }
    }

    /// Register a descriptor, replacing any existing one for the category
    pub fn register(&mut self, category: impl Into<String>, descriptor: TransformDescriptor) {
        self.descriptors
            .insert(category.into().to_uppercase(), descriptor);
    }

    pub fn get(&self, category: &str) -> Option<&TransformDescriptor> {
        self.descriptors.get(&category.to_uppercase())
    }

    /// Descriptor for a category, failing for unregistered ones
    pub fn require(&self, category: &str) -> Result<&TransformDescriptor, JoinError> {
        self.get(category).ok_or_else(|| JoinError::UnknownCategory {
            name: category.to_string(),
        })
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.descriptors.keys().map(String::as_str)
    }
}

/// Render the named fields of a record as one tab-separated line.
///
/// Missing and null values render empty; nested values render as JSON.
pub fn to_tsv_row<S: AsRef<str>>(record: &Record, fields: &[S]) -> String {
    fields
        .iter()
        .map(|field| match record.get(field.as_ref()) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\t")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::ParallelConfig;
    use serde_json::json;

    fn record(value: Value) -> Record {
        Record::from_value(value).unwrap()
    }

    fn meth_row(donor: &str) -> Record {
        record(json!({
            "_donor_id": donor,
            "_project_id": "P1",
            "analyzed_sample_id": "S1",
            "probe_id": "cg001",
            "methylation_value": 0.5,
            "meth_array": true,
            "internal": "x"
        }))
    }

    #[test]
    fn test_apply_projects_and_adds_donor() {
        let out = TransformDescriptor::meth_array()
            .apply(&meth_row("DO1"))
            .unwrap();
        assert_eq!(
            out,
            record(json!({
                "icgc_donor_id": "DO1",
                "project_code": "P1",
                "submitted_sample_id": "S1",
                "probe_id": "cg001",
                "methylation_value": 0.5,
                "donor_id": "DO1"
            }))
        );
    }

    #[test]
    fn test_apply_skips_other_types() {
        let r = record(json!({"_donor_id": "DO1", "probe_id": "cg001"}));
        assert!(TransformDescriptor::meth_array().apply(&r).is_none());
    }

    #[test]
    fn test_fields_order() {
        let descriptor = TransformDescriptor::meth_array();
        let fields = descriptor.fields();
        assert_eq!(fields.len(), 21);
        assert_eq!(fields[0], "icgc_donor_id");
        assert_eq!(fields[20], "donor_id");
    }

    #[test]
    fn test_to_tsv_row() {
        let r = record(json!({"a": "x", "b": 1, "c": null, "d": [1, 2]}));
        assert_eq!(to_tsv_row(&r, &["a", "b", "c", "missing", "d"]), "x\t1\t\t\t[1,2]");
    }

    #[test]
    fn test_export_keys_by_donor_data_type() {
        let ex = Executor::new(ParallelConfig::new().with_chunk_size(1)).unwrap();
        let other = record(json!({"_donor_id": "DO9"}));
        let rows = TransformDescriptor::meth_array()
            .export(&ex, ex.partition(vec![meth_row("DO1"), other]))
            .unwrap()
            .into_vec();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "DO1#meth_array");
        assert!(rows[0].1.starts_with("DO1\tP1\t\t\tS1\t"));
    }

    #[test]
    fn test_export_requires_donor() {
        let ex = Executor::new(ParallelConfig::default()).unwrap();
        let no_donor = record(json!({"meth_array": true, "probe_id": "cg1"}));
        let result = TransformDescriptor::meth_array().export(&ex, ex.partition(vec![no_donor]));
        assert!(matches!(result, Err(JoinError::MissingField { .. })));
    }

    #[test]
    fn test_export_table_groups_by_donor() {
        let ex = Executor::new(ParallelConfig::new().with_chunk_size(1)).unwrap();
        let descriptor = TransformDescriptor::meth_array();
        let lines = descriptor
            .export_table(&ex, ex.partition(vec![meth_row("DO2"), meth_row("DO1"), meth_row("DO2")]))
            .unwrap();

        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], descriptor.fields().join("\t"));
        let donors: Vec<&str> = lines[1..]
            .iter()
            .map(|line| line.split('\t').next().unwrap())
            .collect();
        assert_eq!(donors, vec!["DO1", "DO2", "DO2"]);
    }

    #[test]
    fn test_registry() {
        let registry = TransformRegistry::default();
        assert!(registry.get("meth_array").is_some());
        assert!(matches!(
            registry.require("SSM"),
            Err(JoinError::UnknownCategory { .. })
        ));
        assert_eq!(registry.categories().collect::<Vec<_>>(), vec!["METH_ARRAY"]);
    }
}
