//! Clinical donor/sample enrichment of joined records
//!
//! The donor/sample lookup is built upstream, once per run, and shared
//! read-only with every worker. Every record reaching this stage must resolve
//! to a donor/sample entry; a miss aborts the task.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::JoinError;
use crate::parallel::{Executor, ParallelCollection};
use crate::record::{read_records, Record, DONOR_ID, PROJECT_ID, SAMPLE_ID, SPECIMEN_ID, TYPE};

/// Clinical context of a donor within a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonorSample {
    /// Project identifier
    #[serde(default)]
    pub project_id: String,
    /// Donor identifier
    #[serde(default)]
    pub donor_id: String,
    /// Specimen identifier
    pub specimen_id: String,
    /// Sample identifier
    pub sample_id: String,
    /// Specimen identifier as submitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_specimen_id: Option<String>,
    /// Sample identifier as submitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_sample_id: Option<String>,
}

impl DonorSample {
    /// Create a donor/sample entry
    pub fn new(
        project_id: impl Into<String>,
        donor_id: impl Into<String>,
        specimen_id: impl Into<String>,
        sample_id: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            donor_id: donor_id.into(),
            specimen_id: specimen_id.into(),
            sample_id: sample_id.into(),
            submitted_specimen_id: None,
            submitted_sample_id: None,
        }
    }
}

/// Read-only mapping `project → donor → DonorSample`
#[derive(Debug, Clone, Default)]
pub struct DonorSampleLookup {
    projects: HashMap<String, HashMap<String, DonorSample>>,
}

impl DonorSampleLookup {
    /// Create an empty lookup
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, replacing any previous entry for the same donor
    pub fn insert(&mut self, sample: DonorSample) {
        self.projects
            .entry(sample.project_id.clone())
            .or_default()
            .insert(sample.donor_id.clone(), sample);
    }

    /// Resolve a donor within a project
    pub fn get(&self, project_id: &str, donor_id: &str) -> Option<&DonorSample> {
        self.projects.get(project_id)?.get(donor_id)
    }

    /// Donors of one project
    pub fn project(&self, project_id: &str) -> Option<&HashMap<String, DonorSample>> {
        self.projects.get(project_id)
    }

    /// Number of entries across all projects
    pub fn len(&self) -> usize {
        self.projects.values().map(HashMap::len).sum()
    }

    /// Whether the lookup is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load a lookup from a file.
    ///
    /// A file holding one JSON object whose values are all objects is read as
    /// `{project: {donor: sample}}`; errors in that form are reported as is.
    /// Anything else is read as NDJSON rows of [`DonorSample`] carrying
    /// `project_id` and `donor_id`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, JoinError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| JoinError::Io {
            msg: format!("Failed to read donor samples {}: {}", path.display(), e),
        })?;

        let lookup = match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(projects)) if projects.values().all(Value::is_object) => {
                let nested = serde_json::from_value(Value::Object(projects)).map_err(|e| {
                    JoinError::Json {
                        msg: format!("Invalid donor samples {}: {}", path.display(), e),
                    }
                })?;
                Self::from_nested(nested)
            }
            _ => Self::from_rows(read_records(path)?)?,
        };
        debug!(entries = lookup.len(), path = %path.display(), "Loaded donor samples");
        Ok(lookup)
    }

    fn from_nested(nested: HashMap<String, HashMap<String, DonorSample>>) -> Self {
        let mut lookup = Self::new();
        for (project_id, donors) in nested {
            for (donor_id, mut sample) in donors {
                sample.project_id = project_id.clone();
                sample.donor_id = donor_id;
                lookup.insert(sample);
            }
        }
        lookup
    }

    fn from_rows(rows: Vec<Record>) -> Result<Self, JoinError> {
        let mut lookup = Self::new();
        for row in rows {
            let sample: DonorSample = serde_json::from_value(row.into())?;
            if sample.project_id.is_empty() || sample.donor_id.is_empty() {
                return Err(JoinError::missing_field(
                    "project_id/donor_id",
                    "donor sample row",
                ));
            }
            lookup.insert(sample);
        }
        Ok(lookup)
    }
}

impl FromIterator<DonorSample> for DonorSampleLookup {
    fn from_iter<I: IntoIterator<Item = DonorSample>>(iter: I) -> Self {
        let mut lookup = Self::new();
        for sample in iter {
            lookup.insert(sample);
        }
        lookup
    }
}

/// Set the donor/sample context and category onto a record.
///
/// Reads `_project_id` and `_donor_id` from the record and sets
/// `_specimen_id`, `_sample_id` and `_type`.
pub fn enrich(
    record: Record,
    category_id: &str,
    lookup: &DonorSampleLookup,
) -> Result<Record, JoinError> {
    let project_id = record
        .text_value(PROJECT_ID)
        .ok_or_else(|| JoinError::missing_field(PROJECT_ID, format!("record {}", record)))?;
    enrich_in_project(record, &project_id, category_id, lookup)
}

/// Like [`enrich`], but resolves the donor within `project_id`.
///
/// The record needs no `_project_id`; if it has one, it must name the same
/// project.
pub fn enrich_in_project(
    mut record: Record,
    project_id: &str,
    category_id: &str,
    lookup: &DonorSampleLookup,
) -> Result<Record, JoinError> {
    if let Some(found) = record.text_value(PROJECT_ID) {
        if found != project_id {
            return Err(JoinError::ProjectMismatch {
                expected: project_id.to_string(),
                found,
            });
        }
    }
    let donor_id = record
        .text_value(DONOR_ID)
        .ok_or_else(|| JoinError::missing_field(DONOR_ID, format!("record {}", record)))?;

    let sample = lookup
        .get(project_id, &donor_id)
        .ok_or_else(|| JoinError::UnresolvedDonor {
            project_id: project_id.to_string(),
            donor_id,
        })?;

    record.insert(SPECIMEN_ID, sample.specimen_id.clone());
    record.insert(SAMPLE_ID, sample.sample_id.clone());
    record.insert(TYPE, category_id);
    Ok(record)
}

/// Enrichment pass over a collection
pub struct EnrichmentStage {
    category_id: String,
    project_id: Option<String>,
    lookup: Arc<DonorSampleLookup>,
}

impl EnrichmentStage {
    /// Create a stage stamping `category_id` onto every record
    pub fn new(category_id: impl Into<String>, lookup: Arc<DonorSampleLookup>) -> Self {
        Self {
            category_id: category_id.into(),
            project_id: None,
            lookup,
        }
    }

    /// Resolve every donor within one project instead of each record's
    /// `_project_id`
    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Enrich every record. Any unresolved donor aborts the pass.
    pub fn run(
        &self,
        executor: &Executor,
        records: ParallelCollection<Record>,
    ) -> Result<ParallelCollection<Record>, JoinError> {
        let lookup = Arc::clone(&self.lookup);
        let category_id = self.category_id.as_str();
        match self.project_id.as_deref() {
            Some(project_id) => executor.try_map(records, move |record| {
                enrich_in_project(record, project_id, category_id, &lookup)
            }),
            None => executor.try_map(records, move |record| enrich(record, category_id, &lookup)),
        }
    }
}

/// Enrich every record of a collection. See [`enrich`].
pub fn enrich_all(
    executor: &Executor,
    records: ParallelCollection<Record>,
    category_id: &str,
    lookup: Arc<DonorSampleLookup>,
) -> Result<ParallelCollection<Record>, JoinError> {
    EnrichmentStage::new(category_id, lookup).run(executor, records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::ParallelConfig;
    use serde_json::json;
    use tempfile::TempDir;

    fn lookup() -> DonorSampleLookup {
        vec![
            DonorSample::new("P1", "DO1", "SP1", "SA1"),
            DonorSample::new("P1", "DO2", "SP2", "SA2"),
            DonorSample::new("P2", "DO1", "SP9", "SA9"),
        ]
        .into_iter()
        .collect()
    }

    fn record(project: &str, donor: &str) -> Record {
        Record::from_value(json!({"_project_id": project, "_donor_id": donor, "x": 1})).unwrap()
    }

    #[test]
    fn test_enrich_sets_fields() {
        let out = enrich(record("P1", "DO2"), "ssm", &lookup()).unwrap();
        assert_eq!(out.text_value(SPECIMEN_ID).as_deref(), Some("SP2"));
        assert_eq!(out.text_value(SAMPLE_ID).as_deref(), Some("SA2"));
        assert_eq!(out.text_value(TYPE).as_deref(), Some("ssm"));
        assert_eq!(out.text_value("x").as_deref(), Some("1"));
    }

    #[test]
    fn test_enrich_is_project_scoped() {
        let out = enrich(record("P2", "DO1"), "ssm", &lookup()).unwrap();
        assert_eq!(out.text_value(SPECIMEN_ID).as_deref(), Some("SP9"));
    }

    #[test]
    fn test_enrich_unresolved_donor() {
        let err = enrich(record("P2", "DO2"), "ssm", &lookup()).unwrap_err();
        assert_eq!(
            err,
            JoinError::UnresolvedDonor {
                project_id: "P2".to_string(),
                donor_id: "DO2".to_string()
            }
        );
    }

    #[test]
    fn test_enrich_requires_project_and_donor() {
        let no_project = Record::from_value(json!({"_donor_id": "DO1"})).unwrap();
        assert!(matches!(
            enrich(no_project, "ssm", &lookup()),
            Err(JoinError::MissingField { .. })
        ));
        let no_donor = Record::from_value(json!({"_project_id": "P1"})).unwrap();
        assert!(matches!(
            enrich(no_donor, "ssm", &lookup()),
            Err(JoinError::MissingField { .. })
        ));
    }

    #[test]
    fn test_stage_aborts_on_any_miss() {
        let ex = Executor::new(ParallelConfig::new().with_chunk_size(1)).unwrap();
        let stage = EnrichmentStage::new("ssm", Arc::new(lookup()));
        let input = ex.partition(vec![record("P1", "DO1"), record("P1", "DO404")]);
        assert!(matches!(
            stage.run(&ex, input),
            Err(JoinError::UnresolvedDonor { .. })
        ));
    }

    #[test]
    fn test_enrich_in_project_without_project_field() {
        let no_project = Record::from_value(json!({"_donor_id": "DO1", "x": 1})).unwrap();
        let out = enrich_in_project(no_project, "P2", "ssm", &lookup()).unwrap();
        assert_eq!(out.text_value(SPECIMEN_ID).as_deref(), Some("SP9"));
        assert!(!out.contains(PROJECT_ID));
    }

    #[test]
    fn test_enrich_in_project_rejects_other_project() {
        let err = enrich_in_project(record("P2", "DO1"), "P1", "ssm", &lookup()).unwrap_err();
        assert_eq!(
            err,
            JoinError::ProjectMismatch {
                expected: "P1".to_string(),
                found: "P2".to_string()
            }
        );
    }

    #[test]
    fn test_stage_with_project() {
        let ex = Executor::new(ParallelConfig::new().with_chunk_size(1)).unwrap();
        let stage = EnrichmentStage::new("ssm", Arc::new(lookup())).with_project("P1");
        let input = ex.partition(vec![
            Record::from_value(json!({"_donor_id": "DO1"})).unwrap(),
            record("P1", "DO2"),
        ]);
        let out = stage.run(&ex, input).unwrap().into_vec();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|r| r.text_value(TYPE).as_deref() == Some("ssm")));
    }

    #[test]
    fn test_load_nested_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("donors.json");
        fs::write(
            &path,
            r#"{"P1": {"DO1": {"specimen_id": "SP1", "sample_id": "SA1", "submitted_sample_id": "S-1"}}}"#,
        )
        .unwrap();

        let lookup = DonorSampleLookup::load(&path).unwrap();
        let sample = lookup.get("P1", "DO1").unwrap();
        assert_eq!(sample.project_id, "P1");
        assert_eq!(sample.donor_id, "DO1");
        assert_eq!(sample.submitted_sample_id.as_deref(), Some("S-1"));
    }

    #[test]
    fn test_load_ndjson_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("donors.jsonl");
        fs::write(
            &path,
            "{\"project_id\":\"P1\",\"donor_id\":\"DO1\",\"specimen_id\":\"SP1\",\"sample_id\":\"SA1\"}\n\
             {\"project_id\":\"P2\",\"donor_id\":\"DO7\",\"specimen_id\":\"SP7\",\"sample_id\":\"SA7\"}\n",
        )
        .unwrap();

        let lookup = DonorSampleLookup::load(&path).unwrap();
        assert_eq!(lookup.len(), 2);
        assert_eq!(lookup.get("P2", "DO7").unwrap().sample_id, "SA7");
    }

    #[test]
    fn test_load_rows_without_ids_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("donors.jsonl");
        fs::write(
            &path,
            "{\"specimen_id\":\"SP1\",\"sample_id\":\"SA1\"}\n{\"specimen_id\":\"SP2\",\"sample_id\":\"SA2\"}\n",
        )
        .unwrap();
        assert!(DonorSampleLookup::load(&path).is_err());
    }

    #[test]
    fn test_load_nested_json_reports_its_own_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("donors.json");
        fs::write(&path, r#"{"P1": {"DO1": {"sample_id": "SA1"}}}"#).unwrap();

        let err = DonorSampleLookup::load(&path).unwrap_err();
        assert!(matches!(err, JoinError::Json { .. }), "{:?}", err);
        assert!(err.to_string().contains("specimen_id"));
    }

    #[test]
    fn test_load_single_ndjson_row() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("donors.jsonl");
        fs::write(
            &path,
            "{\"project_id\":\"P1\",\"donor_id\":\"DO1\",\"specimen_id\":\"SP1\",\"sample_id\":\"SA1\"}\n",
        )
        .unwrap();
        assert_eq!(DonorSampleLookup::load(&path).unwrap().len(), 1);
    }
}
