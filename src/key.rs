//! Composite key construction
//!
//! Keys are built by joining the textual values of named fields with a fixed
//! separator. They are compared for equality only and never parsed back, so
//! two records produce the same key exactly when the named fields are
//! pairwise equal as strings.

use crate::error::JoinError;
use crate::record::{Record, ANALYSIS_ID, ANALYZED_SAMPLE_ID, DONOR_ID};

/// Separator placed between key components
pub const KEY_SEPARATOR: char = '#';

/// Ordered list of fields that make up a composite key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFields(Vec<String>);

impl KeyFields {
    /// Create a key definition from field names, in order
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(fields.into_iter().map(Into::into).collect())
    }

    /// `analysis_id#analyzed_sample_id`, the primary/meta join key
    pub fn analysis_sample() -> Self {
        Self::new([ANALYSIS_ID, ANALYZED_SAMPLE_ID])
    }

    /// Field names in key order
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Build the key for a record
    pub fn key(&self, record: &Record) -> Result<String, JoinError> {
        build_key(record, &self.0)
    }
}

impl Default for KeyFields {
    fn default() -> Self {
        Self::analysis_sample()
    }
}

/// Build a composite key from the named fields of a record.
///
/// Fails with [`JoinError::MissingField`] if any field is absent, null,
/// empty or not a scalar.
///
/// # Example
///
/// ```
/// use ferro_join::key::build_key;
/// use ferro_join::Record;
///
/// let record = Record::new().with("analysis_id", "A1").with("analyzed_sample_id", "S1");
/// let key = build_key(&record, &["analysis_id", "analyzed_sample_id"]).unwrap();
/// assert_eq!(key, "A1#S1");
/// ```
pub fn build_key<S: AsRef<str>>(record: &Record, fields: &[S]) -> Result<String, JoinError> {
    let mut key = String::new();
    for (i, field) in fields.iter().enumerate() {
        let field = field.as_ref();
        let value = record
            .text_value(field)
            .ok_or_else(|| JoinError::missing_field(field, format!("record {}", record)))?;
        if i > 0 {
            key.push(KEY_SEPARATOR);
        }
        key.push_str(&value);
    }
    Ok(key)
}

/// Key a record by donor and export data type, e.g. `DO1#meth_array`.
///
/// The donor identifier must be present and non-empty.
pub fn donor_data_type_key(record: &Record, data_type: &str) -> Result<String, JoinError> {
    let donor_id = record.text_value(DONOR_ID).ok_or_else(|| {
        JoinError::missing_field(DONOR_ID, format!("Failed to resolve donor from row {}", record))
    })?;
    Ok(format!("{}{}{}", donor_id, KEY_SEPARATOR, data_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        Record::from_value(value).unwrap()
    }

    #[test]
    fn test_build_key_in_field_order() {
        let r = record(json!({"b": "2", "a": "1"}));
        assert_eq!(build_key(&r, &["a", "b"]).unwrap(), "1#2");
        assert_eq!(build_key(&r, &["b", "a"]).unwrap(), "2#1");
    }

    #[test]
    fn test_build_key_single_field() {
        let r = record(json!({"a": "x"}));
        assert_eq!(build_key(&r, &["a"]).unwrap(), "x");
    }

    #[test]
    fn test_build_key_uses_textual_value() {
        let numeric = record(json!({"id": 7}));
        let text = record(json!({"id": "7"}));
        assert_eq!(
            build_key(&numeric, &["id"]).unwrap(),
            build_key(&text, &["id"]).unwrap()
        );
    }

    #[rstest]
    #[case(json!({"analysis_id": "A1"}))]
    #[case(json!({"analysis_id": "A1", "analyzed_sample_id": ""}))]
    #[case(json!({"analysis_id": "A1", "analyzed_sample_id": null}))]
    #[case(json!({"analysis_id": "A1", "analyzed_sample_id": ["S1"]}))]
    fn test_build_key_missing_field(#[case] value: serde_json::Value) {
        let r = record(value);
        let err = KeyFields::analysis_sample().key(&r).unwrap_err();
        match err {
            JoinError::MissingField { field, .. } => assert_eq!(field, ANALYZED_SAMPLE_ID),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_analysis_sample_key() {
        let r = record(json!({"analysis_id": "A1", "analyzed_sample_id": "S1", "x": 1}));
        assert_eq!(KeyFields::default().key(&r).unwrap(), "A1#S1");
    }

    #[test]
    fn test_donor_data_type_key() {
        let r = record(json!({"_donor_id": "DO1"}));
        assert_eq!(donor_data_type_key(&r, "ssm").unwrap(), "DO1#ssm");
    }

    #[test]
    fn test_donor_data_type_key_requires_donor() {
        let r = record(json!({"_donor_id": ""}));
        assert!(matches!(
            donor_data_type_key(&r, "ssm"),
            Err(JoinError::MissingField { .. })
        ));
    }
}
