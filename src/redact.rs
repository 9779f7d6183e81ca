//! Removal of access-controlled fields for open-access release

use std::collections::HashSet;

use serde_json::Value;

use crate::parallel::{Executor, ParallelCollection};
use crate::record::Record;

/// Field names that must not appear in open-access output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlledFields(HashSet<String>);

impl ControlledFields {
    /// Create a controlled field set
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(fields.into_iter().map(Into::into).collect())
    }

    /// Whether a field is controlled
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains(field)
    }

    /// Number of controlled fields
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no field is controlled
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the underlying set
    pub fn as_set(&self) -> &HashSet<String> {
        &self.0
    }

    /// Field names in sorted order
    pub fn sorted(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = self.0.iter().map(String::as_str).collect();
        fields.sort_unstable();
        fields
    }
}

impl<S: Into<String>> FromIterator<S> for ControlledFields {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// Strip controlled fields from the top level and from every object in the
/// `observations` array.
///
/// Non-object observation elements are left alone.
pub fn redact(mut record: Record, controlled: &HashSet<String>) -> Record {
    if controlled.is_empty() {
        return record;
    }

    record.remove_fields(controlled);
    if let Some(observations) = record.observations_mut() {
        for observation in observations.iter_mut() {
            if let Value::Object(fields) = observation {
                fields.retain(|field, _| !controlled.contains(field));
            }
        }
    }
    record
}

/// Redact every record of a collection
pub fn redact_all(
    executor: &Executor,
    records: ParallelCollection<Record>,
    controlled: &ControlledFields,
) -> ParallelCollection<Record> {
    let controlled = controlled.as_set();
    executor.map(records, |record| redact(record, controlled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::ParallelConfig;
    use serde_json::json;

    fn record(value: Value) -> Record {
        Record::from_value(value).unwrap()
    }

    fn controlled(fields: &[&str]) -> HashSet<String> {
        fields.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_redact_top_level_and_observations() {
        let input = record(json!({
            "a": 1,
            "secret": 2,
            "observations": [{"secret": 3, "b": 4}]
        }));
        let out = redact(input, &controlled(&["secret"]));
        assert_eq!(out, record(json!({"a": 1, "observations": [{"b": 4}]})));
    }

    #[test]
    fn test_redact_without_observations() {
        let out = redact(record(json!({"a": 1, "secret": 2})), &controlled(&["secret"]));
        assert_eq!(out, record(json!({"a": 1})));
    }

    #[test]
    fn test_redact_absent_field_is_noop() {
        let input = record(json!({"a": 1, "observations": [{"b": 2}]}));
        let out = redact(input.clone(), &controlled(&["secret"]));
        assert_eq!(out, input);
    }

    #[test]
    fn test_redact_empty_set() {
        let input = record(json!({"secret": 1}));
        assert_eq!(redact(input.clone(), &HashSet::new()), input);
    }

    #[test]
    fn test_redact_keeps_order() {
        let out = redact(
            record(json!({"z": 1, "secret": 2, "a": 3, "m": 4})),
            &controlled(&["secret"]),
        );
        let fields: Vec<_> = out.fields().collect();
        assert_eq!(fields, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_redact_skips_non_object_observations() {
        let input = record(json!({"observations": [{"secret": 1}, "secret", 7]}));
        let out = redact(input, &controlled(&["secret"]));
        assert_eq!(out, record(json!({"observations": [{}, "secret", 7]})));
    }

    #[test]
    fn test_redact_is_idempotent() {
        let set = controlled(&["secret", "other"]);
        let input = record(json!({
            "secret": 1,
            "keep": 2,
            "observations": [{"other": 1, "keep": 2}, {"secret": 3}]
        }));
        let once = redact(input, &set);
        let twice = redact(once.clone(), &set);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_redact_all_keeps_count() {
        let ex = Executor::new(ParallelConfig::new().with_chunk_size(2)).unwrap();
        let records = ex.partition(
            (0..5)
                .map(|i| record(json!({"i": i, "secret": i})))
                .collect(),
        );
        let out = redact_all(&ex, records, &ControlledFields::new(["secret"]));
        assert_eq!(out.len(), 5);
        assert!(out.iter().all(|r| !r.contains("secret")));
    }

    #[test]
    fn test_controlled_fields_sorted() {
        let fields: ControlledFields = ["b", "a"].into_iter().collect();
        assert_eq!(fields.sorted(), vec!["a", "b"]);
        assert!(fields.contains("a"));
        assert_eq!(fields.len(), 2);
    }
}
