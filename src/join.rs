//! Broadcast hash join of primary records against meta records
//!
//! The meta side is small relative to the primary side. It is collected into
//! a single in-memory [`MetaIndex`] (the fan-in barrier), wrapped in an `Arc`
//! and shared read-only with every worker. Primary partitions are then joined
//! independently: each primary record looks up its meta record by composite
//! key and takes a shallow copy of every meta field, meta winning on name
//! collisions.
//!
//! A primary record without a meta record is a fatal invariant violation for
//! the whole pass, as is a meta file holding two records for one key.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::JoinError;
use crate::key::KeyFields;
use crate::parallel::{Executor, ParallelCollection};
use crate::record::{Record, DONOR_ID};

/// Immutable lookup from composite key to meta record
#[derive(Debug, Default)]
pub struct MetaIndex {
    records: HashMap<String, Record>,
}

impl MetaIndex {
    /// Key every meta record in parallel, then fan the pairs into one map.
    ///
    /// Fails if any record lacks a key field or two records share a key.
    pub fn build(
        executor: &Executor,
        meta: ParallelCollection<Record>,
        key_fields: &KeyFields,
    ) -> Result<Self, JoinError> {
        let keyed = executor.try_map(meta, |record| {
            let key = key_fields.key(&record)?;
            Ok((key, record))
        })?;

        let capacity = keyed.len();
        let records = executor.collect_fold(
            keyed,
            HashMap::with_capacity(capacity),
            |mut records, (key, record)| {
                match records.entry(key) {
                    Entry::Occupied(entry) => {
                        return Err(JoinError::DuplicateMetaKey {
                            key: entry.key().clone(),
                        })
                    }
                    Entry::Vacant(entry) => {
                        entry.insert(record);
                    }
                }
                Ok(records)
            },
        )?;
        Ok(Self { records })
    }

    /// Meta record for a key
    pub fn get(&self, key: &str) -> Option<&Record> {
        self.records.get(key)
    }

    /// Number of indexed meta records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<(String, Record)> for MetaIndex {
    fn from_iter<I: IntoIterator<Item = (String, Record)>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

/// Join a single primary record against the index.
///
/// The primary record must carry a non-empty donor identifier.
pub fn join_record(
    mut primary: Record,
    index: &MetaIndex,
    key_fields: &KeyFields,
) -> Result<Record, JoinError> {
    if primary.text_value(DONOR_ID).is_none() {
        return Err(JoinError::missing_field(
            DONOR_ID,
            format!("primary record {}", primary),
        ));
    }

    let key = key_fields.key(&primary)?;
    let meta = index
        .get(&key)
        .ok_or(JoinError::JoinInvariantViolation { key })?;
    primary.merge_from(meta);
    Ok(primary)
}

/// Broadcast hash join running on an [`Executor`]
pub struct BroadcastJoinEngine<'a> {
    executor: &'a Executor,
    key_fields: KeyFields,
}

impl<'a> BroadcastJoinEngine<'a> {
    /// Create an engine joining on `analysis_id#analyzed_sample_id`
    pub fn new(executor: &'a Executor) -> Self {
        Self::with_key_fields(executor, KeyFields::analysis_sample())
    }

    /// Create an engine joining on custom key fields
    pub fn with_key_fields(executor: &'a Executor, key_fields: KeyFields) -> Self {
        Self {
            executor,
            key_fields,
        }
    }

    /// Key fields used by this engine
    pub fn key_fields(&self) -> &KeyFields {
        &self.key_fields
    }

    /// Join every primary record with its meta record.
    ///
    /// No output order is guaranteed. Any error aborts the whole join.
    pub fn join(
        &self,
        primary: ParallelCollection<Record>,
        meta: ParallelCollection<Record>,
    ) -> Result<ParallelCollection<Record>, JoinError> {
        let index = Arc::new(MetaIndex::build(self.executor, meta, &self.key_fields)?);
        debug!(
            meta_records = index.len(),
            primary_records = primary.len(),
            partitions = primary.num_partitions(),
            "Broadcasting meta index"
        );

        // The index is dropped with the closure once every partition is done.
        let key_fields = &self.key_fields;
        self.executor
            .try_map(primary, move |record| join_record(record, &index, key_fields))
    }
}

/// Join using the default key fields. See [`BroadcastJoinEngine::join`].
pub fn join(
    executor: &Executor,
    primary: ParallelCollection<Record>,
    meta: ParallelCollection<Record>,
    key_fields: &KeyFields,
) -> Result<ParallelCollection<Record>, JoinError> {
    BroadcastJoinEngine::with_key_fields(executor, key_fields.clone()).join(primary, meta)
}
