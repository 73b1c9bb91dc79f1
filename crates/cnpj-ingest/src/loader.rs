//! Batch application with natural-key validation

use crate::error::{IngestError, KeyRejection, Result};
use crate::sink::Sink;
use crate::transform::{Record, TableSchema};
use cnpj_common::types::EntityKind;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of applying one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Rows the sink applied
    pub committed: u64,
    /// Records dropped for a malformed natural key
    pub rejected: u64,
    /// Records superseded by a later record with the same key in the same batch
    pub superseded: u64,
}

#[derive(Clone)]
pub struct Loader {
    sink: Arc<dyn Sink>,
}

impl Loader {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self { sink }
    }

    /// Validate, deduplicate and upsert one batch.
    ///
    /// Records with a malformed key are counted and dropped. Within the batch
    /// the last record for a key wins. The sink applies the rest atomically.
    pub async fn load_batch(&self, kind: EntityKind, records: Vec<Record>) -> Result<BatchOutcome> {
        let total = records.len() as u64;
        let mut rejected = 0u64;
        let mut accepted = Vec::with_capacity(records.len());

        for record in records {
            match validate_key(&record) {
                Ok(()) => accepted.push(record),
                Err(rejection) => {
                    rejected += 1;
                    if rejected <= 5 {
                        warn!(table = %kind, reason = %rejection, "Rejected record");
                    }
                },
            }
        }

        let accepted = dedup_last_wins(accepted);
        let superseded = total - rejected - accepted.len() as u64;

        if accepted.is_empty() {
            return Ok(BatchOutcome {
                committed: 0,
                rejected,
                superseded,
            });
        }

        let committed = self
            .sink
            .upsert_batch(kind, &accepted)
            .await
            .map_err(|source| IngestError::Load { kind, source })?;

        debug!(table = %kind, committed, rejected, superseded, "Batch loaded");
        Ok(BatchOutcome {
            committed,
            rejected,
            superseded,
        })
    }
}

fn dedup_last_wins(records: Vec<Record>) -> Vec<Record> {
    let mut last_index: HashMap<Vec<String>, usize> = HashMap::with_capacity(records.len());
    for (index, record) in records.iter().enumerate() {
        let key = record
            .natural_key()
            .into_iter()
            .map(|part| part.unwrap_or_default().to_string())
            .collect();
        last_index.insert(key, index);
    }

    if last_index.len() == records.len() {
        return records;
    }

    let mut keep = vec![false; records.len()];
    for index in last_index.into_values() {
        keep[index] = true;
    }

    records
        .into_iter()
        .zip(keep)
        .filter_map(|(record, keep)| keep.then_some(record))
        .collect()
}

/// Check the natural key of `record` is present and well-formed.
pub fn validate_key(record: &Record) -> std::result::Result<(), KeyRejection> {
    let schema = TableSchema::for_kind(record.kind());

    for (field, value) in schema.key.iter().copied().zip(record.natural_key()) {
        let value = value.unwrap_or_default();
        let ok = match field {
            "cnpj_basico" => is_digits(value, 8),
            "cnpj_ordem" => is_digits(value, 4),
            "cnpj_dv" => is_digits(value, 2),
            _ => !value.trim().is_empty(),
        };

        if !ok {
            return Err(KeyRejection {
                field,
                value: value.to_string(),
            });
        }
    }

    Ok(())
}

fn is_digits(value: &str, len: usize) -> bool {
    value.len() == len && value.bytes().all(|b| b.is_ascii_digit())
}
