use super::Sink;
use crate::error::SinkError;
use crate::transform::Record;
use async_trait::async_trait;
use cnpj_common::types::{EntityKind, Period};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

type Table = BTreeMap<Vec<String>, Record>;

/// In-process sink for dry runs and tests
#[derive(Debug, Default)]
pub struct MemorySink {
    tables: Mutex<HashMap<EntityKind, Table>>,
    ledger: Mutex<BTreeSet<(Period, String)>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn owned_key(record: &Record) -> Vec<String> {
    record
        .natural_key()
        .into_iter()
        .map(|part| part.unwrap_or_default().to_string())
        .collect()
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row_count(&self, kind: EntityKind) -> usize {
        lock(&self.tables).get(&kind).map_or(0, BTreeMap::len)
    }

    /// Stored record for a natural key, e.g. `&["11222333", "0001", "81"]`.
    pub fn get(&self, kind: EntityKind, key: &[&str]) -> Option<Record> {
        let key: Vec<String> = key.iter().map(|k| k.to_string()).collect();
        lock(&self.tables).get(&kind)?.get(&key).cloned()
    }

    pub fn ledger_entries(&self) -> Vec<(Period, String)> {
        lock(&self.ledger).iter().cloned().collect()
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn upsert_batch(&self, kind: EntityKind, records: &[Record]) -> Result<u64, SinkError> {
        let mut tables = lock(&self.tables);
        let table = tables.entry(kind).or_default();
        for record in records {
            table.insert(owned_key(record), record.clone());
        }
        Ok(records.len() as u64)
    }

    async fn is_ledgered(&self, period: Period, filename: &str) -> Result<bool, SinkError> {
        Ok(lock(&self.ledger).contains(&(period, filename.to_string())))
    }

    async fn mark_ledgered(&self, period: Period, filename: &str) -> Result<(), SinkError> {
        lock(&self.ledger).insert((period, filename.to_string()));
        Ok(())
    }

    async fn reset_ledger(&self, period: Option<Period>) -> Result<u64, SinkError> {
        let mut ledger = lock(&self.ledger);
        let before = ledger.len();
        match period {
            Some(period) => ledger.retain(|(p, _)| *p != period),
            None => ledger.clear(),
        }
        Ok((before - ledger.len()) as u64)
    }
}
