//! Storage capability set consumed by the loader and the ledger

mod memory;
mod postgres;

pub use memory::MemorySink;
pub use postgres::PostgresSink;

use crate::error::SinkError;
use crate::transform::Record;
use async_trait::async_trait;
use cnpj_common::types::{EntityKind, Period};

/// Where typed records and ledger entries are persisted.
///
/// `upsert_batch` must be all-or-nothing: either every record of the batch is
/// applied or none is.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Insert or overwrite by natural key. Returns rows applied.
    ///
    /// Callers guarantee every record is of `kind` and that no two records
    /// share a natural key.
    async fn upsert_batch(&self, kind: EntityKind, records: &[Record]) -> Result<u64, SinkError>;

    async fn is_ledgered(&self, period: Period, filename: &str) -> Result<bool, SinkError>;

    /// Idempotent; marking an already ledgered file is not an error.
    async fn mark_ledgered(&self, period: Period, filename: &str) -> Result<(), SinkError>;

    /// Delete ledger entries, for one period or all of them. Returns entries removed.
    async fn reset_ledger(&self, period: Option<Period>) -> Result<u64, SinkError>;
}
