//! Record of which (period, file) pairs are fully applied

use crate::error::Result;
use crate::sink::Sink;
use cnpj_common::types::Period;
use std::sync::Arc;
use tracing::info;

/// Gatekeeper for reprocessing.
///
/// An entry exists for a file only if every batch derived from it has
/// committed; [`Ledger::mark_processed`] is therefore the last step of a file.
#[derive(Clone)]
pub struct Ledger {
    sink: Arc<dyn Sink>,
}

impl Ledger {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self { sink }
    }

    pub async fn is_processed(&self, period: Period, filename: &str) -> Result<bool> {
        Ok(self.sink.is_ledgered(period, filename).await?)
    }

    pub async fn mark_processed(&self, period: Period, filename: &str) -> Result<()> {
        self.sink.mark_ledgered(period, filename).await?;
        info!(period = %period, file = %filename, "Marked processed");
        Ok(())
    }

    /// Forget every processed file.
    pub async fn reset(&self) -> Result<u64> {
        let removed = self.sink.reset_ledger(None).await?;
        info!(removed, "Ledger cleared");
        Ok(removed)
    }

    /// Forget the processed files of one period.
    pub async fn reset_period(&self, period: Period) -> Result<u64> {
        let removed = self.sink.reset_ledger(Some(period)).await?;
        info!(period = %period, removed, "Ledger cleared for period");
        Ok(removed)
    }
}
