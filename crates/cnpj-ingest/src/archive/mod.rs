//! Remote archive discovery and download
//!
//! [`ArchiveHost`] is the pluggable transport: it knows how to list periods,
//! list a period's archives, and stream one archive to disk. [`ArchiveClient`]
//! layers ordering, retry, verified reuse of kept files, and bounded parallel
//! fetching on top of any host.

mod client;
mod http;
pub mod listing;

pub use client::{ArchiveClient, FetchedFile};
pub use http::HttpDirectoryHost;

use crate::error::HostError;
use async_trait::async_trait;
use cnpj_common::types::Period;
use std::path::Path;

#[async_trait]
pub trait ArchiveHost: Send + Sync {
    /// Every period the host publishes, in any order.
    async fn list_periods(&self) -> Result<Vec<Period>, HostError>;

    /// Archive file names published for `period`.
    async fn list_files(&self, period: Period) -> Result<Vec<String>, HostError>;

    /// Size the host reports for an archive, when it reports one.
    async fn content_length(&self, period: Period, filename: &str)
        -> Result<Option<u64>, HostError>;

    /// Stream an archive into `dest`, creating or truncating it. Returns bytes written.
    async fn download(&self, period: Period, filename: &str, dest: &Path) -> Result<u64, HostError>;
}
