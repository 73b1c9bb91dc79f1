//! Error taxonomy for the ingestion pipeline
//!
//! Each variant of [`IngestError`] has a fixed blast radius:
//!
//! - `Discovery`: fatal to the run
//! - `Download`: fatal to one file, after retries
//! - `Extraction`: fatal to one file
//! - `FieldParse`: fatal to one record, counted and dropped
//! - `Load`: fatal to the rest of one file, nothing ledgered

use cnpj_common::types::{EntityKind, Period};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Discovery of {target} failed: {source}")]
    Discovery {
        target: String,
        #[source]
        source: HostError,
    },

    #[error("Download of {file} failed after {attempts} attempt(s): {source}")]
    Download {
        file: String,
        attempts: u32,
        #[source]
        source: HostError,
    },

    #[error("Extraction of {archive} failed: {reason}")]
    Extraction { archive: String, reason: String },

    #[error("Record rejected: {0}")]
    FieldParse(#[from] FieldParseError),

    #[error("Load into {kind} failed: {source}")]
    Load {
        kind: EntityKind,
        #[source]
        source: SinkError,
    },

    #[error("Every download for period {0} failed")]
    AllDownloadsFailed(Period),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Common(#[from] cnpj_common::CommonError),
}

impl IngestError {
    pub(crate) fn extraction(archive: impl Into<String>, reason: impl ToString) -> Self {
        IngestError::Extraction {
            archive: archive.into(),
            reason: reason.to_string(),
        }
    }
}

/// Failure talking to the remote archive host
#[derive(Error, Debug)]
pub enum HostError {
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unparsable listing: {0}")]
    Listing(String),
}

impl HostError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Timeouts, dropped connections, 5xx, 408 and 429 are transient. Other
    /// 4xx responses and malformed listings are not.
    pub fn is_transient(&self) -> bool {
        match self {
            HostError::Status { status, .. } => transient_status(*status),
            HostError::Http(err) => match err.status() {
                Some(status) => transient_status(status.as_u16()),
                None => !err.is_builder() && !err.is_redirect(),
            },
            HostError::Io(_) => true,
            HostError::Listing(_) => false,
        }
    }
}

fn transient_status(status: u16) -> bool {
    status >= 500 || status == 408 || status == 429
}

/// A row that could not be turned into a typed record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldParseError {
    #[error("expected {expected} columns, found {found}")]
    ColumnCount { expected: usize, found: usize },

    #[error("invalid date in {field}: '{value}'")]
    InvalidDate { field: &'static str, value: String },

    #[error("invalid decimal in {field}: '{value}'")]
    InvalidDecimal { field: &'static str, value: String },
}

/// A record whose natural key is missing or malformed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("natural key field {field} is malformed: '{value}'")]
pub struct KeyRejection {
    pub field: &'static str,
    pub value: String,
}

/// Failure reported by a sink implementation
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Sink unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let status = |code| HostError::Status {
            status: code,
            url: "http://host/x.zip".to_string(),
        };
        assert!(status(500).is_transient());
        assert!(status(503).is_transient());
        assert!(status(429).is_transient());
        assert!(!status(404).is_transient());
        assert!(!status(403).is_transient());
    }

    #[test]
    fn test_io_is_transient_listing_is_not() {
        let io = HostError::Io(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"));
        assert!(io.is_transient());
        assert!(!HostError::Listing("no links".into()).is_transient());
    }
}
