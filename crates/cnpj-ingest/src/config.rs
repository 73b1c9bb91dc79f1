//! Pipeline configuration
//!
//! Values come from the environment (a `.env` file is honoured) and can be
//! overridden field by field with the `with_*` methods, which is what the CLI
//! and the tests do.

use crate::error::{IngestError, Result};
use cnpj_common::types::Period;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Defaults
// ============================================================================

/// Public directory of monthly snapshots.
pub const DEFAULT_BASE_URL: &str =
    "https://arquivos.receitafederal.gov.br/dados/cnpj/dados_abertos_cnpj";

pub const DEFAULT_BATCH_SIZE: usize = 50_000;
pub const DEFAULT_DOWNLOAD_WORKERS: usize = 4;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 5;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Archives of the largest entities run to several gigabytes.
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 300;

pub const DEFAULT_TEMP_DIR: &str = "./temp";
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Delay growth between download attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RetryBackoff {
    #[default]
    Fixed,
    Exponential,
}

impl FromStr for RetryBackoff {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "fixed" | "linear" => Ok(RetryBackoff::Fixed),
            "exponential" | "exp" => Ok(RetryBackoff::Exponential),
            _ => Err(IngestError::Config(format!("Invalid retry backoff: {s}"))),
        }
    }
}

/// Attempt count and spacing for transient download failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
    pub backoff: RetryBackoff,
}

impl RetryPolicy {
    /// Wait before retrying after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            RetryBackoff::Fixed => self.delay,
            RetryBackoff::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.delay.saturating_mul(factor)
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Root of the remote directory listing
    pub base_url: String,
    /// Postgres connection string, not needed for dry runs
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    /// Snapshot to ingest, most recent when unset
    pub period: Option<Period>,
    /// Reprocess files even when ledgered
    pub force: bool,
    /// Records per committed batch
    pub batch_size: usize,
    /// Concurrent downloads
    pub download_workers: usize,
    pub retry_attempts: u32,
    pub retry_delay_secs: u64,
    pub retry_backoff: RetryBackoff,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    /// Scratch directory for archives and extracted members
    pub temp_dir: PathBuf,
    /// Keep archives after the run and reuse verified ones on the next
    pub keep_files: bool,
    /// Abort the run at the first failed file
    pub fail_fast: bool,
    pub show_progress: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            database_url: None,
            database_max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            period: None,
            force: false,
            batch_size: DEFAULT_BATCH_SIZE,
            download_workers: DEFAULT_DOWNLOAD_WORKERS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
            retry_backoff: RetryBackoff::Fixed,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            temp_dir: PathBuf::from(DEFAULT_TEMP_DIR),
            keep_files: false,
            fail_fast: false,
            show_progress: true,
        }
    }
}

impl IngestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from environment variables, falling back to defaults.
    ///
    /// Unset variables keep their default; set but unparsable ones are an error.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            base_url: std::env::var("BASE_URL").unwrap_or(defaults.base_url),
            database_url: std::env::var("DATABASE_URL").ok(),
            database_max_connections: env_or("DATABASE_MAX_CONNECTIONS", defaults.database_max_connections)?,
            period: env_opt("PERIOD")?,
            force: env_or("FORCE_REPROCESS", defaults.force)?,
            batch_size: env_or("BATCH_SIZE", defaults.batch_size)?,
            download_workers: env_or("DOWNLOAD_WORKERS", defaults.download_workers)?,
            retry_attempts: env_or("RETRY_ATTEMPTS", defaults.retry_attempts)?,
            retry_delay_secs: env_or("RETRY_DELAY", defaults.retry_delay_secs)?,
            retry_backoff: env_or("RETRY_BACKOFF", defaults.retry_backoff)?,
            connect_timeout_secs: env_or("CONNECT_TIMEOUT", defaults.connect_timeout_secs)?,
            read_timeout_secs: env_or("READ_TIMEOUT", defaults.read_timeout_secs)?,
            temp_dir: std::env::var("TEMP_DIR").map(PathBuf::from).unwrap_or(defaults.temp_dir),
            keep_files: env_or("KEEP_DOWNLOADED_FILES", defaults.keep_files)?,
            fail_fast: env_or("FAIL_FAST", defaults.fail_fast)?,
            show_progress: env_or("SHOW_PROGRESS", defaults.show_progress)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(IngestError::Config("base_url must not be empty".into()));
        }
        if self.batch_size == 0 {
            return Err(IngestError::Config("batch_size must be greater than 0".into()));
        }
        if self.download_workers == 0 {
            return Err(IngestError::Config("download_workers must be greater than 0".into()));
        }
        if self.retry_attempts == 0 {
            return Err(IngestError::Config("retry_attempts must be at least 1".into()));
        }
        if self.connect_timeout_secs == 0 || self.read_timeout_secs == 0 {
            return Err(IngestError::Config("timeouts must be greater than 0".into()));
        }
        if self.database_max_connections == 0 {
            return Err(IngestError::Config("database_max_connections must be greater than 0".into()));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_attempts,
            delay: Duration::from_secs(self.retry_delay_secs),
            backoff: self.retry_backoff,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Scratch directory for one period's archives
    pub fn period_dir(&self, period: Period) -> PathBuf {
        self.temp_dir.join(period.to_string())
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn with_period(mut self, period: Period) -> Self {
        self.period = Some(period);
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_download_workers(mut self, workers: usize) -> Self {
        self.download_workers = workers;
        self
    }

    pub fn with_retry(mut self, attempts: u32, delay_secs: u64, backoff: RetryBackoff) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay_secs = delay_secs;
        self.retry_backoff = backoff;
        self
    }

    pub fn with_timeouts(mut self, connect_secs: u64, read_secs: u64) -> Self {
        self.connect_timeout_secs = connect_secs;
        self.read_timeout_secs = read_secs;
        self
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    pub fn with_keep_files(mut self, keep: bool) -> Self {
        self.keep_files = keep;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }
}

fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(env_opt(name)?.unwrap_or(default))
}

fn env_opt<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| IngestError::Config(format!("{name}={raw}: {e}"))),
        Err(_) => Ok(None),
    }
}
