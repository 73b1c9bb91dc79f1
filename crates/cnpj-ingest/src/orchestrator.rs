//! Run driver
//!
//! ```text
//! Idle -> Discovering -> Downloading -> ProcessingFile* -> Done
//!                  \___________\______________\________-> Failed
//! ```
//!
//! Downloads run in parallel; files are processed one at a time in
//! dependency order. Within a file, a blocking task reads and transforms rows
//! into batches and hands them over a small bounded channel to the async
//! side, which loads them one by one. Memory stays bounded by
//! `batch_size * (CHANNEL_DEPTH + 2)` records regardless of file size.

use crate::archive::{ArchiveClient, ArchiveHost, FetchedFile};
use crate::config::IngestConfig;
use crate::decode::RowReader;
use crate::error::{IngestError, Result};
use crate::extract::{self, ExtractedMember};
use crate::ledger::Ledger;
use crate::loader::Loader;
use crate::sink::Sink;
use crate::transform::{transform, Record};
use cnpj_common::types::{EntityKind, Period, SourceFile};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Batches read ahead of the loader
const CHANNEL_DEPTH: usize = 2;

/// Unparsable rows logged individually per member; the rest are only counted.
const MAX_LOGGED_PARSE_ERRORS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Discovering,
    Downloading { files: usize },
    ProcessingFile { index: usize, total: usize, file: String },
    Done,
    Failed { reason: String },
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::Discovering => write!(f, "discovering"),
            RunState::Downloading { files } => write!(f, "downloading ({files} files)"),
            RunState::ProcessingFile { index, total, file } => {
                write!(f, "processing {file} ({index}/{total})")
            },
            RunState::Done => write!(f, "done"),
            RunState::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Loaded,
    /// Already ledgered for this period
    Skipped,
    /// Name matches no known entity
    Unrecognized,
    DownloadFailed,
    ExtractionFailed,
    LoadFailed,
    Cancelled,
}

impl FileStatus {
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            FileStatus::DownloadFailed | FileStatus::ExtractionFailed | FileStatus::LoadFailed
        )
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FileStatus::Loaded => "loaded",
            FileStatus::Skipped => "skipped",
            FileStatus::Unrecognized => "unrecognized",
            FileStatus::DownloadFailed => "download failed",
            FileStatus::ExtractionFailed => "extraction failed",
            FileStatus::LoadFailed => "load failed",
            FileStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Outcome of one source file
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub filename: String,
    pub kind: Option<EntityKind>,
    pub status: FileStatus,
    pub rows_read: u64,
    pub committed: u64,
    /// Dropped for a malformed natural key
    pub rejected: u64,
    /// Dropped because a field could not be parsed
    pub parse_errors: u64,
    /// Replaced by a later row with the same key in the same batch
    pub superseded: u64,
    pub batches: u64,
    pub error: Option<String>,
}

impl FileReport {
    fn new(file: &SourceFile, status: FileStatus) -> Self {
        Self {
            filename: file.filename.clone(),
            kind: file.kind,
            status,
            rows_read: 0,
            committed: 0,
            rejected: 0,
            parse_errors: 0,
            superseded: 0,
            batches: 0,
            error: None,
        }
    }

    fn fail(mut self, status: FileStatus, err: &IngestError) -> Self {
        self.status = status;
        self.error = Some(err.to_string());
        self
    }
}

/// Per-file outcomes of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub period: Period,
    pub files: Vec<FileReport>,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn count(&self, status: FileStatus) -> usize {
        self.files.iter().filter(|f| f.status == status).count()
    }

    pub fn failed(&self) -> usize {
        self.files.iter().filter(|f| f.status.is_failure()).count()
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    pub fn total_committed(&self) -> u64 {
        self.files.iter().map(|f| f.committed).sum()
    }

    pub fn total_rejected(&self) -> u64 {
        self.files.iter().map(|f| f.rejected + f.parse_errors).sum()
    }

    pub fn render(&self) -> String {
        let mut out = format!(
            "Ingestion Summary for {}:\n\
             - Files listed: {}\n\
             - Loaded: {}\n\
             - Skipped (already processed): {}\n\
             - Failed: {}\n\
             - Cancelled: {}\n\
             - Unrecognized: {}\n\
             - Rows committed: {}\n\
             - Records rejected: {}\n",
            self.period,
            self.files.len(),
            self.count(FileStatus::Loaded),
            self.count(FileStatus::Skipped),
            self.failed(),
            self.count(FileStatus::Cancelled),
            self.count(FileStatus::Unrecognized),
            self.total_committed(),
            self.total_rejected(),
        );

        for file in &self.files {
            out.push_str(&format!(
                "  {:<28} {:<18} read={} committed={} rejected={} parse_errors={} superseded={}",
                file.filename,
                file.status.to_string(),
                file.rows_read,
                file.committed,
                file.rejected,
                file.parse_errors,
                file.superseded
            ));
            if let Some(error) = &file.error {
                out.push_str(&format!(" error=\"{error}\""));
            }
            out.push('\n');
        }

        out
    }
}

#[derive(Debug, Default)]
struct ReadStats {
    rows_read: u64,
    parse_errors: u64,
}

pub struct Orchestrator {
    config: IngestConfig,
    client: ArchiveClient,
    ledger: Ledger,
    loader: Loader,
    cancel: CancellationToken,
    state: RunState,
}

impl Orchestrator {
    pub fn new(config: IngestConfig, host: Arc<dyn ArchiveHost>, sink: Arc<dyn Sink>) -> Result<Self> {
        config.validate()?;

        let client = ArchiveClient::new(host, config.retry_policy())
            .with_workers(config.download_workers)
            .with_keep_files(config.keep_files)
            .with_progress(config.show_progress);

        Ok(Self {
            ledger: Ledger::new(sink.clone()),
            loader: Loader::new(sink),
            client,
            config,
            cancel: CancellationToken::new(),
            state: RunState::Idle,
        })
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    fn transition(&mut self, next: RunState) {
        info!(from = %self.state, to = %next, "Run state changed");
        self.state = next;
    }

    /// Ingest one period end to end.
    ///
    /// Returns `Err` only for run-level failures: discovery, every download
    /// failing, or the first file failure when `fail_fast` is set. Everything
    /// else is reported per file in the summary.
    pub async fn run(&mut self) -> Result<RunSummary> {
        match self.execute().await {
            Ok(summary) => {
                self.transition(RunState::Done);
                info!(
                    period = %summary.period,
                    loaded = summary.count(FileStatus::Loaded),
                    skipped = summary.count(FileStatus::Skipped),
                    failed = summary.failed(),
                    committed = summary.total_committed(),
                    rejected = summary.total_rejected(),
                    "Run finished"
                );
                Ok(summary)
            },
            Err(err) => {
                error!(error = %err, "Run failed");
                self.transition(RunState::Failed {
                    reason: err.to_string(),
                });
                Err(err)
            },
        }
    }

    async fn execute(&mut self) -> Result<RunSummary> {
        self.transition(RunState::Discovering);

        let period = match self.config.period {
            Some(period) => period,
            None => self.client.latest_period().await?,
        };
        let mut files = self.client.list_files(period).await?;
        files.sort_by(|a, b| a.load_order().cmp(&b.load_order()));
        info!(period = %period, files = files.len(), force = self.config.force, "Target period resolved");

        let mut reports: HashMap<String, FileReport> = HashMap::new();
        let mut pending = Vec::new();

        for file in &files {
            if file.kind.is_none() {
                warn!(file = %file.filename, "Unrecognized archive, not loading");
                reports.insert(file.filename.clone(), FileReport::new(file, FileStatus::Unrecognized));
            } else if !self.config.force && self.ledger.is_processed(period, &file.filename).await? {
                info!(file = %file.filename, "Already processed, skipping");
                reports.insert(file.filename.clone(), FileReport::new(file, FileStatus::Skipped));
            } else {
                pending.push(file.clone());
            }
        }

        if !pending.is_empty() {
            let scratch = self.config.period_dir(period);
            tokio::fs::create_dir_all(&scratch).await?;

            let downloaded = self.download(period, &pending, &scratch, &mut reports).await?;
            let total = downloaded.len();

            for (index, fetched) in downloaded.into_iter().enumerate() {
                let report = if self.cancel.is_cancelled() {
                    FileReport::new(&fetched.source, FileStatus::Cancelled)
                } else {
                    self.transition(RunState::ProcessingFile {
                        index: index + 1,
                        total,
                        file: fetched.source.filename.clone(),
                    });
                    let (report, err) = self.process_file(&fetched).await;
                    if let (Some(err), true) = (err, self.config.fail_fast) {
                        self.discard_archive(&fetched).await;
                        return Err(err);
                    }
                    report
                };

                self.discard_archive(&fetched).await;
                reports.insert(report.filename.clone(), report);
            }

            if !self.config.keep_files {
                if let Err(e) = tokio::fs::remove_dir_all(&scratch).await {
                    debug!(dir = %scratch.display(), error = %e, "Scratch directory not removed");
                }
            }
        }

        Ok(RunSummary {
            period,
            files: files
                .iter()
                .filter_map(|file| reports.remove(&file.filename))
                .collect(),
            cancelled: self.cancel.is_cancelled(),
        })
    }

    /// Fetch every pending file, recording failures, and return the
    /// successful ones in load order.
    async fn download(
        &mut self,
        period: Period,
        pending: &[SourceFile],
        scratch: &Path,
        reports: &mut HashMap<String, FileReport>,
    ) -> Result<Vec<FetchedFile>> {
        self.transition(RunState::Downloading {
            files: pending.len(),
        });

        let outcomes = self.client.fetch_all(pending, scratch, &self.cancel).await;
        let mut downloaded = Vec::with_capacity(outcomes.len());
        let mut failures = 0;

        for (file, outcome) in outcomes {
            match outcome {
                Ok(fetched) => downloaded.push(fetched),
                Err(IngestError::Cancelled) => {
                    reports.insert(file.filename.clone(), FileReport::new(&file, FileStatus::Cancelled));
                },
                Err(err) => {
                    error!(file = %file.filename, error = %err, "Download failed");
                    if self.config.fail_fast {
                        return Err(err);
                    }
                    failures += 1;
                    let report = FileReport::new(&file, FileStatus::Loaded);
                    reports.insert(file.filename.clone(), report.fail(FileStatus::DownloadFailed, &err));
                },
            }
        }

        if failures == pending.len() {
            return Err(IngestError::AllDownloadsFailed(period));
        }

        info!(downloaded = downloaded.len(), failed = failures, "Download phase complete");
        downloaded.sort_by(|a, b| a.source.load_order().cmp(&b.source.load_order()));
        Ok(downloaded)
    }

    /// Extract, transform and load one archive, then ledger it if every batch
    /// committed. The error, if any, is returned beside the report so the
    /// caller can decide whether it ends the run.
    async fn process_file(&self, fetched: &FetchedFile) -> (FileReport, Option<IngestError>) {
        let file = &fetched.source;
        let mut report = FileReport::new(file, FileStatus::Loaded);

        match self.ledger.is_processed(file.period, &file.filename).await {
            Ok(true) if !self.config.force => {
                info!(file = %file.filename, "Processed meanwhile, skipping");
                report.status = FileStatus::Skipped;
                return (report, None);
            },
            Ok(_) => {},
            Err(err) => return (report.fail(FileStatus::LoadFailed, &err), Some(err)),
        }

        let members_dir = fetched.path.with_file_name(format!("{}.d", file.filename));
        let members = {
            let archive = fetched.path.clone();
            let dir = members_dir.clone();
            match tokio::task::spawn_blocking(move || extract::extract(&archive, &dir)).await {
                Ok(Ok(members)) => members,
                Ok(Err(err)) => {
                    error!(file = %file.filename, error = %err, "Extraction failed");
                    remove_dir(&members_dir).await;
                    return (report.fail(FileStatus::ExtractionFailed, &err), Some(err));
                },
                Err(join) => {
                    let err = IngestError::extraction(&file.filename, join);
                    remove_dir(&members_dir).await;
                    return (report.fail(FileStatus::ExtractionFailed, &err), Some(err));
                },
            }
        };

        let mut failure = None;
        for member in &members {
            if let Err(err) = self.load_member(member, &mut report).await {
                failure = Some(err);
                break;
            }
        }
        remove_dir(&members_dir).await;

        match failure {
            Some(IngestError::Cancelled) => {
                warn!(file = %file.filename, committed = report.committed, "Interrupted, not marking processed");
                report.status = FileStatus::Cancelled;
                (report, None)
            },
            Some(err) => {
                let status = match err {
                    IngestError::Extraction { .. } => FileStatus::ExtractionFailed,
                    _ => FileStatus::LoadFailed,
                };
                error!(file = %file.filename, committed = report.committed, error = %err, "File failed, not marking processed");
                (report.fail(status, &err), Some(err))
            },
            None => match self.ledger.mark_processed(file.period, &file.filename).await {
                Ok(()) => {
                    info!(
                        file = %file.filename,
                        rows = report.rows_read,
                        committed = report.committed,
                        rejected = report.rejected,
                        parse_errors = report.parse_errors,
                        superseded = report.superseded,
                        "File loaded"
                    );
                    (report, None)
                },
                Err(err) => (report.fail(FileStatus::LoadFailed, &err), Some(err)),
            },
        }
    }

    /// Stream one extracted member through transform and load.
    async fn load_member(&self, member: &ExtractedMember, report: &mut FileReport) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<Vec<Record>>(CHANNEL_DEPTH);
        let producer = {
            let path = member.path.clone();
            let kind = member.kind;
            let batch_size = self.config.batch_size;
            tokio::task::spawn_blocking(move || read_batches(&path, kind, batch_size, tx))
        };

        debug!(member = %member.name, kind = %member.kind, "Loading member");
        let mut failure = None;

        while let Some(batch) = rx.recv().await {
            if self.cancel.is_cancelled() {
                failure = Some(IngestError::Cancelled);
                break;
            }

            match self.loader.load_batch(member.kind, batch).await {
                Ok(outcome) => {
                    report.batches += 1;
                    report.committed += outcome.committed;
                    report.rejected += outcome.rejected;
                    report.superseded += outcome.superseded;
                },
                Err(err) => {
                    failure = Some(err);
                    break;
                },
            }
        }

        // Unblocks the producer if it is waiting on a full channel.
        drop(rx);

        let read = producer
            .await
            .map_err(|join| IngestError::extraction(&member.name, join))
            .and_then(|stats| stats);

        if let Ok(stats) = &read {
            report.rows_read += stats.rows_read;
            report.parse_errors += stats.parse_errors;
        }

        match (failure, read) {
            (Some(err), _) => Err(err),
            (None, Err(err)) => Err(err),
            (None, Ok(_)) => Ok(()),
        }
    }

    async fn discard_archive(&self, fetched: &FetchedFile) {
        if self.config.keep_files {
            return;
        }
        if let Err(e) = tokio::fs::remove_file(&fetched.path).await {
            debug!(file = %fetched.path.display(), error = %e, "Archive not removed");
        }
    }
}

/// Blocking side of [`Orchestrator::load_member`].
///
/// Stops early without error when the receiver is gone.
fn read_batches(
    path: &Path,
    kind: EntityKind,
    batch_size: usize,
    tx: mpsc::Sender<Vec<Record>>,
) -> Result<ReadStats> {
    let mut reader = RowReader::open(path)?;
    let mut stats = ReadStats::default();
    let mut batch = Vec::with_capacity(batch_size);

    while let Some(row) = reader.next_row()? {
        stats.rows_read += 1;

        match transform(kind, row) {
            Ok(record) => batch.push(record),
            Err(err) => {
                stats.parse_errors += 1;
                if stats.parse_errors <= MAX_LOGGED_PARSE_ERRORS {
                    warn!(table = %kind, line = reader.line(), error = %err, "Dropping unparsable record");
                }
            },
        }

        if batch.len() >= batch_size {
            let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
            if tx.blocking_send(full).is_err() {
                return Ok(stats);
            }
        }
    }

    if !batch.is_empty() {
        let _ = tx.blocking_send(batch);
    }

    if stats.parse_errors > MAX_LOGGED_PARSE_ERRORS {
        warn!(table = %kind, parse_errors = stats.parse_errors, "Unparsable records dropped");
    }

    Ok(stats)
}

async fn remove_dir(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(dir = %dir.display(), error = %e, "Could not remove extracted members");
        }
    }
}
