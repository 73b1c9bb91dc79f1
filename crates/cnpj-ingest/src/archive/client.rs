use super::ArchiveHost;
use crate::config::RetryPolicy;
use crate::error::{HostError, IngestError, Result};
use crate::extract;
use cnpj_common::types::{Period, SourceFile};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// An archive that is on local disk and ready to extract
#[derive(Debug, Clone)]
pub struct FetchedFile {
    pub source: SourceFile,
    pub path: PathBuf,
    pub bytes: u64,
    /// Kept from an earlier run instead of downloaded
    pub reused: bool,
}

pub struct ArchiveClient {
    host: Arc<dyn ArchiveHost>,
    retry: RetryPolicy,
    workers: usize,
    keep_files: bool,
    show_progress: bool,
}

impl ArchiveClient {
    pub fn new(host: Arc<dyn ArchiveHost>, retry: RetryPolicy) -> Self {
        Self {
            host,
            retry,
            workers: 1,
            keep_files: false,
            show_progress: false,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_keep_files(mut self, keep: bool) -> Self {
        self.keep_files = keep;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Published periods, oldest first. The most recent is the last element.
    pub async fn list_periods(&self) -> Result<Vec<Period>> {
        let mut periods = self.host.list_periods().await.map_err(|source| IngestError::Discovery {
            target: "period listing".to_string(),
            source,
        })?;
        periods.sort();
        periods.dedup();

        if periods.is_empty() {
            return Err(IngestError::Discovery {
                target: "period listing".to_string(),
                source: HostError::Listing("no YYYY-MM directories found".to_string()),
            });
        }

        debug!(count = periods.len(), "Discovered periods");
        Ok(periods)
    }

    pub async fn latest_period(&self) -> Result<Period> {
        let periods = self.list_periods().await?;
        periods.last().copied().ok_or_else(|| IngestError::Discovery {
            target: "period listing".to_string(),
            source: HostError::Listing("no periods".to_string()),
        })
    }

    /// Archives published for `period`, in name order.
    pub async fn list_files(&self, period: Period) -> Result<Vec<SourceFile>> {
        let mut names = self
            .host
            .list_files(period)
            .await
            .map_err(|source| IngestError::Discovery {
                target: format!("period {period}"),
                source,
            })?;
        names.sort();
        names.dedup();

        info!(period = %period, files = names.len(), "Listed archives");
        Ok(names.into_iter().map(|name| SourceFile::new(period, name)).collect())
    }

    /// Fetch one archive into `dest_dir`, retrying transient failures.
    ///
    /// Writes go to `<name>.part`, which is deleted before every attempt and
    /// renamed only once the download completes.
    pub async fn fetch(&self, file: &SourceFile, dest_dir: &Path) -> Result<FetchedFile> {
        let dest = dest_dir.join(&file.filename);
        let download_error = |attempts, source| IngestError::Download {
            file: file.filename.clone(),
            attempts,
            source,
        };

        if self.keep_files {
            if let Some(bytes) = self.verified_existing(file, &dest).await {
                info!(file = %file.filename, bytes, "Reusing kept archive");
                return Ok(FetchedFile {
                    source: file.clone(),
                    path: dest,
                    bytes,
                    reused: true,
                });
            }
        }

        let part = dest_dir.join(format!("{}.part", file.filename));
        let mut attempt = 0;

        loop {
            attempt += 1;
            remove_if_exists(&part)
                .await
                .map_err(|e| download_error(attempt, HostError::Io(e)))?;

            match self.host.download(file.period, &file.filename, &part).await {
                Ok(bytes) => {
                    tokio::fs::rename(&part, &dest)
                        .await
                        .map_err(|e| download_error(attempt, HostError::Io(e)))?;
                    info!(file = %file.filename, bytes, attempt, "Downloaded archive");
                    return Ok(FetchedFile {
                        source: file.clone().with_size(Some(bytes)),
                        path: dest,
                        bytes,
                        reused: false,
                    });
                },
                Err(err) => {
                    if let Err(cleanup) = remove_if_exists(&part).await {
                        warn!(file = %file.filename, error = %cleanup, "Could not remove partial download");
                    }

                    if !err.is_transient() || attempt >= self.retry.attempts {
                        warn!(file = %file.filename, attempt, error = %err, "Download failed");
                        return Err(download_error(attempt, err));
                    }

                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        file = %file.filename,
                        attempt,
                        max_attempts = self.retry.attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "Download attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                },
            }
        }
    }

    /// Fetch every file with at most `workers` downloads in flight.
    ///
    /// A failure never cancels the other downloads. Outcomes come back in
    /// completion order, one per input file. Files not yet started when
    /// `cancel` fires resolve to [`IngestError::Cancelled`].
    pub async fn fetch_all(
        &self,
        files: &[SourceFile],
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> Vec<(SourceFile, Result<FetchedFile>)> {
        let progress = self.progress_bar(files.len() as u64);

        let outcomes = stream::iter(files.iter().cloned())
            .map(|file| {
                let progress = progress.clone();
                async move {
                    if cancel.is_cancelled() {
                        return (file, Err(IngestError::Cancelled));
                    }
                    progress.set_message(file.filename.clone());
                    let outcome = self.fetch(&file, dest_dir).await;
                    progress.inc(1);
                    (file, outcome)
                }
            })
            .buffer_unordered(self.workers)
            .collect::<Vec<_>>()
            .await;

        progress.finish_and_clear();
        outcomes
    }

    /// Size of a kept archive if it matches what the host advertises, or
    /// opens as a zip when the host advertises nothing.
    async fn verified_existing(&self, file: &SourceFile, dest: &Path) -> Option<u64> {
        let local = tokio::fs::metadata(dest).await.ok()?.len();

        match self.host.content_length(file.period, &file.filename).await {
            Ok(Some(remote)) if remote == local => Some(local),
            Ok(Some(remote)) => {
                info!(file = %file.filename, local, remote, "Kept archive size differs, downloading again");
                None
            },
            Ok(None) | Err(_) => {
                let path = dest.to_path_buf();
                let readable = tokio::task::spawn_blocking(move || extract::is_readable_zip(&path))
                    .await
                    .unwrap_or(false);
                readable.then_some(local)
            },
        }
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let bar = ProgressBar::new(len);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        bar.set_style(style);
        bar
    }
}

async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
