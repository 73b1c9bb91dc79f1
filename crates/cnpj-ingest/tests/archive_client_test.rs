//! Archive client against a mock HTTP directory host
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use async_trait::async_trait;
use cnpj_common::types::{EntityKind, Period, SourceFile};
use cnpj_ingest::archive::{ArchiveClient, ArchiveHost};
use cnpj_ingest::config::{RetryBackoff, RetryPolicy};
use cnpj_ingest::error::{HostError, IngestError};
use common::*;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn retry(attempts: u32) -> RetryPolicy {
    RetryPolicy {
        attempts,
        delay: Duration::ZERO,
        backoff: RetryBackoff::Fixed,
    }
}

fn period() -> Period {
    PERIOD.parse().unwrap()
}

#[tokio::test]
async fn test_list_periods_ascending_with_latest_last() {
    let server = MockServer::start().await;
    mount_root(&server, &["2024-03", "2023-11", "2024-01"]).await;

    let client = ArchiveClient::new(host(&server), retry(1));
    let periods = client.list_periods().await.unwrap();
    let rendered: Vec<String> = periods.iter().map(ToString::to_string).collect();

    assert_eq!(rendered, vec!["2023-11", "2024-01", "2024-03"]);
    assert_eq!(client.latest_period().await.unwrap().to_string(), "2024-03");
}

#[tokio::test]
async fn test_unreachable_root_is_discovery_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = ArchiveClient::new(host(&server), retry(1));
    let err = client.list_periods().await.unwrap_err();
    assert!(matches!(err, IngestError::Discovery { .. }), "{err}");
}

#[tokio::test]
async fn test_listing_without_periods_is_discovery_error() {
    let server = MockServer::start().await;
    mount_root(&server, &[]).await;

    let client = ArchiveClient::new(host(&server), retry(1));
    let err = client.list_periods().await.unwrap_err();
    assert!(matches!(err, IngestError::Discovery { source: HostError::Listing(_), .. }));
}

#[tokio::test]
async fn test_missing_period_is_discovery_error() {
    let server = MockServer::start().await;

    let client = ArchiveClient::new(host(&server), retry(1));
    let err = client.list_files("1999-01".parse().unwrap()).await.unwrap_err();
    assert!(matches!(
        err,
        IngestError::Discovery { source: HostError::Status { status: 404, .. }, .. }
    ));
}

#[tokio::test]
async fn test_list_files_tags_entities() {
    let server = MockServer::start().await;
    mount_period(&server, PERIOD, &["Socios0.zip", "Motivos.zip", "Leiame.zip"]).await;

    let client = ArchiveClient::new(host(&server), retry(1));
    let files = client.list_files(period()).await.unwrap();

    let tagged: Vec<(&str, Option<EntityKind>)> =
        files.iter().map(|f| (f.filename.as_str(), f.kind)).collect();
    assert_eq!(
        tagged,
        vec![
            ("Leiame.zip", None),
            ("Motivos.zip", Some(EntityKind::Motivo)),
            ("Socios0.zip", Some(EntityKind::Socio)),
        ]
    );
}

#[tokio::test]
async fn test_fetch_retries_transient_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/2024-03/Motivos.zip"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    mount_archive(&server, PERIOD, "Motivos.zip", motivos_zip(), 1).await;

    let scratch = TempDir::new().unwrap();
    let client = ArchiveClient::new(host(&server), retry(3));
    let file = SourceFile::new(period(), "Motivos.zip");

    let fetched = client.fetch(&file, scratch.path()).await.unwrap();
    assert_eq!(fetched.bytes, motivos_zip().len() as u64);
    assert_eq!(std::fs::read(&fetched.path).unwrap(), motivos_zip());
    assert!(!scratch.path().join("Motivos.zip.part").exists());
    assert!(!fetched.reused);
}

#[tokio::test]
async fn test_fetch_gives_up_after_configured_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/2024-03/Socios0.zip"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;

    let scratch = TempDir::new().unwrap();
    let client = ArchiveClient::new(host(&server), retry(3));
    let file = SourceFile::new(period(), "Socios0.zip");

    let err = client.fetch(&file, scratch.path()).await.unwrap_err();
    match err {
        IngestError::Download { file, attempts, source } => {
            assert_eq!(file, "Socios0.zip");
            assert_eq!(attempts, 3);
            assert!(matches!(source, HostError::Status { status: 502, .. }));
        },
        other => panic!("unexpected error {other}"),
    }
    assert!(!scratch.path().join("Socios0.zip").exists());
    assert!(!scratch.path().join("Socios0.zip.part").exists());
}

#[tokio::test]
async fn test_fetch_does_not_retry_missing_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/2024-03/Empresas9.zip"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let scratch = TempDir::new().unwrap();
    let client = ArchiveClient::new(host(&server), retry(3));
    let err = client
        .fetch(&SourceFile::new(period(), "Empresas9.zip"), scratch.path())
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Download { attempts: 1, .. }));
}

#[tokio::test]
async fn test_kept_valid_archive_is_not_downloaded_again() {
    let server = MockServer::start().await;
    mount_archive(&server, PERIOD, "Motivos.zip", motivos_zip(), 0).await;

    let scratch = TempDir::new().unwrap();
    std::fs::write(scratch.path().join("Motivos.zip"), motivos_zip()).unwrap();

    let client = ArchiveClient::new(host(&server), retry(1)).with_keep_files(true);
    let fetched = client
        .fetch(&SourceFile::new(period(), "Motivos.zip"), scratch.path())
        .await
        .unwrap();

    assert!(fetched.reused);
}

async fn mount_size(server: &MockServer, name: &str, bytes: Vec<u8>) {
    let len = bytes.len().to_string();
    Mock::given(method("HEAD"))
        .and(path(format!("/{PERIOD}/{name}")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-length", len.as_str())
                .set_body_bytes(bytes),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_kept_archive_matching_remote_size_is_reused() {
    let server = MockServer::start().await;
    mount_size(&server, "Motivos.zip", motivos_zip()).await;
    mount_archive(&server, PERIOD, "Motivos.zip", motivos_zip(), 0).await;

    let scratch = TempDir::new().unwrap();
    std::fs::write(scratch.path().join("Motivos.zip"), motivos_zip()).unwrap();

    let client = ArchiveClient::new(host(&server), retry(1)).with_keep_files(true);
    let fetched = client
        .fetch(&SourceFile::new(period(), "Motivos.zip"), scratch.path())
        .await
        .unwrap();

    assert!(fetched.reused);
    assert_eq!(fetched.bytes, motivos_zip().len() as u64);
}

#[tokio::test]
async fn test_kept_archive_with_different_remote_size_is_downloaded_again() {
    let server = MockServer::start().await;
    mount_size(&server, "Motivos.zip", motivos_zip()).await;
    mount_archive(&server, PERIOD, "Motivos.zip", motivos_zip(), 1).await;

    // A readable zip, but not the published one: the size check must win.
    let scratch = TempDir::new().unwrap();
    let stale = zip_bytes(&[(MOTIVOS_MEMBER, b"\"00\";\"SEM MOTIVO\"\n")]);
    assert_ne!(stale.len(), motivos_zip().len());
    std::fs::write(scratch.path().join("Motivos.zip"), stale).unwrap();

    let client = ArchiveClient::new(host(&server), retry(1)).with_keep_files(true);
    let fetched = client
        .fetch(&SourceFile::new(period(), "Motivos.zip"), scratch.path())
        .await
        .unwrap();

    assert!(!fetched.reused);
    assert_eq!(std::fs::read(&fetched.path).unwrap(), motivos_zip());
}

#[tokio::test]
async fn test_kept_corrupt_archive_is_replaced() {
    let server = MockServer::start().await;
    mount_archive(&server, PERIOD, "Motivos.zip", motivos_zip(), 1).await;

    let scratch = TempDir::new().unwrap();
    std::fs::write(scratch.path().join("Motivos.zip"), b"truncated").unwrap();

    let client = ArchiveClient::new(host(&server), retry(1)).with_keep_files(true);
    let fetched = client
        .fetch(&SourceFile::new(period(), "Motivos.zip"), scratch.path())
        .await
        .unwrap();

    assert!(!fetched.reused);
    assert_eq!(std::fs::read(&fetched.path).unwrap(), motivos_zip());
}

#[tokio::test]
async fn test_parallel_fetch_outcomes_are_independent() {
    let server = MockServer::start().await;
    mount_archive(&server, PERIOD, "Motivos.zip", motivos_zip(), 1).await;
    mount_archive(&server, PERIOD, "Socios0.zip", socios_zip(), 1).await;
    Mock::given(method("GET"))
        .and(path("/2024-03/Empresas0.zip"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let scratch = TempDir::new().unwrap();
    let client = ArchiveClient::new(host(&server), retry(2)).with_workers(3);
    let files: Vec<SourceFile> = ["Empresas0.zip", "Motivos.zip", "Socios0.zip"]
        .iter()
        .map(|name| SourceFile::new(period(), *name))
        .collect();

    let outcomes = client.fetch_all(&files, scratch.path(), &CancellationToken::new()).await;
    assert_eq!(outcomes.len(), 3);

    let failed: Vec<&str> = outcomes
        .iter()
        .filter(|(_, outcome)| outcome.is_err())
        .map(|(file, _)| file.filename.as_str())
        .collect();
    assert_eq!(failed, vec!["Empresas0.zip"]);
    assert!(scratch.path().join("Motivos.zip").exists());
    assert!(scratch.path().join("Socios0.zip").exists());
}

#[tokio::test]
async fn test_cancelled_fetch_starts_nothing() {
    let server = MockServer::start().await;
    mount_archive(&server, PERIOD, "Motivos.zip", motivos_zip(), 0).await;

    let scratch = TempDir::new().unwrap();
    let client = ArchiveClient::new(host(&server), retry(1));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcomes = client
        .fetch_all(&[SourceFile::new(period(), "Motivos.zip")], scratch.path(), &cancel)
        .await;
    assert!(matches!(outcomes[0].1, Err(IngestError::Cancelled)));
}

/// Host whose downloads take a while and which records how many overlap.
#[derive(Default)]
struct SlowHost {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    started: AtomicUsize,
}

#[async_trait]
impl ArchiveHost for SlowHost {
    async fn list_periods(&self) -> Result<Vec<Period>, HostError> {
        Ok(vec![period()])
    }

    async fn list_files(&self, _period: Period) -> Result<Vec<String>, HostError> {
        Ok(vec![])
    }

    async fn content_length(&self, _period: Period, _filename: &str) -> Result<Option<u64>, HostError> {
        Ok(None)
    }

    async fn download(&self, _period: Period, _filename: &str, dest: &Path) -> Result<u64, HostError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(40)).await;
        tokio::fs::write(dest, b"zip").await?;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(3)
    }
}

#[tokio::test]
async fn test_parallel_fetch_never_exceeds_worker_limit() {
    let host = Arc::new(SlowHost::default());
    let scratch = TempDir::new().unwrap();
    let client = ArchiveClient::new(host.clone(), retry(1)).with_workers(3);
    let files: Vec<SourceFile> = (0..10)
        .map(|i| SourceFile::new(period(), format!("Estabelecimentos{i}.zip")))
        .collect();

    let outcomes = client.fetch_all(&files, scratch.path(), &CancellationToken::new()).await;

    assert_eq!(outcomes.len(), 10);
    assert!(outcomes.iter().all(|(_, outcome)| outcome.is_ok()));
    assert_eq!(host.started.load(Ordering::SeqCst), 10);
    assert_eq!(host.peak.load(Ordering::SeqCst), 3);
}
