//! Shared fixtures for the integration tests
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use cnpj_ingest::archive::HttpDirectoryHost;
use cnpj_ingest::config::{IngestConfig, RetryBackoff};
use std::io::{Cursor, Write};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

pub const PERIOD: &str = "2024-03";

pub const MOTIVOS_MEMBER: &str = "F.K03200$Z.D40309.MOTICSV";
pub const SOCIOS_MEMBER: &str = "K3241.K03200Y0.D40309.SOCIOCSV";

/// Three reason codes, the last with an empty description.
pub const MOTIVOS_ROWS: &[u8] =
    b"\"00\";\"SEM MOTIVO\"\n\"01\";\"EXTIN\xc7\xc3O POR ENCERRAMENTO\"\n\"02\";\"\"\n";

/// Two partners: an individual with a masked document and a zero entry
/// date, and a company partner.
pub const SOCIOS_ROWS: &[u8] = b"\"11222333\";\"2\";\"JO\xc3O DA SILVA\";\"***123456**\";\"49\";\"0\";\"\";\"***000000**\";\"\";\"00\";\"5\"\n\"11222333\";\"1\";\"HOLDING PARTICIPACOES SA\";\"44555666000181\";\"22\";\"20200115\";\"\";\"\";\"\";\"\";\"0\"\n";

pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn motivos_zip() -> Vec<u8> {
    zip_bytes(&[(MOTIVOS_MEMBER, MOTIVOS_ROWS)])
}

pub fn socios_zip() -> Vec<u8> {
    zip_bytes(&[(SOCIOS_MEMBER, SOCIOS_ROWS)])
}

/// An Apache-style index page linking to `entries`.
pub fn listing(entries: &[&str]) -> String {
    let rows: String = entries
        .iter()
        .map(|e| format!("<tr><td><a href=\"{e}\">{e}</a></td><td>-</td></tr>\n"))
        .collect();
    format!(
        "<html><body><h1>Index</h1><table>\n<tr><td><a href=\"../\">Parent Directory</a></td></tr>\n{rows}</table></body></html>"
    )
}

pub async fn mount_root(server: &MockServer, periods: &[&str]) {
    let dirs: Vec<String> = periods.iter().map(|p| format!("{p}/")).collect();
    let dirs: Vec<&str> = dirs.iter().map(String::as_str).collect();
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing(&dirs)))
        .mount(server)
        .await;
}

pub async fn mount_period(server: &MockServer, period: &str, files: &[&str]) {
    Mock::given(method("GET"))
        .and(path(format!("/{period}/")))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing(files)))
        .mount(server)
        .await;
}

pub async fn mount_archive(server: &MockServer, period: &str, name: &str, bytes: Vec<u8>, expected_gets: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/{period}/{name}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes))
        .expect(expected_gets)
        .mount(server)
        .await;
}

pub fn host(server: &MockServer) -> Arc<HttpDirectoryHost> {
    Arc::new(HttpDirectoryHost::new(server.uri(), Duration::from_secs(5), Duration::from_secs(5)).unwrap())
}

pub fn config(server: &MockServer, scratch: &TempDir) -> IngestConfig {
    IngestConfig::new()
        .with_base_url(server.uri())
        .with_temp_dir(scratch.path())
        .with_retry(2, 0, RetryBackoff::Fixed)
        .with_batch_size(2)
        .with_download_workers(2)
        .with_progress(false)
}
