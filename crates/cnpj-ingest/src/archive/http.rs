use super::{listing, ArchiveHost};
use crate::error::HostError;
use async_trait::async_trait;
use cnpj_common::types::Period;
use futures::StreamExt;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Client, Response};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// An archive host served as plain HTTP directory listings:
/// `<base>/` lists `YYYY-MM/` directories, `<base>/YYYY-MM/` lists `*.zip`.
#[derive(Debug, Clone)]
pub struct HttpDirectoryHost {
    client: Client,
    base_url: String,
}

impl HttpDirectoryHost {
    pub fn new(
        base_url: impl Into<String>,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, HostError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .user_agent(concat!("cnpj-ingest/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn period_url(&self, period: Period) -> String {
        format!("{}/{}/", self.base_url, period)
    }

    fn file_url(&self, period: Period, filename: &str) -> String {
        format!("{}/{}/{}", self.base_url, period, filename)
    }

    async fn get(&self, url: &str) -> Result<Response, HostError> {
        debug!(url = %url, "GET");
        let response = self.client.get(url).send().await?;
        ensure_success(response)
    }

    async fn get_text(&self, url: &str) -> Result<String, HostError> {
        Ok(self.get(url).await?.text().await?)
    }
}

fn ensure_success(response: Response) -> Result<Response, HostError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(HostError::Status {
            status: status.as_u16(),
            url: response.url().to_string(),
        })
    }
}

#[async_trait]
impl ArchiveHost for HttpDirectoryHost {
    async fn list_periods(&self) -> Result<Vec<Period>, HostError> {
        let html = self.get_text(&format!("{}/", self.base_url)).await?;
        listing::parse_periods(&html)
    }

    async fn list_files(&self, period: Period) -> Result<Vec<String>, HostError> {
        let html = self.get_text(&self.period_url(period)).await?;
        listing::parse_archives(&html)
    }

    async fn content_length(
        &self,
        period: Period,
        filename: &str,
    ) -> Result<Option<u64>, HostError> {
        let response = self.client.head(self.file_url(period, filename)).send().await?;
        let response = ensure_success(response)?;
        // HEAD bodies are empty, so read the header rather than the body size hint.
        let length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|len| *len > 0);
        Ok(length)
    }

    async fn download(&self, period: Period, filename: &str, dest: &Path) -> Result<u64, HostError> {
        let response = self.get(&self.file_url(period, filename)).await?;
        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}
