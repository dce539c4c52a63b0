//! HTTP Fetcher
//!
//! One GET per attempt, with an explicit timeout and a cap on body size.
//! Nothing is written to disk here.

use futures_util::StreamExt;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::engine::api::{UploadData, UploadResponse};
use crate::engine::platform::Platform;

/// Largest response body the client will buffer
pub const DEFAULT_MAX_BODY: u64 = 1 << 30;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Server answered {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Response exceeds {limit} bytes")]
    TooLarge { limit: u64 },
}

impl FetchError {
    fn from_reqwest(e: reqwest::Error, timeout: Duration) -> Self {
        if e.is_timeout() {
            Self::Timeout(timeout)
        } else {
            Self::Network(e.to_string())
        }
    }
}

#[derive(Debug)]
pub enum FetchOutcome {
    /// 304: client already runs the latest version
    NotModified,
    Body(Vec<u8>),
}

pub struct Fetcher {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    max_body: u64,
}

impl Fetcher {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("binpatch/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            max_body: DEFAULT_MAX_BODY,
        })
    }

    pub fn with_max_body(mut self, max_body: u64) -> Self {
        self.max_body = max_body;
        self
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// GET `/{route}/{name}?version=&arch=&os=`
    #[instrument(skip(self), fields(platform = %platform))]
    pub async fn fetch(
        &self,
        route: &str,
        name: &str,
        version: &str,
        platform: &Platform,
    ) -> Result<FetchOutcome, FetchError> {
        let url = self.url(&format!("{}/{}", route, name));
        let response = self
            .client
            .get(&url)
            .query(&[
                ("version", version),
                ("arch", platform.arch.as_str()),
                ("os", platform.os.as_str()),
            ])
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(e, self.timeout))?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            debug!("{} is up to date", name);
            return Ok(FetchOutcome::NotModified);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                message,
            });
        }
        if response.content_length().is_some_and(|len| len > self.max_body) {
            return Err(FetchError::TooLarge {
                limit: self.max_body,
            });
        }

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| FetchError::from_reqwest(e, self.timeout))?;
            if body.len() as u64 + chunk.len() as u64 > self.max_body {
                return Err(FetchError::TooLarge {
                    limit: self.max_body,
                });
            }
            body.extend_from_slice(&chunk);
        }
        debug!("Fetched {} bytes from {}", body.len(), url);
        Ok(FetchOutcome::Body(body))
    }

    /// PUT `/upload/{name}`
    #[instrument(skip(self, upload), fields(version = %upload.version))]
    pub async fn upload(&self, name: &str, upload: &UploadData) -> Result<UploadResponse, FetchError> {
        let response = self
            .client
            .put(self.url(&format!("upload/{}", name)))
            .json(upload)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json::<UploadResponse>()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let fetcher = Fetcher::new("http://localhost:8080/", Duration::from_secs(1)).unwrap();
        assert_eq!(fetcher.url("update/app"), "http://localhost:8080/update/app");
        assert_eq!(fetcher.url("/healthz"), "http://localhost:8080/healthz");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_error() {
        // nothing listens on port 9 of the loopback interface
        let fetcher = Fetcher::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let platform = Platform::parse("amd64", "linux").unwrap();
        let result = fetcher.fetch("update", "app", "v1", &platform).await;
        assert!(matches!(
            result,
            Err(FetchError::Network(_)) | Err(FetchError::Timeout(_))
        ));
    }
}
