//! HTTP transport from the master to worker nodes.
//!
//! [`WorkerClient`] forwards uploads, downloads, transfers, progress queries
//! and deletes to a worker's file API, attaching the caller's bearer credential
//! when there is one. It never retries; every failure is reported as a
//! [`ProxyError`] and left to the caller.

pub mod download;
pub mod error;
pub mod files;
pub mod upload;

use std::time::Duration;

use cairn_core::constants::DEFAULT_API_PREFIX;
use cairn_core::{BearerToken, Coordinator, Worker};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use url::Url;

pub use download::{DownloadStream, WorkerDownload};
pub use error::ProxyError;
pub use upload::{SentBytes, UploadPayload};

#[derive(Clone, Debug)]
pub struct WorkerClientConfig {
    /// Path prefix of the worker file API, e.g. `/jifa-api`
    pub api_prefix: String,
    /// Whole-request bound for upload, transfer, progress and delete calls
    pub request_timeout: Duration,
    /// Connection bound; the only limit applied to downloads
    pub connect_timeout: Duration,
}

impl Default for WorkerClientConfig {
    fn default() -> Self {
        Self {
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            request_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// HTTP client for worker nodes. Cheap to clone.
#[derive(Clone, Debug)]
pub struct WorkerClient {
    client: Client,
    config: WorkerClientConfig,
}

impl WorkerClient {
    pub fn new(_coordinator: Coordinator, config: WorkerClientConfig) -> Result<Self, ProxyError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(ProxyError::Transport)?;

        Ok(Self {
            client,
            config: WorkerClientConfig {
                api_prefix: config.api_prefix.trim_end_matches('/').to_string(),
                ..config
            },
        })
    }

    pub fn config(&self) -> &WorkerClientConfig {
        &self.config
    }

    /// Absolute URL of `path` under the worker's file API.
    pub fn endpoint(&self, worker: &Worker, path: &str) -> Result<Url, ProxyError> {
        let raw = format!("{}{}{}", worker.base_url(), self.config.api_prefix, path);
        Url::parse(&raw).map_err(|e| {
            ProxyError::InvalidEndpoint(format!("worker {} ({}): {}", worker.id, raw, e))
        })
    }

    pub(crate) fn http(&self) -> &Client {
        &self.client
    }

    /// Send a request bounded by the request timeout and fail on non-2xx.
    pub(crate) async fn send(&self, request: RequestBuilder) -> Result<Response, ProxyError> {
        let response = request.timeout(self.config.request_timeout).send().await?;
        ensure_success(response).await
    }

    pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ProxyError> {
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| {
            ProxyError::MalformedResponse(format!(
                "{} (body: {})",
                e,
                String::from_utf8_lossy(&body[..body.len().min(128)])
            ))
        })
    }
}

/// Attach `Authorization: Bearer <token>` only for authenticated callers.
pub(crate) fn authorize(request: RequestBuilder, credential: Option<&BearerToken>) -> RequestBuilder {
    match credential {
        Some(token) => request.header(AUTHORIZATION, token.authorization_value()),
        None => request,
    }
}

pub(crate) async fn ensure_success(response: Response) -> Result<Response, ProxyError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(ProxyError::rejected(status.as_u16(), &body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::ClusterRole;

    fn client(prefix: &str) -> WorkerClient {
        let coordinator = ClusterRole::Master.coordinator().unwrap();
        WorkerClient::new(
            coordinator,
            WorkerClientConfig {
                api_prefix: prefix.to_string(),
                ..WorkerClientConfig::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_endpoints_are_rooted_at_the_api_prefix() {
        let worker = Worker::new(2, "10.1.0.7", 8102, 500);
        let url = client("/jifa-api/").endpoint(&worker, "/files/upload").unwrap();
        assert_eq!(url.as_str(), "http://10.1.0.7:8102/jifa-api/files/upload");
    }

    #[test]
    fn test_invalid_hosts_are_reported() {
        let worker = Worker::new(3, "bad host", 8102, 0);
        let err = client("/jifa-api").endpoint(&worker, "/files/1").unwrap_err();
        assert!(matches!(err, ProxyError::InvalidEndpoint(_)));
    }
}
