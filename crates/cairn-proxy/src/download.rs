//! Lazy download resources.
//!
//! A [`WorkerDownload`] only records where the bytes live and whose
//! credential to present. Nothing is sent until [`WorkerDownload::open`], and
//! each call opens a fresh connection.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use cairn_core::BearerToken;
use futures::{Stream, TryStreamExt};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use url::Url;

use crate::error::ProxyError;
use crate::{authorize, ensure_success};

#[derive(Clone)]
pub struct WorkerDownload {
    client: Client,
    url: Url,
    credential: Option<BearerToken>,
    file_id: i64,
    worker_id: i64,
}

impl WorkerDownload {
    pub(crate) fn new(
        client: Client,
        url: Url,
        credential: Option<BearerToken>,
        file_id: i64,
        worker_id: i64,
    ) -> Self {
        Self {
            client,
            url,
            credential,
            file_id,
            worker_id,
        }
    }

    pub fn file_id(&self) -> i64 {
        self.file_id
    }

    pub fn worker_id(&self) -> i64 {
        self.worker_id
    }

    pub fn has_credential(&self) -> bool {
        self.credential.is_some()
    }

    /// Issue one GET against the worker and stream the body back.
    ///
    /// Only the client's connect timeout applies; a large file may take as
    /// long as it needs once the worker starts sending.
    #[tracing::instrument(skip(self), fields(file_id = self.file_id, worker_id = self.worker_id))]
    pub async fn open(&self) -> Result<DownloadStream, ProxyError> {
        let request = authorize(self.client.get(self.url.clone()), self.credential.as_ref());
        let response = ensure_success(request.send().await?).await?;

        let content_length = response.content_length();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        tracing::debug!(?content_length, "Worker download opened");

        Ok(DownloadStream {
            inner: Box::pin(response.bytes_stream().map_err(ProxyError::from)),
            content_length,
            content_type,
            received: 0,
            finished: false,
            file_id: self.file_id,
        })
    }
}

impl std::fmt::Debug for WorkerDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerDownload")
            .field("url", &self.url.as_str())
            .field("authenticated", &self.credential.is_some())
            .field("file_id", &self.file_id)
            .field("worker_id", &self.worker_id)
            .finish()
    }
}

/// Body of an open worker download.
///
/// Dropping it before the end closes the underlying worker connection.
pub struct DownloadStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, ProxyError>> + Send>>,
    content_length: Option<u64>,
    content_type: Option<String>,
    received: u64,
    finished: bool,
    file_id: i64,
}

impl DownloadStream {
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn received(&self) -> u64 {
        self.received
    }
}

impl Stream for DownloadStream {
    type Item = Result<Bytes, ProxyError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = this.inner.as_mut().poll_next(cx);
        match &polled {
            Poll::Ready(Some(Ok(chunk))) => this.received += chunk.len() as u64,
            Poll::Ready(None) => this.finished = true,
            Poll::Ready(Some(Err(_))) | Poll::Pending => {}
        }
        polled
    }
}

impl Drop for DownloadStream {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(
                file_id = self.file_id,
                received = self.received,
                expected = ?self.content_length,
                "Download dropped before completion, closing worker connection"
            );
        }
    }
}
