use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use cairn_core::constants::OCTET_STREAM;
use futures::{Stream, TryStream, TryStreamExt};
use reqwest::multipart::Part;
use reqwest::Body;

use crate::error::ProxyError;

enum UploadBody {
    Bytes(Bytes),
    Stream(Body),
}

// Kept outside `from_stream` so its `Bytes: From<S::Ok>` bound does not
// shadow the one `Body::wrap_stream` requires.
fn wrap_body<St, E>(stream: St) -> Body
where
    St: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
{
    Body::wrap_stream(stream)
}

/// Running count of streamed bytes handed to the worker request.
#[derive(Clone, Debug, Default)]
pub struct SentBytes(Arc<AtomicU64>);

impl SentBytes {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn add(&self, n: usize) {
        self.0.fetch_add(n as u64, Ordering::Relaxed);
    }
}

/// File content to forward to a worker, held in memory or streamed.
pub struct UploadPayload {
    file_name: String,
    content_length: Option<u64>,
    sent: SentBytes,
    body: UploadBody,
}

impl UploadPayload {
    pub fn from_bytes(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            file_name: file_name.into(),
            content_length: Some(bytes.len() as u64),
            sent: SentBytes::default(),
            body: UploadBody::Bytes(bytes),
        }
    }

    /// Stream the content; `content_length` is sent when known.
    ///
    /// An error from `stream` aborts the worker request, so a broken client
    /// upload never reaches the worker as a truncated file.
    pub fn from_stream<S>(file_name: impl Into<String>, stream: S, content_length: Option<u64>) -> Self
    where
        S: TryStream + Send + Sync + 'static,
        S::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
        Bytes: From<S::Ok>,
    {
        let sent = SentBytes::default();
        let counter = sent.clone();
        let counted = stream.map_ok(move |chunk| {
            let chunk = Bytes::from(chunk);
            counter.add(chunk.len());
            chunk
        });
        Self {
            file_name: file_name.into(),
            content_length,
            sent,
            body: UploadBody::Stream(wrap_body(counted)),
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Bytes pulled from a streamed body so far. Stays at zero for in-memory payloads.
    pub fn sent_bytes(&self) -> SentBytes {
        self.sent.clone()
    }

    pub(crate) fn into_part(self) -> Result<Part, ProxyError> {
        let part = match (self.body, self.content_length) {
            (UploadBody::Bytes(bytes), _) => {
                let len = bytes.len() as u64;
                Part::stream_with_length(bytes, len)
            }
            (UploadBody::Stream(body), Some(len)) => Part::stream_with_length(body, len),
            (UploadBody::Stream(body), None) => Part::stream(body),
        };
        part.file_name(self.file_name)
            .mime_str(OCTET_STREAM)
            .map_err(ProxyError::Transport)
    }
}

impl std::fmt::Debug for UploadPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadPayload")
            .field("file_name", &self.file_name)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}
