use cairn_core::AppError;
use thiserror::Error;

/// Longest worker response body kept in an error.
const MAX_ERROR_BODY_LEN: usize = 1024;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("worker responded with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("worker request timed out")]
    Timeout,

    #[error("could not reach worker: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("malformed worker response: {0}")]
    MalformedResponse(String),

    #[error("invalid worker endpoint: {0}")]
    InvalidEndpoint(String),
}

impl ProxyError {
    pub(crate) fn rejected(status: u16, body: &str) -> Self {
        let body = match body.char_indices().nth(MAX_ERROR_BODY_LEN) {
            Some((cut, _)) => format!("{}...", &body[..cut]),
            None => body.to_string(),
        };
        ProxyError::Rejected { status, body }
    }

    /// Status the worker answered with, if it answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            ProxyError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProxyError::Timeout
        } else if err.is_decode() {
            ProxyError::MalformedResponse(err.to_string())
        } else {
            ProxyError::Transport(err)
        }
    }
}

impl From<ProxyError> for AppError {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::InvalidEndpoint(msg) => {
                AppError::Internal(format!("invalid worker endpoint: {}", msg))
            }
            other => AppError::WorkerRequestFailed {
                status: other.status(),
                message: other.to_string(),
            },
        }
    }
}
