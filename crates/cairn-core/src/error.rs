//! Error types module
//!
//! Every fallible operation in Cairn reports an [`AppError`]. Variants describe
//! what went wrong from the caller's point of view (worker unavailable, worker
//! rejected the request, missing file, ...) and [`ErrorMetadata`] tells the HTTP
//! layer how to present each of them.
//!
//! The `Database` variant wraps `sqlx::Error` when the `sqlx` feature is enabled
//! and falls back to a plain message otherwise.

use std::io;

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Expected errors such as validation failures
    Debug,
    /// Recoverable issues such as an unreachable worker
    Warn,
    /// Unexpected failures and inconsistent state
    Error,
}

/// Describes how an error is presented to clients and operators.
pub trait ErrorMetadata {
    /// HTTP status code to return
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g. "WORKER_UNAVAILABLE")
    fn error_code(&self) -> &'static str;

    /// Whether retrying the same request may succeed
    fn is_recoverable(&self) -> bool;

    fn suggested_action(&self) -> Option<&'static str>;

    /// Client-facing message (may differ from the internal message)
    fn client_message(&self) -> String;

    /// Whether details must be hidden from clients
    fn is_sensitive(&self) -> bool;

    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[cfg(not(feature = "sqlx"))]
    #[error("Database error: {0}")]
    Database(String),

    #[error("No worker available: {0}")]
    WorkerUnavailable(String),

    #[error("Worker request failed: {message}")]
    WorkerRequestFailed {
        /// HTTP status returned by the worker, if it answered at all
        status: Option<u16>,
        message: String,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        AppError::Database(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Internal(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("JSON parsing error: {}", err))
    }
}

impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        AppError::InvalidInput(format!("UUID parsing error: {}", err))
    }
}

/// (http_status, error_code, recoverable, suggested_action, sensitive, log_level)
fn app_error_static_metadata(
    err: &AppError,
) -> (
    u16,
    &'static str,
    bool,
    Option<&'static str>,
    bool,
    LogLevel,
) {
    match err {
        AppError::Database(_) => (
            500,
            "DATABASE_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::WorkerUnavailable(_) => (
            503,
            "WORKER_UNAVAILABLE",
            true,
            Some("Try again later once a worker node has registered"),
            false,
            LogLevel::Warn,
        ),
        AppError::WorkerRequestFailed { .. } => (
            502,
            "WORKER_REQUEST_FAILED",
            true,
            Some("Retry the request; contact an operator if it keeps failing"),
            false,
            LogLevel::Warn,
        ),
        AppError::InvalidInput(_) => (
            400,
            "INVALID_INPUT",
            false,
            Some("Check request parameters and try again"),
            false,
            LogLevel::Debug,
        ),
        AppError::NotFound(_) => (
            404,
            "NOT_FOUND",
            false,
            Some("Verify the file ID exists"),
            false,
            LogLevel::Debug,
        ),
        AppError::Forbidden(_) => (
            403,
            "FORBIDDEN",
            false,
            Some("Only the file owner or an administrator may do this"),
            false,
            LogLevel::Debug,
        ),
        AppError::Unauthorized(_) => (
            401,
            "UNAUTHORIZED",
            false,
            Some("Provide a valid bearer token"),
            false,
            LogLevel::Debug,
        ),
        AppError::Internal(_) | AppError::InternalWithSource { .. } => (
            500,
            "INTERNAL_ERROR",
            false,
            Some("Contact an operator if this error persists"),
            true,
            LogLevel::Error,
        ),
    }
}

impl AppError {
    /// Variant name used in detailed (non-production) error responses
    pub fn error_type(&self) -> &str {
        match self {
            AppError::Database(_) => "Database",
            AppError::WorkerUnavailable(_) => "WorkerUnavailable",
            AppError::WorkerRequestFailed { .. } => "WorkerRequestFailed",
            AppError::InvalidInput(_) => "InvalidInput",
            AppError::NotFound(_) => "NotFound",
            AppError::Forbidden(_) => "Forbidden",
            AppError::Unauthorized(_) => "Unauthorized",
            AppError::Internal(_) | AppError::InternalWithSource { .. } => "Internal",
        }
    }

    /// Message plus the chain of source errors, at most five levels deep
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        app_error_static_metadata(self).0
    }

    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).1
    }

    fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).2
    }

    fn suggested_action(&self) -> Option<&'static str> {
        app_error_static_metadata(self).3
    }

    fn is_sensitive(&self) -> bool {
        app_error_static_metadata(self).4
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).5
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Database(_) => "Failed to access database".to_string(),
            AppError::WorkerUnavailable(_) => {
                "No worker node is available to handle this request".to_string()
            }
            AppError::WorkerRequestFailed {
                status: Some(status),
                ..
            } => format!("Worker node rejected the request with status {}", status),
            AppError::WorkerRequestFailed { status: None, .. } => {
                "Worker node could not be reached".to_string()
            }
            AppError::InvalidInput(ref msg) => msg.clone(),
            AppError::NotFound(ref msg) => msg.clone(),
            AppError::Forbidden(ref msg) => msg.clone(),
            AppError::Unauthorized(ref msg) => msg.clone(),
            AppError::Internal(_) | AppError::InternalWithSource { .. } => {
                "Internal server error".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_metadata_database() {
        #[cfg(feature = "sqlx")]
        let err = AppError::from(sqlx::Error::PoolClosed);
        #[cfg(not(feature = "sqlx"))]
        let err = AppError::Database("pool closed".to_string());
        assert_eq!(err.http_status_code(), 500);
        assert_eq!(err.error_code(), "DATABASE_ERROR");
        assert!(err.is_recoverable());
        assert_eq!(err.client_message(), "Failed to access database");
        assert!(err.is_sensitive());
        assert_eq!(err.log_level(), LogLevel::Error);
    }

    #[test]
    fn test_worker_unavailable_maps_to_503() {
        let err = AppError::WorkerUnavailable("registry is empty".to_string());
        assert_eq!(err.http_status_code(), 503);
        assert_eq!(err.error_code(), "WORKER_UNAVAILABLE");
        assert!(err.is_recoverable());
        assert!(!err.is_sensitive());
        assert_eq!(err.log_level(), LogLevel::Warn);
    }

    #[test]
    fn test_worker_request_failed_mentions_status() {
        let rejected = AppError::WorkerRequestFailed {
            status: Some(507),
            message: "disk full".to_string(),
        };
        assert_eq!(rejected.http_status_code(), 502);
        assert_eq!(rejected.error_code(), "WORKER_REQUEST_FAILED");
        assert!(rejected.client_message().contains("507"));
        assert!(rejected.to_string().contains("disk full"));

        let unreachable = AppError::WorkerRequestFailed {
            status: None,
            message: "connection refused".to_string(),
        };
        assert_eq!(
            unreachable.client_message(),
            "Worker node could not be reached"
        );
    }

    #[test]
    fn test_internal_errors_are_hidden() {
        let err = AppError::Internal("file 7 has no owning worker".to_string());
        assert_eq!(err.http_status_code(), 500);
        assert_eq!(err.error_code(), "INTERNAL_ERROR");
        assert!(err.is_sensitive());
        assert_eq!(err.client_message(), "Internal server error");
        assert_eq!(err.log_level(), LogLevel::Error);
    }

    #[test]
    fn test_access_errors() {
        let forbidden = AppError::Forbidden("not yours".to_string());
        assert_eq!(forbidden.http_status_code(), 403);
        assert_eq!(forbidden.client_message(), "not yours");

        let unauthorized = AppError::Unauthorized("login required".to_string());
        assert_eq!(unauthorized.http_status_code(), 401);
        assert_eq!(unauthorized.error_type(), "Unauthorized");
    }

    #[test]
    fn test_detailed_message_includes_source_chain() {
        let err = AppError::from(anyhow::anyhow!("root cause").context("while binding"));
        let details = err.detailed_message();
        assert!(details.starts_with("Internal error with source"));
        assert!(details.contains("Caused by: while binding"));
    }
}
