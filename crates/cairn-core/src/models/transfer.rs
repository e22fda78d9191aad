use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use super::file::FileType;
use crate::error::AppError;

/// Where a worker should pull a file from.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum TransferSource {
    Url {
        url: String,
    },
    S3 {
        endpoint: String,
        bucket: String,
        object_key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        access_key: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secret_key: Option<String>,
    },
    Scp {
        host: String,
        path: String,
        user: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
}

impl fmt::Debug for TransferSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferSource::Url { url } => f.debug_struct("Url").field("url", url).finish(),
            TransferSource::S3 {
                endpoint,
                bucket,
                object_key,
                access_key,
                secret_key,
            } => f
                .debug_struct("S3")
                .field("endpoint", endpoint)
                .field("bucket", bucket)
                .field("object_key", object_key)
                .field("access_key", access_key)
                .field("secret_key", &secret_key.as_ref().map(|_| "***"))
                .finish(),
            TransferSource::Scp {
                host,
                path,
                user,
                password,
            } => f
                .debug_struct("Scp")
                .field("host", host)
                .field("path", path)
                .field("user", user)
                .field("password", &password.as_ref().map(|_| "***"))
                .finish(),
        }
    }
}

fn last_segment(path: &str) -> Option<&str> {
    path.rsplit('/').find(|segment| !segment.is_empty())
}

fn require(value: &str, field: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::InvalidInput(format!("{} must not be empty", field)));
    }
    Ok(())
}

impl TransferSource {
    pub fn method(&self) -> &'static str {
        match self {
            TransferSource::Url { .. } => "url",
            TransferSource::S3 { .. } => "s3",
            TransferSource::Scp { .. } => "scp",
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        match self {
            TransferSource::Url { url } => {
                let parsed = Url::parse(url)
                    .map_err(|e| AppError::InvalidInput(format!("invalid source url: {}", e)))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(AppError::InvalidInput(format!(
                        "unsupported url scheme '{}'",
                        parsed.scheme()
                    )));
                }
                if parsed.host_str().is_none() {
                    return Err(AppError::InvalidInput("source url has no host".to_string()));
                }
                Ok(())
            }
            TransferSource::S3 {
                endpoint,
                bucket,
                object_key,
                ..
            } => {
                require(endpoint, "endpoint")?;
                require(bucket, "bucket")?;
                require(object_key, "object_key")
            }
            TransferSource::Scp { host, path, user, .. } => {
                require(host, "host")?;
                require(path, "path")?;
                require(user, "user")
            }
        }
    }

    /// Display name derived from the locator's last path segment.
    pub fn default_file_name(&self) -> String {
        let derived = match self {
            TransferSource::Url { url } => Url::parse(url).ok().and_then(|parsed| {
                parsed
                    .path_segments()
                    .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
                    .map(str::to_string)
            }),
            TransferSource::S3 { object_key, .. } => last_segment(object_key).map(str::to_string),
            TransferSource::Scp { path, .. } => last_segment(path).map(str::to_string),
        };
        derived.unwrap_or_else(|| format!("{}-transfer", self.method()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTransferRequest {
    pub source: TransferSource,
    #[serde(rename = "type")]
    pub file_type: FileType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl FileTransferRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        self.source.validate()?;
        if let Some(name) = &self.file_name {
            require(name, "file_name")?;
        }
        Ok(())
    }

    pub fn display_name(&self) -> String {
        self.file_name
            .as_deref()
            .map(str::trim)
            .map(str::to_string)
            .unwrap_or_else(|| self.source.default_file_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    InProgress,
    Succeeded,
    Failed,
}

impl TransferState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::InProgress => "in_progress",
            TransferState::Succeeded => "succeeded",
            TransferState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferState::InProgress)
    }
}

impl std::str::FromStr for TransferState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(TransferState::InProgress),
            "succeeded" => Ok(TransferState::Succeeded),
            "failed" => Ok(TransferState::Failed),
            other => Err(format!("unknown transfer state '{}'", other)),
        }
    }
}

/// Progress report for a transfer, as produced by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTransferProgress {
    pub state: TransferState,
    #[serde(default)]
    pub transferred_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FileTransferProgress {
    pub fn started() -> Self {
        Self {
            state: TransferState::InProgress,
            transferred_size: 0,
            total_size: None,
            message: None,
        }
    }

    pub fn succeeded(size: u64) -> Self {
        Self {
            state: TransferState::Succeeded,
            transferred_size: size,
            total_size: Some(size),
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            state: TransferState::Failed,
            transferred_size: 0,
            total_size: None,
            message: Some(message.into()),
        }
    }
}

/// Master-side row tracking a transfer a worker accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    /// Id the worker assigned to the incoming file
    pub id: i64,
    pub worker_id: i64,
    pub owner_id: Option<Uuid>,
    pub file_type: FileType,
    pub file_name: String,
    pub progress: FileTransferProgress,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransferRecord {
    pub fn new(
        id: i64,
        worker_id: i64,
        owner_id: Option<Uuid>,
        file_type: FileType,
        file_name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            worker_id,
            owner_id,
            file_type,
            file_name: file_name.into(),
            progress: FileTransferProgress::started(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> TransferState {
        self.progress.state
    }
}
