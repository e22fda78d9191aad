use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of diagnostic file stored on a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileType {
    HeapDump,
    GcLog,
    ThreadDump,
    JfrFile,
}

impl FileType {
    pub const ALL: [FileType; 4] = [
        FileType::HeapDump,
        FileType::GcLog,
        FileType::ThreadDump,
        FileType::JfrFile,
    ];

    /// Wire name shared with workers.
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::HeapDump => "HEAP_DUMP",
            FileType::GcLog => "GC_LOG",
            FileType::ThreadDump => "THREAD_DUMP",
            FileType::JfrFile => "JFR_FILE",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase().replace('-', "_");
        FileType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| format!("unknown file type '{}'", s.trim()))
    }
}

/// Master-side metadata for a file whose bytes live on a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Assigned by the worker that accepted the bytes
    pub id: i64,
    pub unique_name: String,
    pub original_name: String,
    pub file_type: FileType,
    pub owner_id: Option<Uuid>,
    pub size: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn new(
        id: i64,
        file_type: FileType,
        original_name: impl Into<String>,
        owner_id: Option<Uuid>,
        size: Option<i64>,
    ) -> Self {
        Self {
            id,
            unique_name: Uuid::new_v4().to_string(),
            original_name: original_name.into(),
            file_type,
            owner_id,
            size,
            created_at: Utc::now(),
        }
    }
}

/// Which worker holds a file's bytes. Written once, never changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileWorkerBinding {
    pub file_id: i64,
    pub worker_id: i64,
    pub created_at: DateTime<Utc>,
}

impl FileWorkerBinding {
    pub fn new(file_id: i64, worker_id: i64) -> Self {
        Self {
            file_id,
            worker_id,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileView {
    pub id: i64,
    pub unique_name: String,
    pub original_name: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<FileRecord> for FileView {
    fn from(record: FileRecord) -> Self {
        FileView {
            id: record.id,
            unique_name: record.unique_name,
            original_name: record.original_name,
            file_type: record.file_type,
            size: record.size,
            owner_id: record.owner_id,
            created_at: record.created_at,
        }
    }
}
