//! Transfer tracking.
//!
//! Rows start `in_progress` and move to exactly one terminal state. Every
//! transition out of `in_progress` is a compare-and-set on the state column so
//! concurrent pollers cannot commit the same transfer twice.

use async_trait::async_trait;
use cairn_core::models::{
    FileRecord, FileTransferProgress, FileType, FileWorkerBinding, TransferRecord, TransferState,
};
use cairn_core::AppError;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use super::binding::PgBindingRepository;
use super::file::PgFileRepository;

#[async_trait]
pub trait TransferRepository: Send + Sync {
    async fn create(&self, record: &TransferRecord) -> Result<(), AppError>;

    async fn get(&self, id: i64) -> Result<Option<TransferRecord>, AppError>;

    /// Store the latest progress of a transfer that is still running.
    async fn update_progress(&self, id: i64, progress: &FileTransferProgress)
        -> Result<(), AppError>;

    /// `in_progress -> succeeded`, inserting `file` and its binding to the
    /// transfer's worker in the same step. Returns false when another caller
    /// already moved the transfer out of `in_progress`.
    async fn mark_succeeded(
        &self,
        id: i64,
        progress: &FileTransferProgress,
        file: &FileRecord,
    ) -> Result<bool, AppError>;

    /// `in_progress -> failed`. Returns false if the transfer was already terminal.
    async fn mark_failed(&self, id: i64, progress: &FileTransferProgress)
        -> Result<bool, AppError>;
}

#[derive(Debug, sqlx::FromRow)]
pub struct TransferRow {
    pub id: i64,
    pub worker_id: i64,
    pub owner_id: Option<Uuid>,
    pub file_type: String,
    pub file_name: String,
    pub state: String,
    pub transferred_size: i64,
    pub total_size: Option<i64>,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<TransferRow> for TransferRecord {
    type Error = AppError;

    fn try_from(row: TransferRow) -> Result<Self, Self::Error> {
        let corrupt = |e: String| AppError::Internal(format!("transfer {}: {}", row.id, e));
        let file_type = row.file_type.parse::<FileType>().map_err(corrupt)?;
        let state = row.state.parse::<TransferState>().map_err(corrupt)?;
        Ok(TransferRecord {
            id: row.id,
            worker_id: row.worker_id,
            owner_id: row.owner_id,
            file_type,
            file_name: row.file_name,
            progress: FileTransferProgress {
                state,
                transferred_size: u64::try_from(row.transferred_size).unwrap_or(0),
                total_size: row.total_size.and_then(|s| u64::try_from(s).ok()),
                message: row.message,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn as_db_size(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

#[derive(Clone)]
pub struct PgTransferRepository {
    pool: PgPool,
}

impl PgTransferRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransferRepository for PgTransferRepository {
    #[tracing::instrument(skip(self, record), fields(db.table = "file_transfers", db.record_id = record.id))]
    async fn create(&self, record: &TransferRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO file_transfers
                (id, worker_id, owner_id, file_type, file_name, state,
                 transferred_size, total_size, message, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(record.id)
        .bind(record.worker_id)
        .bind(record.owner_id)
        .bind(record.file_type.as_str())
        .bind(&record.file_name)
        .bind(record.progress.state.as_str())
        .bind(as_db_size(record.progress.transferred_size))
        .bind(record.progress.total_size.map(as_db_size))
        .bind(&record.progress.message)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "file_transfers", db.record_id = id))]
    async fn get(&self, id: i64) -> Result<Option<TransferRecord>, AppError> {
        let row = sqlx::query_as::<Postgres, TransferRow>(
            r#"
            SELECT id, worker_id, owner_id, file_type, file_name, state,
                   transferred_size, total_size, message, created_at, updated_at
            FROM file_transfers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TransferRecord::try_from).transpose()
    }

    #[tracing::instrument(skip(self, progress), fields(db.table = "file_transfers", db.record_id = id))]
    async fn update_progress(
        &self,
        id: i64,
        progress: &FileTransferProgress,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE file_transfers
            SET transferred_size = $2, total_size = $3, message = $4, updated_at = NOW()
            WHERE id = $1 AND state = 'in_progress'
            "#,
        )
        .bind(id)
        .bind(as_db_size(progress.transferred_size))
        .bind(progress.total_size.map(as_db_size))
        .bind(&progress.message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, progress, file), fields(db.table = "file_transfers", db.record_id = id))]
    async fn mark_succeeded(
        &self,
        id: i64,
        progress: &FileTransferProgress,
        file: &FileRecord,
    ) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        let worker_id: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE file_transfers
            SET state = 'succeeded', transferred_size = $2, total_size = $3,
                message = $4, updated_at = NOW()
            WHERE id = $1 AND state = 'in_progress'
            RETURNING worker_id
            "#,
        )
        .bind(id)
        .bind(as_db_size(progress.transferred_size))
        .bind(progress.total_size.map(as_db_size))
        .bind(&progress.message)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(worker_id) = worker_id else {
            return Ok(false);
        };

        PgFileRepository::insert_tx(&mut tx, file).await?;
        PgBindingRepository::save_tx(&mut tx, &FileWorkerBinding::new(file.id, worker_id))
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    #[tracing::instrument(skip(self, progress), fields(db.table = "file_transfers", db.record_id = id))]
    async fn mark_failed(
        &self,
        id: i64,
        progress: &FileTransferProgress,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE file_transfers
            SET state = 'failed', transferred_size = $2, total_size = $3,
                message = $4, updated_at = NOW()
            WHERE id = $1 AND state = 'in_progress'
            "#,
        )
        .bind(id)
        .bind(as_db_size(progress.transferred_size))
        .bind(progress.total_size.map(as_db_size))
        .bind(&progress.message)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
