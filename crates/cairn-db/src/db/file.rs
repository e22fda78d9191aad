//! File metadata repository.
//!
//! Files and their worker bindings are created and removed together; no
//! reader ever sees a file without its binding or the other way round.

use async_trait::async_trait;
use cairn_core::models::{FileRecord, FileType, FileWorkerBinding};
use cairn_core::AppError;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::binding::PgBindingRepository;

#[async_trait]
pub trait FileRepository: Send + Sync {
    /// Atomically insert `record` and bind it to `worker_id`.
    async fn create_with_binding(&self, record: &FileRecord, worker_id: i64)
        -> Result<(), AppError>;

    async fn get_by_id(&self, id: i64) -> Result<Option<FileRecord>, AppError>;

    async fn get_by_unique_name(&self, unique_name: &str) -> Result<Option<FileRecord>, AppError>;

    /// One page of an owner's files, newest first, plus the owner's total count.
    async fn list_by_owner(
        &self,
        owner_id: Uuid,
        file_type: Option<FileType>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<FileRecord>, u64), AppError>;

    /// Remove the file and its binding. Returns false if the file did not exist.
    async fn delete_with_binding(&self, id: i64) -> Result<bool, AppError>;

    /// Least recently created file.
    async fn find_oldest(&self) -> Result<Option<FileRecord>, AppError>;
}

/// Row type for the files table.
#[derive(Debug, sqlx::FromRow)]
pub struct FileRow {
    pub id: i64,
    pub unique_name: String,
    pub original_name: String,
    pub file_type: String,
    pub owner_id: Option<Uuid>,
    pub size: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<FileRow> for FileRecord {
    type Error = AppError;

    fn try_from(row: FileRow) -> Result<Self, Self::Error> {
        let file_type = row
            .file_type
            .parse::<FileType>()
            .map_err(|e| AppError::Internal(format!("file {}: {}", row.id, e)))?;
        Ok(FileRecord {
            id: row.id,
            unique_name: row.unique_name,
            original_name: row.original_name,
            file_type,
            owner_id: row.owner_id,
            size: row.size,
            created_at: row.created_at,
        })
    }
}

const FILE_COLUMNS: &str = "id, unique_name, original_name, file_type, owner_id, size, created_at";

#[derive(Clone)]
pub struct PgFileRepository {
    pool: PgPool,
}

impl PgFileRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[tracing::instrument(skip(tx, record), fields(db.table = "files", db.record_id = record.id))]
    pub(crate) async fn insert_tx(
        tx: &mut Transaction<'_, Postgres>,
        record: &FileRecord,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO files (id, unique_name, original_name, file_type, owner_id, size, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id)
        .bind(&record.unique_name)
        .bind(&record.original_name)
        .bind(record.file_type.as_str())
        .bind(record.owner_id)
        .bind(record.size)
        .bind(record.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl FileRepository for PgFileRepository {
    #[tracing::instrument(skip(self, record), fields(db.table = "files", db.record_id = record.id))]
    async fn create_with_binding(
        &self,
        record: &FileRecord,
        worker_id: i64,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        Self::insert_tx(&mut tx, record).await?;
        PgBindingRepository::save_tx(&mut tx, &FileWorkerBinding::new(record.id, worker_id))
            .await?;
        tx.commit().await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", db.record_id = id))]
    async fn get_by_id(&self, id: i64) -> Result<Option<FileRecord>, AppError> {
        let sql = format!("SELECT {} FROM files WHERE id = $1", FILE_COLUMNS);
        let row = sqlx::query_as::<Postgres, FileRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(FileRecord::try_from).transpose()
    }

    #[tracing::instrument(skip(self), fields(db.table = "files"))]
    async fn get_by_unique_name(&self, unique_name: &str) -> Result<Option<FileRecord>, AppError> {
        let sql = format!("SELECT {} FROM files WHERE unique_name = $1", FILE_COLUMNS);
        let row = sqlx::query_as::<Postgres, FileRow>(&sql)
            .bind(unique_name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(FileRecord::try_from).transpose()
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", owner_id = %owner_id))]
    async fn list_by_owner(
        &self,
        owner_id: Uuid,
        file_type: Option<FileType>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<FileRecord>, u64), AppError> {
        let type_filter = file_type.map(|t| t.as_str());

        let sql = format!(
            r#"
            SELECT {}
            FROM files
            WHERE owner_id = $1 AND ($2::TEXT IS NULL OR file_type = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#,
            FILE_COLUMNS
        );
        let rows = sqlx::query_as::<Postgres, FileRow>(&sql)
            .bind(owner_id)
            .bind(type_filter)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM files WHERE owner_id = $1 AND ($2::TEXT IS NULL OR file_type = $2)",
        )
        .bind(owner_id)
        .bind(type_filter)
        .fetch_one(&self.pool)
        .await?;

        let records = rows
            .into_iter()
            .map(FileRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((records, u64::try_from(total).unwrap_or(0)))
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", db.record_id = id))]
    async fn delete_with_binding(&self, id: i64) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;
        PgBindingRepository::delete_tx(&mut tx, id).await?;
        let result = sqlx::query("DELETE FROM files WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self), fields(db.table = "files"))]
    async fn find_oldest(&self) -> Result<Option<FileRecord>, AppError> {
        let sql = format!(
            "SELECT {} FROM files ORDER BY created_at ASC, id ASC LIMIT 1",
            FILE_COLUMNS
        );
        let row = sqlx::query_as::<Postgres, FileRow>(&sql)
            .fetch_optional(&self.pool)
            .await?;
        row.map(FileRecord::try_from).transpose()
    }
}
