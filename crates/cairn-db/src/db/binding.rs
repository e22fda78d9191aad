//! File to worker bindings.
//!
//! A binding is written once, in the same transaction as its file row, and is
//! never updated afterwards. Attempts to bind an already bound file fail.

use async_trait::async_trait;
use cairn_core::models::FileWorkerBinding;
use cairn_core::AppError;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

#[async_trait]
pub trait BindingRepository: Send + Sync {
    async fn find_by_file_id(&self, file_id: i64) -> Result<Option<FileWorkerBinding>, AppError>;

    /// Insert a binding; fails with `Internal` if the file is already bound.
    async fn save(&self, binding: &FileWorkerBinding) -> Result<(), AppError>;
}

#[derive(Debug, sqlx::FromRow)]
pub struct BindingRow {
    pub file_id: i64,
    pub worker_id: i64,
    pub created_at: DateTime<Utc>,
}

impl From<BindingRow> for FileWorkerBinding {
    fn from(row: BindingRow) -> Self {
        FileWorkerBinding {
            file_id: row.file_id,
            worker_id: row.worker_id,
            created_at: row.created_at,
        }
    }
}

pub(crate) fn already_bound(file_id: i64) -> AppError {
    AppError::Internal(format!(
        "file {} is already bound to a worker; bindings are immutable",
        file_id
    ))
}

#[derive(Clone)]
pub struct PgBindingRepository {
    pool: PgPool,
}

impl PgBindingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a binding within a transaction.
    #[tracing::instrument(skip(tx, binding), fields(db.table = "file_worker_bindings", file_id = binding.file_id, worker_id = binding.worker_id))]
    pub(crate) async fn save_tx(
        tx: &mut Transaction<'_, Postgres>,
        binding: &FileWorkerBinding,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO file_worker_bindings (file_id, worker_id, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (file_id) DO NOTHING
            "#,
        )
        .bind(binding.file_id)
        .bind(binding.worker_id)
        .bind(binding.created_at)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(already_bound(binding.file_id));
        }
        Ok(())
    }

    pub(crate) async fn delete_tx(
        tx: &mut Transaction<'_, Postgres>,
        file_id: i64,
    ) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM file_worker_bindings WHERE file_id = $1")
            .bind(file_id)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl BindingRepository for PgBindingRepository {
    #[tracing::instrument(skip(self), fields(db.table = "file_worker_bindings", db.record_id = file_id))]
    async fn find_by_file_id(&self, file_id: i64) -> Result<Option<FileWorkerBinding>, AppError> {
        let row = sqlx::query_as::<Postgres, BindingRow>(
            "SELECT file_id, worker_id, created_at FROM file_worker_bindings WHERE file_id = $1",
        )
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(FileWorkerBinding::from))
    }

    async fn save(&self, binding: &FileWorkerBinding) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        Self::save_tx(&mut tx, binding).await?;
        tx.commit().await?;
        Ok(())
    }
}
