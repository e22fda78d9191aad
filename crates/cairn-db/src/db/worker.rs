//! Worker registry: read-only view of the nodes that registered with the master.

use async_trait::async_trait;
use cairn_core::models::Worker;
use cairn_core::AppError;
use sqlx::{PgPool, Postgres};

#[async_trait]
pub trait WorkerRepository: Send + Sync {
    /// All known workers, most available space first; ties by id ascending.
    async fn list_ordered_by_available_space_desc(&self) -> Result<Vec<Worker>, AppError>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Worker>, AppError>;
}

/// Row type for the workers table.
#[derive(Debug, sqlx::FromRow)]
pub struct WorkerRow {
    pub id: i64,
    pub host_address: String,
    pub port: i32,
    pub available_space: i64,
}

impl TryFrom<WorkerRow> for Worker {
    type Error = AppError;

    fn try_from(row: WorkerRow) -> Result<Self, Self::Error> {
        let port = u16::try_from(row.port).map_err(|_| {
            AppError::Internal(format!("worker {} has invalid port {}", row.id, row.port))
        })?;
        Ok(Worker {
            id: row.id,
            host_address: row.host_address,
            port,
            available_space: row.available_space,
        })
    }
}

#[derive(Clone)]
pub struct PgWorkerRepository {
    pool: PgPool,
}

impl PgWorkerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkerRepository for PgWorkerRepository {
    #[tracing::instrument(skip(self), fields(db.table = "workers"))]
    async fn list_ordered_by_available_space_desc(&self) -> Result<Vec<Worker>, AppError> {
        let rows = sqlx::query_as::<Postgres, WorkerRow>(
            r#"
            SELECT id, host_address, port, available_space
            FROM workers
            ORDER BY available_space DESC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Worker::try_from).collect()
    }

    #[tracing::instrument(skip(self), fields(db.table = "workers", db.record_id = id))]
    async fn get_by_id(&self, id: i64) -> Result<Option<Worker>, AppError> {
        let row = sqlx::query_as::<Postgres, WorkerRow>(
            "SELECT id, host_address, port, available_space FROM workers WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Worker::try_from).transpose()
    }
}
