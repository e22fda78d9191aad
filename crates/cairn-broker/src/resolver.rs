use std::sync::Arc;

use cairn_core::models::FileWorkerBinding;
use cairn_core::{AppError, Coordinator, Worker};
use cairn_db::{BindingRepository, WorkerRepository};

/// Finds the worker that owns an existing file.
#[derive(Clone)]
pub struct BindingResolver {
    bindings: Arc<dyn BindingRepository>,
    workers: Arc<dyn WorkerRepository>,
}

impl BindingResolver {
    pub fn new(
        _coordinator: Coordinator,
        bindings: Arc<dyn BindingRepository>,
        workers: Arc<dyn WorkerRepository>,
    ) -> Self {
        Self { bindings, workers }
    }

    /// A file that exists but has no binding, or whose worker has left the
    /// registry, means the store is inconsistent: that is an internal error,
    /// not a missing file.
    #[tracing::instrument(skip(self))]
    pub async fn resolve_worker_for_file(&self, file_id: i64) -> Result<Worker, AppError> {
        let binding = self.bindings.find_by_file_id(file_id).await?.ok_or_else(|| {
            tracing::error!(file_id, "File has no owning worker");
            AppError::Internal(format!("file {} has no owning worker", file_id))
        })?;

        self.worker_by_id(binding.worker_id).await
    }

    pub async fn worker_by_id(&self, worker_id: i64) -> Result<Worker, AppError> {
        self.workers.get_by_id(worker_id).await?.ok_or_else(|| {
            tracing::error!(worker_id, "Bound worker is no longer registered");
            AppError::Internal(format!("worker {} is not registered", worker_id))
        })
    }

    /// Record that `worker_id` holds `file_id`. Fails if the file is already bound.
    pub async fn bind_file_to_worker(&self, file_id: i64, worker_id: i64) -> Result<(), AppError> {
        self.bindings
            .save(&FileWorkerBinding::new(file_id, worker_id))
            .await
    }
}
