use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use cairn_core::{AppError, Coordinator, SchedulingStrategy, Worker};
use cairn_db::WorkerRepository;

/// Kind of operation a worker is being chosen for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Upload,
    TransferIn,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Upload => f.write_str("upload"),
            OperationKind::TransferIn => f.write_str("transfer"),
        }
    }
}

/// Chooses the worker that will own a new file.
#[async_trait]
pub trait WorkerSelector: Send + Sync {
    async fn select_worker(&self, operation: OperationKind) -> Result<Worker, AppError>;
}

/// Picks the worker reporting the most available space.
///
/// Space is advisory: nothing is reserved, so concurrent selections may all
/// land on the same worker.
pub struct StaticWorkerSelector {
    workers: Arc<dyn WorkerRepository>,
}

impl StaticWorkerSelector {
    pub fn new(_coordinator: Coordinator, workers: Arc<dyn WorkerRepository>) -> Self {
        Self { workers }
    }
}

/// First worker with the maximum `available_space`.
fn most_available(workers: Vec<Worker>) -> Option<Worker> {
    workers.into_iter().fold(None, |best, candidate| match best {
        Some(best) if best.available_space >= candidate.available_space => Some(best),
        _ => Some(candidate),
    })
}

#[async_trait]
impl WorkerSelector for StaticWorkerSelector {
    #[tracing::instrument(skip(self), fields(operation = %operation))]
    async fn select_worker(&self, operation: OperationKind) -> Result<Worker, AppError> {
        let workers = self.workers.list_ordered_by_available_space_desc().await?;
        let known = workers.len();

        let worker = most_available(workers).ok_or_else(|| {
            tracing::warn!("No worker registered, cannot schedule");
            AppError::WorkerUnavailable(format!("no worker is registered to accept the {}", operation))
        })?;

        tracing::debug!(
            worker_id = worker.id,
            available_space = worker.available_space,
            known,
            "Selected worker"
        );
        Ok(worker)
    }
}

pub fn build_selector(
    strategy: SchedulingStrategy,
    coordinator: Coordinator,
    workers: Arc<dyn WorkerRepository>,
) -> Arc<dyn WorkerSelector> {
    match strategy {
        SchedulingStrategy::Static => Arc::new(StaticWorkerSelector::new(coordinator, workers)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::ClusterRole;
    use cairn_db::MemoryStore;

    async fn selector_with(workers: Vec<Worker>) -> StaticWorkerSelector {
        let store = MemoryStore::new();
        for worker in workers {
            store.upsert_worker(worker).await;
        }
        StaticWorkerSelector::new(ClusterRole::Master.coordinator().unwrap(), Arc::new(store))
    }

    #[tokio::test]
    async fn test_picks_worker_with_most_space() {
        let selector = selector_with(vec![
            Worker::new(1, "w1", 8102, 100),
            Worker::new(2, "w2", 8102, 500),
        ])
        .await;

        let worker = selector.select_worker(OperationKind::Upload).await.unwrap();
        assert_eq!(worker.id, 2);
    }

    #[tokio::test]
    async fn test_ties_keep_enumeration_order() {
        let selector = selector_with(vec![
            Worker::new(5, "w5", 8102, 300),
            Worker::new(3, "w3", 8102, 300),
            Worker::new(4, "w4", 8102, 10),
        ])
        .await;

        for _ in 0..3 {
            let worker = selector
                .select_worker(OperationKind::TransferIn)
                .await
                .unwrap();
            assert_eq!(worker.id, 5);
        }
    }

    #[tokio::test]
    async fn test_empty_registry_is_unavailable() {
        let selector = selector_with(vec![]).await;
        let err = selector
            .select_worker(OperationKind::Upload)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::WorkerUnavailable(_)));
    }

    #[test]
    fn test_most_available_ignores_input_order_for_distinct_space() {
        let picked = most_available(vec![
            Worker::new(1, "a", 1, 10),
            Worker::new(2, "b", 1, 30),
            Worker::new(3, "c", 1, 20),
        ]);
        assert_eq!(picked.map(|w| w.id), Some(2));
        assert!(most_available(vec![]).is_none());
    }
}
