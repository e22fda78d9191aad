use std::sync::Arc;
use std::time::Duration;

use cairn_core::AppError;
use cairn_db::WorkerRepository;
use tokio::time::interval;

use crate::broker::FileBroker;

#[derive(Clone, Debug)]
pub struct RetentionConfig {
    pub interval: Duration,
    /// Sweep while the best worker reports less free space than this (bytes)
    pub min_available_space: i64,
}

/// Reclaims space by deleting the oldest file whenever even the emptiest
/// worker runs low.
pub struct RetentionSweeper {
    broker: Arc<FileBroker>,
    workers: Arc<dyn WorkerRepository>,
    config: RetentionConfig,
}

impl RetentionSweeper {
    pub fn new(
        broker: Arc<FileBroker>,
        workers: Arc<dyn WorkerRepository>,
        config: RetentionConfig,
    ) -> Self {
        Self {
            broker,
            workers,
            config,
        }
    }

    /// Start the background sweep loop.
    /// Returns a JoinHandle for graceful shutdown
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut sweep_interval = interval(self.config.interval);

            loop {
                sweep_interval.tick().await;

                match self.sweep_once().await {
                    Ok(Some(file_id)) => {
                        tracing::info!(file_id, "Retention sweep reclaimed a file")
                    }
                    Ok(None) => tracing::debug!("Retention sweep found nothing to do"),
                    Err(e) => tracing::error!(error = %e, "Retention sweep failed"),
                }
            }
        })
    }

    /// One tick: delete at most one file. Returns the deleted file's id.
    #[tracing::instrument(skip(self), fields(threshold = self.config.min_available_space))]
    pub async fn sweep_once(&self) -> Result<Option<i64>, AppError> {
        let workers = self.workers.list_ordered_by_available_space_desc().await?;
        let Some(best) = workers.iter().map(|w| w.available_space).max() else {
            return Ok(None);
        };

        if best >= self.config.min_available_space {
            return Ok(None);
        }

        tracing::info!(
            best_available_space = best,
            "Workers are low on space, deleting the oldest file"
        );
        self.broker.delete_oldest_file().await
    }
}
