//! Repository, broker and background service wiring

use std::sync::Arc;

use anyhow::Result;
use cairn_broker::{BrokerRepositories, FileBroker, RetentionConfig, RetentionSweeper};
use cairn_core::{Config, Coordinator};
use cairn_db::{
    MemoryStore, PgBindingRepository, PgFileRepository, PgTransferRepository, PgWorkerRepository,
    WorkerRepository,
};
use cairn_proxy::WorkerClientConfig;
use sqlx::PgPool;

use super::database;
use crate::state::AppState;

pub fn pg_repositories(pool: PgPool) -> BrokerRepositories {
    BrokerRepositories {
        workers: Arc::new(PgWorkerRepository::new(pool.clone())),
        files: Arc::new(PgFileRepository::new(pool.clone())),
        bindings: Arc::new(PgBindingRepository::new(pool.clone())),
        transfers: Arc::new(PgTransferRepository::new(pool)),
    }
}

pub fn memory_repositories(store: &MemoryStore) -> BrokerRepositories {
    BrokerRepositories {
        workers: Arc::new(store.clone()),
        files: Arc::new(store.clone()),
        bindings: Arc::new(store.clone()),
        transfers: Arc::new(store.clone()),
    }
}

pub fn worker_client_config(config: &Config) -> WorkerClientConfig {
    WorkerClientConfig {
        api_prefix: config.worker_api_prefix().to_string(),
        request_timeout: config.worker_request_timeout(),
        connect_timeout: config.worker_connect_timeout(),
    }
}

/// Build repositories, the broker and the retention sweeper.
pub async fn initialize_services(config: &Config, coordinator: Coordinator) -> Result<Arc<AppState>> {
    let repositories = match config.database_url() {
        Some(url) => pg_repositories(database::setup_database(config, url).await?),
        None => {
            tracing::warn!(
                "DATABASE_URL not set, using the in-memory store; the worker registry starts empty"
            );
            memory_repositories(&MemoryStore::new())
        }
    };
    let workers = repositories.workers.clone();

    let broker = Arc::new(FileBroker::from_parts(
        coordinator,
        config.scheduling_strategy(),
        worker_client_config(config),
        repositories,
    )?);
    tracing::info!(
        strategy = %config.scheduling_strategy(),
        worker_api_prefix = %config.worker_api_prefix(),
        "File broker initialized"
    );

    start_retention_sweeper(config, broker.clone(), workers);

    Ok(Arc::new(AppState::new(
        broker,
        config.jwt_secret(),
        config.max_upload_size_bytes(),
    )))
}

fn start_retention_sweeper(
    config: &Config,
    broker: Arc<FileBroker>,
    workers: Arc<dyn WorkerRepository>,
) {
    let Some(interval) = config.retention_sweep_interval() else {
        tracing::info!("Retention sweeper disabled");
        return;
    };

    let sweeper = Arc::new(RetentionSweeper::new(
        broker,
        workers,
        RetentionConfig {
            interval,
            min_available_space: config.retention_min_available_space_bytes(),
        },
    ));
    // Detached; the loop lives as long as the runtime.
    let _handle = sweeper.start();
    tracing::info!(
        interval_secs = interval.as_secs(),
        min_available_space = config.retention_min_available_space_bytes(),
        "Retention sweeper started"
    );
}
