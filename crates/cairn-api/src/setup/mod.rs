//! Application setup and initialization

pub mod database;
pub mod routes;
pub mod server;
pub mod services;

use std::sync::Arc;

use anyhow::{Context, Result};
use cairn_core::Config;

use crate::state::AppState;

/// Validate config, start tracing, wire services and build the router.
pub async fn initialize_app(config: Config) -> Result<(Arc<AppState>, axum::Router)> {
    config.validate().context("Configuration validation failed")?;

    cairn_infra::init_telemetry("cairn-master", config.log_format())
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    tracing::info!(
        role = %config.role(),
        environment = %config.environment(),
        "Configuration loaded and validated successfully"
    );

    // Worker nodes never construct a broker.
    let coordinator = config.role().coordinator()?;

    let state = services::initialize_services(&config, coordinator).await?;
    let router = routes::build_router(state.clone(), config.worker_api_prefix());

    Ok((state, router))
}
