//! Route configuration and setup

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use cairn_infra::request_id_middleware;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::auth::auth_middleware;
use crate::handlers::{files, health};
use crate::state::AppState;

/// File routes live under `api_prefix`; `/health` stays at the root.
pub fn build_router(state: Arc<AppState>, api_prefix: &str) -> Router {
    let file_routes = Router::new()
        .route("/files", get(files::list_files))
        .route(
            "/files/upload",
            post(files::upload_file).layer(DefaultBodyLimit::max(state.max_upload_size_bytes)),
        )
        .route("/files/transfer", post(files::transfer_file))
        .route(
            "/files/transfer/{id}/progress",
            get(files::transfer_progress),
        )
        .route(
            "/files/by-name/{unique_name}",
            get(files::get_file_by_name),
        )
        .route("/files/{id}", get(files::get_file).delete(files::delete_file))
        .route("/files/{id}/download", get(files::download_file))
        .layer(from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state);

    let prefix = api_prefix.trim_end_matches('/');
    let router = Router::new().route("/health", get(health::health_check));
    let router = if prefix.is_empty() {
        router.merge(file_routes)
    } else if prefix.starts_with('/') {
        router.nest(prefix, file_routes)
    } else {
        router.nest(&format!("/{}", prefix), file_routes)
    };

    router.layer(
        ServiceBuilder::new()
            .layer(from_fn(request_id_middleware))
            .layer(TraceLayer::new_for_http()),
    )
}
