//! Test helpers: an in-memory master behind `axum-test` and mockito workers.

use std::sync::Arc;

use axum_test::TestServer;
use cairn_api::auth::JwtClaims;
use cairn_api::setup::{routes, services};
use cairn_api::AppState;
use cairn_broker::FileBroker;
use cairn_core::{ClusterRole, SchedulingStrategy, Worker};
use cairn_db::MemoryStore;
use cairn_proxy::WorkerClientConfig;
use jsonwebtoken::{encode, EncodingKey, Header};
use mockito::ServerGuard;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "integration-test-secret-at-least-32-chars";
pub const API_PREFIX: &str = "/jifa-api";
pub const TEST_MAX_UPLOAD_BYTES: usize = 1024 * 1024;

/// API path under the master prefix, e.g. `/jifa-api/files`.
pub fn api_path(path: &str) -> String {
    format!("{}{}", API_PREFIX, path)
}

pub struct TestApp {
    pub server: TestServer,
    pub store: MemoryStore,
}

pub fn setup_test_app() -> TestApp {
    let store = MemoryStore::new();
    let coordinator = ClusterRole::Master
        .coordinator()
        .expect("master role yields a coordinator");
    let broker = FileBroker::from_parts(
        coordinator,
        SchedulingStrategy::Static,
        WorkerClientConfig::default(),
        services::memory_repositories(&store),
    )
    .expect("Failed to build broker");

    let state = Arc::new(AppState::new(
        Arc::new(broker),
        TEST_JWT_SECRET,
        TEST_MAX_UPLOAD_BYTES,
    ));
    let server = TestServer::new(routes::build_router(state, API_PREFIX))
        .expect("Failed to create test server");

    TestApp { server, store }
}

pub struct TestUser {
    pub user_id: Uuid,
    pub token: String,
}

impl TestUser {
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

pub fn test_user(admin: bool) -> TestUser {
    let user_id = Uuid::new_v4();
    let claims = JwtClaims {
        sub: user_id,
        admin,
        exp: chrono::Utc::now().timestamp() + 3600,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .expect("Failed to sign test token");
    TestUser { user_id, token }
}

/// A registry entry pointing at a mockito worker.
pub fn worker_at(server: &ServerGuard, id: i64, available_space: i64) -> Worker {
    let addr = server.socket_address();
    Worker::new(id, addr.ip().to_string(), addr.port(), available_space)
}
