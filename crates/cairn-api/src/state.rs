//! Shared application state handed to every handler.

use std::sync::Arc;

use cairn_broker::FileBroker;

use crate::auth::JwtVerifier;

#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<FileBroker>,
    pub jwt: Arc<JwtVerifier>,
    /// Upper bound on an upload request body
    pub max_upload_size_bytes: usize,
}

impl AppState {
    pub fn new(broker: Arc<FileBroker>, jwt_secret: &str, max_upload_size_bytes: usize) -> Self {
        Self {
            broker,
            jwt: Arc::new(JwtVerifier::new(jwt_secret)),
            max_upload_size_bytes,
        }
    }
}
