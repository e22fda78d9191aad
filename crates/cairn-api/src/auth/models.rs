use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use cairn_core::{AppError, RequestContext};

use crate::error::HttpAppError;

/// The caller of the current request, as established by `auth_middleware`.
///
/// Extracted from request parts so it can be combined with `Multipart`.
#[derive(Debug, Clone)]
pub struct Caller(pub RequestContext);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = HttpAppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .map(Caller)
            .ok_or_else(|| {
                HttpAppError(AppError::Internal(
                    "request context missing; auth middleware not installed".to_string(),
                ))
            })
    }
}
