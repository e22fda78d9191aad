use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use cairn_core::{AppError, BearerToken, RequestContext};

use crate::error::HttpAppError;
use crate::state::AppState;

/// Attaches a [`RequestContext`] to every request.
///
/// No `Authorization` header means an anonymous caller. A header that is not a
/// valid bearer token is rejected with 401. The raw token is kept so it can be
/// forwarded to workers unchanged.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let context = match request.headers().get(AUTHORIZATION) {
        None => RequestContext::anonymous(),
        Some(value) => match authenticate(&state, value.to_str().ok()) {
            Ok(context) => context,
            Err(e) => return HttpAppError(e).into_response(),
        },
    };

    request.extensions_mut().insert(context);
    next.run(request).await
}

fn authenticate(state: &AppState, header: Option<&str>) -> Result<RequestContext, AppError> {
    let token = header
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            AppError::Unauthorized("Authorization header must be 'Bearer <token>'".to_string())
        })?;

    let claims = state.jwt.verify(token)?;
    tracing::debug!(user_id = %claims.sub, admin = claims.admin, "Authenticated request");

    Ok(RequestContext::authenticated(claims.sub, BearerToken::new(token)).with_admin(claims.admin))
}
