use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::IntoResponse;
use std::sync::Arc;

/// Admin token from `x-admin-token` or `Authorization: Bearer <token>`.
fn presented_token(req: &Request) -> Option<&str> {
    let headers = req.headers();
    if let Some(t) = headers
        .get("x-admin-token")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        return Some(t);
    }
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

pub async fn require_admin_token(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> impl IntoResponse {
    if presented_token(&req) != Some(state.cfg.admin_token.as_str()) {
        return AppError::Forbidden("admin token required".into()).into_response();
    }
    next.run(req).await
}
