use crate::error::{AppError, AppResult};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json as AxumJson;
use std::sync::Arc;

pub async fn job_status_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<AxumJson<serde_json::Value>> {
    let jobs = state.jobs.read().await;
    let job = jobs
        .get(&id)
        .ok_or_else(|| AppError::BadRequest(format!("unknown job: {id}")))?;
    Ok(AxumJson(serde_json::json!(job)))
}
