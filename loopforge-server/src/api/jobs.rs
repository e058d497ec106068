//! Job routes: query and manage background processing jobs.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use loopforge_common::db::jobs;
use loopforge_common::db::models::{Job, JobStatus};

use crate::error::ApiResult;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/:job_id", get(get_job))
        .route("/jobs/:job_id/cancel", post(cancel_job))
        .route("/jobs/:job_id/retry", post(retry_job))
}

#[derive(Debug, Deserialize)]
struct ListJobsQuery {
    session: Option<Uuid>,
    status: Option<String>,
    limit: Option<i64>,
}

/// GET /jobs/{id}
async fn get_job(State(state): State<AppState>, Path(job_id): Path<Uuid>) -> ApiResult<Json<Job>> {
    Ok(Json(jobs::get(&state.db, job_id).await?))
}

/// GET /jobs?session=&status=&limit=
async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    // An unparseable status filter matches nothing filterable; ignore it
    let status = query
        .status
        .as_deref()
        .and_then(|s| s.parse::<JobStatus>().ok());
    let limit = query.limit.unwrap_or(50).clamp(1, 500);

    let jobs = jobs::list(&state.db, query.session, status, limit).await?;
    Ok(Json(json!({
        "count": jobs.len(),
        "jobs": jobs,
    })))
}

/// POST /jobs/{id}/cancel
///
/// Cancelling a RUNNING job does not interrupt the worker thread; the worker
/// observes cancellation on its next progress tick.
async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    jobs::cancel(&state.db, job_id).await?;
    Ok(Json(json!({"cancelled": job_id})))
}

/// POST /jobs/{id}/retry - requeue a FAILED job.
async fn retry_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let attempt = jobs::retry(&state.db, job_id).await?;
    Ok(Json(json!({"retried": job_id, "attempt": attempt})))
}
