//! Moments routes.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use loopforge_common::db::models::JobType;
use loopforge_common::Error;

use crate::error::ApiResult;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/moments/detect", post(detect))
}

#[derive(Debug, Deserialize)]
struct DetectRequest {
    session_id: Uuid,
    /// Analyze a specific file; falls back to the session upload
    input_path: Option<String>,
    #[serde(default)]
    bias: Option<String>,
}

/// POST /moments/detect - enqueue a moments-detection job.
async fn detect(
    State(state): State<AppState>,
    Json(request): Json<DetectRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let input_path = match request.input_path {
        Some(path) => path,
        None => state
            .storage
            .upload(request.session_id)
            .ok_or_else(|| Error::NotFound("session has no upload".to_string()))?
            .display()
            .to_string(),
    };

    let job_id = state
        .queue
        .submit(
            request.session_id,
            JobType::Moments,
            Some(input_path),
            json!({"bias": request.bias.unwrap_or_else(|| "balanced".to_string())}),
        )
        .await?;

    Ok(Json(json!({"job_id": job_id})))
}
