//! Health and capabilities routes.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::error::ApiResult;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/capabilities", get(capabilities))
}

/// GET /health
async fn health(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    // A trivial query doubles as a database liveness probe
    let db_ok = sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&state.db)
        .await
        .is_ok();

    Ok(Json(json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "database": db_ok,
        "active_jobs": state.queue.active_jobs(),
        "version": env!("CARGO_PKG_VERSION"),
    })))
}

/// GET /capabilities - which optional collaborators are available.
async fn capabilities(State(state): State<AppState>) -> Json<serde_json::Value> {
    let audiowaveform = std::process::Command::new("audiowaveform")
        .arg("--version")
        .output()
        .is_ok();

    Json(json!({
        "quick_mode": state.config.quick_mode,
        "separation": state.config.quick_mode,
        "peaks": audiowaveform,
        "slicing": true,
        "sequencing": true,
        "moments": true,
        "max_upload_mb": state.config.max_upload_mb,
    }))
}
