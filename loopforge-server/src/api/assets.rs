//! Asset routes: stems and produced files.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use uuid::Uuid;

use loopforge_common::db::assets;
use loopforge_common::db::models::Asset;
use loopforge_common::Error;

use crate::error::ApiResult;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/assets/:asset_id", get(get_asset))
        .route("/assets/:asset_id/download", get(download_asset))
        .route("/assets/:asset_id/peaks", get(asset_peaks))
        .route("/assets/session/:session_id/stems", get(session_stems))
}

/// GET /assets/{id}
async fn get_asset(
    State(state): State<AppState>,
    Path(asset_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let asset = assets::get(&state.db, asset_id).await?;
    let info = state
        .storage
        .file_info(std::path::Path::new(&asset.file_path))
        .ok();
    Ok(Json(json!({"asset": asset, "file": info})))
}

async fn serve_file(path: &std::path::Path, content_type: &str) -> ApiResult<Response> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|_| Error::NotFound(format!("file missing: {}", path.display())))?;

    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("download");

    Ok(Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        )
        .body(Body::from(bytes))
        .map_err(|e| Error::Internal(e.to_string()))?)
}

/// GET /assets/{id}/download
async fn download_asset(
    State(state): State<AppState>,
    Path(asset_id): Path<Uuid>,
) -> ApiResult<Response> {
    let asset = assets::get(&state.db, asset_id).await?;
    serve_file(std::path::Path::new(&asset.file_path), "audio/wav").await
}

/// GET /assets/{id}/peaks - binary `.dat` produced by the peaks job.
async fn asset_peaks(
    State(state): State<AppState>,
    Path(asset_id): Path<Uuid>,
) -> ApiResult<Response> {
    let asset = assets::get(&state.db, asset_id).await?;
    let peaks_path = std::path::Path::new(&asset.file_path).with_extension("dat");
    if !peaks_path.exists() {
        return Err(Error::NotFound(format!("no peaks generated for asset {asset_id}")).into());
    }
    serve_file(&peaks_path, "application/octet-stream").await
}

/// GET /assets/session/{sid}/stems
async fn session_stems(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Asset>>> {
    Ok(Json(assets::list_by_type(&state.db, session_id, "stem").await?))
}
