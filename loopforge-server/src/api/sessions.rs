//! Session routes: upload and lifecycle
//!
//! Uploading a track creates the session aggregate and kicks off the default
//! pipeline (separation, analysis, peaks).

use std::io::Cursor;

use axum::extract::{Multipart, Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use loopforge_common::db::models::{JobType, Session};
use loopforge_common::db::sessions;
use loopforge_common::events::ForgeEvent;
use loopforge_common::Error;

use crate::error::ApiResult;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sessions/upload", post(upload_session))
        .route("/sessions/:session_id", get(get_session).delete(delete_session))
}

/// POST /sessions/upload - create a session from an uploaded track.
async fn upload_session(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<serde_json::Value>> {
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::BadInput(format!("bad multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .unwrap_or_else(|| "unnamed".to_string());
        let bytes = field
            .bytes()
            .await
            .map_err(|e| Error::BadInput(format!("upload read failed: {e}")))?;
        upload = Some((filename, bytes.to_vec()));
        break;
    }

    let Some((filename, bytes)) = upload else {
        return Err(Error::BadInput("missing 'file' field".to_string()).into());
    };

    let max_bytes = state.config.max_upload_mb * 1024 * 1024;
    if bytes.len() as u64 > max_bytes {
        return Err(Error::BadInput(format!(
            "upload exceeds {} MB limit",
            state.config.max_upload_mb
        ))
        .into());
    }

    let session = Session::new(filename.clone());
    sessions::insert(&state.db, &session).await?;

    let (file_path, content_hash) = state
        .storage
        .save_upload(session.id, &filename, Cursor::new(bytes))?;
    let input = file_path.display().to_string();

    state.event_bus.emit(ForgeEvent::SessionCreated {
        session_id: session.id,
        data: serde_json::to_value(&session).unwrap_or_default(),
        timestamp: Utc::now(),
    });

    // Default pipeline: stems, source analysis, waveform peaks
    let separation_job = state
        .queue
        .submit(session.id, JobType::Separation, Some(input.clone()), json!({}))
        .await?;
    let analysis_job = state
        .queue
        .submit(session.id, JobType::Analysis, Some(input.clone()), json!({}))
        .await?;
    let peaks_job = state
        .queue
        .submit(session.id, JobType::Peaks, Some(input), json!({}))
        .await?;

    Ok(Json(json!({
        "session": session,
        "content_hash": content_hash,
        "jobs": {
            "separation": separation_job,
            "analysis": analysis_job,
            "peaks": peaks_job,
        },
    })))
}

/// GET /sessions/{id}
async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<Session>> {
    Ok(Json(sessions::get(&state.db, session_id).await?))
}

/// DELETE /sessions/{id} - cascades to jobs/assets/banks and removes files.
async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    // Verify existence first so a bad id is a 404, not a silent no-op
    sessions::get(&state.db, session_id).await?;

    sessions::delete(&state.db, session_id).await?;
    state.storage.delete_session(session_id)?;
    state.event_bus.clear_history(session_id);

    Ok(Json(json!({"deleted": session_id})))
}
