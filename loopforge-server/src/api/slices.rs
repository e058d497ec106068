//! Slice routes: bank creation, inspection, export, and sequence generation.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use loopforge_common::db::models::{JobType, TriggerSequenceRecord};
use loopforge_common::db::{assets, slice_banks};
use loopforge_common::events::{ForgeEvent, SequenceGeneratedData};
use loopforge_common::Error;

use crate::engines::slice::SliceBank;
use crate::engines::trigger::{TriggerEngine, TriggerMode, TriggerRule, TriggerSource};
use crate::error::ApiResult;
use crate::workers::export_bank_slices;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/slices/banks", post(create_bank))
        .route("/slices/banks/:bank_id", get(get_bank))
        .route("/slices/banks/:bank_id/export", post(export_bank))
        .route("/slices/sequence", post(generate_sequence))
}

#[derive(Debug, Deserialize)]
struct CreateBankRequest {
    session_id: Uuid,
    /// Slice a specific asset (a stem); falls back to the session upload
    asset_id: Option<Uuid>,
    #[serde(default)]
    role: Option<String>,
    bpm: Option<f64>,
    key: Option<String>,
    min_slices: Option<u64>,
    max_slices: Option<u64>,
}

/// POST /slices/banks - enqueue a slicing job.
async fn create_bank(
    State(state): State<AppState>,
    Json(request): Json<CreateBankRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let (input_path, role) = match request.asset_id {
        Some(asset_id) => {
            let asset = assets::get(&state.db, asset_id).await?;
            let role = request
                .role
                .clone()
                .or_else(|| asset.stem_role.map(|r| r.to_string()));
            (asset.file_path, role)
        }
        None => {
            let upload = state
                .storage
                .upload(request.session_id)
                .ok_or_else(|| Error::NotFound("session has no upload".to_string()))?;
            (upload.display().to_string(), request.role.clone())
        }
    };

    let job_id = state
        .queue
        .submit(
            request.session_id,
            JobType::Slicing,
            Some(input_path),
            json!({
                "role": role.unwrap_or_else(|| "unknown".to_string()),
                "bpm": request.bpm,
                "key": request.key,
                "min_slices": request.min_slices,
                "max_slices": request.max_slices,
            }),
        )
        .await?;

    Ok(Json(json!({"job_id": job_id})))
}

/// GET /slices/banks/{id}
async fn get_bank(
    State(state): State<AppState>,
    Path(bank_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let record = slice_banks::get_bank(&state.db, bank_id).await?;
    Ok(Json(serde_json::to_value(&record).map_err(|e| Error::Internal(e.to_string()))?))
}

/// POST /slices/banks/{id}/export - write every slice as its own WAV.
async fn export_bank(
    State(state): State<AppState>,
    Path(bank_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let record = slice_banks::get_bank(&state.db, bank_id).await?;
    let session_id = record.session_id;
    let bank = SliceBank::from_record(&record)?;

    // Slice cutting is cheap next to the DSP jobs; run it on a blocking thread
    let storage = state.storage.clone();
    let paths = tokio::task::spawn_blocking(move || export_bank_slices(&storage, &bank, session_id))
        .await
        .map_err(|e| Error::Internal(format!("export task failed: {e}")))??;

    Ok(Json(json!({
        "exported": paths.len(),
        "paths": paths.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
    })))
}

#[derive(Debug, Deserialize)]
struct SequenceRequest {
    slice_bank_id: Uuid,
    duration_beats: f64,
    bpm: f64,
    #[serde(default = "default_mode")]
    mode: TriggerMode,
    /// Trigger source in its dict form; omitted → quarter-note grid
    #[serde(default)]
    trigger_source: serde_json::Value,
    #[serde(default)]
    rules: Vec<TriggerRule>,
    seed: Option<u64>,
}

fn default_mode() -> TriggerMode {
    TriggerMode::Sequential
}

/// POST /slices/sequence - generate and persist a trigger sequence.
async fn generate_sequence(
    State(state): State<AppState>,
    Json(request): Json<SequenceRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let record = slice_banks::get_bank(&state.db, request.slice_bank_id).await?;
    let bank = SliceBank::from_record(&record)?;

    let source = TriggerSource::from_value(&request.trigger_source)?;
    // Unseeded requests still get a recorded seed so the take is recallable
    let seed = request.seed.unwrap_or_else(rand::random);

    let mut engine = TriggerEngine::new(request.mode, source, request.rules, seed);
    let events = engine.generate_sequence(
        bank.len(),
        request.duration_beats,
        request.bpm,
        Some(&bank),
    )?;

    let sequence = TriggerSequenceRecord {
        id: Uuid::new_v4(),
        session_id: record.session_id,
        slice_bank_id: record.id,
        events: serde_json::to_value(&events).map_err(|e| Error::Internal(e.to_string()))?,
        params: json!({
            "duration_beats": request.duration_beats,
            "bpm": request.bpm,
            "engine": engine.params_value(),
        }),
        seed: seed as i64,
        created_at: Utc::now(),
    };
    slice_banks::insert_sequence(&state.db, &sequence).await?;

    state.event_bus.emit(ForgeEvent::SequenceGenerated {
        session_id: record.session_id,
        data: SequenceGeneratedData {
            sequence_id: sequence.id,
            num_events: events.len(),
            seed: sequence.seed,
        },
        timestamp: Utc::now(),
    });

    Ok(Json(json!({
        "sequence_id": sequence.id,
        "seed": sequence.seed,
        "num_events": events.len(),
        "events": events,
    })))
}
