//! API integration tests
//!
//! Exercise the axum router end-to-end against a temp database and storage
//! tree, quick mode enabled so the whole pipeline runs without external
//! models.

mod common;

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt;
use uuid::Uuid;

use loopforge_common::db::models::{JobStatus, Session, SliceBankRecord, StemRole};
use loopforge_common::db::{sessions, slice_banks};
use loopforge_server::{build_router, AppState};

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, payload: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap()
}

fn multipart_upload(uri: &str, filename: &str, content: &[u8]) -> Request<Body> {
    let boundary = "loopforge-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: audio/wav\r\n\r\n");
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

/// Insert a hand-built 4-slice bank and return its id.
async fn seed_bank(state: &AppState, session_id: Uuid) -> Uuid {
    let slices = json!([
        {
            "index": 0, "start_sample": 0, "end_sample": 11025,
            "start_time": 0.0, "end_time": 0.25, "duration": 0.25,
            "transient_strength": 0.9, "spectral_centroid": 3000.0,
            "rms_energy": 0.6, "zero_crossing_rate": 0.2, "spectral_flatness": 0.3,
            "zero_crossing_start": 0, "zero_crossing_end": 11025
        },
        {
            "index": 1, "start_sample": 11025, "end_sample": 22050,
            "start_time": 0.25, "end_time": 0.5, "duration": 0.25,
            "transient_strength": 0.2, "spectral_centroid": 1500.0,
            "rms_energy": 0.4, "zero_crossing_rate": 0.1, "spectral_flatness": 0.2,
            "zero_crossing_start": 11025, "zero_crossing_end": 22050
        },
        {
            "index": 2, "start_sample": 22050, "end_sample": 33075,
            "start_time": 0.5, "end_time": 0.75, "duration": 0.25,
            "transient_strength": 0.8, "spectral_centroid": 2500.0,
            "rms_energy": 0.7, "zero_crossing_rate": 0.25, "spectral_flatness": 0.35,
            "zero_crossing_start": 22050, "zero_crossing_end": 33075
        },
        {
            "index": 3, "start_sample": 33075, "end_sample": 44100,
            "start_time": 0.75, "end_time": 1.0, "duration": 0.25,
            "transient_strength": 0.1, "spectral_centroid": 1000.0,
            "rms_energy": 0.3, "zero_crossing_rate": 0.05, "spectral_flatness": 0.15,
            "zero_crossing_start": 33075, "zero_crossing_end": 44100
        }
    ]);

    let record = SliceBankRecord {
        id: Uuid::new_v4(),
        session_id,
        source_path: "/tmp/drums.wav".to_string(),
        source_filename: "drums.wav".to_string(),
        stem_role: StemRole::Drums,
        sample_rate: 44100,
        total_samples: 44100,
        total_duration: 1.0,
        bpm: Some(160.0),
        key: None,
        mean_energy: 0.5,
        max_energy: 0.7,
        energy_variance: 0.02,
        slice_data: slices,
        created_at: chrono::Utc::now(),
    };
    slice_banks::insert_bank(&state.db, &record).await.unwrap();
    record.id
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_health_and_capabilities() {
    let dir = tempfile::tempdir().unwrap();
    let state = common::test_state(dir.path()).await;
    let app = build_router(state.clone());

    let response = app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], true);

    let response = app.oneshot(get("/capabilities")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["slicing"], true);
    assert_eq!(body["quick_mode"], true);

    state.queue.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_job_is_404_and_bad_transitions_400() {
    let dir = tempfile::tempdir().unwrap();
    let state = common::test_state(dir.path()).await;
    let app = build_router(state.clone());

    let response = app
        .clone()
        .oneshot(get(&format!("/jobs/{}", Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(post_json(&format!("/jobs/{}/retry", Uuid::new_v4()), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Retry on a PENDING job is an illegal transition
    let session = Session::new("t.wav");
    sessions::insert(&state.db, &session).await.unwrap();
    let job_id = state
        .queue
        .submit(
            session.id,
            loopforge_common::db::models::JobType::Moments,
            Some("/nonexistent.wav".to_string()),
            json!({}),
        )
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(post_json(&format!("/jobs/{job_id}/retry"), json!({})))
        .await
        .unwrap();
    // PENDING may have already failed (missing input); both are 400-family
    // transitions except FAILED, which is legal. Accept either outcome by
    // checking the job afterwards.
    let job = loopforge_common::db::jobs::get(&state.db, job_id).await.unwrap();
    if job.status == JobStatus::Pending {
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    state.queue.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sequence_endpoint_is_seed_reproducible() {
    let dir = tempfile::tempdir().unwrap();
    let state = common::test_state(dir.path()).await;
    let app = build_router(state.clone());

    let session = Session::new("t.wav");
    sessions::insert(&state.db, &session).await.unwrap();
    let bank_id = seed_bank(&state, session.id).await;

    let request = json!({
        "slice_bank_id": bank_id,
        "duration_beats": 8.0,
        "bpm": 160.0,
        "mode": "footwork",
        "trigger_source": {
            "type": "JukePatternTriggerSource",
            "pattern_name": "juke_basic",
            "loop_length": 4.0
        },
        "seed": 42
    });

    let first = body_json(
        app.clone()
            .oneshot(post_json("/slices/sequence", request.clone()))
            .await
            .unwrap(),
    )
    .await;
    let second = body_json(
        app.clone()
            .oneshot(post_json("/slices/sequence", request))
            .await
            .unwrap(),
    )
    .await;

    assert_eq!(first["num_events"], 16);
    assert_eq!(first["seed"], 42);
    assert_eq!(first["events"], second["events"]);

    // Both sequences were persisted with the generating parameters
    let sequence_id: Uuid = first["sequence_id"].as_str().unwrap().parse().unwrap();
    let stored = slice_banks::get_sequence(&state.db, sequence_id).await.unwrap();
    assert_eq!(stored.seed, 42);
    assert_eq!(stored.params["engine"]["mode"], "footwork");

    state.queue.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sequence_on_missing_bank_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let state = common::test_state(dir.path()).await;
    let app = build_router(state.clone());

    let response = app
        .oneshot(post_json(
            "/slices/sequence",
            json!({
                "slice_bank_id": Uuid::new_v4(),
                "duration_beats": 4.0,
                "bpm": 120.0
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    state.queue.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sequence_rejects_out_of_range_bpm() {
    let dir = tempfile::tempdir().unwrap();
    let state = common::test_state(dir.path()).await;
    let app = build_router(state.clone());

    let session = Session::new("t.wav");
    sessions::insert(&state.db, &session).await.unwrap();
    let bank_id = seed_bank(&state, session.id).await;

    let response = app
        .oneshot(post_json(
            "/slices/sequence",
            json!({
                "slice_bank_id": bank_id,
                "duration_beats": 4.0,
                "bpm": 400.0
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    state.queue.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_upload_runs_quick_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let state = common::test_state(dir.path()).await;
    let app = build_router(state.clone());

    let wav_path = dir.path().join("clip.wav");
    common::write_percussive_wav(&wav_path, 2.0);
    let wav_bytes = std::fs::read(&wav_path).unwrap();

    let response = app
        .clone()
        .oneshot(multipart_upload("/sessions/upload", "my clip.wav", &wav_bytes))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let session_id: Uuid = body["session"]["id"].as_str().unwrap().parse().unwrap();
    assert_eq!(body["content_hash"].as_str().unwrap().len(), 64);

    // Separation (quick mode) and analysis complete; peaks needs the external
    // audiowaveform binary and may fail with a dependency error instead
    let deadline = std::time::Instant::now() + Duration::from_secs(20);
    loop {
        let response = app
            .clone()
            .oneshot(get(&format!("/jobs?session={session_id}")))
            .await
            .unwrap();
        let body = body_json(response).await;
        let jobs = body["jobs"].as_array().unwrap();

        let done = |kind: &str, statuses: &[&str]| {
            jobs.iter().any(|j| {
                j["job_type"] == kind && statuses.contains(&j["status"].as_str().unwrap_or(""))
            })
        };

        if done("SEPARATION", &["COMPLETED"])
            && done("ANALYSIS", &["COMPLETED"])
            && done("PEAKS", &["COMPLETED", "FAILED"])
        {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "pipeline did not finish: {body}"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    // Quick-mode stems exist as assets
    let response = app
        .clone()
        .oneshot(get(&format!("/assets/session/{session_id}/stems")))
        .await
        .unwrap();
    let stems = body_json(response).await;
    assert_eq!(stems.as_array().unwrap().len(), 4);

    // Analysis results landed on the session
    let response = app
        .clone()
        .oneshot(get(&format!("/sessions/{session_id}")))
        .await
        .unwrap();
    let session = body_json(response).await;
    assert!(session["duration_seconds"].as_f64().unwrap() > 1.0);

    state.queue.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_upload_without_file_field_is_400() {
    let dir = tempfile::tempdir().unwrap();
    let state = common::test_state(dir.path()).await;
    let app = build_router(state.clone());

    let boundary = "loopforge-test-boundary";
    let request = Request::builder()
        .method("POST")
        .uri("/sessions/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(format!("--{boundary}--\r\n")))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    state.queue.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_delete_session_removes_everything() {
    let dir = tempfile::tempdir().unwrap();
    let state = common::test_state(dir.path()).await;
    let app = build_router(state.clone());

    let session = Session::new("gone.wav");
    sessions::insert(&state.db, &session).await.unwrap();
    let bank_id = seed_bank(&state, session.id).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/sessions/{}", session.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Cascade took the bank with it
    let response = app
        .clone()
        .oneshot(get(&format!("/slices/banks/{bank_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Deleting again is a 404 (session gone), not a crash
    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/sessions/{}", session.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    state.queue.stop().await;
}
