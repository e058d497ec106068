//! Job workers
//!
//! Processor functions for each job type: the actual work units that run on
//! background threads. Registered against the queue at startup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::Utc;
use uuid::Uuid;

use loopforge_common::db::models::{Asset, JobType, StemRole};
use loopforge_common::db::{assets, sessions, slice_banks};
use loopforge_common::events::{ForgeEvent, SliceBankCreatedData};
use loopforge_common::{Error, Result};

use crate::engines::analysis::{estimate_key, estimate_tempo, onset_strength};
use crate::engines::audio::{decode_audio_file, probe_duration};
use crate::engines::slice::{SliceEngine, ENGINE_SAMPLE_RATE};
use crate::moments::{detect_moments, DetectionBias};
use crate::queue::{JobContext, JobQueue, OutputPaths, ProgressHandle};

/// Sample rate for the cheap estimation passes (tempo/key/moments).
const ANALYSIS_SAMPLE_RATE: u32 = 22050;
/// How much audio the estimators look at on long files.
const ANALYSIS_WINDOW_SECONDS: f64 = 60.0;

const STEM_NAMES: [&str; 4] = ["drums", "bass", "vocals", "other"];

/// Register every processor with the queue.
pub fn register_all(queue: &JobQueue) {
    queue.register(JobType::Separation, process_separation);
    queue.register(JobType::Analysis, process_analysis);
    queue.register(JobType::Slicing, process_slicing);
    queue.register(JobType::Moments, process_moments);
    queue.register(JobType::StemAnalysis, process_stem_analysis);
    queue.register(JobType::Peaks, process_peaks);
}

fn require_input(ctx: &JobContext) -> Result<PathBuf> {
    let input = ctx
        .input_path
        .as_deref()
        .ok_or_else(|| Error::BadInput("job has no input path".to_string()))?;
    let path = PathBuf::from(input);
    if !path.exists() {
        return Err(Error::NotFound(format!("input file not found: {input}")));
    }
    Ok(path)
}

/// SEPARATION: split the source into stems.
///
/// Quick mode copies the source as every stem so the full pipeline can be
/// exercised without the separator model. The separator itself is an external
/// collaborator; without quick mode its absence is a dependency error.
fn process_separation(ctx: &JobContext, progress: &ProgressHandle) -> Result<OutputPaths> {
    let input_path = require_input(ctx)?;

    if !ctx.quick_mode {
        return Err(Error::DependencyMissing(
            "stem separator model unavailable (set LOOPFORGE_QUICK_MODE=1 to copy the source as stems)"
                .to_string(),
        ));
    }

    progress.update(10.0, "Quick mode: copying as stems...")?;
    let mut output_paths = OutputPaths::new();

    for (i, stem_name) in STEM_NAMES.iter().enumerate() {
        progress.update(20.0 + 15.0 * i as f64, &format!("Creating {stem_name}..."))?;

        // save_stem moves its source, so stage a copy through the cache
        let staging = ctx
            .storage
            .cache_path(&format!("{}-{stem_name}", ctx.id), ".wav")?;
        std::fs::copy(&input_path, &staging)?;
        let final_path = ctx.storage.save_stem(ctx.session_id, stem_name, &staging)?;
        output_paths.insert(stem_name.to_string(), final_path.display().to_string());

        let asset = Asset::stem(
            ctx.session_id,
            format!("{stem_name}.wav"),
            final_path.display().to_string(),
            StemRole::from_stem_name(stem_name),
        );
        ctx.block_on(assets::insert(&ctx.pool, &asset))?;
    }

    progress.update(95.0, "Queueing stem analysis...")?;
    ctx.enqueue_followup(JobType::StemAnalysis, None, serde_json::json!({}));

    progress.update(100.0, "Quick mode complete")?;
    Ok(output_paths)
}

/// ANALYSIS: estimate BPM, key and duration for the session source.
fn process_analysis(ctx: &JobContext, progress: &ProgressHandle) -> Result<OutputPaths> {
    let input_path = require_input(ctx)?;

    progress.update(10.0, "Loading audio...")?;
    // A short excerpt is enough for stable tempo/key estimation and keeps
    // long uploads inside the analysis time budget
    let audio = decode_audio_file(&input_path, ANALYSIS_SAMPLE_RATE, Some(ANALYSIS_WINDOW_SECONDS))?;
    let mono = audio.to_mono();

    let duration = match probe_duration(&input_path)? {
        Some(duration) => duration,
        None => audio.duration_seconds(),
    };

    progress.update(30.0, "Detecting tempo...")?;
    let envelope = onset_strength(&mono, ANALYSIS_SAMPLE_RATE, None, false);
    let bpm = estimate_tempo(&envelope, ANALYSIS_SAMPLE_RATE);

    progress.update(60.0, "Detecting key...")?;
    let key = estimate_key(&mono, ANALYSIS_SAMPLE_RATE);
    let (key_name, _confidence) = match &key {
        Some(estimate) => (estimate.full_key.clone(), estimate.confidence),
        None => ("Unknown".to_string(), 0.0),
    };

    ctx.block_on(sessions::update_analysis(
        &ctx.pool,
        ctx.session_id,
        Some(duration),
        bpm,
        Some(&key_name),
    ))?;
    ctx.event_bus.emit(ForgeEvent::SessionUpdated {
        session_id: ctx.session_id,
        data: serde_json::json!({
            "bpm": bpm,
            "key": key_name,
            "duration_seconds": duration,
        }),
        timestamp: Utc::now(),
    });

    progress.update(100.0, "Analysis complete")?;

    let mut outputs = OutputPaths::new();
    if let Some(bpm) = bpm {
        outputs.insert("bpm".to_string(), format!("{bpm:.1}"));
    }
    outputs.insert("key".to_string(), key_name);
    outputs.insert("duration".to_string(), format!("{duration:.3}"));
    Ok(outputs)
}

/// SLICING: detect transients and persist a slice bank.
fn process_slicing(ctx: &JobContext, progress: &ProgressHandle) -> Result<OutputPaths> {
    let input_path = require_input(ctx)?;

    let role = ctx
        .config
        .get("role")
        .and_then(|r| r.as_str())
        .and_then(|r| r.parse().ok())
        .unwrap_or(StemRole::Unknown);
    let bpm = ctx.config.get("bpm").and_then(|b| b.as_f64());
    let key = ctx
        .config
        .get("key")
        .and_then(|k| k.as_str())
        .map(str::to_string);
    let min_slices = ctx
        .config
        .get("min_slices")
        .and_then(|v| v.as_u64())
        .unwrap_or(4) as usize;
    let max_slices = ctx
        .config
        .get("max_slices")
        .and_then(|v| v.as_u64())
        .unwrap_or(128) as usize;

    progress.update(10.0, "Loading audio...")?;
    let engine = SliceEngine::default();

    progress.update(20.0, "Detecting transients...")?;
    let bank = engine.create_slice_bank(&input_path, role, bpm, key, min_slices, max_slices)?;

    progress.update(80.0, "Saving slice bank...")?;
    let record = bank.to_record(ctx.session_id)?;
    ctx.block_on(slice_banks::insert_bank(&ctx.pool, &record))?;

    ctx.event_bus.emit(ForgeEvent::SliceBankCreated {
        session_id: ctx.session_id,
        data: SliceBankCreatedData {
            slice_bank_id: bank.id,
            num_slices: bank.len(),
            role: bank.role.to_string(),
        },
        timestamp: Utc::now(),
    });

    progress.update(100.0, "Slicing complete")?;

    Ok(OutputPaths::from([
        ("slice_bank_id".to_string(), bank.id.to_string()),
        ("num_slices".to_string(), bank.len().to_string()),
        ("total_duration".to_string(), format!("{:.3}", bank.total_duration)),
    ]))
}

/// MOMENTS: detect interesting regions (hits, phrases, textures, changes).
fn process_moments(ctx: &JobContext, progress: &ProgressHandle) -> Result<OutputPaths> {
    let input_path = require_input(ctx)?;
    let bias = ctx
        .config
        .get("bias")
        .and_then(|b| b.as_str())
        .map(DetectionBias::from_str_lossy)
        .unwrap_or(DetectionBias::Balanced);

    progress.update(10.0, "Analyzing audio structure...")?;
    let audio = decode_audio_file(&input_path, ANALYSIS_SAMPLE_RATE, None)?;
    let mono = audio.to_mono();

    progress.update(50.0, "Classifying moments...")?;
    let moments = detect_moments(&mono, ANALYSIS_SAMPLE_RATE, bias)?;

    progress.update(80.0, "Saving moments...")?;
    let moments_path = ctx.storage.cache_path(&format!("moments-{}", ctx.id), ".json")?;
    let payload = serde_json::to_string_pretty(&moments)
        .map_err(|e| Error::Internal(e.to_string()))?;
    std::fs::write(&moments_path, payload)?;

    progress.update(100.0, "Moments detection complete")?;

    Ok(OutputPaths::from([
        ("moments_path".to_string(), moments_path.display().to_string()),
        ("moments_count".to_string(), moments.len().to_string()),
    ]))
}

/// STEM_ANALYSIS: estimate key/bpm for every stem asset of the session.
fn process_stem_analysis(ctx: &JobContext, progress: &ProgressHandle) -> Result<OutputPaths> {
    progress.update(5.0, "Loading stems...")?;
    let stems = ctx.block_on(assets::list_by_type(&ctx.pool, ctx.session_id, "stem"))?;

    if stems.is_empty() {
        progress.update(100.0, "No stems to analyze")?;
        return Ok(OutputPaths::from([(
            "stems_analyzed".to_string(),
            "0".to_string(),
        )]));
    }

    let total = stems.len();
    let mut analyzed = 0usize;

    for (i, stem) in stems.iter().enumerate() {
        let role = stem
            .stem_role
            .map(|r| r.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        progress.update(
            10.0 + 80.0 * i as f64 / total as f64,
            &format!("Analyzing {role} stem..."),
        )?;

        let path = Path::new(&stem.file_path);
        if !path.exists() {
            tracing::warn!(path = %stem.file_path, "Stem file missing, skipping analysis");
            continue;
        }

        let audio = match decode_audio_file(path, ANALYSIS_SAMPLE_RATE, Some(ANALYSIS_WINDOW_SECONDS)) {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(path = %stem.file_path, error = %e, "Stem decode failed");
                continue;
            }
        };
        let mono = audio.to_mono();

        let envelope = onset_strength(&mono, ANALYSIS_SAMPLE_RATE, None, false);
        let bpm = estimate_tempo(&envelope, ANALYSIS_SAMPLE_RATE);
        let key = estimate_key(&mono, ANALYSIS_SAMPLE_RATE);

        ctx.block_on(assets::update_analysis(
            &ctx.pool,
            stem.id,
            key.as_ref().map(|k| k.full_key.as_str()),
            bpm,
            key.as_ref().map(|k| k.confidence),
        ))?;
        analyzed += 1;
    }

    progress.update(100.0, "Stem analysis complete")?;

    Ok(OutputPaths::from([(
        "stems_analyzed".to_string(),
        analyzed.to_string(),
    )]))
}

/// PEAKS: generate waveform peaks with the external `audiowaveform` tool.
fn process_peaks(ctx: &JobContext, progress: &ProgressHandle) -> Result<OutputPaths> {
    let input_path = require_input(ctx)?;
    let output_path = input_path.with_extension("dat");

    if output_path.exists() {
        progress.update(100.0, "Peaks already generated")?;
        return Ok(OutputPaths::from([(
            "peaks_path".to_string(),
            output_path.display().to_string(),
        )]));
    }

    progress.update(20.0, "Generating waveform peaks...")?;

    let output = Command::new("audiowaveform")
        .arg("-i")
        .arg(&input_path)
        .arg("-o")
        .arg(&output_path)
        .arg("-b")
        .arg("8")
        .output()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::DependencyMissing("audiowaveform not installed".to_string())
            } else {
                Error::Io(e)
            }
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Internal(format!("peak generation failed: {stderr}")));
    }

    progress.update(100.0, "Peaks generation complete")?;

    Ok(OutputPaths::from([(
        "peaks_path".to_string(),
        output_path.display().to_string(),
    )]))
}

/// Export every slice of a bank to its own WAV under the storage tree.
///
/// Used by the slices API; runs inline because slice cutting is cheap
/// relative to the jobs above.
pub fn export_bank_slices(
    storage: &loopforge_common::Storage,
    bank: &crate::engines::slice::SliceBank,
    session_id: Uuid,
) -> Result<Vec<PathBuf>> {
    let engine = SliceEngine::new(ENGINE_SAMPLE_RATE);
    let source = Path::new(&bank.source_path);
    let mut exported = Vec::with_capacity(bank.len());

    for slice in &bank.slices {
        let staging = storage.cache_path(&format!("{}-{:04}", bank.id, slice.index), ".wav")?;
        engine.export_slice(source, slice, &staging, true, 2.0)?;
        let final_path = storage.save_slice(session_id, bank.id, slice.index, &staging)?;
        exported.push(final_path);
    }
    Ok(exported)
}
