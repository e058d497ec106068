//! Slice engine
//!
//! Turns one audio file into a deterministic `SliceBank`: transient detection
//! with role-specific sensitivity, per-slice spectral analysis, and
//! click-safe zero-crossing boundaries.

use std::path::Path;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use loopforge_common::db::models::{SliceBankRecord, StemRole};
use loopforge_common::{Error, Result};

use super::analysis::{
    self, backtrack_peaks, frames_to_samples, onset_strength, peak_pick, rms_frames,
    samples_to_frames, spectral_centroid_frames, spectral_flatness_frames, stft_power,
    zero_crossing_rate_frames, PeakPickParams,
};
use super::audio::{self, DecodedAudio};

/// Working sample rate of the engine.
pub const ENGINE_SAMPLE_RATE: u32 = 44100;

/// Zero-crossing search window around a nominal boundary.
const ZC_WINDOW_MS: f64 = 5.0;

/// A single slice from an audio file.
///
/// Immutable analysis record: precise sample boundaries, spectral features,
/// and click-free playback points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slice {
    pub index: usize,
    pub start_sample: usize,
    pub end_sample: usize,
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,

    /// How hard the attack is (0-1)
    pub transient_strength: f64,
    /// Brightness in Hz
    pub spectral_centroid: f64,
    /// Loudness (0-1 normalized)
    pub rms_energy: f64,
    /// Noisiness indicator (0-1)
    pub zero_crossing_rate: f64,
    /// Noise vs tone (0=tone, 1=noise)
    pub spectral_flatness: f64,

    /// Click-free playback points
    pub zero_crossing_start: usize,
    pub zero_crossing_end: usize,

    #[serde(default)]
    pub pitch_hz: Option<f64>,
    #[serde(default)]
    pub note_name: Option<String>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

/// Attribute weighting slice selection in probability-driven modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightBy {
    Energy,
    Transient,
    Brightness,
    Uniform,
}

/// A collection of slices from a single audio source.
///
/// The fundamental unit the trigger engine operates on. Slices are ordered by
/// start sample and contiguous in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SliceBank {
    pub id: Uuid,
    pub source_path: String,
    pub source_filename: String,
    pub role: StemRole,
    pub slices: Vec<Slice>,

    pub sample_rate: u32,
    pub total_duration: f64,
    pub total_samples: usize,
    pub bpm: Option<f64>,
    pub key: Option<String>,

    // Statistics for weighted selection
    pub mean_energy: f64,
    pub max_energy: f64,
    pub energy_variance: f64,
}

impl SliceBank {
    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    /// Get slice by index, wrapping for continuous triggering.
    pub fn slice(&self, index: usize) -> Result<&Slice> {
        if self.slices.is_empty() {
            return Err(Error::BadInput("slice bank is empty".to_string()));
        }
        Ok(&self.slices[index % self.slices.len()])
    }

    /// The slice containing a time position, if any.
    pub fn slice_at_time(&self, time: f64) -> Option<&Slice> {
        self.slices
            .iter()
            .find(|s| s.start_time <= time && time < s.end_time)
    }

    /// Slices with energy inside `[min_energy, max_energy]`.
    pub fn slices_by_energy(&self, min_energy: f64, max_energy: f64) -> Vec<&Slice> {
        self.slices
            .iter()
            .filter(|s| (min_energy..=max_energy).contains(&s.rms_energy))
            .collect()
    }

    /// Pick a slice index with probability weighted by an attribute.
    ///
    /// Cumulative-sum sampling against the caller's PRNG; temperatures below
    /// 1.0 bias toward high-weight slices, above spread the distribution out.
    pub fn weighted_index(
        &self,
        weight_by: WeightBy,
        temperature: f64,
        rng: &mut StdRng,
    ) -> Result<usize> {
        if self.slices.is_empty() {
            return Err(Error::BadInput("slice bank is empty".to_string()));
        }

        if weight_by == WeightBy::Uniform {
            return Ok(rng.gen_range(0..self.slices.len()));
        }

        let raw: Vec<f64> = self
            .slices
            .iter()
            .map(|s| match weight_by {
                WeightBy::Energy => s.rms_energy,
                WeightBy::Transient => s.transient_strength,
                WeightBy::Brightness => s.spectral_centroid / 10_000.0,
                WeightBy::Uniform => 1.0,
            })
            .collect();

        let exponent = 1.0 / temperature.max(0.01);
        let weights: Vec<f64> = raw.iter().map(|w| w.max(0.0).powf(exponent)).collect();
        let total: f64 = weights.iter().sum::<f64>() + 1e-8;

        let roll: f64 = rng.gen();
        let mut cumulative = 0.0;
        for (i, w) in weights.iter().enumerate() {
            cumulative += w / total;
            if roll <= cumulative {
                return Ok(i);
            }
        }
        Ok(self.slices.len() - 1)
    }

    /// Convert to the persisted row form.
    pub fn to_record(&self, session_id: Uuid) -> Result<SliceBankRecord> {
        Ok(SliceBankRecord {
            id: self.id,
            session_id,
            source_path: self.source_path.clone(),
            source_filename: self.source_filename.clone(),
            stem_role: self.role,
            sample_rate: self.sample_rate,
            total_samples: self.total_samples as i64,
            total_duration: self.total_duration,
            bpm: self.bpm,
            key: self.key.clone(),
            mean_energy: self.mean_energy,
            max_energy: self.max_energy,
            energy_variance: self.energy_variance,
            slice_data: serde_json::to_value(&self.slices)
                .map_err(|e| Error::Internal(e.to_string()))?,
            created_at: Utc::now(),
        })
    }

    /// Reload from the persisted row form.
    pub fn from_record(record: &SliceBankRecord) -> Result<Self> {
        let slices: Vec<Slice> = serde_json::from_value(record.slice_data.clone())
            .map_err(|e| Error::Internal(format!("bad slice_data: {e}")))?;
        Ok(Self {
            id: record.id,
            source_path: record.source_path.clone(),
            source_filename: record.source_filename.clone(),
            role: record.stem_role,
            slices,
            sample_rate: record.sample_rate,
            total_duration: record.total_duration,
            total_samples: record.total_samples as usize,
            bpm: record.bpm,
            key: record.key.clone(),
            mean_energy: record.mean_energy,
            max_energy: record.max_energy,
            energy_variance: record.energy_variance,
        })
    }
}

/// Role-specific onset detection parameters.
struct RoleParams {
    delta: f32,
    wait: usize,
    min_slice_ms: f64,
}

fn role_params(role: StemRole) -> RoleParams {
    match role {
        StemRole::Drums => RoleParams {
            delta: 0.05,
            wait: 5,
            min_slice_ms: 50.0,
        },
        StemRole::Bass => RoleParams {
            delta: 0.10,
            wait: 20,
            min_slice_ms: 100.0,
        },
        StemRole::Vocals => RoleParams {
            delta: 0.15,
            wait: 30,
            min_slice_ms: 200.0,
        },
        StemRole::Other | StemRole::Unknown => RoleParams {
            delta: 0.08,
            wait: 15,
            min_slice_ms: 80.0,
        },
    }
}

/// The core engine for slicing audio files.
pub struct SliceEngine {
    sample_rate: u32,
}

impl Default for SliceEngine {
    fn default() -> Self {
        Self::new(ENGINE_SAMPLE_RATE)
    }
}

impl SliceEngine {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    /// Create a SliceBank from an audio file. Main entry point for slicing.
    pub fn create_slice_bank(
        &self,
        audio_path: &Path,
        role: StemRole,
        bpm: Option<f64>,
        key: Option<String>,
        min_slices: usize,
        max_slices: usize,
    ) -> Result<SliceBank> {
        let audio = audio::decode_audio_file(audio_path, self.sample_rate, None)?;
        let filename = audio_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        let mut bank = self.slice_decoded(&audio, role, min_slices, max_slices)?;
        bank.source_path = audio_path.display().to_string();
        bank.source_filename = filename;
        bank.bpm = bpm;
        bank.key = key;
        Ok(bank)
    }

    /// Slice already-decoded audio (the path-less core of the engine).
    pub fn slice_decoded(
        &self,
        audio: &DecodedAudio,
        role: StemRole,
        min_slices: usize,
        max_slices: usize,
    ) -> Result<SliceBank> {
        let mono = audio.to_mono();
        let total_samples = mono.len();
        let total_duration = total_samples as f64 / self.sample_rate as f64;

        let envelope = onset_strength(&mono, self.sample_rate, None, false);
        let mut onsets = self.detect_onsets(&mono, &envelope, role);

        // Count guardrails
        if onsets.len() < min_slices {
            onsets = even_grid(total_samples, min_slices);
        } else if onsets.len() > max_slices {
            onsets = strongest_onsets(&onsets, &envelope, max_slices);
        }

        // Segment: slice i covers [onset_i, onset_{i+1}), last runs to EOF
        let mut slices = Vec::with_capacity(onsets.len());
        for (i, &start) in onsets.iter().enumerate() {
            let end = if i + 1 < onsets.len() {
                onsets[i + 1]
            } else {
                total_samples
            };

            let zc_start = find_zero_crossing(&mono, start, self.sample_rate);
            let zc_end = find_zero_crossing(&mono, end, self.sample_rate);
            let features = self.analyze_chunk(&mono[start..end]);

            slices.push(Slice {
                index: i,
                start_sample: start,
                end_sample: end,
                start_time: start as f64 / self.sample_rate as f64,
                end_time: end as f64 / self.sample_rate as f64,
                duration: (end - start) as f64 / self.sample_rate as f64,
                transient_strength: features.transient_strength,
                spectral_centroid: features.spectral_centroid,
                rms_energy: features.rms_energy,
                zero_crossing_rate: features.zero_crossing_rate,
                spectral_flatness: features.spectral_flatness,
                zero_crossing_start: zc_start,
                zero_crossing_end: zc_end,
                pitch_hz: None,
                note_name: None,
                embedding: None,
            });
        }

        let energies: Vec<f64> = slices.iter().map(|s| s.rms_energy).collect();
        let mean_energy = if energies.is_empty() {
            0.0
        } else {
            energies.iter().sum::<f64>() / energies.len() as f64
        };
        let max_energy = energies.iter().cloned().fold(0.0, f64::max);
        let energy_variance = if energies.is_empty() {
            0.0
        } else {
            energies
                .iter()
                .map(|e| (e - mean_energy).powi(2))
                .sum::<f64>()
                / energies.len() as f64
        };

        Ok(SliceBank {
            id: Uuid::new_v4(),
            source_path: String::new(),
            source_filename: String::new(),
            role,
            slices,
            sample_rate: self.sample_rate,
            total_duration,
            total_samples,
            bpm: None,
            key: None,
            mean_energy,
            max_energy,
            energy_variance,
        })
    }

    /// Detect onset positions (in samples), combining the broadband envelope
    /// with a high-frequency-emphasized pass, then enforcing the role's
    /// minimum slice spacing.
    fn detect_onsets(&self, mono: &[f32], envelope: &[f32], role: StemRole) -> Vec<usize> {
        let params = role_params(role);

        let broadband = PeakPickParams {
            delta: params.delta,
            wait: params.wait,
            ..Default::default()
        };
        let peaks_1 = backtrack_peaks(&peak_pick(envelope, &broadband), envelope);

        // High-frequency pass catches hats/cymbals the broadband pass smears
        let envelope_hf = onset_strength(mono, self.sample_rate, Some(8000.0), true);
        let hf = PeakPickParams {
            delta: params.delta * 1.5,
            wait: params.wait,
            ..Default::default()
        };
        let peaks_2 = backtrack_peaks(&peak_pick(&envelope_hf, &hf), &envelope_hf);

        let mut all: Vec<usize> = peaks_1
            .iter()
            .chain(peaks_2.iter())
            .map(|&f| frames_to_samples(f))
            .collect();
        all.sort_unstable();
        all.dedup();

        // Single forward pass: keep the first onset, drop any closer than the
        // role's minimum slice length
        let min_samples = (params.min_slice_ms * self.sample_rate as f64 / 1000.0) as usize;
        let mut filtered: Vec<usize> = Vec::with_capacity(all.len());
        for onset in all {
            match filtered.last() {
                Some(&last) if onset - last < min_samples => {}
                _ => filtered.push(onset),
            }
        }
        filtered
    }

    fn analyze_chunk(&self, chunk: &[f32]) -> ChunkFeatures {
        if chunk.len() < 512 {
            return ChunkFeatures::default();
        }

        let rms_energy = analysis::mean(&rms_frames(chunk)) as f64;

        let chunk_envelope = onset_strength(chunk, self.sample_rate, None, false);
        let env_mean = analysis::mean(&chunk_envelope);
        let transient_strength = if env_mean > 0.0 {
            let env_max = chunk_envelope.iter().cloned().fold(0.0f32, f32::max);
            ((env_max / (env_mean + 1e-8)) as f64 / 10.0).min(1.0)
        } else {
            0.0
        };

        let power = stft_power(chunk);
        let spectral_centroid =
            analysis::mean(&spectral_centroid_frames(&power, self.sample_rate)) as f64;
        let spectral_flatness = analysis::mean(&spectral_flatness_frames(&power)) as f64;
        let zero_crossing_rate = analysis::mean(&zero_crossing_rate_frames(chunk)) as f64;

        ChunkFeatures {
            transient_strength,
            spectral_centroid,
            rms_energy,
            zero_crossing_rate,
            spectral_flatness,
        }
    }

    /// Export a single slice to a WAV file.
    ///
    /// With `use_zero_crossings` the click-safe boundaries are cut; a linear
    /// fade of `fade_ms` masks any residual discontinuity.
    pub fn export_slice(
        &self,
        audio_path: &Path,
        slice: &Slice,
        output_path: &Path,
        use_zero_crossings: bool,
        fade_ms: f64,
    ) -> Result<()> {
        let audio = audio::decode_audio_file(audio_path, self.sample_rate, None)?;

        let (start, end) = if use_zero_crossings {
            (slice.zero_crossing_start, slice.zero_crossing_end)
        } else {
            (slice.start_sample, slice.end_sample)
        };
        let frames = audio.num_frames();
        let start = start.min(frames);
        let end = end.min(frames);
        if start >= end {
            return Err(Error::BadInput(format!(
                "empty slice boundaries [{start}, {end})"
            )));
        }

        let mut channels: Vec<Vec<f32>> = audio
            .channels
            .iter()
            .map(|c| c[start..end].to_vec())
            .collect();

        let fade_samples = (fade_ms * self.sample_rate as f64 / 1000.0) as usize;
        let len = end - start;
        if fade_samples > 0 && len > fade_samples * 2 {
            for channel in &mut channels {
                for i in 0..fade_samples {
                    let gain = i as f32 / fade_samples as f32;
                    channel[i] *= gain;
                    channel[len - 1 - i] *= gain;
                }
            }
        }

        audio::write_wav(output_path, &channels, self.sample_rate)
    }
}

#[derive(Default)]
struct ChunkFeatures {
    transient_strength: f64,
    spectral_centroid: f64,
    rms_energy: f64,
    zero_crossing_rate: f64,
    spectral_flatness: f64,
}

/// Evenly spaced onsets covering `[0, total_samples)`.
fn even_grid(total_samples: usize, num_slices: usize) -> Vec<usize> {
    if num_slices == 0 || total_samples == 0 {
        return Vec::new();
    }
    (0..num_slices)
        .map(|i| i * total_samples / num_slices)
        .collect()
}

/// Keep the `max_slices` onsets with the strongest envelope values,
/// re-sorted into time order.
fn strongest_onsets(onsets: &[usize], envelope: &[f32], max_slices: usize) -> Vec<usize> {
    let mut ranked: Vec<(usize, f32)> = onsets
        .iter()
        .map(|&onset| {
            let frame = samples_to_frames(onset);
            let strength = envelope.get(frame).copied().unwrap_or(0.0);
            (onset, strength)
        })
        .collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(max_slices);

    let mut kept: Vec<usize> = ranked.into_iter().map(|(onset, _)| onset).collect();
    kept.sort_unstable();
    kept
}

/// Find the zero crossing nearest to `position` within a ±5 ms window.
///
/// Returns `position` unchanged when the window contains no sign change.
pub fn find_zero_crossing(mono: &[f32], position: usize, sample_rate: u32) -> usize {
    let window = (ZC_WINDOW_MS * sample_rate as f64 / 1000.0) as usize;
    let start = position.saturating_sub(window);
    let end = (position + window).min(mono.len());
    if start + 1 >= end {
        return position;
    }

    let mut best: Option<usize> = None;
    let mut best_distance = usize::MAX;
    for i in start..end - 1 {
        let crosses = (mono[i] >= 0.0) != (mono[i + 1] >= 0.0);
        if crosses {
            let distance = i.abs_diff(position);
            if distance < best_distance {
                best_distance = distance;
                best = Some(i);
            }
        }
    }
    best.unwrap_or(position)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn write_fixture(path: &Path, mono: &[f32], sample_rate: u32) {
        audio::write_wav(path, &[mono.to_vec(), mono.to_vec()], sample_rate).unwrap();
    }

    /// Percussive fixture: decaying noise bursts every `interval` seconds.
    fn percussive_signal(sample_rate: u32, interval: f32, seconds: f32) -> Vec<f32> {
        let total = (seconds * sample_rate as f32) as usize;
        let step = (interval * sample_rate as f32) as usize;
        let mut signal = vec![0.0f32; total];
        let mut pos = 0;
        while pos < total {
            for i in 0..2048.min(total - pos) {
                let t = i as f32 / sample_rate as f32;
                let pseudo = ((i as f32 * 12.9898).sin() * 43758.547).fract();
                signal[pos + i] = (pseudo * 2.0 - 1.0) * 0.8 * (-t * 80.0).exp();
            }
            pos += step;
        }
        signal
    }

    fn drum_bank(dir: &Path) -> SliceBank {
        let path = dir.join("drums.wav");
        write_fixture(&path, &percussive_signal(ENGINE_SAMPLE_RATE, 0.5, 4.0), ENGINE_SAMPLE_RATE);
        SliceEngine::default()
            .create_slice_bank(&path, StemRole::Drums, Some(120.0), None, 4, 128)
            .unwrap()
    }

    #[test]
    fn test_slices_are_sorted_and_contiguous() {
        let dir = tempfile::tempdir().unwrap();
        let bank = drum_bank(dir.path());

        assert!(bank.len() >= 4);
        for pair in bank.slices.windows(2) {
            assert_eq!(pair[0].end_sample, pair[1].start_sample);
            assert!(pair[0].start_sample < pair[1].start_sample);
        }
        let last = bank.slices.last().unwrap();
        assert_eq!(last.end_sample, bank.total_samples);
    }

    #[test]
    fn test_zero_crossings_stay_within_window() {
        let dir = tempfile::tempdir().unwrap();
        let bank = drum_bank(dir.path());
        let max_offset = (0.005 * bank.sample_rate as f64).ceil() as usize;

        for slice in &bank.slices {
            assert!(slice.zero_crossing_start.abs_diff(slice.start_sample) <= max_offset);
            assert!(slice.zero_crossing_end.abs_diff(slice.end_sample) <= max_offset);
        }
    }

    #[test]
    fn test_energies_normalized_and_aggregated() {
        let dir = tempfile::tempdir().unwrap();
        let bank = drum_bank(dir.path());

        for slice in &bank.slices {
            assert!((0.0..=1.0).contains(&slice.rms_energy));
            assert!((0.0..=1.0).contains(&slice.transient_strength));
            assert!((0.0..=1.0).contains(&slice.spectral_flatness));
        }
        assert!(bank.mean_energy <= bank.max_energy);
        assert!(bank.energy_variance >= 0.0);
    }

    #[test]
    fn test_silent_input_falls_back_to_grid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("silence.wav");
        write_fixture(&path, &vec![0.0; ENGINE_SAMPLE_RATE as usize], ENGINE_SAMPLE_RATE);

        let bank = SliceEngine::default()
            .create_slice_bank(&path, StemRole::Other, None, None, 4, 128)
            .unwrap();

        assert_eq!(bank.len(), 4);
        for slice in &bank.slices {
            assert_eq!(slice.rms_energy, 0.0);
            assert_eq!(slice.transient_strength, 0.0);
        }
        // Grid slices are equal-sized quarters of the file
        assert_eq!(bank.slices[0].start_sample, 0);
        assert_eq!(bank.slices[1].start_sample, bank.total_samples / 4);
    }

    #[test]
    fn test_max_slices_keeps_strongest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("busy.wav");
        write_fixture(&path, &percussive_signal(ENGINE_SAMPLE_RATE, 0.12, 6.0), ENGINE_SAMPLE_RATE);

        let bank = SliceEngine::default()
            .create_slice_bank(&path, StemRole::Drums, None, None, 4, 8)
            .unwrap();
        assert!(bank.len() <= 8);
        // Still ordered after the strength ranking
        for pair in bank.slices.windows(2) {
            assert!(pair[0].start_sample < pair[1].start_sample);
        }
    }

    #[test]
    fn test_bank_record_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let bank = drum_bank(dir.path());

        let record = bank.to_record(Uuid::new_v4()).unwrap();
        let reloaded = SliceBank::from_record(&record).unwrap();

        assert_eq!(reloaded.len(), bank.len());
        assert_eq!(reloaded.role, bank.role);
        for (a, b) in reloaded.slices.iter().zip(&bank.slices) {
            assert_eq!(a.start_sample, b.start_sample);
            assert_eq!(a.end_sample, b.end_sample);
            assert!((a.rms_energy - b.rms_energy).abs() < 1e-6);
            assert!((a.spectral_centroid - b.spectral_centroid).abs() < 1e-6);
        }
    }

    #[test]
    fn test_export_slice_cuts_zero_crossing_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drums.wav");
        write_fixture(&path, &percussive_signal(ENGINE_SAMPLE_RATE, 0.5, 4.0), ENGINE_SAMPLE_RATE);

        let engine = SliceEngine::default();
        let bank = engine
            .create_slice_bank(&path, StemRole::Drums, None, None, 4, 128)
            .unwrap();
        let slice = &bank.slices[1];

        let out = dir.path().join("slice.wav");
        engine.export_slice(&path, slice, &out, true, 0.0).unwrap();

        let exported = audio::decode_audio_file(&out, ENGINE_SAMPLE_RATE, None).unwrap();
        assert_eq!(
            exported.num_frames(),
            slice.zero_crossing_end - slice.zero_crossing_start
        );
    }

    #[test]
    fn test_find_zero_crossing_picks_nearest() {
        // Sign change at index 9/10 and 19/20; position 12 should snap to 9
        let mut signal = vec![1.0f32; 30];
        for s in signal.iter_mut().take(20).skip(10) {
            *s = -1.0;
        }
        let zc = find_zero_crossing(&signal, 12, 44100);
        assert_eq!(zc, 9);
    }

    #[test]
    fn test_find_zero_crossing_no_crossing_keeps_position() {
        let signal = vec![1.0f32; 1000];
        assert_eq!(find_zero_crossing(&signal, 500, 44100), 500);
    }

    #[test]
    fn test_weighted_index_is_seed_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let bank = drum_bank(dir.path());

        let picks_a: Vec<usize> = {
            let mut rng = StdRng::seed_from_u64(7);
            (0..32)
                .map(|_| bank.weighted_index(WeightBy::Energy, 1.0, &mut rng).unwrap())
                .collect()
        };
        let picks_b: Vec<usize> = {
            let mut rng = StdRng::seed_from_u64(7);
            (0..32)
                .map(|_| bank.weighted_index(WeightBy::Energy, 1.0, &mut rng).unwrap())
                .collect()
        };
        assert_eq!(picks_a, picks_b);
        assert!(picks_a.iter().all(|&i| i < bank.len()));
    }
}
