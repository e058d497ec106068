//! Moments detection
//!
//! Octatrack-style region detection over long audio files: transient hits,
//! sustained tonal phrases, steady textures and energy/brightness changes.
//! Feature tracks come from the shared analysis module; thresholds are
//! percentile-based so the detector adapts to the material.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use loopforge_common::Result;

use crate::engines::analysis::{
    mean, onset_strength, peak_pick, rms_frames, spectral_centroid_frames,
    spectral_flatness_frames, stft_power, PeakPickParams, HOP_LENGTH,
};

const MIN_MOMENT_DURATION: f64 = 0.5;
const MAX_MOMENT_DURATION: f64 = 30.0;

/// What kind of region a moment marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MomentType {
    Hit,
    Phrase,
    Texture,
    Change,
}

impl MomentType {
    fn label(&self) -> &'static str {
        match self {
            MomentType::Hit => "Hit",
            MomentType::Phrase => "Phrase",
            MomentType::Texture => "Texture",
            MomentType::Change => "Change",
        }
    }
}

/// Which moment families to detect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionBias {
    Hits,
    Phrases,
    Textures,
    Balanced,
}

impl DetectionBias {
    pub fn from_str_lossy(bias: &str) -> Self {
        match bias {
            "hits" => DetectionBias::Hits,
            "phrases" => DetectionBias::Phrases,
            "textures" => DetectionBias::Textures,
            _ => DetectionBias::Balanced,
        }
    }
}

/// One detected region with its summary features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Moment {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub moment_type: MomentType,
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
    pub energy: f64,
    /// Centroid normalized by the sample rate
    pub brightness: f64,
    pub label: String,
    pub confidence: f64,
}

/// Detect moments in mono audio.
pub fn detect_moments(mono: &[f32], sample_rate: u32, bias: DetectionBias) -> Result<Vec<Moment>> {
    let rms = rms_frames(mono);
    let power = stft_power(mono);
    let centroid = spectral_centroid_frames(&power, sample_rate);
    let flatness = spectral_flatness_frames(&power);
    let frame_duration = HOP_LENGTH as f64 / sample_rate as f64;
    let total_duration = mono.len() as f64 / sample_rate as f64;

    let mut moments = Vec::new();

    if matches!(bias, DetectionBias::Hits | DetectionBias::Balanced) {
        moments.extend(detect_hits(
            mono,
            sample_rate,
            &rms,
            &centroid,
            frame_duration,
            total_duration,
        ));
    }
    if matches!(bias, DetectionBias::Phrases | DetectionBias::Balanced) {
        moments.extend(detect_phrases(&rms, &flatness, &centroid, sample_rate, frame_duration));
    }
    if matches!(bias, DetectionBias::Textures | DetectionBias::Balanced) {
        moments.extend(detect_textures(
            &rms,
            &centroid,
            sample_rate,
            frame_duration,
            total_duration,
        ));
    }
    moments.extend(detect_changes(&rms, &centroid, sample_rate, frame_duration));

    let mut moments = dedupe_overlapping(moments);
    moments.sort_by(|a, b| a.start_time.partial_cmp(&b.start_time).unwrap());

    for (i, moment) in moments.iter_mut().enumerate() {
        moment.label = generate_label(moment, i);
    }

    Ok(moments)
}

fn percentile(values: &[f32], p: f64) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f32> = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let rank = (p / 100.0 * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

fn detect_hits(
    mono: &[f32],
    sample_rate: u32,
    rms: &[f32],
    centroid: &[f32],
    frame_duration: f64,
    total_duration: f64,
) -> Vec<Moment> {
    let envelope = onset_strength(mono, sample_rate, None, false);
    let peaks = peak_pick(&envelope, &PeakPickParams::default());
    let max_rms = rms.iter().cloned().fold(0.0f32, f32::max);
    let strength_floor = percentile(rms, 60.0);

    let mut hits = Vec::new();
    for frame in peaks {
        if frame >= rms.len() {
            continue;
        }
        // Only keep strong transients
        let lo = frame.saturating_sub(2);
        let hi = (frame + 3).min(rms.len());
        let local_rms = mean(&rms[lo..hi]);
        if local_rms < strength_floor {
            continue;
        }

        let start_time = frame as f64 * frame_duration;
        let end_time = (start_time + MIN_MOMENT_DURATION).min(total_duration);

        hits.push(Moment {
            id: Uuid::new_v4(),
            moment_type: MomentType::Hit,
            start_time,
            end_time,
            duration: end_time - start_time,
            energy: local_rms as f64,
            brightness: centroid.get(frame).copied().unwrap_or(0.0) as f64 / sample_rate as f64,
            label: String::new(),
            confidence: (local_rms / (max_rms + 1e-6)).min(1.0) as f64,
        });
    }
    hits
}

fn detect_phrases(
    rms: &[f32],
    flatness: &[f32],
    centroid: &[f32],
    sample_rate: u32,
    frame_duration: f64,
) -> Vec<Moment> {
    // High energy + low flatness = tonal/voiced material
    let energy_threshold = percentile(rms, 40.0);
    let flatness_threshold = percentile(flatness, 60.0);

    let mut phrases = Vec::new();
    let mut phrase_start: Option<usize> = None;

    let frames = rms.len().min(flatness.len());
    for i in 0..=frames {
        let is_tonal = i < frames && rms[i] > energy_threshold && flatness[i] < flatness_threshold;

        match (is_tonal, phrase_start) {
            (true, None) => phrase_start = Some(i),
            (false, Some(start)) => {
                phrase_start = None;
                let duration = (i - start) as f64 * frame_duration;
                if !(MIN_MOMENT_DURATION..=MAX_MOMENT_DURATION).contains(&duration) {
                    continue;
                }
                phrases.push(Moment {
                    id: Uuid::new_v4(),
                    moment_type: MomentType::Phrase,
                    start_time: start as f64 * frame_duration,
                    end_time: i as f64 * frame_duration,
                    duration,
                    energy: mean(&rms[start..i]) as f64,
                    brightness: mean(&centroid[start..i.min(centroid.len())]) as f64
                        / sample_rate as f64,
                    label: String::new(),
                    confidence: 0.7,
                });
            }
            _ => {}
        }
    }
    phrases
}

fn detect_textures(
    rms: &[f32],
    centroid: &[f32],
    sample_rate: u32,
    frame_duration: f64,
    total_duration: f64,
) -> Vec<Moment> {
    // 2-second sliding window; low variance + some energy = texture
    let window = (2.0 / frame_duration) as usize;
    if rms.len() <= window || window == 0 {
        return Vec::new();
    }

    let chunk = (window / 4).max(1);
    let chunk_variances: Vec<f32> = rms
        .chunks_exact(chunk)
        .map(|c| {
            let m = mean(c);
            c.iter().map(|v| (v - m).powi(2)).sum::<f32>() / c.len() as f32
        })
        .collect();
    let variance_threshold = percentile(&chunk_variances, 30.0);
    let energy_floor = percentile(rms, 20.0);

    let mut textures = Vec::new();
    let mut i = 0usize;
    while i + window < rms.len() {
        let slice = &rms[i..i + window];
        let window_mean = mean(slice);
        let variance =
            slice.iter().map(|v| (v - window_mean).powi(2)).sum::<f32>() / slice.len() as f32;

        if variance < variance_threshold && window_mean > energy_floor {
            // Extend until the variance picks up again
            let mut end = i + window;
            while end < rms.len().saturating_sub(1) {
                let probe_hi = (end + window / 2).min(rms.len());
                let probe = &rms[end..probe_hi];
                let probe_mean = mean(probe);
                let probe_var =
                    probe.iter().map(|v| (v - probe_mean).powi(2)).sum::<f32>()
                        / probe.len().max(1) as f32;
                if probe_var > variance * 3.0 {
                    break;
                }
                end += (window / 4).max(1);
            }

            let start_time = i as f64 * frame_duration;
            let end_time = (end as f64 * frame_duration).min(total_duration);
            let duration = end_time - start_time;
            if (MIN_MOMENT_DURATION..=MAX_MOMENT_DURATION).contains(&duration) {
                textures.push(Moment {
                    id: Uuid::new_v4(),
                    moment_type: MomentType::Texture,
                    start_time,
                    end_time,
                    duration,
                    energy: window_mean as f64,
                    brightness: mean(&centroid[i..end.min(centroid.len())]) as f64
                        / sample_rate as f64,
                    label: String::new(),
                    confidence: 0.6,
                });
            }
            i = end;
        } else {
            i += window / 2;
        }
    }
    textures
}

fn detect_changes(
    rms: &[f32],
    centroid: &[f32],
    sample_rate: u32,
    frame_duration: f64,
) -> Vec<Moment> {
    if rms.len() < 2 || centroid.len() < 2 {
        return Vec::new();
    }

    let rms_delta: Vec<f32> = rms.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
    let centroid_delta: Vec<f32> = centroid.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
    let rms_max = rms_delta.iter().cloned().fold(0.0f32, f32::max) + 1e-6;
    let centroid_max = centroid_delta.iter().cloned().fold(0.0f32, f32::max) + 1e-6;

    let score: Vec<f32> = rms_delta
        .iter()
        .zip(&centroid_delta)
        .map(|(r, c)| r / rms_max * 0.6 + c / centroid_max * 0.4)
        .collect();

    let threshold = percentile(&score, 90.0);
    let min_gap = (2.0 / frame_duration) as usize;

    let mut changes = Vec::new();
    let mut last_change: Option<usize> = None;
    for (i, &s) in score.iter().enumerate() {
        if s <= threshold {
            continue;
        }
        if let Some(last) = last_change {
            if i - last <= min_gap {
                continue;
            }
        }
        let time = i as f64 * frame_duration;
        changes.push(Moment {
            id: Uuid::new_v4(),
            moment_type: MomentType::Change,
            start_time: time,
            end_time: time + 0.1,
            duration: 0.1,
            energy: rms.get(i).copied().unwrap_or(0.0) as f64,
            brightness: centroid.get(i).copied().unwrap_or(0.0) as f64 / sample_rate as f64,
            label: String::new(),
            confidence: s.min(1.0) as f64,
        });
        last_change = Some(i);
    }
    changes
}

/// Remove heavily overlapping moments of the same type, preferring higher
/// confidence.
fn dedupe_overlapping(mut moments: Vec<Moment>) -> Vec<Moment> {
    moments.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap()
            .then(a.start_time.partial_cmp(&b.start_time).unwrap())
    });

    let mut kept: Vec<Moment> = Vec::new();
    for moment in moments {
        let overlaps = kept.iter().any(|k| {
            if k.moment_type != moment.moment_type {
                return false;
            }
            let overlap = moment.end_time.min(k.end_time) - moment.start_time.max(k.start_time);
            overlap > moment.duration.min(k.duration) * 0.5
        });
        if !overlaps {
            kept.push(moment);
        }
    }
    kept
}

fn generate_label(moment: &Moment, index: usize) -> String {
    let energy_desc = if moment.energy > 0.5 {
        "loud"
    } else if moment.energy > 0.2 {
        "soft"
    } else {
        "quiet"
    };
    let brightness_desc = if moment.brightness > 0.6 {
        "bright"
    } else if moment.brightness > 0.3 {
        "warm"
    } else {
        "dark"
    };
    format!("{} {}: {}, {}", moment.moment_type.label(), index + 1, energy_desc, brightness_desc)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 44100;

    fn bursts_then_pad(seconds: f32) -> Vec<f32> {
        let total = (seconds * SR as f32) as usize;
        let mut signal = vec![0.0f32; total];
        // Loud bursts in the first half, a steady quiet bed in the second
        for burst in 0..4 {
            let pos = burst * SR as usize;
            for i in 0..4096.min(total - pos) {
                let pseudo = ((i as f32 * 12.9898).sin() * 43758.547).fract();
                signal[pos + i] = (pseudo * 2.0 - 1.0) * 0.9 * (-(i as f32) / 4000.0).exp();
            }
        }
        for (i, sample) in signal.iter_mut().enumerate().skip(total / 2) {
            *sample += (i as f32 * 110.0 * 2.0 * std::f32::consts::PI / SR as f32).sin() * 0.15;
        }
        signal
    }

    #[test]
    fn test_detects_hits_in_percussive_material() {
        let signal = bursts_then_pad(8.0);
        let moments = detect_moments(&signal, SR, DetectionBias::Hits).unwrap();

        let hits: Vec<&Moment> = moments
            .iter()
            .filter(|m| m.moment_type == MomentType::Hit)
            .collect();
        assert!(!hits.is_empty());
        for hit in hits {
            assert!(hit.confidence > 0.0 && hit.confidence <= 1.0);
            assert!(hit.duration > 0.0);
        }
    }

    #[test]
    fn test_moments_sorted_and_labeled() {
        let signal = bursts_then_pad(8.0);
        let moments = detect_moments(&signal, SR, DetectionBias::Balanced).unwrap();

        for window in moments.windows(2) {
            assert!(window[0].start_time <= window[1].start_time);
        }
        for moment in &moments {
            assert!(!moment.label.is_empty());
        }
    }

    #[test]
    fn test_silence_yields_no_hits() {
        let silence = vec![0.0f32; SR as usize * 4];
        let moments = detect_moments(&silence, SR, DetectionBias::Hits).unwrap();
        assert!(moments
            .iter()
            .all(|m| m.moment_type != MomentType::Hit));
    }

    #[test]
    fn test_bias_filters_families() {
        let signal = bursts_then_pad(8.0);
        let moments = detect_moments(&signal, SR, DetectionBias::Textures).unwrap();
        assert!(moments
            .iter()
            .all(|m| matches!(m.moment_type, MomentType::Texture | MomentType::Change)));
    }

    #[test]
    fn test_moment_serializes_with_type_tag() {
        let moment = Moment {
            id: Uuid::new_v4(),
            moment_type: MomentType::Phrase,
            start_time: 1.0,
            end_time: 2.5,
            duration: 1.5,
            energy: 0.4,
            brightness: 0.3,
            label: "Phrase 1: soft, warm".to_string(),
            confidence: 0.7,
        };
        let json = serde_json::to_value(&moment).unwrap();
        assert_eq!(json["type"], "phrase");
        assert_eq!(json["duration"], 1.5);
    }
}
