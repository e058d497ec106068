//! Spectral analysis primitives
//!
//! STFT-based feature extraction used by the slice engine, the moments
//! detector and the analysis job: onset strength envelopes (spectral flux on
//! a mel filterbank), peak picking, per-frame features, and the tempo / key
//! estimators.
//!
//! Conventions: n_fft 2048, hop 512, Hann window, frames left-aligned (frame
//! `i` covers samples `[i*hop, i*hop + n_fft)`).

use realfft::RealFftPlanner;

pub const N_FFT: usize = 2048;
pub const HOP_LENGTH: usize = 512;
const N_MELS: usize = 128;

/// Power spectrogram: frames × (N_FFT/2 + 1) bins.
pub fn stft_power(mono: &[f32]) -> Vec<Vec<f32>> {
    if mono.len() < N_FFT {
        return Vec::new();
    }

    let mut planner = RealFftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(N_FFT);
    let mut input = fft.make_input_vec();
    let mut output = fft.make_output_vec();

    let window: Vec<f32> = (0..N_FFT)
        .map(|i| {
            let phase = 2.0 * std::f32::consts::PI * i as f32 / N_FFT as f32;
            0.5 * (1.0 - phase.cos())
        })
        .collect();

    let num_frames = (mono.len() - N_FFT) / HOP_LENGTH + 1;
    let mut frames = Vec::with_capacity(num_frames);

    for frame_idx in 0..num_frames {
        let start = frame_idx * HOP_LENGTH;
        for (i, sample) in input.iter_mut().enumerate() {
            *sample = mono[start + i] * window[i];
        }
        // realfft only fails on malformed buffer lengths, which are fixed here
        fft.process(&mut input, &mut output).expect("fft buffers sized by planner");

        frames.push(output.iter().map(|c| c.norm_sqr()).collect());
    }

    frames
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// Triangular mel filterbank: `n_mels` filters as (bin, weight) lists.
fn mel_filterbank(sample_rate: u32, n_mels: usize, fmax: f32) -> Vec<Vec<(usize, f32)>> {
    let n_bins = N_FFT / 2 + 1;
    let bin_hz = sample_rate as f32 / N_FFT as f32;

    let mel_min = 0.0;
    let mel_max = hz_to_mel(fmax);
    let mel_points: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32))
        .collect();

    let mut filters = Vec::with_capacity(n_mels);
    for m in 0..n_mels {
        let (lower, center, upper) = (mel_points[m], mel_points[m + 1], mel_points[m + 2]);
        let mut filter = Vec::new();
        for bin in 0..n_bins {
            let freq = bin as f32 * bin_hz;
            let weight = if freq > lower && freq < center {
                (freq - lower) / (center - lower)
            } else if freq >= center && freq < upper {
                (upper - freq) / (upper - center)
            } else {
                continue;
            };
            if weight > 0.0 {
                filter.push((bin, weight));
            }
        }
        filters.push(filter);
    }
    filters
}

/// Onset strength envelope: spectral flux on a log-power mel spectrogram.
///
/// `fmax` caps the mel range (the high-frequency variant uses 8 kHz);
/// `median_aggregate` switches the across-band statistic from mean to median.
pub fn onset_strength(
    mono: &[f32],
    sample_rate: u32,
    fmax: Option<f32>,
    median_aggregate: bool,
) -> Vec<f32> {
    let power = stft_power(mono);
    if power.is_empty() {
        return Vec::new();
    }

    let ceiling = fmax.unwrap_or(sample_rate as f32 / 2.0);
    let filters = mel_filterbank(sample_rate, N_MELS, ceiling);

    // Log-power mel spectrogram
    let mel_frames: Vec<Vec<f32>> = power
        .iter()
        .map(|frame| {
            filters
                .iter()
                .map(|filter| {
                    let energy: f32 = filter.iter().map(|&(bin, w)| frame[bin] * w).sum();
                    (1.0 + energy).ln()
                })
                .collect()
        })
        .collect();

    // Positive first difference per band, aggregated across bands
    let mut envelope = vec![0.0f32; mel_frames.len()];
    for i in 1..mel_frames.len() {
        let mut fluxes: Vec<f32> = mel_frames[i]
            .iter()
            .zip(&mel_frames[i - 1])
            .map(|(cur, prev)| (cur - prev).max(0.0))
            .collect();

        envelope[i] = if median_aggregate {
            fluxes.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let mid = fluxes.len() / 2;
            if fluxes.len() % 2 == 0 {
                (fluxes[mid - 1] + fluxes[mid]) / 2.0
            } else {
                fluxes[mid]
            }
        } else {
            fluxes.iter().sum::<f32>() / fluxes.len() as f32
        };
    }
    envelope
}

/// Peak-picking parameters (librosa-style windowed max/mean test).
#[derive(Debug, Clone, Copy)]
pub struct PeakPickParams {
    pub pre_max: usize,
    pub post_max: usize,
    pub pre_avg: usize,
    pub post_avg: usize,
    /// Threshold above the local mean (sensitivity; lower finds more peaks)
    pub delta: f32,
    /// Minimum frames between accepted peaks
    pub wait: usize,
}

impl Default for PeakPickParams {
    fn default() -> Self {
        Self {
            pre_max: 3,
            post_max: 3,
            pre_avg: 3,
            post_avg: 5,
            delta: 0.07,
            wait: 10,
        }
    }
}

/// Select frames that are local maxima above the moving average.
pub fn peak_pick(envelope: &[f32], params: &PeakPickParams) -> Vec<usize> {
    let n = envelope.len();
    let mut peaks = Vec::new();
    let mut last_peak: Option<usize> = None;

    for i in 0..n {
        let max_lo = i.saturating_sub(params.pre_max);
        let max_hi = (i + params.post_max + 1).min(n);
        let window_max = envelope[max_lo..max_hi]
            .iter()
            .cloned()
            .fold(f32::MIN, f32::max);
        if envelope[i] < window_max {
            continue;
        }

        let avg_lo = i.saturating_sub(params.pre_avg);
        let avg_hi = (i + params.post_avg + 1).min(n);
        let window_mean =
            envelope[avg_lo..avg_hi].iter().sum::<f32>() / (avg_hi - avg_lo) as f32;
        if envelope[i] < window_mean + params.delta {
            continue;
        }

        if let Some(last) = last_peak {
            if i - last <= params.wait {
                continue;
            }
        }

        peaks.push(i);
        last_peak = Some(i);
    }

    peaks
}

/// Move each peak back to the preceding local minimum of the envelope, so a
/// slice boundary lands just before the energy rise rather than on top of it.
pub fn backtrack_peaks(peaks: &[usize], envelope: &[f32]) -> Vec<usize> {
    peaks
        .iter()
        .map(|&peak| {
            let mut i = peak;
            while i > 0 && envelope[i - 1] < envelope[i] {
                i -= 1;
            }
            i
        })
        .collect()
}

/// Frame index → sample index under the module's hop convention.
pub fn frames_to_samples(frame: usize) -> usize {
    frame * HOP_LENGTH
}

pub fn samples_to_frames(sample: usize) -> usize {
    sample / HOP_LENGTH
}

/// Per-frame RMS over `N_FFT`-sized frames.
pub fn rms_frames(mono: &[f32]) -> Vec<f32> {
    if mono.len() < N_FFT {
        if mono.is_empty() {
            return Vec::new();
        }
        let mean_sq = mono.iter().map(|s| s * s).sum::<f32>() / mono.len() as f32;
        return vec![mean_sq.sqrt()];
    }
    let num_frames = (mono.len() - N_FFT) / HOP_LENGTH + 1;
    (0..num_frames)
        .map(|i| {
            let start = i * HOP_LENGTH;
            let frame = &mono[start..start + N_FFT];
            (frame.iter().map(|s| s * s).sum::<f32>() / N_FFT as f32).sqrt()
        })
        .collect()
}

/// Per-frame spectral centroid in Hz.
pub fn spectral_centroid_frames(power: &[Vec<f32>], sample_rate: u32) -> Vec<f32> {
    let bin_hz = sample_rate as f32 / N_FFT as f32;
    power
        .iter()
        .map(|frame| {
            let mut weighted = 0.0f32;
            let mut total = 0.0f32;
            for (bin, p) in frame.iter().enumerate() {
                let mag = p.sqrt();
                weighted += bin as f32 * bin_hz * mag;
                total += mag;
            }
            if total > 1e-10 {
                weighted / total
            } else {
                0.0
            }
        })
        .collect()
}

/// Per-frame spectral flatness (geometric over arithmetic mean of power).
pub fn spectral_flatness_frames(power: &[Vec<f32>]) -> Vec<f32> {
    power
        .iter()
        .map(|frame| {
            let n = frame.len() as f32;
            let log_sum: f32 = frame.iter().map(|p| (p + 1e-10).ln()).sum();
            let geo_mean = (log_sum / n).exp();
            let arith_mean = frame.iter().sum::<f32>() / n + 1e-10;
            (geo_mean / arith_mean).min(1.0)
        })
        .collect()
}

/// Per-frame zero-crossing rate (fraction of sign changes per frame).
pub fn zero_crossing_rate_frames(mono: &[f32]) -> Vec<f32> {
    if mono.len() < N_FFT {
        if mono.len() < 2 {
            return Vec::new();
        }
        let crossings = count_sign_changes(mono);
        return vec![crossings as f32 / mono.len() as f32];
    }
    let num_frames = (mono.len() - N_FFT) / HOP_LENGTH + 1;
    (0..num_frames)
        .map(|i| {
            let start = i * HOP_LENGTH;
            let frame = &mono[start..start + N_FFT];
            count_sign_changes(frame) as f32 / N_FFT as f32
        })
        .collect()
}

fn count_sign_changes(samples: &[f32]) -> usize {
    samples
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count()
}

pub fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}

/// Estimate tempo from the autocorrelation of the onset envelope.
///
/// Searches 30–300 BPM, then folds octave errors into the 70–180 range.
pub fn estimate_tempo(onset_envelope: &[f32], sample_rate: u32) -> Option<f64> {
    if onset_envelope.len() < 8 {
        return None;
    }

    let frame_rate = sample_rate as f64 / HOP_LENGTH as f64;
    let env_mean = mean(onset_envelope);
    let centered: Vec<f32> = onset_envelope.iter().map(|v| v - env_mean).collect();

    let min_lag = ((60.0 / 300.0) * frame_rate).round() as usize;
    let max_lag = (((60.0 / 30.0) * frame_rate).round() as usize).min(centered.len() - 1);
    if min_lag >= max_lag {
        return None;
    }

    let energy: f32 = centered.iter().map(|v| v * v).sum();
    if energy < 1e-10 {
        return None;
    }

    let mut best_lag = 0;
    let mut best_score = f32::MIN;
    for lag in min_lag..=max_lag {
        let score: f32 = centered[lag..]
            .iter()
            .zip(&centered[..centered.len() - lag])
            .map(|(a, b)| a * b)
            .sum();
        if score > best_score {
            best_score = score;
            best_lag = lag;
        }
    }

    if best_score <= 0.0 || best_lag == 0 {
        return None;
    }

    let mut bpm = 60.0 * frame_rate / best_lag as f64;
    while bpm < 70.0 {
        bpm *= 2.0;
    }
    while bpm > 180.0 {
        bpm /= 2.0;
    }
    Some(bpm)
}

/// Krumhansl-Schmuckler key profiles.
const MAJOR_PROFILE: [f32; 12] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];
const MINOR_PROFILE: [f32; 12] = [
    6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Detected key with a correlation-based confidence.
#[derive(Debug, Clone)]
pub struct KeyEstimate {
    /// e.g. "F#m" or "C"
    pub full_key: String,
    pub confidence: f64,
}

/// Estimate the musical key from mean chroma against the Krumhansl profiles.
pub fn estimate_key(mono: &[f32], sample_rate: u32) -> Option<KeyEstimate> {
    let power = stft_power(mono);
    if power.is_empty() {
        return None;
    }

    // Mean chroma: fold every bin's frequency onto its pitch class
    let bin_hz = sample_rate as f32 / N_FFT as f32;
    let mut chroma = [0.0f32; 12];
    for frame in &power {
        for (bin, p) in frame.iter().enumerate().skip(1) {
            let freq = bin as f32 * bin_hz;
            if !(27.5..=4200.0).contains(&freq) {
                continue;
            }
            let midi = 69.0 + 12.0 * (freq / 440.0).log2();
            let class = ((midi.round() as i32) % 12 + 12) % 12;
            chroma[class as usize] += p.sqrt();
        }
    }

    let total: f32 = chroma.iter().sum();
    if total < 1e-6 {
        return None;
    }

    let mut best: Option<(f32, usize, bool)> = None;
    for tonic in 0..12 {
        for (profile, is_minor) in [(&MAJOR_PROFILE, false), (&MINOR_PROFILE, true)] {
            let score = correlation(&chroma, profile, tonic);
            if best.map_or(true, |(s, _, _)| score > s) {
                best = Some((score, tonic, is_minor));
            }
        }
    }

    let (score, tonic, is_minor) = best?;
    let full_key = if is_minor {
        format!("{}m", NOTE_NAMES[tonic])
    } else {
        NOTE_NAMES[tonic].to_string()
    };
    Some(KeyEstimate {
        full_key,
        confidence: score.clamp(0.0, 1.0) as f64,
    })
}

/// Pearson correlation between chroma and a profile rotated to `tonic`.
fn correlation(chroma: &[f32; 12], profile: &[f32; 12], tonic: usize) -> f32 {
    let chroma_mean = chroma.iter().sum::<f32>() / 12.0;
    let profile_mean = profile.iter().sum::<f32>() / 12.0;

    let mut cov = 0.0f32;
    let mut var_c = 0.0f32;
    let mut var_p = 0.0f32;
    for i in 0..12 {
        let c = chroma[(i + tonic) % 12] - chroma_mean;
        let p = profile[i] - profile_mean;
        cov += c * p;
        var_c += c * c;
        var_p += p * p;
    }

    if var_c < 1e-10 || var_p < 1e-10 {
        0.0
    } else {
        cov / (var_c.sqrt() * var_p.sqrt())
    }
}
