//! Audio decoding utilities
//!
//! Decodes audio files to f32 PCM at the engine's working sample rate.
//! Uses symphonia for format-agnostic decoding (MP3, FLAC, AAC, WAV, OGG) and
//! rubato when the source rate differs from the requested rate.

use std::path::Path;

use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::conv::FromSample;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample;

use loopforge_common::{Error, Result};

/// Decoded audio result
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Per-channel samples (1 or 2 channels, f32 in [-1.0, 1.0])
    pub channels: Vec<Vec<f32>>,
    /// Sample rate in Hz (after any resampling)
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn num_frames(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn duration_seconds(&self) -> f64 {
        self.num_frames() as f64 / self.sample_rate as f64
    }

    /// Fold to mono by averaging channels.
    pub fn to_mono(&self) -> Vec<f32> {
        match self.channels.len() {
            0 => Vec::new(),
            1 => self.channels[0].clone(),
            _ => {
                let frames = self.num_frames();
                let mut mono = Vec::with_capacity(frames);
                for i in 0..frames {
                    let sum: f32 = self.channels.iter().map(|c| c[i]).sum();
                    mono.push(sum / self.channels.len() as f32);
                }
                mono
            }
        }
    }
}

/// Decode an audio file to stereo f32 at `target_rate`, resampling if needed.
///
/// Mono sources are duplicated to stereo; sources with more than two channels
/// are truncated to the first two. An optional `max_seconds` bounds how much
/// of the file is decoded (used by analysis jobs on long files).
pub fn decode_audio_file(
    file_path: &Path,
    target_rate: u32,
    max_seconds: Option<f64>,
) -> Result<DecodedAudio> {
    tracing::debug!(path = %file_path.display(), "Decoding audio file");

    let file = std::fs::File::open(file_path).map_err(|e| {
        Error::AudioDecode(format!("failed to open {}: {e}", file_path.display()))
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = file_path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| Error::AudioDecode(format!("failed to probe {}: {e}", file_path.display())))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::AudioDecode("no audio track found".to_string()))?;

    let track_id = track.id;
    let source_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| Error::AudioDecode("sample rate unknown".to_string()))?;
    let channel_count = track
        .codec_params
        .channels
        .map(|c| c.count())
        .ok_or_else(|| Error::AudioDecode("channel layout unknown".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| Error::AudioDecode(format!("failed to create decoder: {e}")))?;

    let max_frames = max_seconds.map(|s| (s * source_rate as f64) as usize);
    let keep = channel_count.min(2);
    let mut channels: Vec<Vec<f32>> = vec![Vec::new(); keep];

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(Error::AudioDecode(format!("error reading packet: {e}"))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder
            .decode(&packet)
            .map_err(|e| Error::AudioDecode(format!("failed to decode packet: {e}")))?;
        append_planar_f32(&decoded, &mut channels);

        if let Some(max) = max_frames {
            if channels[0].len() >= max {
                for channel in &mut channels {
                    channel.truncate(max);
                }
                break;
            }
        }
    }

    if channels[0].is_empty() {
        return Err(Error::AudioDecode(format!(
            "no audio decoded from {}",
            file_path.display()
        )));
    }

    // Mono to stereo
    if channels.len() == 1 {
        let duplicate = channels[0].clone();
        channels.push(duplicate);
    }

    let mut audio = DecodedAudio {
        channels,
        sample_rate: source_rate,
    };

    if source_rate != target_rate {
        audio = resample(audio, target_rate)?;
    }

    tracing::debug!(
        path = %file_path.display(),
        frames = audio.num_frames(),
        sample_rate = audio.sample_rate,
        "Audio decoding complete"
    );

    Ok(audio)
}

/// Convert a decoded buffer to planar f32 and append onto the output channels.
fn append_planar_f32(decoded: &AudioBufferRef, channels: &mut [Vec<f32>]) {
    fn extend<S: Sample>(buf: &symphonia::core::audio::AudioBuffer<S>, channels: &mut [Vec<f32>])
    where
        f32: FromSample<S>,
    {
        let available = buf.spec().channels.count();
        for (ch, out) in channels.iter_mut().enumerate() {
            let src = buf.chan(ch.min(available - 1));
            out.extend(src.iter().map(|s| f32::from_sample(*s)));
        }
    }

    match decoded {
        AudioBufferRef::U8(buf) => extend(buf.as_ref(), channels),
        AudioBufferRef::U16(buf) => extend(buf.as_ref(), channels),
        AudioBufferRef::U24(buf) => extend(buf.as_ref(), channels),
        AudioBufferRef::U32(buf) => extend(buf.as_ref(), channels),
        AudioBufferRef::S8(buf) => extend(buf.as_ref(), channels),
        AudioBufferRef::S16(buf) => extend(buf.as_ref(), channels),
        AudioBufferRef::S24(buf) => extend(buf.as_ref(), channels),
        AudioBufferRef::S32(buf) => extend(buf.as_ref(), channels),
        AudioBufferRef::F32(buf) => extend(buf.as_ref(), channels),
        AudioBufferRef::F64(buf) => extend(buf.as_ref(), channels),
    }
}

/// Resample every channel to `target_rate` with a sinc resampler.
fn resample(audio: DecodedAudio, target_rate: u32) -> Result<DecodedAudio> {
    let ratio = target_rate as f64 / audio.sample_rate as f64;
    let chunk_size = 1024;
    let num_channels = audio.channels.len();

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, chunk_size, num_channels)
        .map_err(|e| Error::AudioDecode(format!("resampler init failed: {e}")))?;

    let frames = audio.num_frames();
    let mut output: Vec<Vec<f32>> = vec![Vec::new(); num_channels];
    let mut pos = 0;

    while pos + chunk_size <= frames {
        let chunk: Vec<&[f32]> = audio
            .channels
            .iter()
            .map(|c| &c[pos..pos + chunk_size])
            .collect();
        let resampled = resampler
            .process(&chunk, None)
            .map_err(|e| Error::AudioDecode(format!("resampling failed: {e}")))?;
        for (out, res) in output.iter_mut().zip(resampled) {
            out.extend(res);
        }
        pos += chunk_size;
    }

    // Tail: pad the final partial chunk with silence
    if pos < frames {
        let remaining = frames - pos;
        let chunk: Vec<Vec<f32>> = audio
            .channels
            .iter()
            .map(|c| {
                let mut padded = c[pos..].to_vec();
                padded.resize(chunk_size, 0.0);
                padded
            })
            .collect();
        let chunk_refs: Vec<&[f32]> = chunk.iter().map(|c| c.as_slice()).collect();
        let resampled = resampler
            .process(&chunk_refs, None)
            .map_err(|e| Error::AudioDecode(format!("resampling failed: {e}")))?;
        let keep = (remaining as f64 * ratio).round() as usize;
        for (out, res) in output.iter_mut().zip(resampled) {
            out.extend(res.into_iter().take(keep));
        }
    }

    Ok(DecodedAudio {
        channels: output,
        sample_rate: target_rate,
    })
}

/// Probe a file's duration in seconds without decoding it fully.
///
/// Falls back to `None` when the container doesn't declare a frame count.
pub fn probe_duration(file_path: &Path) -> Result<Option<f64>> {
    let file = std::fs::File::open(file_path).map_err(|e| {
        Error::AudioDecode(format!("failed to open {}: {e}", file_path.display()))
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = file_path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| Error::AudioDecode(format!("failed to probe {}: {e}", file_path.display())))?;

    let duration = probed.format.tracks().iter().find_map(|t| {
        let rate = t.codec_params.sample_rate?;
        let frames = t.codec_params.n_frames?;
        Some(frames as f64 / rate as f64)
    });
    Ok(duration)
}

/// Write stereo f32 samples as a 16-bit WAV.
pub fn write_wav(path: &Path, channels: &[Vec<f32>], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: channels.len() as u16,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;

    let frames = channels.first().map(|c| c.len()).unwrap_or(0);
    for i in 0..frames {
        for channel in channels {
            let sample = (channel[i].clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer
                .write_sample(sample)
                .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;
        }
    }
    writer
        .finalize()
        .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_missing_file_is_audio_decode_error() {
        let result = decode_audio_file(Path::new("/nonexistent/file.mp3"), 44100, None);
        assert!(matches!(result, Err(Error::AudioDecode(_))));
    }

    #[test]
    fn test_wav_round_trip_at_engine_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");

        // 0.5 s of a 440 Hz sine, stereo
        let sample_rate = 44100u32;
        let frames = sample_rate as usize / 2;
        let tone: Vec<f32> = (0..frames)
            .map(|i| (i as f32 * 440.0 * 2.0 * std::f32::consts::PI / sample_rate as f32).sin() * 0.5)
            .collect();
        write_wav(&path, &[tone.clone(), tone.clone()], sample_rate).unwrap();

        let decoded = decode_audio_file(&path, sample_rate, None).unwrap();
        assert_eq!(decoded.sample_rate, sample_rate);
        assert_eq!(decoded.channels.len(), 2);
        assert_eq!(decoded.num_frames(), frames);

        // 16-bit quantization keeps samples within ~1e-4 of the original
        let mono = decoded.to_mono();
        for (a, b) in mono.iter().zip(tone.iter()).step_by(997) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn test_decode_resamples_to_engine_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hi.wav");

        let source_rate = 48000u32;
        let frames = source_rate as usize; // 1 second
        let tone: Vec<f32> = (0..frames)
            .map(|i| (i as f32 * 220.0 * 2.0 * std::f32::consts::PI / source_rate as f32).sin() * 0.4)
            .collect();
        write_wav(&path, &[tone.clone(), tone], source_rate).unwrap();

        let decoded = decode_audio_file(&path, 44100, None).unwrap();
        assert_eq!(decoded.sample_rate, 44100);
        // Duration is preserved to within a chunk of resampler latency
        assert!((decoded.duration_seconds() - 1.0).abs() < 0.05);
    }

    #[test]
    fn test_decode_honors_duration_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.wav");

        let sample_rate = 44100u32;
        let silence = vec![0.0f32; sample_rate as usize * 3];
        write_wav(&path, &[silence.clone(), silence], sample_rate).unwrap();

        let decoded = decode_audio_file(&path, sample_rate, Some(1.0)).unwrap();
        assert!(decoded.duration_seconds() <= 1.1);
    }
}
