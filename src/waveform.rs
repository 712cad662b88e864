//! Component A: audio preprocessing — decode, downmix, resample to the
//! canonical 16 kHz mono waveform every later stage assumes, normalize, and
//! trim leading/trailing silence.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};

pub const CANONICAL_SAMPLE_RATE: u32 = 16_000;
const NORMALIZE_TARGET_DBFS: f32 = -3.0;

/// An immutable mono float waveform, always at [`CANONICAL_SAMPLE_RATE`] once
/// it has passed through [`preprocess`].
#[derive(Debug, Clone)]
pub struct Waveform {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl Waveform {
    /// Wrap pre-decoded samples at an arbitrary sample rate; used by callers
    /// who already have a float sequence with a sample-rate tag.
    pub fn from_samples(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Raw input accepted by [`preprocess`]: a codec byte buffer, a path to one,
/// or already-decoded float samples tagged with their sample rate.
pub enum AudioSource<'a> {
    Bytes(&'a [u8]),
    Path(&'a std::path::Path),
    Samples { samples: Vec<f32>, sample_rate: u32 },
}

/// Decode/resample/normalize/trim an [`AudioSource`] into the canonical
/// waveform every pipeline stage operates on. Rejects inputs whose duration
/// or size fall outside the configured bounds before any heavier work runs
/// (P8: `OutOfRange` before any stage runs).
pub fn preprocess(source: AudioSource<'_>, config: &PipelineConfig) -> Result<Waveform> {
    let (raw_samples, raw_rate) = match source {
        AudioSource::Samples { samples, sample_rate } => (samples, sample_rate),
        AudioSource::Bytes(bytes) => {
            if bytes.len() as u64 > config.max_audio_file_size_bytes {
                return Err(PipelineError::OutOfRange(format!(
                    "input is {} bytes, exceeds max_audio_file_size_bytes={}",
                    bytes.len(),
                    config.max_audio_file_size_bytes
                )));
            }
            decode_bytes(bytes)?
        }
        AudioSource::Path(path) => {
            let meta = std::fs::metadata(path)?;
            if meta.len() > config.max_audio_file_size_bytes {
                return Err(PipelineError::OutOfRange(format!(
                    "{} is {} bytes, exceeds max_audio_file_size_bytes={}",
                    path.display(),
                    meta.len(),
                    config.max_audio_file_size_bytes
                )));
            }
            let bytes = std::fs::read(path)?;
            decode_bytes(&bytes)?
        }
    };

    if raw_samples.is_empty() || raw_samples.iter().any(|s| !s.is_finite()) {
        return Err(PipelineError::InvalidInput(
            "audio contains no samples or non-finite values".to_string(),
        ));
    }

    let duration = raw_samples.len() as f64 / raw_rate as f64;
    if duration < config.min_audio_duration_seconds || duration > config.max_audio_duration_seconds
    {
        return Err(PipelineError::OutOfRange(format!(
            "duration {duration:.3}s outside [{}, {}]",
            config.min_audio_duration_seconds, config.max_audio_duration_seconds
        )));
    }

    let resampled = if raw_rate == CANONICAL_SAMPLE_RATE {
        raw_samples
    } else {
        resample(&raw_samples, raw_rate, CANONICAL_SAMPLE_RATE)
    };

    let normalized = normalize_peak(&resampled, NORMALIZE_TARGET_DBFS);
    let trimmed = trim_silence(&normalized, config.silence_top_db);

    Ok(Waveform::from_samples(trimmed, CANONICAL_SAMPLE_RATE))
}

/// WAV is decoded with `hound` (the donor's own dependency, exact and
/// allocation-light for the common case); anything else goes through
/// `symphonia`'s container/codec probing.
fn decode_bytes(bytes: &[u8]) -> Result<(Vec<f32>, u32)> {
    if let Ok((samples, rate)) = decode_wav(bytes) {
        return Ok((samples, rate));
    }
    decode_with_symphonia(bytes)
}

fn decode_wav(bytes: &[u8]) -> std::result::Result<(Vec<f32>, u32), hound::Error> {
    let cursor = std::io::Cursor::new(bytes);
    let mut reader = hound::WavReader::new(cursor)?;
    let spec = reader.spec();
    let channels = spec.channels as usize;
    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_value))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };
    let mono = downmix(&samples, channels);
    Ok((mono, spec.sample_rate))
}

fn decode_with_symphonia(bytes: &[u8]) -> Result<(Vec<f32>, u32)> {
    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::DecoderOptions;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let cursor = std::io::Cursor::new(bytes.to_vec());
    let source = MediaSourceStream::new(Box::new(cursor), Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| PipelineError::Decode(e.to_string()))?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
        .ok_or_else(|| PipelineError::Decode("no decodable audio track".to_string()))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| PipelineError::Decode("track has no sample rate".to_string()))?;
    let channels = track
        .codec_params
        .channels
        .map(|c| c.count())
        .unwrap_or(1);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| PipelineError::Decode(e.to_string()))?;

    let mut interleaved = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break
            }
            Err(e) => return Err(PipelineError::Decode(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = decoder
            .decode(&packet)
            .map_err(|e| PipelineError::Decode(e.to_string()))?;
        let spec = *decoded.spec();
        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        interleaved.extend_from_slice(buffer.samples());
    }

    let mono = downmix(&interleaved, channels);
    Ok((mono, sample_rate))
}

fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};

    if samples.is_empty() || from_rate == to_rate {
        return samples.to_vec();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let chunk_size = samples.len().max(1);
    let mut resampler = match SincFixedIn::<f32>::new(ratio, 2.0, params, chunk_size, 1) {
        Ok(r) => r,
        Err(_) => return naive_resample(samples, from_rate, to_rate),
    };

    match resampler.process(&[samples.to_vec()], None) {
        Ok(mut output) => output.remove(0),
        Err(_) => naive_resample(samples, from_rate, to_rate),
    }
}

/// Linear-interpolation fallback used only if the sinc resampler rejects the
/// given ratio/chunk combination (e.g. pathologically short input).
fn naive_resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    let ratio = to_rate as f64 / from_rate as f64;
    let out_len = ((samples.len() as f64) * ratio).round() as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_pos = i as f64 / ratio;
        let idx = src_pos.floor() as usize;
        let frac = (src_pos - idx as f64) as f32;
        let a = samples.get(idx).copied().unwrap_or(0.0);
        let b = samples.get(idx + 1).copied().unwrap_or(a);
        out.push(a + (b - a) * frac);
    }
    out
}

fn normalize_peak(samples: &[f32], target_dbfs: f32) -> Vec<f32> {
    let peak = samples.iter().fold(0.0f32, |acc, &s| acc.max(s.abs()));
    if peak <= 1e-9 {
        return samples.to_vec();
    }
    let target_linear = 10f32.powf(target_dbfs / 20.0);
    let gain = target_linear / peak;
    samples.iter().map(|&s| s * gain).collect()
}

/// Drop leading/trailing frames whose RMS lies more than `top_db` below the
/// waveform's peak RMS, matching librosa's `effects.trim` semantics.
fn trim_silence(samples: &[f32], top_db: f64) -> Vec<f32> {
    const FRAME: usize = 2048;
    const HOP: usize = 512;

    if samples.len() < FRAME {
        return samples.to_vec();
    }

    let frame_rms: Vec<f32> = (0..=samples.len() - FRAME)
        .step_by(HOP)
        .map(|start| {
            let frame = &samples[start..start + FRAME];
            (frame.iter().map(|s| s * s).sum::<f32>() / FRAME as f32).sqrt()
        })
        .collect();

    let peak_rms = frame_rms.iter().cloned().fold(0.0f32, f32::max);
    if peak_rms <= 1e-9 {
        return samples.to_vec();
    }
    let threshold = peak_rms * 10f32.powf(-(top_db as f32) / 20.0);

    let first_loud = frame_rms.iter().position(|&r| r >= threshold);
    let last_loud = frame_rms.iter().rposition(|&r| r >= threshold);

    match (first_loud, last_loud) {
        (Some(first), Some(last)) => {
            let start = first * HOP;
            let end = (last * HOP + FRAME).min(samples.len());
            samples[start..end].to_vec()
        }
        _ => samples.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_duration() {
        let config = PipelineConfig::default();
        let samples = vec![0.1f32; 100]; // far below min_audio_duration_seconds at 16kHz
        let result = preprocess(
            AudioSource::Samples {
                samples,
                sample_rate: 16_000,
            },
            &config,
        );
        assert!(matches!(result, Err(PipelineError::OutOfRange(_))));
    }

    #[test]
    fn rejects_non_finite_samples() {
        let config = PipelineConfig::default();
        let mut samples = vec![0.0f32; 16_000];
        samples[10] = f32::NAN;
        let result = preprocess(
            AudioSource::Samples {
                samples,
                sample_rate: 16_000,
            },
            &config,
        );
        assert!(matches!(result, Err(PipelineError::InvalidInput(_))));
    }

    #[test]
    fn normalizes_peak_near_minus_3_dbfs() {
        let samples = vec![0.01f32; 16_000];
        let normalized = normalize_peak(&samples, -3.0);
        let peak = normalized.iter().fold(0.0f32, |a, &b| a.max(b.abs()));
        let target = 10f32.powf(-3.0 / 20.0);
        assert!((peak - target).abs() < 1e-4);
    }

    #[test]
    fn downmix_averages_channels() {
        let interleaved = vec![1.0, 3.0, 0.0, 0.0];
        let mono = downmix(&interleaved, 2);
        assert_eq!(mono, vec![2.0, 0.0]);
    }
}
