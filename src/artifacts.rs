//! Component D / Stage 3: artifact detection. Five independent
//! sub-detectors — silence regions, clicks/pops, spectral anomalies, phase
//! jumps, and plain statistical outliers — each capped to its share of the
//! overall `artifact_score`.

use serde::Serialize;

use crate::config::ArtifactDetectionConfig;
use crate::features::spectral;
use crate::waveform::Waveform;

#[derive(Debug, Clone, Serialize, Default)]
pub struct SilenceRegion {
    pub start_time: f64,
    pub end_time: f64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct SilenceArtifacts {
    pub regions: Vec<SilenceRegion>,
    pub total_silence_duration: f64,
    pub suspicious: bool,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ClickArtifacts {
    pub click_times: Vec<f64>,
    pub click_magnitudes: Vec<f64>,
    pub suspicious: bool,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct FrequencyArtifacts {
    pub spectral_flatness: f64,
    pub num_spectral_holes: usize,
    pub suspicious: bool,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct PhaseArtifacts {
    pub phase_variance: f64,
    pub phase_jumps: usize,
    pub suspicious: bool,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct StatisticalFeatures {
    pub mean: f64,
    pub std: f64,
    pub kurtosis: f64,
    pub skewness: f64,
    pub zero_crossing_rate: f64,
    pub rms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    pub artifact_type: String,
    pub time: f64,
    pub severity: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactDetectionResult {
    pub success: bool,
    pub error: Option<String>,
    pub artifact_score: f64,
    pub silence_artifacts: SilenceArtifacts,
    pub click_artifacts: ClickArtifacts,
    pub frequency_artifacts: FrequencyArtifacts,
    pub phase_artifacts: PhaseArtifacts,
    pub statistical_features: StatisticalFeatures,
    pub all_artifacts: Vec<Artifact>,
    pub total_artifacts: usize,
}

impl ArtifactDetectionResult {
    fn empty(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            artifact_score: 0.5,
            silence_artifacts: SilenceArtifacts::default(),
            click_artifacts: ClickArtifacts::default(),
            frequency_artifacts: FrequencyArtifacts::default(),
            phase_artifacts: PhaseArtifacts::default(),
            statistical_features: StatisticalFeatures::default(),
            all_artifacts: Vec::new(),
            total_artifacts: 0,
        }
    }
}

const FRAME_SECONDS: f64 = 0.025;
const HOP_SECONDS: f64 = 0.010;

pub fn detect(waveform: &Waveform, config: &ArtifactDetectionConfig) -> ArtifactDetectionResult {
    if waveform.is_empty() {
        return ArtifactDetectionResult::empty("empty audio input");
    }

    let sample_rate = waveform.sample_rate();
    let samples = waveform.samples();

    let silence = detect_silence(samples, sample_rate, config);
    let clicks = detect_clicks(samples, sample_rate, config);
    let frequency = detect_frequency_artifacts(samples, sample_rate);
    let phase = detect_phase_artifacts(samples);
    let stats = compute_statistical_features(samples);

    let artifact_score = compute_artifact_score(&silence, &clicks, &frequency, &phase);
    let all_artifacts = compile_artifacts(&silence, &clicks);
    let total_artifacts = all_artifacts.len();

    ArtifactDetectionResult {
        success: true,
        error: None,
        artifact_score,
        silence_artifacts: silence,
        click_artifacts: clicks,
        frequency_artifacts: frequency,
        phase_artifacts: phase,
        statistical_features: stats,
        all_artifacts,
        total_artifacts,
    }
}

fn frame_rms_db(samples: &[f32], frame_len: usize, hop_len: usize) -> Vec<f64> {
    if frame_len == 0 || samples.len() < frame_len {
        return Vec::new();
    }
    (0..=samples.len() - frame_len)
        .step_by(hop_len.max(1))
        .map(|i| {
            let frame = &samples[i..i + frame_len];
            let energy = (frame.iter().map(|s| s * s).sum::<f32>() / frame_len as f32).sqrt();
            20.0 * (energy as f64 + 1e-10).log10()
        })
        .collect()
}

fn detect_silence(samples: &[f32], sample_rate: u32, config: &ArtifactDetectionConfig) -> SilenceArtifacts {
    let frame_len = (FRAME_SECONDS * sample_rate as f64).round() as usize;
    let hop_len = (HOP_SECONDS * sample_rate as f64).round() as usize;
    let energies_db = frame_rms_db(samples, frame_len, hop_len);
    if energies_db.is_empty() {
        return SilenceArtifacts::default();
    }

    let min_frames = (config.min_silence_duration * sample_rate as f64 / hop_len.max(1) as f64) as usize;

    let mut regions = Vec::new();
    let mut run_start: Option<usize> = None;
    for (i, &db) in energies_db.iter().enumerate() {
        let silent = db < config.silence_threshold_db;
        match (silent, run_start) {
            (true, None) => run_start = Some(i),
            (false, Some(start)) => {
                if i - start >= min_frames {
                    regions.push(region(start, i, hop_len, sample_rate));
                }
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = run_start {
        if energies_db.len() - start >= min_frames {
            regions.push(region(start, energies_db.len(), hop_len, sample_rate));
        }
    }

    let total_silence_duration = regions.iter().map(|r| r.end_time - r.start_time).sum();
    let suspicious = regions.len() > 5;

    SilenceArtifacts {
        regions,
        total_silence_duration,
        suspicious,
    }
}

fn region(start_frame: usize, end_frame: usize, hop_len: usize, sample_rate: u32) -> SilenceRegion {
    SilenceRegion {
        start_time: start_frame as f64 * hop_len as f64 / sample_rate as f64,
        end_time: end_frame as f64 * hop_len as f64 / sample_rate as f64,
    }
}

fn detect_clicks(samples: &[f32], sample_rate: u32, config: &ArtifactDetectionConfig) -> ClickArtifacts {
    if samples.len() < 2 {
        return ClickArtifacts::default();
    }
    let mut diffs: Vec<f32> = samples.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
    let max = diffs.iter().cloned().fold(0.0f32, f32::max);
    if max > 0.0 {
        for d in &mut diffs {
            *d /= max;
        }
    }

    let mut click_times = Vec::new();
    let mut click_magnitudes = Vec::new();
    let mut last_index: Option<usize> = None;
    for (i, &d) in diffs.iter().enumerate() {
        if d as f64 >= config.click_threshold {
            if let Some(last) = last_index {
                if i - last < config.click_min_gap {
                    continue;
                }
            }
            click_times.push(i as f64 / sample_rate as f64);
            click_magnitudes.push(d as f64);
            last_index = Some(i);
        }
    }

    let suspicious = click_times.len() > 10;
    ClickArtifacts {
        click_times,
        click_magnitudes,
        suspicious,
    }
}

fn detect_frequency_artifacts(samples: &[f32], sample_rate: u32) -> FrequencyArtifacts {
    const N_FFT: usize = 2048;
    if samples.len() < N_FFT {
        return FrequencyArtifacts {
            spectral_flatness: 1.0,
            ..Default::default()
        };
    }

    let frames = spectral::stft_magnitude(samples, N_FFT, N_FFT, N_FFT);
    let Some(spectrum) = frames.first() else {
        return FrequencyArtifacts {
            spectral_flatness: 1.0,
            ..Default::default()
        };
    };

    let flatness = spectral::spectral_flatness(spectrum) as f64;
    let spectrum_db: Vec<f64> = spectrum.iter().map(|&m| 20.0 * (m as f64 + 1e-10).log10()).collect();
    let mean_db = spectrum_db.iter().sum::<f64>() / spectrum_db.len() as f64;
    let std_db = (spectrum_db.iter().map(|v| (v - mean_db).powi(2)).sum::<f64>() / spectrum_db.len() as f64).sqrt();
    let num_holes = spectrum_db.iter().filter(|&&v| v < mean_db - 3.0 * std_db).count();

    let _ = sample_rate;
    let suspicious = flatness > 0.9 || num_holes > 50;

    FrequencyArtifacts {
        spectral_flatness: flatness,
        num_spectral_holes: num_holes,
        suspicious,
    }
}

fn detect_phase_artifacts(samples: &[f32]) -> PhaseArtifacts {
    const N_FFT: usize = 2048;
    let hop = N_FFT / 4;
    let frames = spectral::stft_complex(samples, N_FFT, hop, N_FFT);
    if frames.len() < 2 {
        return PhaseArtifacts::default();
    }

    let phases: Vec<Vec<f32>> = frames
        .iter()
        .map(|frame| frame.iter().map(|c| c.arg()).collect())
        .collect();

    let mut diffs = Vec::new();
    for pair in phases.windows(2) {
        for (a, b) in pair[0].iter().zip(&pair[1]) {
            let raw = b - a;
            let wrapped = raw.sin().atan2(raw.cos());
            diffs.push(wrapped);
        }
    }

    if diffs.is_empty() {
        return PhaseArtifacts::default();
    }

    let threshold = std::f32::consts::PI / 2.0;
    let phase_jumps = diffs.iter().filter(|&&d| d.abs() > threshold).count();
    let mean = diffs.iter().sum::<f32>() / diffs.len() as f32;
    let variance = diffs.iter().map(|d| (d - mean).powi(2)).sum::<f32>() / diffs.len() as f32;

    PhaseArtifacts {
        phase_variance: variance as f64,
        phase_jumps,
        suspicious: phase_jumps > 100,
    }
}

fn compute_statistical_features(samples: &[f32]) -> StatisticalFeatures {
    let n = samples.len() as f32;
    let mean = samples.iter().sum::<f32>() / n;
    let std = (samples.iter().map(|s| (s - mean).powi(2)).sum::<f32>() / n).sqrt();
    let zero_crossings = samples
        .windows(2)
        .filter(|w| w[0].signum() != w[1].signum())
        .count() as f32;

    StatisticalFeatures {
        mean: mean as f64,
        std: std as f64,
        kurtosis: spectral::kurtosis_excess(samples) as f64,
        skewness: spectral::skewness(samples) as f64,
        zero_crossing_rate: (zero_crossings / n) as f64,
        rms: (samples.iter().map(|s| s * s).sum::<f32>() / n).sqrt() as f64,
    }
}

fn compute_artifact_score(
    silence: &SilenceArtifacts,
    clicks: &ClickArtifacts,
    frequency: &FrequencyArtifacts,
    phase: &PhaseArtifacts,
) -> f64 {
    let silence_score = if silence.suspicious {
        0.3
    } else {
        (silence.regions.len() as f64 / 10.0).min(0.3)
    };
    let click_score = if clicks.suspicious {
        0.3
    } else {
        (clicks.click_times.len() as f64 / 20.0).min(0.3)
    };
    let freq_score = if frequency.suspicious {
        0.2
    } else {
        (frequency.num_spectral_holes as f64 / 100.0).min(0.2)
    };
    let phase_score = if phase.suspicious {
        0.2
    } else {
        (phase.phase_jumps as f64 / 200.0).min(0.2)
    };
    silence_score + click_score + freq_score + phase_score
}

fn compile_artifacts(silence: &SilenceArtifacts, clicks: &ClickArtifacts) -> Vec<Artifact> {
    let mut artifacts = Vec::new();
    for region in &silence.regions {
        artifacts.push(Artifact {
            artifact_type: "silence".to_string(),
            time: region.start_time,
            severity: "medium".to_string(),
        });
    }
    for (time, magnitude) in clicks.click_times.iter().zip(&clicks.click_magnitudes) {
        artifacts.push(Artifact {
            artifact_type: "click".to_string(),
            time: *time,
            severity: if *magnitude > 0.9 { "high" } else { "medium" }.to_string(),
        });
    }
    artifacts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_input_is_flagged() {
        let waveform = Waveform::from_samples(vec![0.0f32; 32_000], 16_000);
        let result = detect(&waveform, &ArtifactDetectionConfig::default());
        assert!(result.success);
        assert!(!result.silence_artifacts.regions.is_empty());
    }

    #[test]
    fn single_impulse_is_detected_as_click() {
        let mut samples = vec![0.0f32; 16_000];
        samples[8000] = 1.0;
        let waveform = Waveform::from_samples(samples, 16_000);
        let result = detect(&waveform, &ArtifactDetectionConfig::default());
        assert!(!result.click_artifacts.click_times.is_empty());
    }

    #[test]
    fn artifact_score_is_bounded() {
        let waveform = Waveform::from_samples(vec![0.05f32; 32_000], 16_000);
        let result = detect(&waveform, &ArtifactDetectionConfig::default());
        assert!(result.artifact_score >= 0.0 && result.artifact_score <= 1.0);
    }
}
