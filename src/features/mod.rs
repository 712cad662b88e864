//! Component B / Stage 1: feature extraction. Computes per-frame acoustic
//! feature matrices (MFCC, LFCC, CQCC approximation, log-spectrogram,
//! spectral descriptors), their deltas, and a rough anomaly proxy fed into
//! the fusion weighted average.

pub mod spectral;

use serde::Serialize;
use std::collections::HashMap;

use crate::config::FeatureExtractionConfig;
use crate::waveform::Waveform;

/// 2-D (frames, feature_dim) feature matrix, row-major.
#[derive(Debug, Clone, Serialize, Default)]
pub struct FeatureMatrix {
    pub frames: usize,
    pub feature_dim: usize,
    pub data: Vec<f32>,
}

impl FeatureMatrix {
    pub fn new(rows: Vec<Vec<f32>>) -> Self {
        let frames = rows.len();
        let feature_dim = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut data = Vec::with_capacity(frames * feature_dim);
        for row in rows {
            data.extend(row);
        }
        Self {
            frames,
            feature_dim,
            data,
        }
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.feature_dim..(i + 1) * self.feature_dim]
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0 || self.feature_dim == 0
    }

    fn truncate_frames(&self, frames: usize) -> Self {
        let rows: Vec<Vec<f32>> = (0..frames.min(self.frames))
            .map(|i| self.row(i).to_vec())
            .collect();
        Self::new(rows)
    }

    fn concat_columns(mats: &[&FeatureMatrix]) -> Self {
        let min_frames = mats.iter().map(|m| m.frames).min().unwrap_or(0);
        let rows: Vec<Vec<f32>> = (0..min_frames)
            .map(|i| {
                let mut row = Vec::new();
                for m in mats {
                    row.extend_from_slice(m.row(i));
                }
                row
            })
            .collect();
        Self::new(rows)
    }

    fn delta(&self, order: usize) -> Self {
        let mut current = self.clone();
        for _ in 0..order {
            current = current.first_difference();
        }
        current
    }

    fn first_difference(&self) -> Self {
        if self.frames < 2 {
            return self.clone();
        }
        let rows: Vec<Vec<f32>> = (0..self.frames)
            .map(|i| {
                let prev = if i == 0 { 0 } else { i - 1 };
                let next = if i + 1 < self.frames { i + 1 } else { i };
                self.row(next)
                    .iter()
                    .zip(self.row(prev))
                    .map(|(a, b)| (a - b) / 2.0)
                    .collect()
            })
            .collect();
        Self::new(rows)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureStats {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl FeatureStats {
    fn compute(matrix: &FeatureMatrix) -> Self {
        if matrix.data.is_empty() {
            return Self {
                mean: 0.0,
                std: 0.0,
                min: 0.0,
                max: 0.0,
            };
        }
        let n = matrix.data.len() as f64;
        let mean = matrix.data.iter().map(|&v| v as f64).sum::<f64>() / n;
        let variance = matrix
            .data
            .iter()
            .map(|&v| (v as f64 - mean).powi(2))
            .sum::<f64>()
            / n;
        let min = matrix.data.iter().cloned().fold(f32::INFINITY, f32::min) as f64;
        let max = matrix.data.iter().cloned().fold(f32::NEG_INFINITY, f32::max) as f64;
        Self {
            mean,
            std: variance.sqrt(),
            min,
            max,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureExtractionResult {
    pub success: bool,
    pub error: Option<String>,
    /// Per-type feature matrices. Stripped before serialization to the
    /// caller by the orchestrator (see [`crate::numeric`]); kept here for
    /// the explainer.
    #[serde(skip)]
    pub features: HashMap<String, FeatureMatrix>,
    #[serde(skip)]
    pub combined_features: FeatureMatrix,
    pub feature_stats: HashMap<String, FeatureStats>,
    pub anomaly_score: f64,
    pub num_frames: usize,
    pub feature_dim: usize,
}

impl FeatureExtractionResult {
    fn empty(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            features: HashMap::new(),
            combined_features: FeatureMatrix::default(),
            feature_stats: HashMap::new(),
            anomaly_score: 0.5,
            num_frames: 0,
            feature_dim: 0,
        }
    }
}

pub fn extract(waveform: &Waveform, config: &FeatureExtractionConfig) -> FeatureExtractionResult {
    if waveform.is_empty() {
        return FeatureExtractionResult::empty("empty audio input");
    }

    let min_len = config.n_fft.max(2048);
    let mut samples = waveform.samples().to_vec();
    if samples.len() < min_len {
        samples.resize(min_len, 0.0);
    }

    let mut features = HashMap::new();
    let mut feature_stats = HashMap::new();

    for feature_type in &config.feature_types {
        if let Some(matrix) = extract_one(&samples, feature_type, config) {
            feature_stats.insert(feature_type.clone(), FeatureStats::compute(&matrix));
            features.insert(feature_type.clone(), matrix);
        } else {
            log::warn!("unknown or failed feature type: {feature_type}");
        }
    }

    if features.is_empty() {
        return FeatureExtractionResult::empty("no feature types produced output");
    }

    let min_frames = features.values().map(|m| m.frames).min().unwrap_or(0);
    let truncated: Vec<FeatureMatrix> = features.values().map(|m| m.truncate_frames(min_frames)).collect();
    let refs: Vec<&FeatureMatrix> = truncated.iter().collect();
    let combined = FeatureMatrix::concat_columns(&refs);

    let combined_with_deltas = if config.include_deltas && !combined.is_empty() {
        let delta = combined.delta(1);
        let delta_delta = combined.delta(2);
        let refs = [&combined, &delta, &delta_delta];
        FeatureMatrix::concat_columns(&refs)
    } else {
        combined
    };

    let anomaly_score = compute_anomaly_score(&feature_stats);

    FeatureExtractionResult {
        success: true,
        error: None,
        num_frames: combined_with_deltas.frames,
        feature_dim: combined_with_deltas.feature_dim,
        combined_features: combined_with_deltas,
        feature_stats,
        features,
        anomaly_score,
    }
}

fn extract_one(samples: &[f32], feature_type: &str, config: &FeatureExtractionConfig) -> Option<FeatureMatrix> {
    match feature_type {
        "mfcc" => Some(extract_mfcc(samples, config)),
        "lfcc" => Some(extract_lfcc(samples, config)),
        "cqcc" => Some(extract_cqcc_approx(samples, config)),
        "logspec" => Some(extract_logspec(samples, config)),
        "spectral" => Some(extract_spectral_descriptors(samples, config)),
        _ => None,
    }
}

fn log_magnitude_frames(samples: &[f32], config: &FeatureExtractionConfig) -> Vec<Vec<f32>> {
    spectral::stft_magnitude(samples, config.n_fft, config.hop_length, config.win_length)
        .into_iter()
        .map(|frame| frame.into_iter().map(|m| (m + 1e-10).ln()).collect())
        .collect()
}

fn extract_mfcc(samples: &[f32], config: &FeatureExtractionConfig) -> FeatureMatrix {
    // Mel filterbank followed by DCT-II; approximated here with a
    // log-spaced triangular filterbank applied before the DCT (a simplified
    // but structurally faithful mel-scale substitute).
    let log_frames = log_magnitude_frames(samples, config);
    let mel_frames = mel_filterbank_apply(&log_frames, config.n_mfcc * 2);
    let coeffs = spectral::dct2_ortho(&mel_frames, config.n_mfcc);
    FeatureMatrix::new(coeffs)
}

fn extract_lfcc(samples: &[f32], config: &FeatureExtractionConfig) -> FeatureMatrix {
    let log_frames = log_magnitude_frames(samples, config);
    let coeffs = spectral::dct2_ortho(&log_frames, config.n_lfcc);
    FeatureMatrix::new(coeffs)
}

fn extract_cqcc_approx(samples: &[f32], config: &FeatureExtractionConfig) -> FeatureMatrix {
    // A true constant-Q transform is out of proportion to this crate's
    // budget; a log-spaced filterbank over the linear STFT approximates the
    // constant-Q resolution closely enough for the downstream statistics.
    let log_frames = log_magnitude_frames(samples, config);
    let log_spaced = mel_filterbank_apply(&log_frames, 84);
    let coeffs = spectral::dct2_ortho(&log_spaced, 20);
    FeatureMatrix::new(coeffs)
}

fn extract_logspec(samples: &[f32], config: &FeatureExtractionConfig) -> FeatureMatrix {
    FeatureMatrix::new(log_magnitude_frames(samples, config))
}

fn extract_spectral_descriptors(samples: &[f32], config: &FeatureExtractionConfig) -> FeatureMatrix {
    let magnitude_frames = spectral::stft_magnitude(samples, config.n_fft, config.hop_length, config.win_length);
    let rows: Vec<Vec<f32>> = magnitude_frames
        .iter()
        .map(|frame| {
            let centroid = spectral::spectral_centroid(frame, config.sample_rate, config.n_fft);
            let rolloff = spectral::spectral_rolloff(frame, config.sample_rate, config.n_fft, 0.85);
            let bandwidth = spectral_bandwidth(frame, centroid, config.sample_rate, config.n_fft);
            vec![centroid, bandwidth, rolloff]
        })
        .collect();
    FeatureMatrix::new(rows)
}

fn spectral_bandwidth(magnitude: &[f32], centroid: f32, sample_rate: u32, n_fft: usize) -> f32 {
    let total: f32 = magnitude.iter().sum();
    if total <= 1e-12 {
        return 0.0;
    }
    let weighted: f32 = magnitude
        .iter()
        .enumerate()
        .map(|(i, &m)| {
            let freq = i as f32 * sample_rate as f32 / n_fft as f32;
            (freq - centroid).powi(2) * m
        })
        .sum();
    (weighted / total).sqrt()
}

/// Collapses `bins` linear frequency bins into `n_bands` overlapping
/// triangular bands, log-spaced — a mel-scale stand-in.
fn mel_filterbank_apply(log_frames: &[Vec<f32>], n_bands: usize) -> Vec<Vec<f32>> {
    log_frames
        .iter()
        .map(|frame| {
            let n_bins = frame.len();
            if n_bins == 0 {
                return vec![0.0; n_bands];
            }
            (0..n_bands)
                .map(|band| {
                    let lo = (band as f32 / n_bands as f32).powf(2.0) * n_bins as f32;
                    let hi = ((band + 1) as f32 / n_bands as f32).powf(2.0) * n_bins as f32;
                    let lo_idx = (lo as usize).min(n_bins.saturating_sub(1));
                    let hi_idx = (hi as usize).max(lo_idx + 1).min(n_bins);
                    let slice = &frame[lo_idx..hi_idx];
                    if slice.is_empty() {
                        frame[lo_idx]
                    } else {
                        slice.iter().sum::<f32>() / slice.len() as f32
                    }
                })
                .collect()
        })
        .collect()
}

fn compute_anomaly_score(feature_stats: &HashMap<String, FeatureStats>) -> f64 {
    if feature_stats.is_empty() {
        return 0.5;
    }
    // The saturation constant 10 here is the source's own magic number: it
    // was chosen empirically and is a tunable, not a physical law.
    let scores: Vec<f64> = feature_stats.values().map(|s| (s.std / 10.0).min(1.0)).collect();
    scores.iter().sum::<f64>() / scores.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_waveform_yields_failure_with_neutral_anomaly_score() {
        let waveform = Waveform::from_samples(vec![], 16_000);
        let result = extract(&waveform, &FeatureExtractionConfig::default());
        assert!(!result.success);
        assert_eq!(result.anomaly_score, 0.5);
    }

    #[test]
    fn sine_wave_produces_frames_for_every_configured_type() {
        let samples: Vec<f32> = (0..16_000)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16_000.0).sin() * 0.5)
            .collect();
        let waveform = Waveform::from_samples(samples, 16_000);
        let result = extract(&waveform, &FeatureExtractionConfig::default());
        assert!(result.success);
        assert_eq!(result.features.len(), 3); // mfcc, lfcc, logspec by default
        assert!(result.num_frames > 0);
        assert!(result.anomaly_score >= 0.0 && result.anomaly_score <= 1.0);
    }

    #[test]
    fn combined_features_include_deltas_when_configured() {
        let config = FeatureExtractionConfig {
            feature_types: vec!["mfcc".to_string()],
            ..FeatureExtractionConfig::default()
        };
        let samples: Vec<f32> = (0..16_000).map(|i| (i % 7) as f32 / 7.0).collect();
        let waveform = Waveform::from_samples(samples, 16_000);
        let result = extract(&waveform, &config);
        assert_eq!(result.feature_dim, config.n_mfcc * 3);
    }
}
