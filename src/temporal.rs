//! Component C / Stage 2: temporal analysis. Detects energy-envelope
//! discontinuities, spectral-flux transitions, and per-frame anomalies in
//! the combined feature matrix produced by Stage 1.

use serde::Serialize;

use crate::config::TemporalAnalysisConfig;
use crate::features::FeatureMatrix;
use crate::waveform::Waveform;

#[derive(Debug, Clone, Serialize, Default)]
pub struct Discontinuities {
    pub positions_seconds: Vec<f64>,
    pub magnitudes: Vec<f64>,
    pub threshold: f64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct Transitions {
    pub flux_mean: f64,
    pub flux_std: f64,
    pub num_transitions: usize,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct FeatureAnomalies {
    pub num_anomalies: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuspiciousSegment {
    pub start_time: f64,
    pub end_time: f64,
    pub confidence: f64,
    pub segment_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemporalAnalysisResult {
    pub success: bool,
    pub error: Option<String>,
    pub temporal_score: f64,
    pub discontinuities: Discontinuities,
    pub transitions: Transitions,
    pub feature_anomalies: FeatureAnomalies,
    pub suspicious_segments: Vec<SuspiciousSegment>,
    pub num_anomalies: usize,
}

impl TemporalAnalysisResult {
    fn empty(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            temporal_score: 0.5,
            discontinuities: Discontinuities::default(),
            transitions: Transitions::default(),
            feature_anomalies: FeatureAnomalies::default(),
            suspicious_segments: Vec::new(),
            num_anomalies: 0,
        }
    }
}

const FRAME_SECONDS: f64 = 0.025;
const HOP_SECONDS: f64 = 0.010;

pub fn analyze(
    waveform: &Waveform,
    combined_features: Option<&FeatureMatrix>,
    config: &TemporalAnalysisConfig,
) -> TemporalAnalysisResult {
    if waveform.is_empty() {
        return TemporalAnalysisResult::empty("empty audio input");
    }

    let sample_rate = waveform.sample_rate();
    let samples = waveform.samples();

    let discontinuities = detect_discontinuities(samples, sample_rate, config);
    let transitions = analyze_transitions(samples);
    let feature_anomalies = combined_features
        .filter(|m| !m.is_empty())
        .map(|m| detect_feature_anomalies(m, config))
        .unwrap_or_default();

    let temporal_score = compute_temporal_score(&discontinuities, &transitions, &feature_anomalies);
    let suspicious_segments = identify_suspicious_segments(&discontinuities);
    let num_anomalies = discontinuities.positions_seconds.len();

    TemporalAnalysisResult {
        success: true,
        error: None,
        temporal_score,
        discontinuities,
        transitions,
        feature_anomalies,
        suspicious_segments,
        num_anomalies,
    }
}

fn detect_discontinuities(samples: &[f32], sample_rate: u32, config: &TemporalAnalysisConfig) -> Discontinuities {
    let frame_len = (FRAME_SECONDS * sample_rate as f64).round() as usize;
    let hop_len = (HOP_SECONDS * sample_rate as f64).round() as usize;
    if frame_len == 0 || hop_len == 0 || samples.len() <= frame_len + hop_len {
        return Discontinuities {
            threshold: config.threshold_std_multiplier,
            ..Default::default()
        };
    }

    let mut diffs = Vec::new();
    let mut idx = hop_len;
    while idx + frame_len <= samples.len() {
        let prev = &samples[idx - hop_len..idx - hop_len + frame_len];
        let curr = &samples[idx..idx + frame_len];
        let diff = prev
            .iter()
            .zip(curr)
            .map(|(a, b)| (b - a).abs() as f64)
            .sum::<f64>()
            / frame_len as f64;
        diffs.push(diff);
        idx += hop_len;
    }

    if diffs.is_empty() {
        return Discontinuities {
            threshold: config.threshold_std_multiplier,
            ..Default::default()
        };
    }

    let z_scores = zscore(&diffs);
    let threshold = config.threshold_std_multiplier;
    let mut positions_seconds = Vec::new();
    let mut magnitudes = Vec::new();
    for (i, &z) in z_scores.iter().enumerate() {
        if z.abs() > threshold {
            positions_seconds.push(i as f64 * hop_len as f64 / sample_rate as f64);
            magnitudes.push(diffs[i]);
        }
    }

    Discontinuities {
        positions_seconds,
        magnitudes,
        threshold,
    }
}

fn analyze_transitions(samples: &[f32]) -> Transitions {
    const N_FFT: usize = 512;
    if samples.len() < N_FFT * 2 {
        return Transitions::default();
    }

    let n_frames = samples.len() / N_FFT;
    let frames = crate::features::spectral::stft_magnitude(
        &samples[..n_frames * N_FFT],
        N_FFT,
        N_FFT,
        N_FFT,
    );
    if frames.len() < 2 {
        return Transitions::default();
    }

    let flux: Vec<f64> = frames
        .windows(2)
        .map(|pair| {
            pair[0]
                .iter()
                .zip(&pair[1])
                .map(|(a, b)| ((b - a) as f64).powi(2))
                .sum::<f64>()
        })
        .collect();

    let flux_mean = flux.iter().sum::<f64>() / flux.len() as f64;
    let flux_std = {
        let var = flux.iter().map(|v| (v - flux_mean).powi(2)).sum::<f64>() / flux.len() as f64;
        var.sqrt()
    };

    let z_scores = zscore(&flux);
    let num_transitions = z_scores.iter().filter(|&&z| z > 2.0).count();

    Transitions {
        flux_mean,
        flux_std,
        num_transitions,
    }
}

fn detect_feature_anomalies(features: &FeatureMatrix, config: &TemporalAnalysisConfig) -> FeatureAnomalies {
    if features.is_empty() {
        return FeatureAnomalies::default();
    }

    let mut means = vec![0.0f64; features.feature_dim];
    for i in 0..features.frames {
        for (j, &v) in features.row(i).iter().enumerate() {
            means[j] += v as f64;
        }
    }
    for m in &mut means {
        *m /= features.frames as f64;
    }

    let mut stds = vec![0.0f64; features.feature_dim];
    for i in 0..features.frames {
        for (j, &v) in features.row(i).iter().enumerate() {
            stds[j] += (v as f64 - means[j]).powi(2);
        }
    }
    for s in &mut stds {
        *s = (*s / features.frames as f64).sqrt() + 1e-10;
    }

    let mut num_anomalies = 0;
    for i in 0..features.frames {
        let frame_score: f64 = features
            .row(i)
            .iter()
            .enumerate()
            .map(|(j, &v)| ((v as f64 - means[j]) / stds[j]).abs())
            .sum::<f64>()
            / features.feature_dim as f64;
        if frame_score > config.threshold_std_multiplier {
            num_anomalies += 1;
        }
    }

    FeatureAnomalies { num_anomalies }
}

fn compute_temporal_score(disc: &Discontinuities, trans: &Transitions, feat: &FeatureAnomalies) -> f64 {
    let disc_score = (disc.positions_seconds.len() as f64 / 10.0).min(1.0) * 0.4;
    let trans_score = (trans.num_transitions as f64 / 20.0).min(1.0) * 0.3;
    let feat_score = (feat.num_anomalies as f64 / 50.0).min(1.0) * 0.3;
    disc_score + trans_score + feat_score
}

fn identify_suspicious_segments(disc: &Discontinuities) -> Vec<SuspiciousSegment> {
    disc.positions_seconds
        .iter()
        .zip(&disc.magnitudes)
        .map(|(&pos, &mag)| SuspiciousSegment {
            start_time: (pos - 0.1).max(0.0),
            end_time: pos + 0.1,
            confidence: (mag * 10.0).min(1.0),
            segment_type: "discontinuity".to_string(),
        })
        .collect()
}

fn zscore(values: &[f64]) -> Vec<f64> {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();
    if std <= 1e-12 {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - mean) / std).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_has_low_temporal_score() {
        let waveform = Waveform::from_samples(vec![0.0f32; 16_000], 16_000);
        let result = analyze(&waveform, None, &TemporalAnalysisConfig::default());
        assert!(result.success);
        assert!(result.temporal_score < 0.3);
    }

    #[test]
    fn abrupt_jump_is_flagged_as_discontinuity() {
        let mut samples = vec![0.01f32; 16_000];
        for s in samples.iter_mut().skip(8000) {
            *s = 0.9;
        }
        let waveform = Waveform::from_samples(samples, 16_000);
        let result = analyze(&waveform, None, &TemporalAnalysisConfig::default());
        assert!(result.success);
        assert!(!result.discontinuities.positions_seconds.is_empty());
    }

    #[test]
    fn empty_waveform_reports_failure() {
        let waveform = Waveform::from_samples(vec![], 16_000);
        let result = analyze(&waveform, None, &TemporalAnalysisConfig::default());
        assert!(!result.success);
    }
}
