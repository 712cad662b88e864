//! Sensor 8: Breathing Pattern (informational, prosecution-flavored).
//! Natural breathing is irregular; a suspiciously regular inter-breath
//! interval pattern is reported for the explainer even though this sensor
//! never vetoes on its own.

use std::collections::HashMap;

use super::{Sensor, SensorCategory, SensorMetadata, SensorResult};
use crate::features::spectral::stft_magnitude;
use crate::waveform::Waveform;

const N_FFT: usize = 1024;
const HOP: usize = 256;
const BAND_LOW_HZ: f32 = 20.0;
const BAND_HIGH_HZ: f32 = 300.0;
const PEAK_MIN_SPACING_SECONDS: f64 = 1.0;
const MAD_MULTIPLIER: f64 = 1.5;
const MIN_INTERVAL_SECONDS: f64 = 1.0;
const MAX_INTERVAL_SECONDS: f64 = 8.0;
const CV_NORMALIZER: f64 = 0.3;

pub struct BreathingPatternSensor;

impl Sensor for BreathingPatternSensor {
    fn name(&self) -> &str {
        "BreathingPatternSensor"
    }

    fn category(&self) -> SensorCategory {
        SensorCategory::Informational
    }

    fn analyze(&self, waveform: &Waveform) -> SensorResult {
        let sample_rate = waveform.sample_rate();
        let samples = waveform.samples();
        if samples.len() < N_FFT {
            return SensorResult::inconclusive(self.name(), self.category(), "audio too short for breathing analysis");
        }

        let envelope = bandpassed_rms_envelope(samples, sample_rate);
        if envelope.is_empty() {
            return SensorResult::inconclusive(self.name(), self.category(), "no envelope frames produced");
        }

        let frame_seconds = HOP as f64 / sample_rate as f64;
        let peaks = detect_peaks(&envelope, (PEAK_MIN_SPACING_SECONDS / frame_seconds).round() as usize);

        if peaks.len() < 3 {
            return SensorResult::inconclusive(self.name(), self.category(), "too few breathing peaks detected");
        }

        let intervals: Vec<f64> = peaks
            .windows(2)
            .map(|w| (w[1] - w[0]) as f64 * frame_seconds)
            .filter(|&s| (MIN_INTERVAL_SECONDS..=MAX_INTERVAL_SECONDS).contains(&s))
            .collect();

        if intervals.len() < 2 {
            return SensorResult::inconclusive(self.name(), self.category(), "insufficient plausible breath intervals");
        }

        let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
        let variance = intervals.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / intervals.len() as f64;
        let cv = variance.sqrt() / mean.max(1e-9);
        let score = (cv / CV_NORMALIZER).min(1.0);

        let mut detail = HashMap::new();
        detail.insert("coefficient_of_variation".to_string(), cv);
        detail.insert("num_breath_intervals".to_string(), intervals.len() as f64);

        SensorResult {
            sensor_name: self.name().to_string(),
            passed: None,
            value: Some(score),
            threshold: None,
            reason: format!("breath interval coefficient of variation {cv:.3}"),
            detail,
            metadata: SensorMetadata {
                category: Some(self.category()),
            },
        }
    }
}

fn bandpassed_rms_envelope(samples: &[f32], sample_rate: u32) -> Vec<f64> {
    let frames = stft_magnitude(samples, N_FFT, HOP, N_FFT);
    let low_bin = (BAND_LOW_HZ * N_FFT as f32 / sample_rate as f32).round() as usize;
    let high_bin = (BAND_HIGH_HZ * N_FFT as f32 / sample_rate as f32).round() as usize;

    frames
        .iter()
        .map(|frame| {
            let len = frame.len();
            let lo = low_bin.min(len);
            let hi = high_bin.min(len);
            let energy: f32 = frame[lo..hi].iter().map(|m| m * m).sum();
            (energy / N_FFT as f32).sqrt() as f64
        })
        .collect()
}

fn detect_peaks(envelope: &[f64], min_spacing_frames: usize) -> Vec<usize> {
    let median = percentile_sorted(envelope, 0.5);
    let mad = {
        let deviations: Vec<f64> = envelope.iter().map(|&v| (v - median).abs()).collect();
        percentile_sorted(&deviations, 0.5)
    };
    let threshold = median + MAD_MULTIPLIER * mad;

    let mut peaks = Vec::new();
    let mut last_peak: Option<usize> = None;
    for i in 1..envelope.len().saturating_sub(1) {
        if envelope[i] > threshold && envelope[i] > envelope[i - 1] && envelope[i] >= envelope[i + 1] {
            if let Some(last) = last_peak {
                if i - last < min_spacing_frames.max(1) {
                    continue;
                }
            }
            peaks.push(i);
            last_peak = Some(i);
        }
    }
    peaks
}

fn percentile_sorted(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_clip_is_inconclusive() {
        let waveform = Waveform::from_samples(vec![0.0f32; 2_000], 16_000);
        let result = BreathingPatternSensor.analyze(&waveform);
        assert_eq!(result.passed, None);
    }
}
