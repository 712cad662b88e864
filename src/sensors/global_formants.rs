//! Sensor 4: Global Formant Statistics (defense). Averages the cepstral
//! spectral envelope across the whole recording and looks for the
//! overly-flat, overly-undistributed shape that vocoders tend to leave
//! behind.

use std::collections::HashMap;

use crate::features::spectral;

use super::{Sensor, SensorCategory, SensorMetadata, SensorResult};
use crate::waveform::Waveform;

const N_FFT: usize = 1024;
const HOP: usize = 256;
const LIFTER: usize = 20;
const FLATNESS_THRESHOLD: f64 = 0.4;
const KURTOSIS_THRESHOLD: f64 = -1.0;
const STD_THRESHOLD: f64 = 0.05;

pub struct GlobalFormantSensor;

impl Sensor for GlobalFormantSensor {
    fn name(&self) -> &str {
        "GlobalFormantSensor"
    }

    fn category(&self) -> SensorCategory {
        SensorCategory::Defense
    }

    fn analyze(&self, waveform: &Waveform) -> SensorResult {
        let samples = pre_emphasize(waveform.samples());
        if samples.len() < N_FFT {
            return SensorResult::inconclusive(self.name(), self.category(), "audio too short for spectral analysis");
        }

        let magnitude_frames = spectral::stft_magnitude(&samples, N_FFT, HOP, N_FFT);
        if magnitude_frames.is_empty() {
            return SensorResult::inconclusive(self.name(), self.category(), "no frames produced");
        }

        let log_frames: Vec<Vec<f32>> = magnitude_frames
            .iter()
            .map(|frame| frame.iter().map(|&m| (m + 1e-10).ln()).collect())
            .collect();

        let envelopes: Vec<Vec<f32>> = log_frames
            .iter()
            .map(|frame| spectral::cepstral_envelope(frame, LIFTER))
            .collect();

        let n_bins = envelopes[0].len();
        let mut ltas = vec![0.0f32; n_bins];
        for envelope in &envelopes {
            for (i, &v) in envelope.iter().enumerate() {
                ltas[i] += v;
            }
        }
        for v in &mut ltas {
            *v /= envelopes.len() as f32;
        }

        let mean = spectral::mean(&ltas) as f64;
        let std = spectral::std_dev(&ltas) as f64;
        let skew = spectral::skewness(&ltas) as f64;
        let kurtosis = spectral::kurtosis_excess(&ltas) as f64;
        let linear_ltas: Vec<f32> = ltas.iter().map(|&v| v.exp()).collect();
        let flatness = spectral::spectral_flatness(&linear_ltas) as f64;

        let suspicious = flatness > FLATNESS_THRESHOLD || kurtosis < KURTOSIS_THRESHOLD || std < STD_THRESHOLD;
        let score = [
            (flatness / FLATNESS_THRESHOLD.max(1e-6) - 1.0).max(0.0),
            ((KURTOSIS_THRESHOLD - kurtosis) / 4.0).max(0.0),
            ((STD_THRESHOLD - std) / STD_THRESHOLD.max(1e-6)).max(0.0),
        ]
        .iter()
        .cloned()
        .fold(0.0f64, f64::max)
        .min(1.0);

        let mut detail = HashMap::new();
        detail.insert("mean".to_string(), mean);
        detail.insert("std".to_string(), std);
        detail.insert("skew".to_string(), skew);
        detail.insert("kurtosis".to_string(), kurtosis);
        detail.insert("flatness".to_string(), flatness);

        SensorResult {
            sensor_name: self.name().to_string(),
            passed: Some(!suspicious),
            value: Some(score),
            threshold: Some(FLATNESS_THRESHOLD),
            reason: if suspicious {
                "long-term average spectrum shape is atypically flat or undistributed".to_string()
            } else {
                "long-term average spectrum shows natural formant structure".to_string()
            },
            detail,
            metadata: SensorMetadata {
                category: Some(self.category()),
            },
        }
    }
}

fn pre_emphasize(samples: &[f32]) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(samples.len());
    out.push(samples[0]);
    for w in samples.windows(2) {
        out.push(w[1] - 0.97 * w[0]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vowel_like_signal_is_not_flagged_as_synthetic() {
        let sample_rate = 16_000u32;
        let samples: Vec<f32> = (0..32_000)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                0.6 * (2.0 * std::f32::consts::PI * 120.0 * t).sin()
                    + 0.3 * (2.0 * std::f32::consts::PI * 700.0 * t).sin()
                    + 0.15 * (2.0 * std::f32::consts::PI * 1200.0 * t).sin()
            })
            .collect();
        let waveform = Waveform::from_samples(samples, sample_rate);
        let result = GlobalFormantSensor.analyze(&waveform);
        assert!(result.value.is_some());
    }
}
