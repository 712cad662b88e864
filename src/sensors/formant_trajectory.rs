//! Sensor 5: Formant Trajectory (prosecution). Tracks the first three
//! formants frame-to-frame via cepstral-envelope peak picking — never via
//! linear-prediction residuals — and fails when formants jump further
//! between adjacent frames than a vocal tract can physically move.

use std::collections::HashMap;

use crate::features::spectral;

use super::dsp_util::track_f0;
use super::{Sensor, SensorCategory, SensorMetadata, SensorResult};
use crate::waveform::Waveform;

const FRAME_SECONDS: f64 = 0.030;
const HOP_SECONDS: f64 = 0.015;
const N_FFT: usize = 1024;
const LIFTER: usize = 20;
const F0_MIN: f32 = 65.0;
const F0_MAX: f32 = 2093.0;
const DELTA_F1_HZ: f64 = 220.0;
const DELTA_F2_HZ: f64 = 176.0;
const DELTA_F3_HZ: f64 = 132.0;
const MAX_VIOLATION_RATIO: f64 = 0.25;

pub struct FormantTrajectorySensor;

impl Sensor for FormantTrajectorySensor {
    fn name(&self) -> &str {
        "FormantTrajectorySensor"
    }

    fn category(&self) -> SensorCategory {
        SensorCategory::Prosecution
    }

    fn analyze(&self, waveform: &Waveform) -> SensorResult {
        let sample_rate = waveform.sample_rate();
        let samples = waveform.samples();
        let frame_len = (FRAME_SECONDS * sample_rate as f64).round() as usize;
        let hop_len = (HOP_SECONDS * sample_rate as f64).round() as usize;

        if samples.len() < frame_len.max(N_FFT) {
            return SensorResult::inconclusive(self.name(), self.category(), "audio too short for formant tracking");
        }

        let f0_track = track_f0(samples, sample_rate, frame_len, hop_len, F0_MIN, F0_MAX);
        let formants = track_formants(samples, sample_rate, frame_len, hop_len);

        let voiced_formants: Vec<[f64; 3]> = formants
            .iter()
            .zip(&f0_track)
            .filter(|(_, (f0, periodicity))| *f0 > 0.0 && *periodicity > 0.3)
            .map(|(f, _)| *f)
            .collect();

        if voiced_formants.len() < 2 {
            return SensorResult::inconclusive(self.name(), self.category(), "insufficient voiced frames for formant tracking");
        }

        let mut violations = 0usize;
        for pair in voiced_formants.windows(2) {
            let d1 = (pair[1][0] - pair[0][0]).abs();
            let d2 = (pair[1][1] - pair[0][1]).abs();
            let d3 = (pair[1][2] - pair[0][2]).abs();
            if d1 > DELTA_F1_HZ || d2 > DELTA_F2_HZ || d3 > DELTA_F3_HZ {
                violations += 1;
            }
        }

        let total_pairs = voiced_formants.len() - 1;
        let ratio = violations as f64 / total_pairs.max(1) as f64;
        let passed = ratio <= MAX_VIOLATION_RATIO;

        let mut detail = HashMap::new();
        detail.insert("violation_ratio".to_string(), ratio);
        detail.insert("num_voiced_frames".to_string(), voiced_formants.len() as f64);

        SensorResult {
            sensor_name: self.name().to_string(),
            passed: Some(passed),
            value: Some(ratio.min(1.0)),
            threshold: Some(MAX_VIOLATION_RATIO),
            reason: if passed {
                "formant trajectories move within articulatory bounds".to_string()
            } else {
                format!("{:.1}% of frame pairs show implausible formant jumps", ratio * 100.0)
            },
            detail,
            metadata: SensorMetadata {
                category: Some(self.category()),
            },
        }
    }
}

fn track_formants(samples: &[f32], sample_rate: u32, frame_len: usize, hop_len: usize) -> Vec<[f64; 3]> {
    let mut out = Vec::new();
    let mut start = 0;
    while start + frame_len <= samples.len() {
        let frame = &samples[start..start + frame_len];
        let magnitude = spectral::stft_magnitude(frame, N_FFT, frame_len, frame_len);
        let formants = magnitude
            .first()
            .map(|m| {
                let log_mag: Vec<f32> = m.iter().map(|&v| (v + 1e-10).ln()).collect();
                let envelope = spectral::cepstral_envelope(&log_mag, LIFTER);
                pick_formants(&envelope, sample_rate, N_FFT)
            })
            .unwrap_or([0.0; 3]);
        out.push(formants);
        start += hop_len;
    }
    out
}

/// Picks the first three local maxima of the cepstral envelope above
/// 200 Hz as F1, F2, F3.
fn pick_formants(envelope: &[f32], sample_rate: u32, n_fft: usize) -> [f64; 3] {
    let mut peaks = Vec::new();
    let min_bin = ((200.0 * n_fft as f32) / sample_rate as f32).round() as usize;
    for i in min_bin.max(1)..envelope.len().saturating_sub(1) {
        if envelope[i] > envelope[i - 1] && envelope[i] > envelope[i + 1] {
            let freq = i as f64 * sample_rate as f64 / n_fft as f64;
            peaks.push(freq);
        }
        if peaks.len() >= 3 {
            break;
        }
    }
    while peaks.len() < 3 {
        peaks.push(0.0);
    }
    [peaks[0], peaks[1], peaks[2]]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steady_vowel_has_stable_formants() {
        let sample_rate = 16_000u32;
        let samples: Vec<f32> = (0..32_000)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                0.5 * (2.0 * std::f32::consts::PI * 120.0 * t).sin()
                    + 0.3 * (2.0 * std::f32::consts::PI * 700.0 * t).sin()
                    + 0.2 * (2.0 * std::f32::consts::PI * 1500.0 * t).sin()
            })
            .collect();
        let waveform = Waveform::from_samples(samples, sample_rate);
        let result = FormantTrajectorySensor.analyze(&waveform);
        assert!(result.value.is_some());
    }
}
