//! Sensor 9: Digital Silence (prosecution). Real recordings always carry
//! some noise floor; perfect mathematical silence or a suspiciously static
//! noise floor both point at digital generation rather than capture.

use std::collections::HashMap;

use super::{Sensor, SensorCategory, SensorMetadata, SensorResult};
use crate::waveform::Waveform;

const FRAME_SECONDS: f64 = 0.025;
const HOP_SECONDS: f64 = 0.010;
const PERFECT_SILENCE_DBFS: f64 = -120.0;
const VARIANCE_FLOOR: f64 = 1e-8;

pub struct DigitalSilenceSensor;

impl Sensor for DigitalSilenceSensor {
    fn name(&self) -> &str {
        "DigitalSilenceSensor"
    }

    fn category(&self) -> SensorCategory {
        SensorCategory::Prosecution
    }

    fn analyze(&self, waveform: &Waveform) -> SensorResult {
        let sample_rate = waveform.sample_rate();
        let samples = waveform.samples();
        let frame_len = (FRAME_SECONDS * sample_rate as f64).round().max(1.0) as usize;
        let hop_len = (HOP_SECONDS * sample_rate as f64).round().max(1.0) as usize;

        if samples.len() < frame_len {
            return SensorResult::inconclusive(self.name(), self.category(), "audio too short for silence analysis");
        }

        let mut energies = Vec::new();
        let mut start = 0;
        while start + frame_len <= samples.len() {
            let frame = &samples[start..start + frame_len];
            let energy = frame.iter().map(|&s| (s as f64).powi(2)).sum::<f64>() / frame_len as f64;
            energies.push(energy);
            start += hop_len;
        }

        let perfect_silence_frames = energies
            .iter()
            .filter(|&&e| 10.0 * (e + 1e-20).log10() < PERFECT_SILENCE_DBFS)
            .count();

        let mut sorted = energies.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let quietest_count = (sorted.len() as f64 * 0.10).ceil().max(1.0) as usize;
        let quietest = &sorted[..quietest_count.min(sorted.len())];
        let mean = quietest.iter().sum::<f64>() / quietest.len() as f64;
        let variance = quietest.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / quietest.len() as f64;

        let has_perfect_silence = perfect_silence_frames > 0;
        let static_noise_floor = variance < VARIANCE_FLOOR;
        let suspicious = has_perfect_silence || static_noise_floor;

        let silence_component = (perfect_silence_frames as f64 / energies.len() as f64).min(1.0);
        let variance_component = if static_noise_floor { 1.0 } else { 0.0 };
        let score = (silence_component + variance_component).min(1.0);

        let mut detail = HashMap::new();
        detail.insert("perfect_silence_frames".to_string(), perfect_silence_frames as f64);
        detail.insert("quietest_decile_variance".to_string(), variance);

        SensorResult {
            sensor_name: self.name().to_string(),
            passed: Some(!suspicious),
            value: Some(score),
            threshold: Some(VARIANCE_FLOOR),
            reason: if suspicious {
                "noise floor is unnaturally static or perfectly silent".to_string()
            } else {
                "noise floor shows natural variance".to_string()
            },
            detail,
            metadata: SensorMetadata {
                category: Some(self.category()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_zero_samples_are_flagged() {
        let waveform = Waveform::from_samples(vec![0.0f32; 16_000], 16_000);
        let result = DigitalSilenceSensor.analyze(&waveform);
        assert_eq!(result.passed, Some(false));
    }

    #[test]
    fn dithered_noise_passes() {
        let mut seed = 12345u32;
        let samples: Vec<f32> = (0..16_000)
            .map(|_| {
                seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
                ((seed >> 8) as f32 / u32::MAX as f32 - 0.5) * 0.01
            })
            .collect();
        let waveform = Waveform::from_samples(samples, 16_000);
        let result = DigitalSilenceSensor.analyze(&waveform);
        assert_eq!(result.passed, Some(true));
    }
}
