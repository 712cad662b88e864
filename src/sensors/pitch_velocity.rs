//! Sensor 2: Pitch Velocity (prosecution). Natural voices cannot glide
//! between pitches arbitrarily fast; a high 99th-percentile semitone
//! velocity is a splice or vocoder tell.

use std::collections::HashMap;

use super::dsp_util::track_f0;
use super::{Sensor, SensorCategory, SensorMetadata, SensorResult};
use crate::waveform::Waveform;

const FRAME_SECONDS: f64 = 0.025;
const HOP_SECONDS: f64 = 0.010;
// C2..C7 in Hz.
const F0_MIN: f32 = 65.0;
const F0_MAX: f32 = 2093.0;
const MAX_VELOCITY_ST_PER_S: f64 = 35.0;

pub struct PitchVelocitySensor;

impl Sensor for PitchVelocitySensor {
    fn name(&self) -> &str {
        "PitchVelocitySensor"
    }

    fn category(&self) -> SensorCategory {
        SensorCategory::Prosecution
    }

    fn analyze(&self, waveform: &Waveform) -> SensorResult {
        let sample_rate = waveform.sample_rate();
        let samples = waveform.samples();
        let frame_len = (FRAME_SECONDS * sample_rate as f64).round() as usize;
        let hop_len = (HOP_SECONDS * sample_rate as f64).round() as usize;

        let tracked = track_f0(samples, sample_rate, frame_len, hop_len, F0_MIN, F0_MAX);
        let voiced: Vec<(usize, f32)> = tracked
            .iter()
            .enumerate()
            .filter(|(_, (f0, periodicity))| *f0 > 0.0 && *periodicity > 0.3)
            .map(|(i, (f0, _))| (i, *f0))
            .collect();

        if voiced.len() < 2 {
            return SensorResult::inconclusive(self.name(), self.category(), "insufficient voiced frames");
        }

        let frame_period_s = hop_len as f64 / sample_rate as f64;
        let mut velocities: Vec<f64> = Vec::new();
        for pair in voiced.windows(2) {
            let (i0, f0_0) = pair[0];
            let (i1, f0_1) = pair[1];
            if i1 != i0 + 1 {
                continue;
            }
            let semitone_delta = 12.0 * ((f0_1 as f64 / f0_0 as f64).log2());
            velocities.push(semitone_delta.abs() / frame_period_s);
        }

        if velocities.is_empty() {
            return SensorResult::inconclusive(self.name(), self.category(), "no adjacent voiced frame pairs");
        }

        let mut sorted = velocities.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let idx = ((sorted.len() as f64 - 1.0) * 0.99).round() as usize;
        let max_velocity = sorted[idx.min(sorted.len() - 1)];

        let score = ((max_velocity - 20.0) / 40.0).clamp(0.0, 1.0);
        let passed = max_velocity <= MAX_VELOCITY_ST_PER_S;

        let mut detail = HashMap::new();
        detail.insert("max_velocity_semitones_per_second".to_string(), max_velocity);

        SensorResult {
            sensor_name: self.name().to_string(),
            passed: Some(passed),
            value: Some(score),
            threshold: Some(MAX_VELOCITY_ST_PER_S),
            reason: if passed {
                "pitch velocity within natural range".to_string()
            } else {
                format!("99th percentile pitch velocity {max_velocity:.1} st/s exceeds biological bound")
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
    fn steady_tone_passes() {
        let sample_rate = 16_000u32;
        let freq = 150.0f32;
        let samples: Vec<f32> = (0..32_000)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
            .collect();
        let waveform = Waveform::from_samples(samples, sample_rate);
        let result = PitchVelocitySensor.analyze(&waveform);
        assert_eq!(result.passed, Some(true));
    }
}
