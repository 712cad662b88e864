//! Sensor 1: Breath / Max-Phonation (defense). Segments speech with the
//! shared adaptive VAD and fails when a voiced run implies lung capacity no
//! human speaker has.

use std::collections::HashMap;

use super::dsp_util::adaptive_vad;
use super::{Sensor, SensorCategory, SensorMetadata, SensorResult};
use crate::waveform::Waveform;

const FRAME_SECONDS: f64 = 0.025;
const HOP_SECONDS: f64 = 0.010;
const NOISE_FLOOR_DB: f64 = -60.0;
const MIN_SEGMENT_S: f64 = 0.1;
const MERGE_GAP_S: f64 = 0.2;
const MAX_SEGMENT_SECONDS: f64 = 14.0;
const MAX_UNBROKEN_RUN_SECONDS: f64 = 15.0;

pub struct BreathSensor;

impl Sensor for BreathSensor {
    fn name(&self) -> &str {
        "BreathSensor"
    }

    fn category(&self) -> SensorCategory {
        SensorCategory::Defense
    }

    fn analyze(&self, waveform: &Waveform) -> SensorResult {
        let sample_rate = waveform.sample_rate();
        let samples = waveform.samples();
        if samples.is_empty() {
            return SensorResult::inconclusive(self.name(), self.category(), "empty audio input");
        }

        let vad = adaptive_vad(samples, sample_rate, FRAME_SECONDS, HOP_SECONDS, NOISE_FLOOR_DB);
        let segments = vad.segments(sample_rate, MIN_SEGMENT_S, MERGE_GAP_S);

        if segments.is_empty() {
            return SensorResult::inconclusive(self.name(), self.category(), "no voiced segments detected");
        }

        let longest_seconds = segments
            .iter()
            .map(|(s, e)| (e - s) as f64 * vad.hop_len as f64 / sample_rate as f64)
            .fold(0.0f64, f64::max);

        let violates_max_segment = longest_seconds > MAX_SEGMENT_SECONDS;
        let violates_unbroken_run = longest_seconds > MAX_UNBROKEN_RUN_SECONDS;
        let violated = violates_max_segment || violates_unbroken_run;

        let deviation = (longest_seconds - MAX_SEGMENT_SECONDS).max(0.0);
        let score = 1.0 / (1.0 + (-deviation).exp());

        let mut detail = HashMap::new();
        detail.insert("longest_segment_seconds".to_string(), longest_seconds);
        detail.insert("num_segments".to_string(), segments.len() as f64);

        SensorResult {
            sensor_name: self.name().to_string(),
            passed: Some(!violated),
            value: Some(score),
            threshold: Some(MAX_SEGMENT_SECONDS),
            reason: if violated {
                format!("longest voiced segment {longest_seconds:.2}s exceeds biological limit")
            } else {
                "phonation lengths within biological bounds".to_string()
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
    fn short_natural_phonation_passes() {
        let mut samples = vec![0.0f32; 32_000];
        for s in samples.iter_mut().skip(4_000).take(8_000) {
            *s = 0.3;
        }
        let waveform = Waveform::from_samples(samples, 16_000);
        let result = BreathSensor.analyze(&waveform);
        assert_eq!(result.passed, Some(true));
    }

    #[test]
    fn unbroken_sixteen_second_run_fails() {
        let sample_rate = 16_000u32;
        let samples = vec![0.3f32; 16 * sample_rate as usize];
        let waveform = Waveform::from_samples(samples, sample_rate);
        let result = BreathSensor.analyze(&waveform);
        assert_eq!(result.passed, Some(false));
    }
}
