//! Sensor 10: Dynamic Range / Crest Factor (defense). Over-compressed or
//! normalized synthetic audio tends to have an unnaturally low peak-to-RMS
//! ratio.

use std::collections::HashMap;

use super::{Sensor, SensorCategory, SensorMetadata, SensorResult};
use crate::waveform::Waveform;

const MIN_CREST_FACTOR: f64 = 5.0;

pub struct DynamicRangeSensor;

impl Sensor for DynamicRangeSensor {
    fn name(&self) -> &str {
        "DynamicRangeSensor"
    }

    fn category(&self) -> SensorCategory {
        SensorCategory::Defense
    }

    fn analyze(&self, waveform: &Waveform) -> SensorResult {
        let samples = waveform.samples();
        if samples.is_empty() {
            return SensorResult::inconclusive(self.name(), self.category(), "empty audio input");
        }

        let peak = samples.iter().map(|s| s.abs() as f64).fold(0.0, f64::max);
        let rms = (samples.iter().map(|&s| (s as f64).powi(2)).sum::<f64>() / samples.len() as f64).sqrt();

        if rms < 1e-10 {
            // Pure silence: neither a defensible nor a suspicious signal.
            return SensorResult {
                sensor_name: self.name().to_string(),
                passed: Some(true),
                value: Some(0.0),
                threshold: Some(MIN_CREST_FACTOR),
                reason: "silent input, crest factor undefined".to_string(),
                detail: HashMap::new(),
                metadata: SensorMetadata {
                    category: Some(self.category()),
                },
            };
        }

        let crest_factor = peak / rms;
        let passed = crest_factor >= MIN_CREST_FACTOR;
        let score = (1.0 - crest_factor / MIN_CREST_FACTOR).clamp(0.0, 1.0);

        let mut detail = HashMap::new();
        detail.insert("crest_factor".to_string(), crest_factor);

        SensorResult {
            sensor_name: self.name().to_string(),
            passed: Some(passed),
            value: Some(score),
            threshold: Some(MIN_CREST_FACTOR),
            reason: if passed {
                format!("crest factor {crest_factor:.2} within natural range")
            } else {
                format!("crest factor {crest_factor:.2} below natural minimum")
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
    fn heavily_clipped_signal_fails() {
        let samples = vec![1.0f32, -1.0, 1.0, -1.0, 1.0, -1.0, 1.0, -1.0];
        let waveform = Waveform::from_samples(samples, 16_000);
        let result = DynamicRangeSensor.analyze(&waveform);
        assert_eq!(result.passed, Some(false));
    }

    #[test]
    fn silence_passes_as_sentinel() {
        let waveform = Waveform::from_samples(vec![0.0f32; 1000], 16_000);
        let result = DynamicRangeSensor.analyze(&waveform);
        assert_eq!(result.passed, Some(true));
    }
}
