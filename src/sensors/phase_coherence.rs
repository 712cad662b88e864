//! Sensor 6: Phase Coherence (prosecution). An unnaturally low variance in
//! the instantaneous-phase derivative is a textbook vocoder artifact — real
//! speech phase wanders, a synthetic tone holds an almost perfectly constant
//! instantaneous frequency.
//!
//! `value` stores the coherence reading itself (`1/(1+σ)`), which rises
//! toward 1 as phase gets more artificially perfect, so higher `value`
//! consistently means "more suspicious" across every sensor the fusion
//! engine's `risk_score = max(value)` reduces over.

use std::collections::HashMap;

use crate::features::spectral::{analytic_signal, instantaneous_phase};

use super::{Sensor, SensorCategory, SensorMetadata, SensorResult};
use crate::waveform::Waveform;

const COHERENCE_FAIL_THRESHOLD: f64 = 0.4;

pub struct PhaseCoherenceSensor;

impl Sensor for PhaseCoherenceSensor {
    fn name(&self) -> &str {
        "PhaseCoherenceSensor"
    }

    fn category(&self) -> SensorCategory {
        SensorCategory::Prosecution
    }

    fn analyze(&self, waveform: &Waveform) -> SensorResult {
        let samples = waveform.samples();
        if samples.len() < 64 {
            return SensorResult::inconclusive(self.name(), self.category(), "audio too short for phase analysis");
        }

        let analytic = analytic_signal(samples);
        let phase = instantaneous_phase(&analytic);
        let diffs: Vec<f64> = phase.windows(2).map(|w| unwrap_diff(w[0], w[1]) as f64).collect();

        if diffs.is_empty() {
            return SensorResult::inconclusive(self.name(), self.category(), "no phase samples to analyze");
        }

        let mean = diffs.iter().sum::<f64>() / diffs.len() as f64;
        let variance = diffs.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / diffs.len() as f64;
        let std = variance.sqrt();

        let coherence_score = 1.0 / (1.0 + std);
        let passed = coherence_score < COHERENCE_FAIL_THRESHOLD;

        let mut detail = HashMap::new();
        detail.insert("phase_diff_std".to_string(), std);
        detail.insert("coherence_score".to_string(), coherence_score);

        SensorResult {
            sensor_name: self.name().to_string(),
            passed: Some(passed),
            value: Some(coherence_score),
            threshold: Some(COHERENCE_FAIL_THRESHOLD),
            reason: if passed {
                "phase wanders as expected of natural speech".to_string()
            } else {
                format!("phase coherence {coherence_score:.3} is unnaturally high")
            },
            detail,
            metadata: SensorMetadata {
                category: Some(self.category()),
            },
        }
    }
}

fn unwrap_diff(a: f32, b: f32) -> f32 {
    let raw = b - a;
    raw.sin().atan2(raw.cos())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pure_sine_has_near_zero_phase_variance_and_fails() {
        let sample_rate = 16_000u32;
        let samples: Vec<f32> = (0..8_000)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / sample_rate as f32).sin())
            .collect();
        let waveform = Waveform::from_samples(samples, sample_rate);
        let result = PhaseCoherenceSensor.analyze(&waveform);
        // A pure tone is the maximally-coherent case: value should sit near 1,
        // and the sensor should flag it as unnaturally perfect phase.
        assert!(result.value.unwrap() > 0.5);
        assert_eq!(result.passed, Some(false));
    }
}
