//! Sensor 11: Bandwidth (informational). Reports the 90%-energy spectral
//! rolloff; the fusion engine uses this, not a pass/fail verdict, to pick
//! between the `default` and `narrowband` weighting profiles.

use std::collections::HashMap;

use crate::features::spectral;

use super::{Sensor, SensorCategory, SensorMetadata, SensorResult};
use crate::waveform::Waveform;

const N_FFT: usize = 2048;
pub const NARROWBAND_ROLLOFF_HZ: f64 = 4000.0;

pub struct BandwidthSensor;

impl Sensor for BandwidthSensor {
    fn name(&self) -> &str {
        "BandwidthSensor"
    }

    fn category(&self) -> SensorCategory {
        SensorCategory::Informational
    }

    fn analyze(&self, waveform: &Waveform) -> SensorResult {
        let sample_rate = waveform.sample_rate();
        let samples = waveform.samples();
        if samples.len() < N_FFT {
            return SensorResult::inconclusive(self.name(), self.category(), "audio too short for bandwidth analysis");
        }

        let frames = spectral::stft_magnitude(samples, N_FFT, N_FFT, N_FFT);
        let rolloff = if frames.is_empty() {
            0.0
        } else {
            frames
                .iter()
                .map(|frame| spectral::spectral_rolloff(frame, sample_rate, N_FFT, 0.9) as f64)
                .sum::<f64>()
                / frames.len() as f64
        };

        let mut detail = HashMap::new();
        detail.insert("rolloff_hz".to_string(), rolloff);

        SensorResult {
            sensor_name: self.name().to_string(),
            passed: None,
            value: Some(rolloff),
            threshold: Some(NARROWBAND_ROLLOFF_HZ),
            reason: format!("90% energy rolloff at {rolloff:.0} Hz"),
            detail,
            metadata: SensorMetadata {
                category: Some(self.category()),
            },
        }
    }
}

/// Picks the fusion weighting profile indicated by a bandwidth reading.
pub fn profile_for_rolloff(rolloff_hz: f64) -> &'static str {
    if rolloff_hz < NARROWBAND_ROLLOFF_HZ {
        "narrowband"
    } else {
        "default"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_pass_filtered_signal_selects_narrowband_profile() {
        let sample_rate = 16_000u32;
        let samples: Vec<f32> = (0..32_000)
            .map(|i| (2.0 * std::f32::consts::PI * 300.0 * i as f32 / sample_rate as f32).sin())
            .collect();
        let waveform = Waveform::from_samples(samples, sample_rate);
        let result = BandwidthSensor.analyze(&waveform);
        let rolloff = result.value.unwrap();
        assert_eq!(profile_for_rolloff(rolloff), "narrowband");
    }
}
