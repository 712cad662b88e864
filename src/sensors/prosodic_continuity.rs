//! Sensor 7: Prosodic Continuity (prosecution). Natural prosody drifts
//! smoothly; concatenative splicing or frame-level synthesis shows up as a
//! burst of simultaneous breaks across pitch, energy, and timbre.

use std::collections::HashMap;

use crate::dsp::utils::frame_rms;
use crate::features::spectral;

use super::dsp_util::{adaptive_vad, adjacent_zscore, estimate_snr_db, estimate_f0_autocorr_ranged};
use super::{Sensor, SensorCategory, SensorMetadata, SensorResult};
use crate::waveform::Waveform;

const FRAME_SECONDS: f64 = 0.025;
const HOP_SECONDS: f64 = 0.010;
const F0_MIN: f32 = 70.0;
const F0_MAX: f32 = 400.0;
const VOICING_THRESHOLD: f32 = 0.3;
const Z_THRESHOLD: f64 = 3.0;
const MAX_BREAKS_PER_SECOND: f64 = 2.0;
const SNR_GATE_DB: f64 = 10.0;
const N_FFT: usize = 512;

pub struct ProsodicContinuitySensor;

impl Sensor for ProsodicContinuitySensor {
    fn name(&self) -> &str {
        "ProsodicContinuitySensor"
    }

    fn category(&self) -> SensorCategory {
        SensorCategory::Prosecution
    }

    fn analyze(&self, waveform: &Waveform) -> SensorResult {
        let sample_rate = waveform.sample_rate();
        let samples = waveform.samples();
        let frame_len = (FRAME_SECONDS * sample_rate as f64).round() as usize;
        let hop_len = (HOP_SECONDS * sample_rate as f64).round() as usize;

        let vad = adaptive_vad(samples, sample_rate, FRAME_SECONDS, HOP_SECONDS, -60.0);
        let segments = vad.segments(sample_rate, 0.1, 0.2);
        if segments.is_empty() {
            return SensorResult::inconclusive(self.name(), self.category(), "no voiced speech detected");
        }

        let mut rms_values = Vec::new();
        let mut f0_values = Vec::new();
        let mut centroid_values = Vec::new();

        for &(start_frame, end_frame) in &segments {
            for frame_idx in start_frame..end_frame {
                let start = frame_idx * hop_len;
                if start + frame_len > samples.len() {
                    continue;
                }
                let frame = &samples[start..start + frame_len];
                let rms = frame_rms(frame) as f64;
                rms_values.push(rms);

                let (periodicity, f0) = estimate_f0_autocorr_ranged(frame, sample_rate as f32, F0_MIN, F0_MAX);
                if periodicity > VOICING_THRESHOLD && f0 > 0.0 {
                    f0_values.push(f0 as f64);
                }

                let magnitude = spectral::stft_magnitude(frame, N_FFT, frame_len, frame_len);
                if let Some(spec) = magnitude.first() {
                    centroid_values.push(spectral::spectral_centroid(spec, sample_rate, N_FFT) as f64);
                }
            }
        }

        let snr_db = estimate_snr_db(&rms_values);
        if snr_db < SNR_GATE_DB {
            return SensorResult::inconclusive(
                self.name(),
                self.category(),
                format!("SNR {snr_db:.1} dB below {SNR_GATE_DB} dB gate"),
            );
        }

        let speech_duration_s: f64 = segments
            .iter()
            .map(|(s, e)| (e - s) as f64 * hop_len as f64 / sample_rate as f64)
            .sum();
        if speech_duration_s <= 0.0 {
            return SensorResult::inconclusive(self.name(), self.category(), "no speech duration to normalize by");
        }

        let breaks = count_breaks(&f0_values) + count_breaks(&rms_values) + count_breaks(&centroid_values);
        let rate = breaks as f64 / speech_duration_s;
        let passed = rate <= MAX_BREAKS_PER_SECOND;

        let mut detail = HashMap::new();
        detail.insert("breaks_per_second".to_string(), rate);
        detail.insert("snr_db".to_string(), snr_db);

        SensorResult {
            sensor_name: self.name().to_string(),
            passed: Some(passed),
            value: Some((rate / (MAX_BREAKS_PER_SECOND * 2.0)).min(1.0)),
            threshold: Some(MAX_BREAKS_PER_SECOND),
            reason: if passed {
                "pitch, energy, and timbre drift continuously".to_string()
            } else {
                format!("{rate:.2} prosodic breaks/s exceeds natural continuity bound")
            },
            detail,
            metadata: SensorMetadata {
                category: Some(self.category()),
            },
        }
    }
}

fn count_breaks(series: &[f64]) -> usize {
    adjacent_zscore(series).iter().filter(|&&z| z.abs() > Z_THRESHOLD).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_signal_is_gated_by_snr() {
        let waveform = Waveform::from_samples(vec![0.001f32; 32_000], 16_000);
        let result = ProsodicContinuitySensor.analyze(&waveform);
        assert_eq!(result.passed, None);
    }
}
