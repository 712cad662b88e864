//! Sensor 3: Glottal Inertia (prosecution). Real vocal folds take finite
//! time to start vibrating and the onset is phase-chaotic; a suspiciously
//! fast, phase-clean onset or an instant offset decay is a synthesis tell.

use std::collections::HashMap;

use crate::features::spectral::analytic_signal;

use super::{Sensor, SensorCategory, SensorMetadata, SensorResult};
use crate::waveform::Waveform;

const HOP_SECONDS: f64 = 0.0025;
const SILENCE_DB: f64 = -60.0;
const SPEECH_DB: f64 = -20.0;
const ONSET_WINDOW_SECONDS: f64 = 0.050;
const MIN_RISE_TIME_SECONDS: f64 = 0.010;
const PHASE_ENTROPY_THRESHOLD: f64 = 2.5;
const HARD_CUT_DB: f64 = -40.0;
const HARD_CUT_MAX_SECONDS: f64 = 0.010;

pub struct GlottalInertiaSensor;

struct OnsetEvent {
    rise_time_seconds: f64,
    phase_entropy: f64,
}

impl Sensor for GlottalInertiaSensor {
    fn name(&self) -> &str {
        "GlottalInertiaSensor"
    }

    fn category(&self) -> SensorCategory {
        SensorCategory::Prosecution
    }

    fn analyze(&self, waveform: &Waveform) -> SensorResult {
        let sample_rate = waveform.sample_rate();
        let samples = waveform.samples();
        let hop_len = (HOP_SECONDS * sample_rate as f64).round().max(1.0) as usize;

        if samples.len() < hop_len * 4 {
            return SensorResult::inconclusive(self.name(), self.category(), "audio too short for onset analysis");
        }

        let envelope_db = rms_envelope_db(samples, hop_len);
        let onsets = find_onsets(&envelope_db, hop_len, sample_rate, samples);
        let hard_cuts = find_hard_cuts(&envelope_db, hop_len, sample_rate);

        let violations: usize = onsets
            .iter()
            .filter(|o| o.rise_time_seconds < MIN_RISE_TIME_SECONDS && o.phase_entropy <= PHASE_ENTROPY_THRESHOLD)
            .count()
            + hard_cuts;

        let total_events = onsets.len().max(1);
        let score = (violations as f64 / total_events as f64).min(1.0);
        let passed = violations == 0;

        let mut detail = HashMap::new();
        detail.insert("num_onsets".to_string(), onsets.len() as f64);
        detail.insert("num_hard_cuts".to_string(), hard_cuts as f64);
        detail.insert("violations".to_string(), violations as f64);

        SensorResult {
            sensor_name: self.name().to_string(),
            passed: Some(passed),
            value: Some(score),
            threshold: Some(0.0),
            reason: if passed {
                "onset rise times and decay profiles are physically plausible".to_string()
            } else {
                format!("{violations} onset/offset violations detected")
            },
            detail,
            metadata: SensorMetadata {
                category: Some(self.category()),
            },
        }
    }
}

fn rms_envelope_db(samples: &[f32], hop_len: usize) -> Vec<f64> {
    let mut out = Vec::new();
    let mut i = 0;
    while i + hop_len <= samples.len() {
        let frame = &samples[i..i + hop_len];
        let rms = (frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32).sqrt();
        out.push(20.0 * (rms as f64 + 1e-10).log10());
        i += hop_len;
    }
    out
}

fn find_onsets(envelope_db: &[f64], hop_len: usize, sample_rate: u32, samples: &[f32]) -> Vec<OnsetEvent> {
    let window_frames = (ONSET_WINDOW_SECONDS * sample_rate as f64 / hop_len as f64).round().max(1.0) as usize;
    let mut events = Vec::new();
    let mut i = 0;
    while i < envelope_db.len() {
        if envelope_db[i] < SILENCE_DB {
            let mut j = i + 1;
            let limit = (i + window_frames).min(envelope_db.len());
            while j < limit {
                if envelope_db[j] >= SPEECH_DB {
                    let rise_time_seconds = (j - i) as f64 * hop_len as f64 / sample_rate as f64;
                    let onset_sample = i * hop_len;
                    let analysis_len = (0.020 * sample_rate as f64).round() as usize;
                    let end = (onset_sample + analysis_len).min(samples.len());
                    let phase_entropy = if end > onset_sample + 32 {
                        onset_phase_entropy(&samples[onset_sample..end])
                    } else {
                        PHASE_ENTROPY_THRESHOLD + 1.0
                    };
                    events.push(OnsetEvent {
                        rise_time_seconds,
                        phase_entropy,
                    });
                    break;
                }
                j += 1;
            }
            i = j.max(i + 1);
        } else {
            i += 1;
        }
    }
    events
}

fn find_hard_cuts(envelope_db: &[f64], hop_len: usize, sample_rate: u32) -> usize {
    let max_frames = (HARD_CUT_MAX_SECONDS * sample_rate as f64 / hop_len as f64).round().max(1.0) as usize;
    let mut count = 0;
    let mut i = 0;
    while i < envelope_db.len() {
        if envelope_db[i] > HARD_CUT_DB {
            let limit = (i + max_frames).min(envelope_db.len());
            for j in (i + 1)..limit {
                if envelope_db[j] < SILENCE_DB {
                    count += 1;
                    break;
                }
            }
        }
        i += 1;
    }
    count
}

/// Shannon entropy (base-2) of a histogram of the phase derivative over the
/// given window. Natural glottal bursts are phase-chaotic (high entropy);
/// an unnaturally clean onset clusters phase tightly (low entropy).
fn onset_phase_entropy(window: &[f32]) -> f64 {
    let analytic = analytic_signal(window);
    if analytic.len() < 2 {
        return 0.0;
    }
    let phases: Vec<f32> = analytic.iter().map(|c| c.arg()).collect();
    let derivative: Vec<f64> = phases.windows(2).map(|w| (w[1] - w[0]) as f64).collect();
    if derivative.is_empty() {
        return 0.0;
    }

    const BINS: usize = 16;
    let min = derivative.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = derivative.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let range = (max - min).max(1e-9);

    let mut histogram = vec![0usize; BINS];
    for &d in &derivative {
        let bin = (((d - min) / range) * (BINS as f64 - 1.0)).round() as usize;
        histogram[bin.min(BINS - 1)] += 1;
    }

    let total = derivative.len() as f64;
    histogram
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / total;
            -p * p.log2()
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_has_no_onsets() {
        let waveform = Waveform::from_samples(vec![0.0f32; 16_000], 16_000);
        let result = GlottalInertiaSensor.analyze(&waveform);
        assert_eq!(result.detail.get("num_onsets"), Some(&0.0));
    }

    #[test]
    fn instant_jump_to_full_level_is_flagged() {
        let mut samples = vec![0.0001f32; 32_000];
        for s in samples.iter_mut().skip(8_000) {
            *s = 0.5;
        }
        let waveform = Waveform::from_samples(samples, 16_000);
        let result = GlottalInertiaSensor.analyze(&waveform);
        assert!(result.value.unwrap() >= 0.0);
    }
}
