//! Shared helpers used by several physics sensors: frame-level RMS energy,
//! an adaptive-threshold VAD, and an autocorrelation F0 tracker. Generalized
//! from the donor's fixed-block `dsp::utils::estimate_f0_autocorr` to the
//! variable-length, speech-focused ranges the sensors need.

use crate::dsp::utils::frame_rms;

/// One voiced-or-silent decision per frame, and the frame geometry used to
/// produce it, so callers can convert frame indices back to seconds.
pub struct VadResult {
    pub voiced: Vec<bool>,
    pub frame_len: usize,
    pub hop_len: usize,
}

impl VadResult {
    pub fn frame_time(&self, index: usize, sample_rate: u32) -> f64 {
        index as f64 * self.hop_len as f64 / sample_rate as f64
    }

    /// Contiguous runs of `true` frames, as (start_frame, end_frame) pairs
    /// with end exclusive, after merge-gap and min-duration filtering.
    pub fn segments(&self, sample_rate: u32, min_duration_s: f64, merge_gap_s: f64) -> Vec<(usize, usize)> {
        let hop_frames_per_second = sample_rate as f64 / self.hop_len as f64;
        let min_frames = (min_duration_s * hop_frames_per_second).round() as usize;
        let merge_gap_frames = (merge_gap_s * hop_frames_per_second).round() as usize;

        let mut raw = Vec::new();
        let mut start: Option<usize> = None;
        for (i, &v) in self.voiced.iter().enumerate() {
            match (v, start) {
                (true, None) => start = Some(i),
                (false, Some(s)) => {
                    raw.push((s, i));
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = start {
            raw.push((s, self.voiced.len()));
        }

        let mut merged: Vec<(usize, usize)> = Vec::new();
        for (s, e) in raw {
            if let Some(last) = merged.last_mut() {
                if s.saturating_sub(last.1) <= merge_gap_frames {
                    last.1 = e;
                    continue;
                }
            }
            merged.push((s, e));
        }

        merged.into_iter().filter(|(s, e)| e - s >= min_frames).collect()
    }
}

/// Energy-based VAD with adaptive thresholding: noise floor is the 10th
/// percentile of frame RMS in dB; if the dynamic range exceeds 3 dB the
/// threshold rises above the floor by 0.3 of the range. Decisions are
/// smoothed with a 5-frame median filter.
pub fn adaptive_vad(samples: &[f32], sample_rate: u32, frame_seconds: f64, hop_seconds: f64, floor_db: f64) -> VadResult {
    let frame_len = (frame_seconds * sample_rate as f64).round().max(1.0) as usize;
    let hop_len = (hop_seconds * sample_rate as f64).round().max(1.0) as usize;

    if samples.len() < frame_len {
        return VadResult {
            voiced: Vec::new(),
            frame_len,
            hop_len,
        };
    }

    let mut energies_db = Vec::new();
    let mut start = 0;
    while start + frame_len <= samples.len() {
        let rms = frame_rms(&samples[start..start + frame_len]);
        energies_db.push(20.0 * (rms as f64 + 1e-10).log10());
        start += hop_len;
    }

    if energies_db.is_empty() {
        return VadResult {
            voiced: Vec::new(),
            frame_len,
            hop_len,
        };
    }

    let mut sorted = energies_db.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let noise_floor = percentile(&sorted, 0.10);
    let max_db = sorted.last().copied().unwrap_or(noise_floor);
    let range = max_db - noise_floor;
    let threshold = if range > 3.0 {
        floor_db.max(noise_floor + 0.3 * range)
    } else {
        floor_db
    };

    let raw_voiced: Vec<bool> = energies_db.iter().map(|&e| e > threshold).collect();
    let voiced = median_smooth(&raw_voiced, 5);

    VadResult {
        voiced,
        frame_len,
        hop_len,
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn median_smooth(values: &[bool], window: usize) -> Vec<bool> {
    if values.is_empty() || window < 2 {
        return values.to_vec();
    }
    let half = window / 2;
    (0..values.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(values.len());
            let count_true = values[lo..hi].iter().filter(|&&v| v).count();
            count_true * 2 > (hi - lo)
        })
        .collect()
}

/// Per-frame F0 in Hz via autocorrelation, restricted to `[f0_min, f0_max]`
/// (defaults to the standard speech range when unspecified by the caller).
/// Returns `(f0_hz, periodicity)`; unvoiced frames are `f0_hz == 0.0`.
pub fn track_f0(
    samples: &[f32],
    sample_rate: u32,
    frame_len: usize,
    hop_len: usize,
    f0_min: f32,
    f0_max: f32,
) -> Vec<(f32, f32)> {
    if samples.len() < frame_len {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut start = 0;
    while start + frame_len <= samples.len() {
        let frame = &samples[start..start + frame_len];
        let (periodicity, f0) = estimate_f0_autocorr_ranged(frame, sample_rate as f32, f0_min, f0_max);
        out.push((f0, periodicity));
        start += hop_len;
    }
    out
}

/// Same algorithm as [`crate::dsp::utils::estimate_f0_autocorr`] but with a
/// caller-supplied F0 range, needed because sensors cover both the
/// voice-range `[C2, C7]` tracker and the narrower 70-400 Hz prosodic range.
pub fn estimate_f0_autocorr_ranged(frame: &[f32], sample_rate: f32, f0_min: f32, f0_max: f32) -> (f32, f32) {
    let n = frame.len();
    if n < 32 {
        return (0.0, 0.0);
    }

    let mut mean = 0.0f32;
    for &v in frame {
        mean += v;
    }
    mean /= n as f32;

    let mut x: Vec<f32> = Vec::with_capacity(n);
    let mut prev = 0.0f32;
    for &v in frame {
        let d = v - mean;
        let y = d - 0.97 * prev;
        prev = d;
        x.push(y);
    }

    let e0: f32 = x.iter().map(|v| v * v).sum();
    if e0 < 1e-6 {
        return (0.0, 0.0);
    }

    let lag_min = (sample_rate / f0_max).floor().max(1.0) as usize;
    let lag_max = (sample_rate / f0_min).ceil() as usize;
    let lag_min = lag_min.clamp(1, n / 2);
    let lag_max = lag_max.clamp(lag_min + 1, n / 2);

    let mut best_lag = 0usize;
    let mut best = 0.0f32;
    for lag in lag_min..=lag_max {
        let mut s = 0.0f32;
        let mut e1 = 0.0f32;
        let mut e2 = 0.0f32;
        for i in 0..(n - lag) {
            let a = x[i];
            let b = x[i + lag];
            s += a * b;
            e1 += a * a;
            e2 += b * b;
        }
        let denom = (e1 * e2).sqrt().max(1e-12);
        let r = (s / denom).clamp(-1.0, 1.0);
        if r > best {
            best = r;
            best_lag = lag;
        }
    }

    let periodicity = best.clamp(0.0, 1.0);
    let f0 = if best_lag > 0 {
        sample_rate / best_lag as f32
    } else {
        0.0
    };
    (periodicity, f0)
}

/// 20·log10(top-50% RMS / bottom-20% RMS) over per-frame energies, used by
/// the prosodic continuity sensor's SNR gate.
pub fn estimate_snr_db(frame_rms_values: &[f64]) -> f64 {
    if frame_rms_values.len() < 5 {
        return 0.0;
    }
    let mut sorted = frame_rms_values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = sorted.len();
    let top_start = n / 2;
    let bottom_end = (n as f64 * 0.2).round() as usize;
    let bottom_end = bottom_end.max(1).min(n);

    let top: f64 = sorted[top_start..].iter().sum::<f64>() / (n - top_start).max(1) as f64;
    let bottom: f64 = sorted[..bottom_end].iter().sum::<f64>() / bottom_end as f64;
    20.0 * ((top + 1e-10) / (bottom + 1e-10)).log10()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

/// z-score of the differences between adjacent elements.
pub fn adjacent_zscore(values: &[f64]) -> Vec<f64> {
    if values.len() < 2 {
        return Vec::new();
    }
    let diffs: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();
    let m = mean(&diffs);
    let s = std_dev(&diffs).max(1e-12);
    diffs.iter().map(|d| (d - m) / s).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vad_marks_loud_region_voiced() {
        let mut samples = vec![0.0f32; 16_000];
        for s in samples.iter_mut().skip(4000).take(4000) {
            *s = 0.3;
        }
        let vad = adaptive_vad(&samples, 16_000, 0.025, 0.010, -60.0);
        assert!(vad.voiced.iter().any(|&v| v));
    }

    #[test]
    fn segments_merge_across_small_gaps() {
        let vad = VadResult {
            voiced: vec![true, true, false, true, true],
            frame_len: 400,
            hop_len: 160,
        };
        let segments = vad.segments(16_000, 0.0, 1.0);
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn sine_wave_f0_is_close_to_known_frequency() {
        let sample_rate = 16_000.0f32;
        let freq = 150.0f32;
        let frame: Vec<f32> = (0..1600)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate).sin())
            .collect();
        let (periodicity, f0) = estimate_f0_autocorr_ranged(&frame, sample_rate, 65.0, 2100.0);
        assert!(periodicity > 0.8);
        assert!((f0 - freq).abs() < 5.0);
    }
}
