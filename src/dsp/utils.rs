//! Small numeric helpers shared across the DSP-heavy parts of the crate.
//! `frame_rms` backs the adaptive VAD; `estimate_f0_autocorr` is the
//! fixed-range autocorrelation pitch estimator the sensors' ranged version
//! (`sensors::dsp_util::estimate_f0_autocorr_ranged`) was generalized from.

pub fn frame_rms(x: &[f32]) -> f32 {
    let mut s = 0.0f32;
    for &v in x {
        s += v * v;
    }
    (s / (x.len().max(1) as f32)).sqrt()
}

/// Autocorrelation-based F0 estimation over the standard speech range
/// (70-320 Hz). Returns `(periodicity 0..1, f0_hz)`.
pub fn estimate_f0_autocorr(frame: &[f32], sample_rate: f32) -> (f32, f32) {
    let n = frame.len();
    if n < 128 {
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

    let f0_min = 70.0;
    let f0_max = 320.0;
    let lag_min = (sample_rate / f0_max).floor() as usize;
    let lag_max = (sample_rate / f0_min).ceil() as usize;

    let lag_min = lag_min.clamp(16, n / 2);
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rms_of_constant_signal() {
        let x = vec![0.5f32; 100];
        approx::assert_abs_diff_eq!(frame_rms(&x), 0.5, epsilon = 1e-6);
    }

    #[test]
    fn frame_rms_of_empty_is_zero() {
        assert_eq!(frame_rms(&[]), 0.0);
    }

    #[test]
    fn sine_wave_f0_is_close_to_known_frequency() {
        let sample_rate = 16_000.0f32;
        let freq = 150.0f32;
        let frame: Vec<f32> = (0..1600)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate).sin())
            .collect();
        let (periodicity, f0) = estimate_f0_autocorr(&frame, sample_rate);
        assert!(periodicity > 0.8);
        assert!((f0 - freq).abs() < 5.0);
    }
}
