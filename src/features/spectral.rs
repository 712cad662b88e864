//! Shared STFT / cepstrum / DCT machinery used by the feature extractor and
//! by the physics sensors that need a spectral envelope (global formants,
//! formant trajectory). Built on `rustfft`, generalized from the donor's
//! fixed-block real-time DSP (`src/dsp/dtln_core.rs`, `src/dsp/utils.rs`) to
//! arbitrary-length offline framing.

use once_cell::sync::Lazy;
use rustfft::{num_complex::Complex32, Fft, FftPlanner};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Process-wide cache of planned FFTs keyed by `(len, inverse)`. Sensors and
/// the feature extractor both run many short transforms of a handful of
/// fixed lengths (`n_fft`, 2048 for artifact/sensor analysis); replanning
/// `rustfft` for each call is wasted work the donor's real-time path never
/// had to pay since its block size never changed.
static FFT_CACHE: Lazy<Mutex<HashMap<(usize, bool), Arc<dyn Fft<f32>>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn cached_fft(len: usize, inverse: bool) -> Arc<dyn Fft<f32>> {
    let mut cache = FFT_CACHE.lock().expect("fft cache mutex poisoned");
    cache
        .entry((len, inverse))
        .or_insert_with(|| {
            let mut planner = FftPlanner::<f32>::new();
            if inverse {
                planner.plan_fft_inverse(len)
            } else {
                planner.plan_fft_forward(len)
            }
        })
        .clone()
}

/// A Hann-windowed short-time Fourier transform. Frames are `win_length`
/// samples (zero-padded to `n_fft`), hopped by `hop_length`. Returns one
/// magnitude spectrum (length `n_fft/2+1`) per frame, time-major.
pub fn stft_magnitude(samples: &[f32], n_fft: usize, hop_length: usize, win_length: usize) -> Vec<Vec<f32>> {
    if samples.len() < win_length {
        return Vec::new();
    }
    let window = hann_window(win_length);
    let fft = cached_fft(n_fft, false);

    let mut frames = Vec::new();
    let mut start = 0;
    while start + win_length <= samples.len() {
        let mut buffer: Vec<Complex32> = vec![Complex32::new(0.0, 0.0); n_fft];
        for (i, &s) in samples[start..start + win_length].iter().enumerate() {
            buffer[i] = Complex32::new(s * window[i], 0.0);
        }
        fft.process(&mut buffer);
        let half = n_fft / 2 + 1;
        frames.push(buffer[..half].iter().map(|c| c.norm()).collect());
        start += hop_length;
    }
    frames
}

/// Same as [`stft_magnitude`] but keeps phase, returning complex bins.
pub fn stft_complex(samples: &[f32], n_fft: usize, hop_length: usize, win_length: usize) -> Vec<Vec<Complex32>> {
    if samples.len() < win_length {
        return Vec::new();
    }
    let window = hann_window(win_length);
    let fft = cached_fft(n_fft, false);

    let mut frames = Vec::new();
    let mut start = 0;
    while start + win_length <= samples.len() {
        let mut buffer: Vec<Complex32> = vec![Complex32::new(0.0, 0.0); n_fft];
        for (i, &s) in samples[start..start + win_length].iter().enumerate() {
            buffer[i] = Complex32::new(s * window[i], 0.0);
        }
        fft.process(&mut buffer);
        let half = n_fft / 2 + 1;
        frames.push(buffer[..half].to_vec());
        start += hop_length;
    }
    frames
}

pub fn hann_window(len: usize) -> Vec<f32> {
    if len <= 1 {
        return vec![1.0; len];
    }
    (0..len)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / (len - 1) as f32).cos())
        .collect()
}

/// Orthonormal DCT-II along the frequency axis of a (frames, bins) magnitude
/// matrix, keeping the first `n_coeffs` coefficients per frame. Mirrors
/// `scipy.fftpack.dct(..., norm="ortho")`.
pub fn dct2_ortho(log_magnitude: &[Vec<f32>], n_coeffs: usize) -> Vec<Vec<f32>> {
    log_magnitude
        .iter()
        .map(|frame| dct2_ortho_1d(frame, n_coeffs))
        .collect()
}

fn dct2_ortho_1d(input: &[f32], n_coeffs: usize) -> Vec<f32> {
    let n = input.len();
    if n == 0 {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(n_coeffs.min(n));
    for k in 0..n_coeffs.min(n) {
        let mut sum = 0.0f32;
        for (i, &x) in input.iter().enumerate() {
            sum += x * ((std::f32::consts::PI / n as f32) * (i as f32 + 0.5) * k as f32).cos();
        }
        let scale = if k == 0 {
            (1.0 / n as f32).sqrt()
        } else {
            (2.0 / n as f32).sqrt()
        };
        out.push(sum * scale);
    }
    out
}

/// The cepstral (LPC-free) spectral envelope: log magnitude STFT -> inverse
/// FFT to quefrency domain -> zero out everything but the first and last
/// `lifter` coefficients (keeps the slowly-varying envelope, discards pitch
/// harmonics) -> FFT back to the log-magnitude envelope. This is the only
/// sanctioned way to estimate a spectral envelope in this crate — never via
/// linear-prediction residuals.
pub fn cepstral_envelope(log_magnitude_frame: &[f32], lifter: usize) -> Vec<f32> {
    let n = log_magnitude_frame.len();
    if n == 0 {
        return Vec::new();
    }
    // Build a symmetric full spectrum from the one-sided magnitude so the
    // inverse transform is real-valued.
    let full_len = 2 * (n - 1).max(1);
    let mut spectrum: Vec<Complex32> = Vec::with_capacity(full_len);
    for &v in log_magnitude_frame {
        spectrum.push(Complex32::new(v, 0.0));
    }
    for i in (1..n - 1).rev() {
        spectrum.push(Complex32::new(log_magnitude_frame[i], 0.0));
    }
    spectrum.resize(full_len, Complex32::new(0.0, 0.0));

    let ifft = cached_fft(full_len, true);
    ifft.process(&mut spectrum);
    let scale = 1.0 / full_len as f32;
    let mut cepstrum: Vec<f32> = spectrum.iter().map(|c| c.re * scale).collect();

    for (i, c) in cepstrum.iter_mut().enumerate() {
        let keep = i < lifter || i >= full_len - lifter;
        if !keep {
            *c = 0.0;
        }
    }

    let mut buffer: Vec<Complex32> = cepstrum.iter().map(|&v| Complex32::new(v, 0.0)).collect();
    let fft = cached_fft(full_len, false);
    fft.process(&mut buffer);

    buffer[..n].iter().map(|c| c.re).collect()
}

pub fn spectral_centroid(magnitude: &[f32], sample_rate: u32, n_fft: usize) -> f32 {
    let total: f32 = magnitude.iter().sum();
    if total <= 1e-12 {
        return 0.0;
    }
    let weighted: f32 = magnitude
        .iter()
        .enumerate()
        .map(|(i, &m)| bin_freq(i, sample_rate, n_fft) * m)
        .sum();
    weighted / total
}

pub fn spectral_rolloff(magnitude: &[f32], sample_rate: u32, n_fft: usize, fraction: f32) -> f32 {
    let total_energy: f32 = magnitude.iter().map(|m| m * m).sum();
    if total_energy <= 1e-12 {
        return 0.0;
    }
    let threshold = total_energy * fraction;
    let mut cumulative = 0.0f32;
    for (i, &m) in magnitude.iter().enumerate() {
        cumulative += m * m;
        if cumulative >= threshold {
            return bin_freq(i, sample_rate, n_fft);
        }
    }
    bin_freq(magnitude.len().saturating_sub(1), sample_rate, n_fft)
}

pub fn spectral_flatness(magnitude: &[f32]) -> f32 {
    let eps = 1e-10f32;
    let n = magnitude.len().max(1) as f32;
    let log_sum: f32 = magnitude.iter().map(|&m| (m + eps).ln()).sum();
    let geometric_mean = (log_sum / n).exp();
    let arithmetic_mean = magnitude.iter().sum::<f32>() / n;
    if arithmetic_mean <= eps {
        1.0
    } else {
        geometric_mean / arithmetic_mean
    }
}

fn bin_freq(bin: usize, sample_rate: u32, n_fft: usize) -> f32 {
    bin as f32 * sample_rate as f32 / n_fft as f32
}

pub fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}

pub fn std_dev(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f32>() / values.len() as f32).sqrt()
}

pub fn skewness(values: &[f32]) -> f32 {
    let n = values.len() as f32;
    if n < 3.0 {
        return 0.0;
    }
    let m = mean(values);
    let s = std_dev(values).max(1e-12);
    values.iter().map(|v| ((v - m) / s).powi(3)).sum::<f32>() / n
}

pub fn kurtosis_excess(values: &[f32]) -> f32 {
    let n = values.len() as f32;
    if n < 4.0 {
        return 0.0;
    }
    let m = mean(values);
    let s = std_dev(values).max(1e-12);
    values.iter().map(|v| ((v - m) / s).powi(4)).sum::<f32>() / n - 3.0
}

/// The analytic signal via the FFT-domain Hilbert transform: zero the
/// negative frequencies, double the positive ones, leave DC and Nyquist
/// alone. Used by sensors that need instantaneous phase (phase coherence,
/// glottal onset phase-chaos).
pub fn analytic_signal(samples: &[f32]) -> Vec<Complex32> {
    let n = samples.len();
    if n == 0 {
        return Vec::new();
    }
    let mut buffer: Vec<Complex32> = samples.iter().map(|&s| Complex32::new(s, 0.0)).collect();
    let fft = cached_fft(n, false);
    fft.process(&mut buffer);

    let half = n / 2;
    for (i, c) in buffer.iter_mut().enumerate() {
        let factor = if i == 0 || (n % 2 == 0 && i == half) {
            1.0
        } else if i < half || (n % 2 == 1 && i <= half) {
            2.0
        } else {
            0.0
        };
        *c *= factor;
    }

    let ifft = cached_fft(n, true);
    ifft.process(&mut buffer);
    let scale = 1.0 / n as f32;
    buffer.iter().map(|c| c * scale).collect()
}

/// Instantaneous phase (radians) of the analytic signal.
pub fn instantaneous_phase(analytic: &[Complex32]) -> Vec<f32> {
    analytic.iter().map(|c| c.arg()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hann_window_endpoints_are_near_zero() {
        let w = hann_window(512);
        assert!(w[0] < 1e-6);
        assert!(w[511] < 1e-3);
    }

    #[test]
    fn stft_produces_expected_frame_count() {
        let samples = vec![0.0f32; 16_000];
        let frames = stft_magnitude(&samples, 512, 160, 400);
        let expected = (samples.len() - 400) / 160 + 1;
        assert_eq!(frames.len(), expected);
        assert_eq!(frames[0].len(), 512 / 2 + 1);
    }

    #[test]
    fn flat_spectrum_has_flatness_near_one() {
        let magnitude = vec![1.0f32; 256];
        let flatness = spectral_flatness(&magnitude);
        assert!((flatness - 1.0).abs() < 1e-3);
    }

    #[test]
    fn single_peak_spectrum_has_low_flatness() {
        let mut magnitude = vec![1e-6f32; 256];
        magnitude[10] = 1.0;
        let flatness = spectral_flatness(&magnitude);
        assert!(flatness < 0.3);
    }
}
