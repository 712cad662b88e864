//! Component F / Stage 4: the neural branch. Architecturally a sinc-conv
//! front end feeding residual 1-D convolutions and an attention-pooling
//! classifier, following the hand-rolled inference style of
//! `dsp::dtln_core` (manual forward pass, no ML framework). Without loaded
//! weights this crate runs in demo mode: a deterministic statistic-derived
//! score stands in for the classifier output.

use serde::Serialize;

use crate::config::NeuralConfig;
use crate::waveform::Waveform;

const SINC_KERNEL_LENGTH: usize = 251;

/// Learnable bandpass filter bank initialized on a mel scale. Only the
/// architecture shape is modeled here; without trained weights the filters
/// are never applied (see [`NeuralBranch::score_chunk`]).
pub struct SincConvFrontEnd {
    pub num_filters: usize,
    pub kernel_length: usize,
}

impl Default for SincConvFrontEnd {
    fn default() -> Self {
        Self {
            num_filters: 70,
            kernel_length: SINC_KERNEL_LENGTH,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NeuralResult {
    pub success: bool,
    pub error: Option<String>,
    pub spoof_probability: f64,
    pub demo_mode: bool,
    pub chunk_scores: Vec<f64>,
    pub mean_chunk_score: f64,
    pub num_chunks: usize,
}

impl NeuralResult {
    fn empty(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            spoof_probability: 0.5,
            demo_mode: true,
            chunk_scores: Vec::new(),
            mean_chunk_score: 0.5,
            num_chunks: 0,
        }
    }
}

/// Holds the (currently untrained) front end and dispatches chunked
/// inference. `model_path` being absent or unloadable always puts the
/// branch in demo mode rather than erroring — a classifier with no
/// weights cannot itself be a detection signal.
pub struct NeuralBranch {
    _front_end: SincConvFrontEnd,
    demo_mode: bool,
}

impl NeuralBranch {
    pub fn new(config: &NeuralConfig) -> Self {
        let demo_mode = match &config.model_path {
            Some(path) => {
                log::warn!("neural model loading is not implemented; falling back to demo mode for {path}");
                true
            }
            None => true,
        };
        Self {
            _front_end: SincConvFrontEnd::default(),
            demo_mode,
        }
    }

    pub fn score(&self, waveform: &Waveform, config: &NeuralConfig) -> NeuralResult {
        if waveform.is_empty() {
            return NeuralResult::empty("empty audio input");
        }

        let samples = waveform.samples();
        let chunk_len = config.chunk_size_samples.max(1);
        let overlap = config.overlap_samples.min(chunk_len.saturating_sub(1));

        let chunks = chunk_samples(samples, chunk_len, overlap);
        let chunk_scores: Vec<f64> = chunks.iter().map(|chunk| self.score_chunk(chunk)).collect();

        let spoof_probability = chunk_scores.iter().cloned().fold(0.0f64, f64::max);
        let mean_chunk_score = chunk_scores.iter().sum::<f64>() / chunk_scores.len().max(1) as f64;

        NeuralResult {
            success: true,
            error: None,
            spoof_probability,
            demo_mode: self.demo_mode,
            num_chunks: chunk_scores.len(),
            chunk_scores,
            mean_chunk_score,
        }
    }

    /// In demo mode: a deterministic score from mean-absolute-value over
    /// standard deviation, shifted into the ~0.15-0.25 band the source
    /// system uses for its placeholder classifier. Real inference would
    /// run the sinc-conv front end here; it's never invoked with untrained
    /// weights because that would give an uncalibrated, misleading score.
    fn score_chunk(&self, chunk: &[f32]) -> f64 {
        if self.demo_mode {
            let audio_energy = mean_abs_over_std(chunk);
            0.15 + 0.1 * (audio_energy * 10.0).min(1.0)
        } else {
            0.5
        }
    }
}

fn mean_abs_over_std(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let n = samples.len() as f64;
    let mean_abs = samples.iter().map(|&s| s.abs() as f64).sum::<f64>() / n;
    let mean = samples.iter().map(|&s| s as f64).sum::<f64>() / n;
    let std = (samples.iter().map(|&s| (s as f64 - mean).powi(2)).sum::<f64>() / n).sqrt();
    if std < 1e-12 {
        0.0
    } else {
        mean_abs / std
    }
}

/// The real (never-trained) forward-pass architecture: a sinc-conv front
/// end, two residual 1-D conv blocks with batchnorm-as-affine and stride-2
/// downsampling, an attention-pooling head, and a 2-way classifier. Mirrors
/// `dsp::dtln_core`'s hand-rolled inference style (manual loops over plain
/// `Vec<f32>` buffers, no ML framework) generalized from a gated-recurrent
/// denoiser to a conv/attention classifier. Never invoked by [`NeuralBranch`]
/// in demo mode — exercised directly by this module's tests against fixed
/// weights so the architecture itself is proven out ahead of ever loading a
/// trained checkpoint.
#[allow(dead_code)]
mod arch {
    const FRONT_END_STRIDE: usize = 160;
    const CONV_KERNEL: usize = 3;

    pub struct SincFrontEnd {
        /// One band-pass filter per output channel, mel-scale initialized.
        pub filters: Vec<Vec<f32>>,
    }

    impl SincFrontEnd {
        pub fn new(num_filters: usize, kernel_length: usize, sample_rate: f32) -> Self {
            Self {
                filters: generate_sinc_filters(num_filters, kernel_length, sample_rate),
            }
        }

        /// Depthwise convolution of the raw waveform against each filter,
        /// strided, producing a `[channels][time]` feature map.
        pub fn forward(&self, samples: &[f32]) -> Option<Vec<Vec<f32>>> {
            let kernel_length = self.filters.first()?.len();
            if samples.len() < kernel_length {
                return None;
            }
            let out_len = (samples.len() - kernel_length) / FRONT_END_STRIDE + 1;
            if out_len == 0 {
                return None;
            }
            let mut out = Vec::with_capacity(self.filters.len());
            for filter in &self.filters {
                let mut channel = Vec::with_capacity(out_len);
                for t in 0..out_len {
                    let start = t * FRONT_END_STRIDE;
                    let window = &samples[start..start + kernel_length];
                    channel.push(dot(window, filter));
                }
                out.push(channel);
            }
            Some(out)
        }
    }

    fn hz_to_mel(hz: f32) -> f32 {
        2595.0 * (1.0 + hz / 700.0).log10()
    }

    fn mel_to_hz(mel: f32) -> f32 {
        700.0 * (10f32.powf(mel / 2595.0) - 1.0)
    }

    /// Windowed-sinc bandpass filters with cutoffs spaced evenly on a mel
    /// scale between 30 Hz and Nyquist, the standard SincNet initialization.
    fn generate_sinc_filters(num_filters: usize, kernel_length: usize, sample_rate: f32) -> Vec<Vec<f32>> {
        let low_hz = 30.0f32;
        let high_hz = sample_rate / 2.0 - 100.0;
        let mel_low = hz_to_mel(low_hz);
        let mel_high = hz_to_mel(high_hz.max(low_hz + 1.0));

        let edges: Vec<f32> = (0..=num_filters)
            .map(|i| mel_to_hz(mel_low + (mel_high - mel_low) * i as f32 / num_filters as f32))
            .collect();

        (0..num_filters)
            .map(|i| sinc_bandpass(edges[i], edges[i + 1], kernel_length, sample_rate))
            .collect()
    }

    fn sinc_bandpass(low_hz: f32, high_hz: f32, kernel_length: usize, sample_rate: f32) -> Vec<f32> {
        let half = (kernel_length as f32 - 1.0) / 2.0;
        let mut filter = vec![0.0f32; kernel_length];
        for (n, f) in filter.iter_mut().enumerate() {
            let t = (n as f32 - half) / sample_rate;
            let band = 2.0 * high_hz * sinc(2.0 * high_hz * t) - 2.0 * low_hz * sinc(2.0 * low_hz * t);
            // Hamming window, matching the front end's kernel length.
            let w = 0.54 - 0.46 * (2.0 * std::f32::consts::PI * n as f32 / (kernel_length - 1) as f32).cos();
            *f = band * w;
        }
        let energy: f32 = filter.iter().map(|v| v * v).sum::<f32>().sqrt().max(1e-12);
        filter.iter_mut().for_each(|v| *v /= energy);
        filter
    }

    fn sinc(x: f32) -> f32 {
        if x.abs() < 1e-12 {
            1.0
        } else {
            (std::f32::consts::PI * x).sin() / (std::f32::consts::PI * x)
        }
    }

    /// One residual block: `conv -> batchnorm(affine) -> relu`, added to a
    /// strided 1x1 projection of the input so channel counts and stride
    /// changes across the block still line up for the residual sum.
    pub struct ResidualConvBlock {
        pub in_channels: usize,
        pub out_channels: usize,
        pub conv_weight: Vec<f32>, // [out][in][kernel]
        pub conv_bias: Vec<f32>,
        pub bn_scale: Vec<f32>,
        pub bn_shift: Vec<f32>,
        pub proj_weight: Vec<f32>, // [out][in][1]
        pub proj_bias: Vec<f32>,
    }

    impl ResidualConvBlock {
        pub fn forward(&self, input: &[Vec<f32>]) -> Option<Vec<Vec<f32>>> {
            let time_len = input.first()?.len();
            if time_len < CONV_KERNEL {
                return None;
            }
            let out_len = (time_len - CONV_KERNEL) / 2 + 1;

            let mut conv_out = vec![vec![0.0f32; out_len]; self.out_channels];
            for oc in 0..self.out_channels {
                for t in 0..out_len {
                    let start = t * 2;
                    let mut sum = self.conv_bias[oc];
                    for ic in 0..self.in_channels {
                        for k in 0..CONV_KERNEL {
                            let w = self.conv_weight[(oc * self.in_channels + ic) * CONV_KERNEL + k];
                            sum += w * input[ic][start + k];
                        }
                    }
                    conv_out[oc][t] = sum;
                }
            }

            for oc in 0..self.out_channels {
                let channel = &mut conv_out[oc];
                let mean = channel.iter().sum::<f32>() / channel.len() as f32;
                let var = channel.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / channel.len() as f32;
                let inv_std = 1.0 / (var + 1e-5).sqrt();
                for v in channel.iter_mut() {
                    *v = ((*v - mean) * inv_std) * self.bn_scale[oc] + self.bn_shift[oc];
                    *v = v.max(0.0); // ReLU
                }
            }

            let mut projected = vec![vec![0.0f32; out_len]; self.out_channels];
            for oc in 0..self.out_channels {
                for t in 0..out_len {
                    let start = t * 2;
                    let mut sum = self.proj_bias[oc];
                    for ic in 0..self.in_channels {
                        sum += self.proj_weight[oc * self.in_channels + ic] * input[ic][start];
                    }
                    projected[oc][t] = sum;
                }
            }

            for oc in 0..self.out_channels {
                for t in 0..out_len {
                    conv_out[oc][t] += projected[oc][t];
                }
            }
            Some(conv_out)
        }
    }

    /// Single-head additive attention over the time axis, collapsing
    /// `[channels][time]` to one pooled `channels`-length vector.
    pub struct AttentionPool {
        pub weight: Vec<f32>, // length == channels
        pub bias: f32,
    }

    impl AttentionPool {
        pub fn forward(&self, input: &[Vec<f32>]) -> Option<Vec<f32>> {
            let channels = input.len();
            let time_len = input.first()?.len();
            if channels != self.weight.len() || time_len == 0 {
                return None;
            }

            let mut scores = vec![0.0f32; time_len];
            for (t, score) in scores.iter_mut().enumerate() {
                let mut sum = self.bias;
                for c in 0..channels {
                    sum += input[c][t] * self.weight[c];
                }
                *score = sum;
            }
            let max_score = scores.iter().cloned().fold(f32::MIN, f32::max);
            let exps: Vec<f32> = scores.iter().map(|s| (s - max_score).exp()).collect();
            let denom: f32 = exps.iter().sum::<f32>().max(1e-12);
            let weights: Vec<f32> = exps.iter().map(|e| e / denom).collect();

            let mut pooled = vec![0.0f32; channels];
            for (c, p) in pooled.iter_mut().enumerate() {
                *p = (0..time_len).map(|t| input[c][t] * weights[t]).sum();
            }
            Some(pooled)
        }
    }

    /// 2-way linear classifier over the pooled vector; softmax over the
    /// logits gives the spoof-class probability.
    pub struct Classifier {
        pub weight: Vec<f32>, // [2][channels]
        pub bias: [f32; 2],
    }

    impl Classifier {
        pub fn spoof_probability(&self, pooled: &[f32]) -> f64 {
            let channels = pooled.len();
            let mut logits = [0.0f32; 2];
            for (class, logit) in logits.iter_mut().enumerate() {
                let mut sum = self.bias[class];
                for c in 0..channels {
                    sum += self.weight[class * channels + c] * pooled[c];
                }
                *logit = sum;
            }
            let max_logit = logits[0].max(logits[1]);
            let e0 = (logits[0] - max_logit).exp();
            let e1 = (logits[1] - max_logit).exp();
            (e1 / (e0 + e1)) as f64
        }
    }

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
    }

    /// Bundles one full set of weights for the conv stack, attention head,
    /// and classifier (the front end has no learned parameters here; its
    /// filters are mel-scale initialized, see [`SincFrontEnd::new`]).
    pub struct NetWeights {
        pub block1: ResidualConvBlock,
        pub block2: ResidualConvBlock,
        pub attention: AttentionPool,
        pub classifier: Classifier,
    }

    /// Runs the full front-end -> conv stack -> attention -> classifier
    /// pipeline. Returns `None` when `samples` is too short for the front
    /// end's kernel, mirroring the chunking layer's handling of degenerate
    /// input upstream.
    pub fn forward(samples: &[f32], sample_rate: u32, num_filters: usize, kernel_length: usize, weights: &NetWeights) -> Option<f64> {
        let front_end = SincFrontEnd::new(num_filters, kernel_length, sample_rate as f32);
        let features = front_end.forward(samples)?;
        let features = weights.block1.forward(&features)?;
        let features = weights.block2.forward(&features)?;
        let pooled = weights.attention.forward(&features)?;
        Some(weights.classifier.spoof_probability(&pooled))
    }
}

fn chunk_samples(samples: &[f32], chunk_len: usize, overlap: usize) -> Vec<&[f32]> {
    if samples.len() <= chunk_len {
        return vec![samples];
    }
    let stride = chunk_len.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < samples.len() {
        let end = (start + chunk_len).min(samples.len());
        chunks.push(&samples[start..end]);
        if end == samples.len() {
            break;
        }
        start += stride;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_clip_scores_as_a_single_chunk() {
        let waveform = Waveform::from_samples(vec![0.1f32; 16_000], 16_000);
        let branch = NeuralBranch::new(&NeuralConfig::default());
        let result = branch.score(&waveform, &NeuralConfig::default());
        assert!(result.success);
        assert_eq!(result.num_chunks, 1);
        assert!(result.demo_mode);
    }

    #[test]
    fn long_clip_is_chunked_and_aggregated_by_max() {
        let samples = vec![0.1f32; 16_000 * 25];
        let waveform = Waveform::from_samples(samples, 16_000);
        let branch = NeuralBranch::new(&NeuralConfig::default());
        let result = branch.score(&waveform, &NeuralConfig::default());
        assert!(result.num_chunks > 1);
        assert_eq!(result.spoof_probability, result.chunk_scores.iter().cloned().fold(0.0, f64::max));
    }

    #[test]
    fn chunking_honors_configured_chunk_and_overlap_sizes() {
        let samples = vec![0.1f32; 16_000 * 25];
        let waveform = Waveform::from_samples(samples, 16_000);
        let branch = NeuralBranch::new(&NeuralConfig::default());

        let default_result = branch.score(&waveform, &NeuralConfig::default());

        let small_chunks = NeuralConfig {
            chunk_size_samples: 16_000 * 5,
            overlap_samples: 16_000,
            ..NeuralConfig::default()
        };
        let small_result = branch.score(&waveform, &small_chunks);

        assert!(small_result.num_chunks > default_result.num_chunks);
    }

    /// Small xorshift PRNG, seeded so weight generation is reproducible
    /// without pulling in a `rand` dependency for a test-only helper.
    struct XorShift64(u64);

    impl XorShift64 {
        fn next_f32(&mut self) -> f32 {
            let mut x = self.0;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            self.0 = x;
            ((x >> 40) as f32 / (1u64 << 24) as f32) * 2.0 - 1.0
        }

        fn vec(&mut self, len: usize) -> Vec<f32> {
            (0..len).map(|_| self.next_f32() * 0.1).collect()
        }
    }

    fn fixed_weights(seed: u64, front_end_channels: usize) -> arch::NetWeights {
        let mut rng = XorShift64(seed);
        let block1 = arch::ResidualConvBlock {
            in_channels: front_end_channels,
            out_channels: 16,
            conv_weight: rng.vec(16 * front_end_channels * 3),
            conv_bias: rng.vec(16),
            bn_scale: vec![1.0; 16],
            bn_shift: vec![0.0; 16],
            proj_weight: rng.vec(16 * front_end_channels),
            proj_bias: rng.vec(16),
        };
        let block2 = arch::ResidualConvBlock {
            in_channels: 16,
            out_channels: 32,
            conv_weight: rng.vec(32 * 16 * 3),
            conv_bias: rng.vec(32),
            bn_scale: vec![1.0; 32],
            bn_shift: vec![0.0; 32],
            proj_weight: rng.vec(32 * 16),
            proj_bias: rng.vec(32),
        };
        let attention = arch::AttentionPool {
            weight: rng.vec(32),
            bias: rng.next_f32() * 0.1,
        };
        let classifier = arch::Classifier {
            weight: rng.vec(2 * 32),
            bias: [rng.next_f32() * 0.1, rng.next_f32() * 0.1],
        };
        arch::NetWeights {
            block1,
            block2,
            attention,
            classifier,
        }
    }

    #[test]
    fn architecture_runs_end_to_end_on_fixed_weights() {
        let sample_rate = 16_000u32;
        let samples: Vec<f32> = (0..32_000)
            .map(|i| (2.0 * std::f32::consts::PI * 150.0 * i as f32 / sample_rate as f32).sin() * 0.3)
            .collect();
        let num_filters = 8;
        let kernel_length = 64;
        let weights = fixed_weights(42, num_filters);

        let probability = arch::forward(&samples, sample_rate, num_filters, kernel_length, &weights)
            .expect("architecture should run on a full-second clip");
        assert!(probability.is_finite());
        assert!((0.0..=1.0).contains(&probability));
    }

    #[test]
    fn architecture_is_deterministic_for_the_same_fixed_weights() {
        let sample_rate = 16_000u32;
        let samples: Vec<f32> = vec![0.05; 16_000];
        let num_filters = 8;
        let kernel_length = 64;

        let a = arch::forward(&samples, sample_rate, num_filters, kernel_length, &fixed_weights(7, num_filters));
        let b = arch::forward(&samples, sample_rate, num_filters, kernel_length, &fixed_weights(7, num_filters));
        assert_eq!(a, b);
    }

    #[test]
    fn architecture_returns_none_on_too_short_input() {
        let weights = fixed_weights(1, 8);
        let result = arch::forward(&[0.1f32; 10], 16_000, 8, 64, &weights);
        assert!(result.is_none());
    }

    #[test]
    fn sinc_front_end_produces_one_channel_per_filter() {
        let front_end = arch::SincFrontEnd::new(8, 64, 16_000.0);
        let samples = vec![0.1f32; 4_000];
        let features = front_end.forward(&samples).expect("should produce features");
        assert_eq!(features.len(), 8);
    }
}
