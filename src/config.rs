//! Pipeline configuration: baked-in defaults layered under an optional YAML
//! file and environment variable overrides (precedence low to high), mirroring
//! `backend/detection/config.py`'s dataclass-per-stage layout in the source
//! system this crate's behavior is grounded on.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeatureExtractionConfig {
    pub sample_rate: u32,
    pub n_fft: usize,
    pub hop_length: usize,
    pub win_length: usize,
    pub n_mfcc: usize,
    pub n_lfcc: usize,
    pub feature_types: Vec<String>,
    pub include_deltas: bool,
}

impl Default for FeatureExtractionConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            n_fft: 512,
            hop_length: 160,
            win_length: 400,
            n_mfcc: 20,
            n_lfcc: 20,
            feature_types: vec!["mfcc".into(), "lfcc".into(), "logspec".into()],
            include_deltas: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TemporalAnalysisConfig {
    pub window_size: usize,
    pub hop_size: usize,
    pub min_segment_length: usize,
    pub smoothing_window: usize,
    pub threshold_std_multiplier: f64,
}

impl Default for TemporalAnalysisConfig {
    fn default() -> Self {
        Self {
            window_size: 100,
            hop_size: 50,
            min_segment_length: 10,
            smoothing_window: 5,
            threshold_std_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ArtifactDetectionConfig {
    pub silence_threshold_db: f64,
    pub min_silence_duration: f64,
    pub click_threshold: f64,
    pub click_min_gap: usize,
}

impl Default for ArtifactDetectionConfig {
    fn default() -> Self {
        Self {
            silence_threshold_db: -40.0,
            min_silence_duration: 0.1,
            click_threshold: 0.8,
            click_min_gap: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NeuralConfig {
    pub model_path: Option<String>,
    pub chunk_size_samples: usize,
    pub overlap_samples: usize,
}

impl Default for NeuralConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            chunk_size_samples: 160_000,
            overlap_samples: 16_000,
        }
    }
}

/// One named weighting profile: per-stage weights used in the fusion
/// weighted average, plus the `synthetic`/`real` decision thresholds active
/// under that profile. Selected one-way by the Bandwidth sensor's output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FusionProfile {
    pub stage_weights: HashMap<String, f64>,
    pub sensor_weights: HashMap<String, f64>,
    pub synthetic_threshold: f64,
    pub real_threshold: f64,
}

impl Default for FusionProfile {
    fn default() -> Self {
        let stage_weights = [
            ("feature_extraction", 0.15),
            ("temporal_analysis", 0.15),
            ("artifact_detection", 0.15),
            ("physics_analysis", 0.0), // reported informationally, not in base_score
            ("neural", 0.40),
            ("explainability", 0.15),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let sensor_weights = [
            ("BreathSensor", 0.12),
            ("PitchVelocitySensor", 0.10),
            ("GlottalInertiaSensor", 0.12),
            ("GlobalFormantSensor", 0.08),
            ("FormantTrajectorySensor", 0.10),
            ("PhaseCoherenceSensor", 0.10),
            ("ProsodicContinuitySensor", 0.10),
            ("BreathingPatternSensor", 0.08),
            ("DigitalSilenceSensor", 0.10),
            ("DynamicRangeSensor", 0.05),
            ("BandwidthSensor", 0.0),
            ("NeuralDetectorSensor", 0.05),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            stage_weights,
            sensor_weights,
            synthetic_threshold: 0.7,
            real_threshold: 0.3,
        }
    }
}

/// `default` profile mirrors [`FusionProfile::default`]; `narrowband` lowers
/// the bar because phone/VoIP codecs destroy a lot of the acoustic evidence
/// the physics sensors rely on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FusionEngineConfig {
    pub confidence_threshold: f64,
    pub decision_threshold: f64,
    pub profiles: HashMap<String, FusionProfile>,
}

impl Default for FusionEngineConfig {
    fn default() -> Self {
        let default_profile = FusionProfile::default();
        let mut narrowband = default_profile.clone();
        narrowband.synthetic_threshold = 0.6;
        narrowband.real_threshold = 0.25;

        let profiles = [
            ("default".to_string(), default_profile),
            ("narrowband".to_string(), narrowband),
        ]
        .into_iter()
        .collect();

        Self {
            confidence_threshold: 0.5,
            decision_threshold: 0.5,
            profiles,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExplainabilityConfig {
    pub max_top_features: usize,
    pub detail_level: String,
    pub enable_llm: bool,
    pub llm_model_id: String,
}

impl Default for ExplainabilityConfig {
    fn default() -> Self {
        Self {
            max_top_features: 10,
            detail_level: "standard".to_string(),
            enable_llm: false,
            llm_model_id: "meta-llama/Meta-Llama-3-70B-Instruct".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PhysicsAnalysisConfig {
    pub enabled: bool,
    pub sensor_timeout_seconds: f64,
    /// External endpoint queried by `NeuralDetectorSensor`. Absent by
    /// default, in which case that sensor is disabled and fails open.
    pub neural_detector_endpoint: Option<String>,
}

impl Default for PhysicsAnalysisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sensor_timeout_seconds: 10.0,
            neural_detector_endpoint: None,
        }
    }
}

/// Top-level, immutable-after-load pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub demo_mode: bool,
    pub feature_extraction: FeatureExtractionConfig,
    pub temporal_analysis: TemporalAnalysisConfig,
    pub artifact_detection: ArtifactDetectionConfig,
    pub neural: NeuralConfig,
    pub fusion_engine: FusionEngineConfig,
    pub physics_analysis: PhysicsAnalysisConfig,
    pub explainability: ExplainabilityConfig,

    pub enable_caching: bool,
    pub max_audio_duration_seconds: f64,
    pub min_audio_duration_seconds: f64,
    pub max_audio_file_size_bytes: u64,
    pub timeout_seconds: f64,
    pub quick_mode_stages: Vec<String>,
    pub max_concurrent_jobs: usize,
    pub job_queue_depth: usize,
    pub silence_top_db: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            demo_mode: true,
            feature_extraction: FeatureExtractionConfig::default(),
            temporal_analysis: TemporalAnalysisConfig::default(),
            artifact_detection: ArtifactDetectionConfig::default(),
            neural: NeuralConfig::default(),
            fusion_engine: FusionEngineConfig::default(),
            physics_analysis: PhysicsAnalysisConfig::default(),
            explainability: ExplainabilityConfig::default(),
            enable_caching: true,
            max_audio_duration_seconds: 300.0,
            min_audio_duration_seconds: 0.5,
            max_audio_file_size_bytes: 800 * 1024 * 1024,
            timeout_seconds: 120.0,
            quick_mode_stages: vec![
                "feature_extraction".into(),
                "temporal_analysis".into(),
                "artifact_detection".into(),
            ],
            max_concurrent_jobs: 4,
            job_queue_depth: 16,
            silence_top_db: 20.0,
        }
    }
}

/// The handful of top-level scalars that may be overridden by environment
/// variables (`DEEPFAKE_DEMO_MODE`, `DEEPFAKE_MAX_CONCURRENT_JOBS`, ...).
/// Nested per-stage settings are file-only: `envy` deserializes flat
/// structs, and these are exactly the knobs an operator reaches for without
/// redeploying a config file.
#[derive(Debug, Deserialize)]
struct EnvOverrides {
    demo_mode: Option<bool>,
    max_concurrent_jobs: Option<usize>,
    job_queue_depth: Option<usize>,
    timeout_seconds: Option<f64>,
}

impl PipelineConfig {
    /// Layer baked-in defaults under an optional YAML file at `path`, then
    /// under environment variables prefixed `DEEPFAKE_` (e.g.
    /// `DEEPFAKE_DEMO_MODE=false`). Missing file is not an error; a malformed
    /// one is.
    pub fn load(yaml_path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = yaml_path {
            if path.exists() {
                let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
                    path: path.display().to_string(),
                    source: e,
                })?;
                config = serde_yaml::from_str(&text).map_err(ConfigError::Yaml)?;
                log::info!("loaded detection config from {}", path.display());
            }
        }

        match envy::prefixed("DEEPFAKE_").from_env::<EnvOverrides>() {
            Ok(overrides) => {
                if let Some(v) = overrides.demo_mode {
                    config.demo_mode = v;
                }
                if let Some(v) = overrides.max_concurrent_jobs {
                    config.max_concurrent_jobs = v;
                }
                if let Some(v) = overrides.job_queue_depth {
                    config.job_queue_depth = v;
                }
                if let Some(v) = overrides.timeout_seconds {
                    config.timeout_seconds = v;
                }
            }
            Err(e) => log::warn!("environment override parsing failed, ignoring: {e}"),
        }

        Ok(config)
    }

    pub fn fusion_profile(&self, name: &str) -> &FusionProfile {
        self.fusion_engine
            .profiles
            .get(name)
            .unwrap_or_else(|| self.fusion_engine.profiles.get("default").expect(
                "default fusion profile must always be present",
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stage_weights_sum_close_to_one_excluding_physics() {
        let config = PipelineConfig::default();
        let profile = config.fusion_profile("default");
        let sum: f64 = profile
            .stage_weights
            .iter()
            .filter(|(k, _)| k.as_str() != "physics_analysis")
            .map(|(_, v)| v)
            .sum();
        assert!((sum - 1.0).abs() < 1e-9, "sum was {sum}");
    }

    #[test]
    fn unknown_profile_falls_back_to_default() {
        let config = PipelineConfig::default();
        let profile = config.fusion_profile("does-not-exist");
        assert_eq!(profile.synthetic_threshold, 0.7);
    }

    #[test]
    fn load_with_missing_file_returns_defaults() {
        let config = PipelineConfig::load(Some(Path::new("/nonexistent/path.yaml"))).unwrap();
        assert_eq!(config, PipelineConfig::default());
    }
}
