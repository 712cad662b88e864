//! Component I: the orchestrator. Wires Stages 1-6 together behind both a
//! synchronous `detect` call and an async submit/status/result job API,
//! bounding concurrent full-pipeline runs with a semaphore the way the
//! donor's real-time audio thread bounds its own processing budget.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::artifacts::{self, ArtifactDetectionResult};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::explain::{self, ExplainInput, ExplanationResult};
use crate::features::{self, FeatureExtractionResult};
use crate::fusion::{self, FusionInput, FusionResult};
use crate::job::{Job, JobStore, JobView};
use crate::neural::{NeuralBranch, NeuralResult};
use crate::sensors::bandwidth::profile_for_rolloff;
use crate::sensors::{
    bandwidth::BandwidthSensor, breath::BreathSensor, breathing_pattern::BreathingPatternSensor,
    digital_silence::DigitalSilenceSensor, dynamic_range::DynamicRangeSensor,
    formant_trajectory::FormantTrajectorySensor, glottal_inertia::GlottalInertiaSensor,
    global_formants::GlobalFormantSensor, neural_detector::NeuralDetectorSensor,
    phase_coherence::PhaseCoherenceSensor, pitch_velocity::PitchVelocitySensor,
    prosodic_continuity::ProsodicContinuitySensor, SensorRegistry, SensorResult,
};
use crate::temporal::{self, TemporalAnalysisResult};
use crate::waveform::{self, AudioSource, Waveform};

/// Owned audio input accepted by the orchestrator. A plain byte buffer or
/// path, unlike [`AudioSource`], so it can be moved into a background job
/// task that outlives the caller's request.
pub enum AudioInput {
    Bytes(Vec<u8>),
    Path(PathBuf),
    Samples { samples: Vec<f32>, sample_rate: u32 },
}

impl AudioInput {
    fn as_source(&self) -> AudioSource<'_> {
        match self {
            AudioInput::Bytes(bytes) => AudioSource::Bytes(bytes),
            AudioInput::Path(path) => AudioSource::Path(path),
            AudioInput::Samples { samples, sample_rate } => AudioSource::Samples {
                samples: samples.clone(),
                sample_rate: *sample_rate,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct StageResults {
    pub feature_extraction: Option<FeatureExtractionResult>,
    pub temporal_analysis: Option<TemporalAnalysisResult>,
    pub artifact_detection: Option<ArtifactDetectionResult>,
    pub neural: Option<NeuralResult>,
    pub sensors: HashMap<String, SensorResult>,
    pub explanation: Option<ExplanationResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectionResult {
    pub job_id: Uuid,
    pub decision: fusion::Decision,
    pub fused_score: f64,
    pub confidence: f64,
    pub is_spoof: bool,
    pub profile: String,
    pub quick_mode: bool,
    pub processing_time_seconds: f64,
    pub stages: StageResults,
    pub fusion: FusionResult,
}

impl DetectionResult {
    /// Single-pass boundary conversion to a JSON-safe value: heavy arrays are
    /// already `#[serde(skip)]`ped on the stage results, so this only needs
    /// to replace any non-finite float reachable from the tree (P7).
    pub fn to_json_value(&self) -> serde_json::Result<serde_json::Value> {
        crate::numeric::sanitize_serializable(self)
    }
}

/// Progress waypoints reported as a job advances (P: percentage complete).
mod waypoint {
    pub const STARTED: f64 = 0.0;
    pub const PREPROCESSED: f64 = 0.10;
    pub const FEATURES: f64 = 0.25;
    pub const TEMPORAL: f64 = 0.40;
    pub const ARTIFACTS: f64 = 0.50;
    pub const NEURAL_AND_SENSORS: f64 = 0.60;
    pub const FUSION: f64 = 0.80;
    pub const EXPLANATION: f64 = 0.90;
    pub const DONE: f64 = 1.00;
}

pub struct DetectionPipeline {
    config: Arc<PipelineConfig>,
    sensors: Arc<SensorRegistry>,
    neural: Arc<NeuralBranch>,
    jobs: JobStore,
    permits: Arc<Semaphore>,
}

impl DetectionPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let mut registry = SensorRegistry::new();
        registry.register(Arc::new(BreathSensor));
        registry.register(Arc::new(PitchVelocitySensor));
        registry.register(Arc::new(GlottalInertiaSensor));
        registry.register(Arc::new(GlobalFormantSensor));
        registry.register(Arc::new(FormantTrajectorySensor));
        registry.register(Arc::new(PhaseCoherenceSensor));
        registry.register(Arc::new(ProsodicContinuitySensor));
        registry.register(Arc::new(BreathingPatternSensor));
        registry.register(Arc::new(DigitalSilenceSensor));
        registry.register(Arc::new(DynamicRangeSensor));
        registry.register(Arc::new(BandwidthSensor));
        registry.register(Arc::new(NeuralDetectorSensor::new(
            config.physics_analysis.neural_detector_endpoint.clone(),
        )));

        let neural = NeuralBranch::new(&config.neural);
        let permits = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));

        Self {
            config: Arc::new(config),
            sensors: Arc::new(registry),
            neural: Arc::new(neural),
            jobs: JobStore::new(),
            permits,
        }
    }

    /// Runs the full pipeline synchronously (still async under the hood for
    /// the sensor fan-out), bounded by the worker-pool semaphore. Returns
    /// `ResourceExhausted` immediately rather than queuing indefinitely if
    /// the job queue is already at `job_queue_depth`.
    pub async fn detect(&self, input: AudioInput, quick_mode: bool, profile_override: Option<&str>) -> Result<DetectionResult> {
        if self.jobs.len().await >= self.config.job_queue_depth && self.permits.available_permits() == 0 {
            return Err(PipelineError::ResourceExhausted);
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| PipelineError::ResourceExhausted)?;

        let job_id = Uuid::new_v4();
        self.run_detection(job_id, input, quick_mode, profile_override, None).await
    }

    /// Submits a job for background processing and returns its id
    /// immediately; poll with [`Self::get_job_status`] and
    /// [`Self::get_job_result`].
    pub async fn submit(self: &Arc<Self>, input: AudioInput, quick_mode: bool) -> Result<Uuid> {
        if self.jobs.len().await >= self.config.job_queue_depth {
            return Err(PipelineError::ResourceExhausted);
        }

        let job_id = Uuid::new_v4();
        self.jobs.insert(Job::new(job_id, chrono::Utc::now())).await;

        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = match pipeline.permits.acquire().await {
                Ok(p) => p,
                Err(_) => {
                    pipeline
                        .jobs
                        .update(job_id, |job| {
                            job.status = crate::job::JobStatus::Failed;
                            job.error = Some(PipelineError::ResourceExhausted.to_string());
                            job.completed_at = Some(chrono::Utc::now());
                        })
                        .await;
                    return;
                }
            };

            match pipeline.run_detection(job_id, input, quick_mode, None, Some(&pipeline.jobs)).await {
                Ok(result) => {
                    pipeline
                        .jobs
                        .update(job_id, |job| {
                            job.status = crate::job::JobStatus::Completed;
                            job.progress = waypoint::DONE;
                            job.result = Some(result);
                            job.completed_at = Some(chrono::Utc::now());
                        })
                        .await;
                }
                Err(e) => {
                    pipeline
                        .jobs
                        .update(job_id, |job| {
                            job.status = crate::job::JobStatus::Failed;
                            job.error = Some(e.to_string());
                            job.completed_at = Some(chrono::Utc::now());
                        })
                        .await;
                }
            }
        });

        Ok(job_id)
    }

    pub async fn get_job_status(&self, job_id: Uuid) -> Result<JobView> {
        self.jobs
            .get(job_id)
            .await
            .map(|job| job.view())
            .ok_or(PipelineError::JobNotFound(job_id))
    }

    pub async fn get_job_result(&self, job_id: Uuid) -> Result<DetectionResult> {
        let job = self.jobs.get(job_id).await.ok_or(PipelineError::JobNotFound(job_id))?;
        job.result.ok_or(PipelineError::JobNotFound(job_id))
    }

    /// Requests cancellation of a pending or running job. The worker checks
    /// this at each progress waypoint and stops as soon as it observes it;
    /// work already committed to a given stage still finishes that stage.
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<()> {
        let job = self.jobs.get(job_id).await.ok_or(PipelineError::JobNotFound(job_id))?;
        job.cancellation.cancel();
        Ok(())
    }

    async fn run_detection(
        &self,
        job_id: Uuid,
        input: AudioInput,
        quick_mode: bool,
        profile_override: Option<&str>,
        progress_store: Option<&JobStore>,
    ) -> Result<DetectionResult> {
        let start = Instant::now();
        let cancellation = match &progress_store {
            Some(store) => store.get(job_id).await.map(|j| j.cancellation),
            None => None,
        };

        self.report_progress(progress_store, job_id, waypoint::STARTED, "preprocessing").await;
        let waveform = waveform::preprocess(input.as_source(), &self.config)?;
        self.report_progress(progress_store, job_id, waypoint::PREPROCESSED, "feature_extraction").await;

        if self.is_cancelled(&cancellation) {
            return Err(PipelineError::Cancelled(job_id));
        }

        let feature_result = features::extract(&waveform, &self.config.feature_extraction);
        self.report_progress(progress_store, job_id, waypoint::FEATURES, "temporal_analysis").await;

        let temporal_result = temporal::analyze(
            &waveform,
            Some(&feature_result.combined_features),
            &self.config.temporal_analysis,
        );
        self.report_progress(progress_store, job_id, waypoint::ARTIFACTS, "artifact_detection").await;

        let artifact_result = artifacts::detect(&waveform, &self.config.artifact_detection);

        if self.is_cancelled(&cancellation) {
            return Err(PipelineError::Cancelled(job_id));
        }

        let mut stage_scores = HashMap::new();
        stage_scores.insert("feature_extraction".to_string(), feature_result.anomaly_score);
        stage_scores.insert("temporal_analysis".to_string(), temporal_result.temporal_score);
        stage_scores.insert("artifact_detection".to_string(), artifact_result.artifact_score);

        // In quick mode, Stages 3b/4/6 are skipped unless explicitly named in
        // `quick_mode_stages` (spec's recognized config option for tuning
        // which stages a quick run still performs).
        let quick_stages: std::collections::HashSet<&str> =
            self.config.quick_mode_stages.iter().map(|s| s.as_str()).collect();
        let run_neural = !quick_mode || quick_stages.contains("neural");
        let run_physics = !quick_mode || quick_stages.contains("physics_analysis");
        let run_explain = !quick_mode || quick_stages.contains("explainability");

        let (neural_result, sensor_results, profile_name) = if !run_neural && !run_physics {
            self.report_progress(progress_store, job_id, waypoint::NEURAL_AND_SENSORS, "fusion").await;
            (None, HashMap::new(), "default".to_string())
        } else {
            self.report_progress(progress_store, job_id, waypoint::NEURAL_AND_SENSORS, "neural_and_physics_analysis").await;

            let neural_task = if run_neural {
                let waveform_for_neural = waveform.clone();
                let neural_branch = Arc::clone(&self.neural);
                let neural_config = self.config.neural.clone();
                Some(tokio::task::spawn_blocking(move || {
                    neural_branch.score(&waveform_for_neural, &neural_config)
                }))
            } else {
                None
            };

            let sensor_timeout = Duration::from_secs_f64(self.config.physics_analysis.sensor_timeout_seconds);
            let sensors = if run_physics && self.config.physics_analysis.enabled {
                self.sensors.analyze_all(&waveform, sensor_timeout).await
            } else {
                HashMap::new()
            };

            let neural_result = match neural_task {
                Some(task) => Some(task.await.unwrap_or_else(|_| NeuralResult {
                    success: false,
                    error: Some("neural inference task panicked".to_string()),
                    spoof_probability: 0.5,
                    demo_mode: true,
                    chunk_scores: Vec::new(),
                    mean_chunk_score: 0.5,
                    num_chunks: 0,
                })),
                None => None,
            };

            let profile_name = profile_override
                .map(|p| p.to_string())
                .or_else(|| {
                    sensors
                        .get("BandwidthSensor")
                        .and_then(|r| r.value)
                        .map(|rolloff| profile_for_rolloff(rolloff).to_string())
                })
                .unwrap_or_else(|| "default".to_string());

            if let Some(neural_result) = &neural_result {
                if neural_result.success {
                    stage_scores.insert("neural".to_string(), neural_result.spoof_probability);
                }
            }

            (neural_result, sensors, profile_name)
        };

        self.report_progress(progress_store, job_id, waypoint::FUSION, "fusion").await;

        if self.is_cancelled(&cancellation) {
            return Err(PipelineError::Cancelled(job_id));
        }

        let fusion_result = fusion::fuse(
            &self.config,
            FusionInput {
                stage_scores,
                stage_confidences: HashMap::new(),
                sensor_results: &sensor_results,
                profile_name: &profile_name,
                quick_mode,
                dual_branch: neural_result.is_some(),
            },
        );

        let explanation = if run_explain {
            self.report_progress(progress_store, job_id, waypoint::EXPLANATION, "explainability").await;

            let default_neural = NeuralResult {
                success: false,
                error: None,
                spoof_probability: 0.5,
                demo_mode: true,
                chunk_scores: Vec::new(),
                mean_chunk_score: 0.5,
                num_chunks: 0,
            };
            explain::explain(
                &self.config.explainability,
                ExplainInput {
                    features: &feature_result,
                    temporal: &temporal_result,
                    artifacts: &artifact_result,
                    neural: neural_result.as_ref().unwrap_or(&default_neural),
                    sensor_results: &sensor_results,
                    fusion: &fusion_result,
                },
            )
        } else {
            self.report_progress(progress_store, job_id, waypoint::EXPLANATION, "completed").await;
            explain::quick_mode_stub(fusion_result.fused_score)
        };

        self.report_progress(progress_store, job_id, waypoint::DONE, "completed").await;

        Ok(DetectionResult {
            job_id,
            decision: fusion_result.decision,
            fused_score: fusion_result.fused_score,
            confidence: fusion_result.confidence,
            is_spoof: fusion_result.is_spoof,
            profile: profile_name,
            quick_mode,
            processing_time_seconds: start.elapsed().as_secs_f64(),
            stages: StageResults {
                feature_extraction: Some(feature_result),
                temporal_analysis: Some(temporal_result),
                artifact_detection: Some(artifact_result),
                neural: neural_result,
                sensors: sensor_results,
                explanation: Some(explanation),
            },
            fusion: fusion_result,
        })
    }

    fn is_cancelled(&self, token: &Option<tokio_util::sync::CancellationToken>) -> bool {
        token.as_ref().map(|t| t.is_cancelled()).unwrap_or(false)
    }

    async fn report_progress(&self, store: Option<&JobStore>, job_id: Uuid, progress: f64, stage: &str) {
        if let Some(store) = store {
            store
                .update(job_id, |job| {
                    job.status = crate::job::JobStatus::Running;
                    job.progress = progress;
                    job.current_stage = Some(stage.to_string());
                    if job.started_at.is_none() {
                        job.started_at = Some(chrono::Utc::now());
                    }
                })
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_samples(seconds: f64, freq: f32, sample_rate: u32) -> Vec<f32> {
        let n = (seconds * sample_rate as f64) as usize;
        (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin() * 0.4)
            .collect()
    }

    #[tokio::test]
    async fn quick_mode_detection_completes_and_skips_neural() {
        let pipeline = DetectionPipeline::new(PipelineConfig::default());
        let samples = sine_samples(2.0, 220.0, 16_000);
        let result = pipeline
            .detect(
                AudioInput::Samples {
                    samples,
                    sample_rate: 16_000,
                },
                true,
                None,
            )
            .await
            .expect("detection should succeed");

        assert!(result.quick_mode);
        assert!(result.stages.neural.is_none());
        assert!(result.stages.sensors.is_empty());
        assert!(result.fused_score >= 0.0 && result.fused_score <= 1.0);

        let explanation = result.stages.explanation.expect("quick mode still reports a stub explanation");
        assert!(!explanation.llm_enhanced);
        assert!(explanation.top_features.is_empty());
        assert!(explanation.confidence_factors.is_empty());
    }

    #[tokio::test]
    async fn quick_mode_stages_config_can_opt_a_stage_back_in() {
        let mut config = PipelineConfig::default();
        config.quick_mode_stages.push("neural".to_string());
        let pipeline = DetectionPipeline::new(config);
        let samples = sine_samples(2.0, 220.0, 16_000);
        let result = pipeline
            .detect(
                AudioInput::Samples {
                    samples,
                    sample_rate: 16_000,
                },
                true,
                None,
            )
            .await
            .expect("detection should succeed");

        assert!(result.quick_mode);
        assert!(result.stages.neural.is_some(), "quick_mode_stages should have opted the neural stage back in");
        assert!(result.stages.sensors.is_empty(), "physics_analysis was not named, so sensors should still be skipped");
        assert!(result.stages.explanation.unwrap().top_features.is_empty(), "explainability was not named, stub stays in effect");
    }

    #[tokio::test]
    async fn full_mode_detection_populates_all_stages() {
        let pipeline = DetectionPipeline::new(PipelineConfig::default());
        let samples = sine_samples(3.0, 180.0, 16_000);
        let result = pipeline
            .detect(
                AudioInput::Samples {
                    samples,
                    sample_rate: 16_000,
                },
                false,
                None,
            )
            .await
            .expect("detection should succeed");

        assert!(!result.quick_mode);
        assert!(result.stages.neural.is_some());
        assert!(!result.stages.sensors.is_empty());
        assert!(result.stages.explanation.is_some());
    }

    #[tokio::test]
    async fn submit_and_poll_job_reaches_completed() {
        let pipeline = Arc::new(DetectionPipeline::new(PipelineConfig::default()));
        let samples = sine_samples(2.0, 150.0, 16_000);
        let job_id = pipeline
            .submit(
                AudioInput::Samples {
                    samples,
                    sample_rate: 16_000,
                },
                true,
            )
            .await
            .expect("submit should succeed");

        let mut attempts = 0;
        loop {
            let status = pipeline.get_job_status(job_id).await.expect("job should exist");
            if status.status == crate::job::JobStatus::Completed {
                break;
            }
            assert_ne!(status.status, crate::job::JobStatus::Failed);
            attempts += 1;
            assert!(attempts < 200, "job did not complete in time");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let result = pipeline.get_job_result(job_id).await.expect("result should be available");
        assert_eq!(result.job_id, job_id);
    }

    #[tokio::test]
    async fn too_short_audio_is_rejected_before_any_stage_runs() {
        let pipeline = DetectionPipeline::new(PipelineConfig::default());
        let result = pipeline
            .detect(
                AudioInput::Samples {
                    samples: vec![0.1f32; 10],
                    sample_rate: 16_000,
                },
                true,
                None,
            )
            .await;
        assert!(matches!(result, Err(PipelineError::OutOfRange(_))));
    }
}
