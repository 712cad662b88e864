//! Component E / Stage 3b: the physics sensor registry. Each sensor is a
//! small, stateless, physics-motivated check that runs independently of the
//! neural branch and reports a category-tagged result the fusion engine can
//! weigh, veto on, or simply surface as informational.

pub mod bandwidth;
pub mod breath;
pub mod breathing_pattern;
pub mod digital_silence;
pub mod dsp_util;
pub mod dynamic_range;
pub mod formant_trajectory;
pub mod glottal_inertia;
pub mod global_formants;
pub mod neural_detector;
pub mod phase_coherence;
pub mod pitch_velocity;
pub mod prosodic_continuity;

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::waveform::Waveform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorCategory {
    Prosecution,
    Defense,
    Informational,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct SensorMetadata {
    pub category: Option<SensorCategory>,
}

/// A sensor's verdict: `passed = None` means "inconclusive" (timeout, error,
/// SNR gate) and must never be treated as either a pass or a failure by the
/// fusion engine.
#[derive(Debug, Clone, Serialize)]
pub struct SensorResult {
    pub sensor_name: String,
    pub passed: Option<bool>,
    pub value: Option<f64>,
    pub threshold: Option<f64>,
    pub reason: String,
    pub detail: HashMap<String, f64>,
    pub metadata: SensorMetadata,
}

impl SensorResult {
    pub fn inconclusive(name: &str, category: SensorCategory, reason: impl Into<String>) -> Self {
        Self {
            sensor_name: name.to_string(),
            passed: None,
            value: None,
            threshold: None,
            reason: reason.into(),
            detail: HashMap::new(),
            metadata: SensorMetadata {
                category: Some(category),
            },
        }
    }
}

/// Stateless, concurrency-safe physics check. Implementors must not hold any
/// state across calls to `analyze` — the registry may run many instances of
/// the same sensor type concurrently.
pub trait Sensor: Send + Sync {
    fn name(&self) -> &str;
    fn category(&self) -> SensorCategory;
    fn analyze(&self, waveform: &Waveform) -> SensorResult;
}

/// Live set of registered sensors, run in parallel with a per-sensor timeout.
#[derive(Default)]
pub struct SensorRegistry {
    sensors: Vec<Arc<dyn Sensor>>,
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, sensor: Arc<dyn Sensor>) {
        self.sensors.push(sensor);
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Runs every registered sensor concurrently, each bounded by `timeout`.
    /// A sensor that exceeds its timeout or panics contributes a
    /// `passed=None` result rather than failing the whole batch. The gather
    /// only completes once every sensor has either returned or timed out.
    pub async fn analyze_all(&self, waveform: &Waveform, timeout: Duration) -> HashMap<String, SensorResult> {
        let futures = self.sensors.iter().map(|sensor| {
            let sensor = Arc::clone(sensor);
            let waveform = waveform.clone();
            let name = sensor.name().to_string();
            let category = sensor.category();
            async move {
                let outcome = tokio::time::timeout(
                    timeout,
                    tokio::task::spawn_blocking(move || sensor.analyze(&waveform)),
                )
                .await;
                let result = match outcome {
                    Ok(Ok(result)) => result,
                    Ok(Err(join_err)) => SensorResult::inconclusive(&name, category, format!("Error: {join_err}")),
                    Err(_elapsed) => SensorResult::inconclusive(&name, category, "Timeout"),
                };
                (name, result)
            }
        });

        futures_util::future::join_all(futures).await.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysPasses;
    impl Sensor for AlwaysPasses {
        fn name(&self) -> &str {
            "AlwaysPasses"
        }
        fn category(&self) -> SensorCategory {
            SensorCategory::Defense
        }
        fn analyze(&self, _waveform: &Waveform) -> SensorResult {
            SensorResult {
                sensor_name: self.name().to_string(),
                passed: Some(true),
                value: Some(0.0),
                threshold: None,
                reason: "ok".to_string(),
                detail: HashMap::new(),
                metadata: SensorMetadata {
                    category: Some(SensorCategory::Defense),
                },
            }
        }
    }

    #[tokio::test]
    async fn registry_runs_registered_sensors_and_returns_results() {
        let mut registry = SensorRegistry::new();
        registry.register(Arc::new(AlwaysPasses));
        let waveform = Waveform::from_samples(vec![0.0f32; 16_000], 16_000);
        let results = registry.analyze_all(&waveform, Duration::from_secs(1)).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results["AlwaysPasses"].passed, Some(true));
    }
}
