//! Sensor 12: Neural detector (prosecution, optional). Delegates to an
//! external synthetic-speech classifier when one is configured. Retries
//! transient failures with exponential backoff and always fails open —
//! this sensor's absence must never itself raise suspicion.

use std::collections::HashMap;
use std::time::Duration;

use super::{Sensor, SensorCategory, SensorMetadata, SensorResult};
use crate::waveform::Waveform;

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 200;

pub struct NeuralDetectorSensor {
    endpoint: Option<String>,
}

impl NeuralDetectorSensor {
    pub fn new(endpoint: Option<String>) -> Self {
        Self { endpoint }
    }

    pub fn disabled() -> Self {
        Self { endpoint: None }
    }
}

impl Sensor for NeuralDetectorSensor {
    fn name(&self) -> &str {
        "NeuralDetectorSensor"
    }

    fn category(&self) -> SensorCategory {
        SensorCategory::Prosecution
    }

    fn analyze(&self, waveform: &Waveform) -> SensorResult {
        let Some(endpoint) = &self.endpoint else {
            return fail_open(self.name(), self.category(), "no external model endpoint configured");
        };

        match query_with_retries(endpoint, waveform) {
            Ok(probability) => {
                let mut detail = HashMap::new();
                detail.insert("synthetic_probability".to_string(), probability);
                SensorResult {
                    sensor_name: self.name().to_string(),
                    passed: Some(probability < 0.5),
                    value: Some(probability),
                    threshold: Some(0.5),
                    reason: format!("external model reports synthetic probability {probability:.3}"),
                    detail,
                    metadata: SensorMetadata {
                        category: Some(self.category()),
                    },
                }
            }
            Err(e) => fail_open(self.name(), self.category(), format!("external model unavailable: {e}")),
        }
    }
}

fn fail_open(name: &str, category: SensorCategory, reason: impl Into<String>) -> SensorResult {
    SensorResult {
        sensor_name: name.to_string(),
        passed: Some(true),
        value: Some(0.0),
        threshold: Some(0.5),
        reason: reason.into(),
        detail: HashMap::new(),
        metadata: SensorMetadata {
            category: Some(category),
        },
    }
}

#[cfg(feature = "llm")]
fn query_with_retries(endpoint: &str, waveform: &Waveform) -> Result<f64, String> {
    let payload = serde_json::json!({
        "sample_rate": waveform.sample_rate(),
        "num_samples": waveform.samples().len(),
    });

    let mut attempt = 0;
    loop {
        match ureq::post(endpoint).send_json(payload.clone()) {
            Ok(response) => {
                let body: serde_json::Value = response.into_json().map_err(|e| e.to_string())?;
                return body
                    .get("probability")
                    .and_then(|v| v.as_f64())
                    .ok_or_else(|| "missing probability field".to_string());
            }
            Err(e) if attempt < MAX_RETRIES => {
                attempt += 1;
                std::thread::sleep(Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt)));
                let _ = e;
            }
            Err(e) => return Err(e.to_string()),
        }
    }
}

#[cfg(not(feature = "llm"))]
fn query_with_retries(_endpoint: &str, _waveform: &Waveform) -> Result<f64, String> {
    Err("crate built without the `llm` feature; no HTTP client available".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_sensor_fails_open() {
        let waveform = Waveform::from_samples(vec![0.0f32; 1_000], 16_000);
        let result = NeuralDetectorSensor::disabled().analyze(&waveform);
        assert_eq!(result.passed, Some(true));
        assert_eq!(result.value, Some(0.0));
    }
}
