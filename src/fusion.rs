//! Component G / Stage 5: the fusion engine. Combines the acoustic stage
//! scores (Stages 1-4) with the physics sensor registry's prosecution/
//! defense partition using a weighted average plus rule-based arbitration
//! and physics vetoes — the decision core of the pipeline.
//!
//! Open Question (preserved verbatim): the source's fusion-engine interface
//! accepts `stage_weights` twice in one constructor variant; this is a typo
//! and this implementation accepts a single `stage_weights` mapping only.

use std::collections::HashMap;

use serde::Serialize;

use crate::config::{FusionProfile, PipelineConfig};
use crate::sensors::{SensorCategory, SensorResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    GenuineLikely,
    Uncertain,
    SpoofLikely,
    SpoofHigh,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct BranchScores {
    pub acoustic: f64,
    pub neural: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FusionResult {
    pub success: bool,
    pub fused_score: f64,
    pub risk_score: f64,
    pub trust_score: f64,
    pub confidence: f64,
    pub decision: Decision,
    pub is_spoof: bool,
    pub stage_scores: HashMap<String, f64>,
    pub stage_contributions: HashMap<String, f64>,
    pub arbiter_override: String,
    pub arbiter_details: Vec<String>,
    pub profile: String,
    pub branch_scores: Option<BranchScores>,
    pub branch_agreement: Option<bool>,
}

impl FusionResult {
    fn failure() -> Self {
        Self {
            success: false,
            fused_score: 0.5,
            risk_score: 0.0,
            trust_score: 0.5,
            confidence: 0.0,
            decision: Decision::Uncertain,
            is_spoof: false,
            stage_scores: HashMap::new(),
            stage_contributions: HashMap::new(),
            arbiter_override: "No Stage Scores".to_string(),
            arbiter_details: vec!["no stage produced a usable score".to_string()],
            profile: "default".to_string(),
            branch_scores: None,
            branch_agreement: None,
        }
    }
}

/// The acoustic stages that participate in `branch_scores.acoustic` for the
/// dual-branch view: everything upstream of the neural classifier.
const ACOUSTIC_STAGES: [&str; 3] = ["feature_extraction", "temporal_analysis", "artifact_detection"];

const BREATH_SENSOR: &str = "BreathSensor";
const GLOTTAL_SENSOR: &str = "GlottalInertiaSensor";

/// Everything the fusion engine needs from upstream stages: one risk score
/// and (optionally) one confidence value per reporting stage, the full
/// sensor result map (for category partitioning and physics vetoes), the
/// bandwidth-selected profile name, and whether this is a quick-mode run
/// (equal-weight reduced fusion over Stages 1-3, per the distilled spec).
pub struct FusionInput<'a> {
    pub stage_scores: HashMap<String, f64>,
    pub stage_confidences: HashMap<String, f64>,
    pub sensor_results: &'a HashMap<String, SensorResult>,
    pub profile_name: &'a str,
    pub quick_mode: bool,
    pub dual_branch: bool,
}

pub fn fuse(config: &PipelineConfig, input: FusionInput<'_>) -> FusionResult {
    if input.stage_scores.is_empty() {
        return FusionResult::failure();
    }

    let profile = config.fusion_profile(input.profile_name);

    let (base_score, stage_contributions) = if input.quick_mode {
        weighted_average_equal(&input.stage_scores)
    } else {
        weighted_average(&input.stage_scores, profile)
    };

    let (risk_score, trust_score) = partition_sensors(input.sensor_results);

    let (mut fused_score, mut arbiter_override) = arbitrate(base_score, risk_score, trust_score);
    let mut arbiter_details = Vec::new();
    let veto_fired = apply_physics_vetoes(input.sensor_results, &mut fused_score, &mut arbiter_details);
    if !veto_fired {
        apply_trust_boost(input.sensor_results, &mut fused_score, &mut arbiter_details);
    }
    fused_score = fused_score.clamp(0.0, 1.0);
    if !arbiter_details.is_empty() && arbiter_override == "Weighted Average" {
        arbiter_override = "Physics Veto".to_string();
    }

    let confidence = mean_confidence(&input.stage_scores, &input.stage_confidences);
    let decision = decide(fused_score, confidence, profile, config);
    let is_spoof = fused_score > config.fusion_engine.decision_threshold;

    let (branch_scores, branch_agreement) = if input.dual_branch {
        let acoustic = mean_over_keys(&input.stage_scores, &ACOUSTIC_STAGES);
        let neural = input.stage_scores.get("neural").copied().unwrap_or(acoustic);
        let agreement = (acoustic - neural).abs() < 0.3;
        (Some(BranchScores { acoustic, neural }), Some(agreement))
    } else {
        (None, None)
    };

    FusionResult {
        success: true,
        fused_score,
        risk_score,
        trust_score,
        confidence,
        decision,
        is_spoof,
        stage_scores: input.stage_scores,
        stage_contributions,
        arbiter_override,
        arbiter_details,
        profile: input.profile_name.to_string(),
        branch_scores,
        branch_agreement,
    }
}

/// Weighted average using the active profile's `stage_weights`, renormalized
/// over the weights of the stages that actually reported a score. Stages
/// with no matching weight entry (or weight 0, e.g. `physics_analysis`,
/// which is scored separately through the prosecution/defense partition)
/// contribute nothing to `base_score` but are still carried in
/// `stage_scores` for the explainer.
fn weighted_average(stage_scores: &HashMap<String, f64>, profile: &FusionProfile) -> (f64, HashMap<String, f64>) {
    let weighted: Vec<(&String, f64, f64)> = stage_scores
        .iter()
        .filter_map(|(name, score)| {
            profile
                .stage_weights
                .get(name)
                .filter(|w| **w > 0.0)
                .map(|w| (name, *score, *w))
        })
        .collect();

    let weight_sum: f64 = weighted.iter().map(|(_, _, w)| w).sum();
    if weight_sum <= 1e-12 {
        return (0.5, HashMap::new());
    }

    let base_score = weighted.iter().map(|(_, s, w)| s * w).sum::<f64>() / weight_sum;
    let contributions = weighted
        .into_iter()
        .map(|(name, score, weight)| (name.clone(), (score * weight) / weight_sum))
        .collect();

    (base_score, contributions)
}

fn weighted_average_equal(stage_scores: &HashMap<String, f64>) -> (f64, HashMap<String, f64>) {
    let n = stage_scores.len();
    if n == 0 {
        return (0.5, HashMap::new());
    }
    let weight = 1.0 / n as f64;
    let base_score = stage_scores.values().sum::<f64>() / n as f64;
    let contributions = stage_scores.keys().map(|k| (k.clone(), weight)).collect();
    (base_score, contributions)
}

fn mean_over_keys(stage_scores: &HashMap<String, f64>, keys: &[&str]) -> f64 {
    let values: Vec<f64> = keys.iter().filter_map(|k| stage_scores.get(*k).copied()).collect();
    if values.is_empty() {
        0.5
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// `risk_score = max(value)` over prosecution sensors that produced a
/// numeric value (0 if none); `trust_score = mean(value)` over defense
/// sensors (0.5 if none). Informational sensors never participate.
fn partition_sensors(sensor_results: &HashMap<String, SensorResult>) -> (f64, f64) {
    let prosecution: Vec<f64> = sensor_results
        .values()
        .filter(|r| r.metadata.category == Some(SensorCategory::Prosecution))
        .filter_map(|r| r.value)
        .collect();
    let defense: Vec<f64> = sensor_results
        .values()
        .filter(|r| r.metadata.category == Some(SensorCategory::Defense))
        .filter_map(|r| r.value)
        .collect();

    let risk_score = prosecution.iter().cloned().fold(0.0f64, f64::max);
    let trust_score = if defense.is_empty() {
        0.5
    } else {
        defense.iter().sum::<f64>() / defense.len() as f64
    };
    (risk_score, trust_score)
}

fn arbitrate(base_score: f64, risk_score: f64, trust_score: f64) -> (f64, String) {
    if risk_score > 0.8 {
        (base_score.max(risk_score), "Prosecution Veto".to_string())
    } else if risk_score < 0.3 && trust_score < 0.3 {
        (base_score.min(0.2), "Defense Validation".to_string())
    } else {
        (base_score, "Weighted Average".to_string())
    }
}

/// Rule-based vetoes independent of profile weights: a glottal-physics
/// violation floors the score at 0.85; an impossible breath pattern floors
/// it at 0.90. Returns whether any veto fired, so the trust boost below is
/// only ever applied when nothing else did.
fn apply_physics_vetoes(
    sensor_results: &HashMap<String, SensorResult>,
    fused_score: &mut f64,
    arbiter_details: &mut Vec<String>,
) -> bool {
    let mut fired = false;

    if let Some(glottal) = sensor_results.get(GLOTTAL_SENSOR) {
        let violations = glottal.detail.get("violations").copied().unwrap_or(0.0);
        if violations > 0.0 {
            *fused_score = fused_score.max(0.85);
            arbiter_details.push(format!("glottal physics violation ({violations:.0}): floor 0.85"));
            fired = true;
        }
    }

    if let Some(breath) = sensor_results.get(BREATH_SENSOR) {
        if breath.passed == Some(false) {
            *fused_score = fused_score.max(0.90);
            arbiter_details.push("impossible breath/phonation pattern: floor 0.90".to_string());
            fired = true;
        }
    }

    fired
}

/// A glottal sensor with zero violations is a strong humanness signal;
/// halve the fused score, but only when no other veto fired this round.
fn apply_trust_boost(
    sensor_results: &HashMap<String, SensorResult>,
    fused_score: &mut f64,
    arbiter_details: &mut Vec<String>,
) {
    if let Some(glottal) = sensor_results.get(GLOTTAL_SENSOR) {
        let violations = glottal.detail.get("violations").copied().unwrap_or(0.0);
        if violations == 0.0 && glottal.passed == Some(true) {
            *fused_score *= 0.5;
            arbiter_details.push("clean glottal onset/offset profile: trust boost x0.5".to_string());
        }
    }
}

fn mean_confidence(stage_scores: &HashMap<String, f64>, stage_confidences: &HashMap<String, f64>) -> f64 {
    if stage_scores.is_empty() {
        return 0.0;
    }
    let sum: f64 = stage_scores
        .keys()
        .map(|k| stage_confidences.get(k).copied().unwrap_or(0.8))
        .sum();
    sum / stage_scores.len() as f64
}

fn decide(fused_score: f64, confidence: f64, profile: &FusionProfile, config: &PipelineConfig) -> Decision {
    if confidence < config.fusion_engine.confidence_threshold {
        return Decision::Uncertain;
    }
    if fused_score > 0.7 {
        Decision::SpoofHigh
    } else if fused_score > profile.synthetic_threshold {
        Decision::SpoofLikely
    } else if fused_score > 0.3 {
        Decision::Uncertain
    } else {
        Decision::GenuineLikely
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::SensorMetadata;

    fn sensor(name: &str, category: SensorCategory, value: f64, passed: Option<bool>) -> SensorResult {
        SensorResult {
            sensor_name: name.to_string(),
            passed,
            value: Some(value),
            threshold: None,
            reason: String::new(),
            detail: HashMap::new(),
            metadata: SensorMetadata {
                category: Some(category),
            },
        }
    }

    #[test]
    fn no_stage_scores_reports_failure() {
        let config = PipelineConfig::default();
        let sensors = HashMap::new();
        let result = fuse(
            &config,
            FusionInput {
                stage_scores: HashMap::new(),
                stage_confidences: HashMap::new(),
                sensor_results: &sensors,
                profile_name: "default",
                quick_mode: false,
                dual_branch: false,
            },
        );
        assert!(!result.success);
        assert_eq!(result.decision, Decision::Uncertain);
    }

    #[test]
    fn high_risk_sensor_triggers_prosecution_veto() {
        let config = PipelineConfig::default();
        let mut sensors = HashMap::new();
        sensors.insert(
            "PhaseCoherenceSensor".to_string(),
            sensor("PhaseCoherenceSensor", SensorCategory::Prosecution, 0.95, Some(false)),
        );
        let mut stage_scores = HashMap::new();
        stage_scores.insert("feature_extraction".to_string(), 0.2);
        stage_scores.insert("temporal_analysis".to_string(), 0.2);
        let result = fuse(
            &config,
            FusionInput {
                stage_scores,
                stage_confidences: HashMap::new(),
                sensor_results: &sensors,
                profile_name: "default",
                quick_mode: false,
                dual_branch: false,
            },
        );
        assert_eq!(result.arbiter_override, "Prosecution Veto");
        assert!(result.fused_score >= 0.95);
        assert!(result.is_spoof);
    }

    #[test]
    fn clean_glottal_sensor_applies_trust_boost() {
        let config = PipelineConfig::default();
        let mut sensors = HashMap::new();
        let mut clean = sensor(GLOTTAL_SENSOR, SensorCategory::Prosecution, 0.0, Some(true));
        clean.detail.insert("violations".to_string(), 0.0);
        sensors.insert(GLOTTAL_SENSOR.to_string(), clean);
        let mut stage_scores = HashMap::new();
        stage_scores.insert("feature_extraction".to_string(), 0.5);
        stage_scores.insert("temporal_analysis".to_string(), 0.5);
        let result = fuse(
            &config,
            FusionInput {
                stage_scores,
                stage_confidences: HashMap::new(),
                sensor_results: &sensors,
                profile_name: "default",
                quick_mode: false,
                dual_branch: false,
            },
        );
        assert!(result.fused_score < 0.5);
    }

    #[test]
    fn breath_violation_floors_score_at_point_nine() {
        let config = PipelineConfig::default();
        let mut sensors = HashMap::new();
        sensors.insert(
            BREATH_SENSOR.to_string(),
            sensor(BREATH_SENSOR, SensorCategory::Defense, 0.95, Some(false)),
        );
        let mut stage_scores = HashMap::new();
        stage_scores.insert("feature_extraction".to_string(), 0.1);
        let result = fuse(
            &config,
            FusionInput {
                stage_scores,
                stage_confidences: HashMap::new(),
                sensor_results: &sensors,
                profile_name: "default",
                quick_mode: false,
                dual_branch: false,
            },
        );
        assert!(result.fused_score >= 0.90);
    }

    #[test]
    fn quick_mode_uses_equal_weights() {
        let config = PipelineConfig::default();
        let sensors = HashMap::new();
        let mut stage_scores = HashMap::new();
        stage_scores.insert("feature_extraction".to_string(), 0.2);
        stage_scores.insert("temporal_analysis".to_string(), 0.4);
        stage_scores.insert("artifact_detection".to_string(), 0.6);
        let result = fuse(
            &config,
            FusionInput {
                stage_scores,
                stage_confidences: HashMap::new(),
                sensor_results: &sensors,
                profile_name: "default",
                quick_mode: true,
                dual_branch: false,
            },
        );
        assert!((result.fused_score - 0.4).abs() < 1e-9);
    }

    #[test]
    fn dual_branch_reports_agreement() {
        let config = PipelineConfig::default();
        let sensors = HashMap::new();
        let mut stage_scores = HashMap::new();
        stage_scores.insert("feature_extraction".to_string(), 0.2);
        stage_scores.insert("temporal_analysis".to_string(), 0.2);
        stage_scores.insert("artifact_detection".to_string(), 0.2);
        stage_scores.insert("neural".to_string(), 0.25);
        let result = fuse(
            &config,
            FusionInput {
                stage_scores,
                stage_confidences: HashMap::new(),
                sensor_results: &sensors,
                profile_name: "default",
                quick_mode: false,
                dual_branch: true,
            },
        );
        assert_eq!(result.branch_agreement, Some(true));
    }
}
