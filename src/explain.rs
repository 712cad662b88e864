//! Component H / Stage 6: explainability. Turns the fused decision and the
//! upstream stage results into a human-readable summary, a ranked feature
//! list, and a reasoning chain an analyst can audit — purely descriptive,
//! reported after fusion and never fed back into `fused_score`.

use std::collections::HashMap;

use serde::Serialize;

use crate::artifacts::ArtifactDetectionResult;
use crate::config::ExplainabilityConfig;
use crate::features::FeatureExtractionResult;
use crate::fusion::{Decision, FusionResult};
use crate::neural::NeuralResult;
use crate::sensors::SensorResult;
use crate::temporal::TemporalAnalysisResult;

#[derive(Debug, Clone, Serialize)]
pub struct RankedFeature {
    pub feature_type: String,
    pub std: f64,
    pub mean: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExplanationResult {
    pub summary: String,
    pub reasoning_chain: Vec<String>,
    pub confidence_factors: HashMap<String, f64>,
    pub top_features: Vec<RankedFeature>,
    pub artifact_summary: String,
    pub suspicious_segment_count: usize,
    pub llm_enhanced: bool,
}

pub struct ExplainInput<'a> {
    pub features: &'a FeatureExtractionResult,
    pub temporal: &'a TemporalAnalysisResult,
    pub artifacts: &'a ArtifactDetectionResult,
    pub neural: &'a NeuralResult,
    pub sensor_results: &'a HashMap<String, SensorResult>,
    pub fusion: &'a FusionResult,
}

pub fn explain(config: &ExplainabilityConfig, input: ExplainInput<'_>) -> ExplanationResult {
    let top_features = rank_features(input.features, config.max_top_features);
    let artifact_summary = summarize_artifacts(input.artifacts);
    let reasoning_chain = build_reasoning_chain(&input);
    let confidence_factors = build_confidence_factors(&input);
    let summary = build_summary(&input, &artifact_summary);

    let mut result = ExplanationResult {
        summary,
        reasoning_chain,
        confidence_factors,
        top_features,
        artifact_summary,
        suspicious_segment_count: input.temporal.suspicious_segments.len(),
        llm_enhanced: false,
    };

    if config.enable_llm {
        enhance_with_llm(config, &mut result);
    }

    result
}

/// Stage 6 is skipped entirely in quick mode; this is the cheap stand-in
/// quick-mode jobs get instead of a real explanation, mirroring the ground
/// truth's quick-pipeline response ("Quick mode only runs acoustic
/// analysis...").
pub fn quick_mode_stub(fused_score: f64) -> ExplanationResult {
    ExplanationResult {
        summary: format!("Quick detection completed with score {fused_score:.3}"),
        reasoning_chain: vec![
            "Quick mode only runs acoustic analysis (stages 1-3). Use full mode for neural network analysis.".to_string(),
        ],
        confidence_factors: HashMap::new(),
        top_features: Vec::new(),
        artifact_summary: String::new(),
        suspicious_segment_count: 0,
        llm_enhanced: false,
    }
}

fn rank_features(features: &FeatureExtractionResult, max: usize) -> Vec<RankedFeature> {
    let mut ranked: Vec<RankedFeature> = features
        .feature_stats
        .iter()
        .map(|(feature_type, stats)| RankedFeature {
            feature_type: feature_type.clone(),
            std: stats.std,
            mean: stats.mean,
        })
        .collect();
    ranked.sort_by(|a, b| b.std.partial_cmp(&a.std).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(max);
    ranked
}

fn summarize_artifacts(artifacts: &ArtifactDetectionResult) -> String {
    if !artifacts.success {
        return "artifact detection did not produce a result".to_string();
    }
    if artifacts.total_artifacts == 0 {
        return "no notable artifacts detected".to_string();
    }
    format!(
        "{} artifact(s) detected ({} silence region(s), {} click(s)); artifact_score={:.2}",
        artifacts.total_artifacts,
        artifacts.silence_artifacts.regions.len(),
        artifacts.click_artifacts.click_times.len(),
        artifacts.artifact_score
    )
}

fn build_reasoning_chain(input: &ExplainInput<'_>) -> Vec<String> {
    let mut chain = Vec::new();

    chain.push(format!(
        "stage scores combined via {}: {:?}",
        input.fusion.arbiter_override, input.fusion.stage_scores
    ));

    for detail in &input.fusion.arbiter_details {
        chain.push(detail.clone());
    }

    let prosecution_hits: Vec<&str> = input
        .sensor_results
        .values()
        .filter(|r| r.passed == Some(false))
        .map(|r| r.sensor_name.as_str())
        .collect();
    if !prosecution_hits.is_empty() {
        chain.push(format!("sensors flagging anomalies: {}", prosecution_hits.join(", ")));
    }

    if input.neural.success {
        chain.push(format!(
            "neural branch spoof_probability={:.2} over {} chunk(s){}",
            input.neural.spoof_probability,
            input.neural.num_chunks,
            if input.neural.demo_mode { " (demo mode, untrained)" } else { "" }
        ));
    }

    chain.push(format!(
        "fused_score={:.2}, risk_score={:.2}, trust_score={:.2} -> {:?}",
        input.fusion.fused_score, input.fusion.risk_score, input.fusion.trust_score, input.fusion.decision
    ));

    chain
}

fn build_confidence_factors(input: &ExplainInput<'_>) -> HashMap<String, f64> {
    let mut factors = input.fusion.stage_contributions.clone();
    factors.insert("fusion_confidence".to_string(), input.fusion.confidence);
    factors.insert(
        "sensor_coverage".to_string(),
        if input.sensor_results.is_empty() {
            0.0
        } else {
            input
                .sensor_results
                .values()
                .filter(|r| r.passed.is_some())
                .count() as f64
                / input.sensor_results.len() as f64
        },
    );

    let stage_failed = !input.features.success || !input.temporal.success || !input.artifacts.success;
    factors.insert("stage_failure".to_string(), if stage_failed { 1.0 } else { 0.0 });

    let model_fallback = !input.neural.success || input.neural.demo_mode;
    factors.insert("model_fallback".to_string(), if model_fallback { 1.0 } else { 0.0 });
    factors.insert("demo_mode".to_string(), if input.neural.demo_mode { 1.0 } else { 0.0 });

    let branch_disagreement = input.fusion.branch_agreement == Some(false);
    factors.insert(
        "branch_disagreement".to_string(),
        if branch_disagreement { 1.0 } else { 0.0 },
    );

    let low_confidence = input.fusion.confidence < 0.5;
    factors.insert("low_confidence".to_string(), if low_confidence { 1.0 } else { 0.0 });

    factors
}

fn build_summary(input: &ExplainInput<'_>, artifact_summary: &str) -> String {
    let verdict = match input.fusion.decision {
        Decision::GenuineLikely => "likely genuine",
        Decision::Uncertain => "uncertain",
        Decision::SpoofLikely => "likely synthetic",
        Decision::SpoofHigh => "highly likely synthetic",
    };
    format!(
        "Audio assessed as {verdict} (fused_score={:.2}, confidence={:.2}). {artifact_summary}.",
        input.fusion.fused_score, input.fusion.confidence
    )
}

#[cfg(feature = "llm")]
fn enhance_with_llm(config: &ExplainabilityConfig, result: &mut ExplanationResult) {
    let endpoint = match std::env::var("DEEPFAKE_LLM_ENDPOINT") {
        Ok(v) => v,
        Err(_) => return,
    };

    let request_body = serde_json::json!({
        "model": config.llm_model_id,
        "summary": result.summary,
        "reasoning_chain": result.reasoning_chain,
    });

    let response = ureq::post(&endpoint).send_json(request_body);
    match response {
        Ok(resp) => {
            if let Ok(body) = resp.into_json::<serde_json::Value>() {
                if let Some(rewritten) = body.get("summary").and_then(|v| v.as_str()) {
                    result.summary = rewritten.to_string();
                    result.llm_enhanced = true;
                    return;
                }
            }
            log::warn!("llm explanation enhancement returned an unusable body; keeping local summary");
        }
        Err(e) => log::warn!("llm explanation enhancement failed, keeping local summary: {e}"),
    }
}

#[cfg(not(feature = "llm"))]
fn enhance_with_llm(_config: &ExplainabilityConfig, _result: &mut ExplanationResult) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureStats;
    use crate::fusion::BranchScores;

    fn empty_features() -> FeatureExtractionResult {
        FeatureExtractionResult {
            success: true,
            error: None,
            features: HashMap::new(),
            combined_features: crate::features::FeatureMatrix::default(),
            feature_stats: {
                let mut m = HashMap::new();
                m.insert(
                    "mfcc".to_string(),
                    FeatureStats {
                        mean: 0.1,
                        std: 2.0,
                        min: -1.0,
                        max: 1.0,
                    },
                );
                m.insert(
                    "lfcc".to_string(),
                    FeatureStats {
                        mean: 0.0,
                        std: 0.5,
                        min: -1.0,
                        max: 1.0,
                    },
                );
                m
            },
            anomaly_score: 0.3,
            num_frames: 10,
            feature_dim: 20,
        }
    }

    fn empty_temporal() -> TemporalAnalysisResult {
        TemporalAnalysisResult {
            success: true,
            error: None,
            temporal_score: 0.1,
            discontinuities: Default::default(),
            transitions: Default::default(),
            feature_anomalies: Default::default(),
            suspicious_segments: Vec::new(),
            num_anomalies: 0,
        }
    }

    fn empty_artifacts() -> ArtifactDetectionResult {
        ArtifactDetectionResult {
            success: true,
            error: None,
            artifact_score: 0.0,
            silence_artifacts: Default::default(),
            click_artifacts: Default::default(),
            frequency_artifacts: Default::default(),
            phase_artifacts: Default::default(),
            statistical_features: Default::default(),
            all_artifacts: Vec::new(),
            total_artifacts: 0,
        }
    }

    fn empty_neural() -> NeuralResult {
        NeuralResult {
            success: true,
            error: None,
            spoof_probability: 0.2,
            demo_mode: true,
            chunk_scores: vec![0.2],
            mean_chunk_score: 0.2,
            num_chunks: 1,
        }
    }

    fn empty_fusion() -> FusionResult {
        FusionResult {
            success: true,
            fused_score: 0.25,
            risk_score: 0.1,
            trust_score: 0.6,
            confidence: 0.8,
            decision: Decision::GenuineLikely,
            is_spoof: false,
            stage_scores: HashMap::new(),
            stage_contributions: HashMap::new(),
            arbiter_override: "Weighted Average".to_string(),
            arbiter_details: Vec::new(),
            profile: "default".to_string(),
            branch_scores: Some(BranchScores {
                acoustic: 0.2,
                neural: 0.2,
            }),
            branch_agreement: Some(true),
        }
    }

    #[test]
    fn ranks_features_by_std_descending() {
        let features = empty_features();
        let ranked = rank_features(&features, 10);
        assert_eq!(ranked[0].feature_type, "mfcc");
    }

    #[test]
    fn summary_mentions_decision_and_artifacts() {
        let features = empty_features();
        let temporal = empty_temporal();
        let artifacts = empty_artifacts();
        let neural = empty_neural();
        let sensors = HashMap::new();
        let fusion = empty_fusion();

        let result = explain(
            &ExplainabilityConfig::default(),
            ExplainInput {
                features: &features,
                temporal: &temporal,
                artifacts: &artifacts,
                neural: &neural,
                sensor_results: &sensors,
                fusion: &fusion,
            },
        );

        assert!(result.summary.contains("likely genuine"));
        assert!(!result.llm_enhanced);
    }
}
