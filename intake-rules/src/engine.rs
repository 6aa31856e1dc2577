//! The evaluation engine.

use crate::context::{ReferenceData, RuleConfig, RuleContext};
use crate::model::{Evaluation, Finding};
use crate::registry::{default_registry, RuleRegistry};
use crate::thresholds::ThresholdConfig;
use serde_json::Value;

/// Evaluate a claim against the default rule registry.
pub fn evaluate(
    claim: &Value,
    datasets: &ReferenceData,
    config: &RuleConfig,
    thresholds: &ThresholdConfig,
) -> Evaluation {
    evaluate_with_registry(default_registry(), claim, datasets, config, thresholds)
}

/// Evaluate a claim against an explicit registry.
///
/// Deterministic given identical inputs; no side effects; a rule that
/// errors contributes zero findings and a warning log line.
pub fn evaluate_with_registry(
    registry: &RuleRegistry,
    claim: &Value,
    datasets: &ReferenceData,
    config: &RuleConfig,
    thresholds: &ThresholdConfig,
) -> Evaluation {
    let context = RuleContext {
        claim,
        datasets,
        config,
    };

    let mut findings: Vec<Finding> = Vec::new();
    let mut score_delta = 0.0f64;
    let mut roi_estimate: Option<f64> = None;
    let mut ncci_flags = Vec::new();
    let mut coverage_flags = Vec::new();
    let mut provider_flags = Vec::new();

    for rule in registry.active_rules() {
        let hits = match rule(&context) {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(error = %e, "rule failed; contributing zero findings");
                continue;
            }
        };

        for mut finding in hits {
            if let Some(rule_override) = config.rule_overrides.get(&finding.rule_id) {
                if rule_override.disabled {
                    continue;
                }
                if let Some(weight) = rule_override.weight {
                    finding.weight = weight;
                }
                if let Some(severity) = rule_override.severity {
                    finding.severity = severity;
                }
            }

            score_delta += finding.weight;
            if let Some(roi) = finding.estimated_roi() {
                roi_estimate = Some(roi_estimate.unwrap_or(0.0) + roi);
            }
            match finding.category() {
                Some("ncci") => push_unique(&mut ncci_flags, &finding.flag),
                Some("coverage") => push_unique(&mut coverage_flags, &finding.flag),
                Some("provider") => push_unique(&mut provider_flags, &finding.flag),
                _ => {}
            }
            findings.push(finding);
        }
    }

    let score = ThresholdConfig::clamp_score(config.base_score + score_delta);
    let decision_mode = thresholds.decision_mode(score);

    Evaluation {
        score,
        confidence: score,
        decision_mode,
        findings,
        ncci_flags,
        coverage_flags,
        provider_flags,
        roi_estimate,
    }
}

fn push_unique(flags: &mut Vec<String>, flag: &str) {
    if !flags.iter().any(|existing| existing == flag) {
        flags.push(flag.to_string());
    }
}
