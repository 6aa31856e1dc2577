//! Threshold configuration for decision modes.

use serde::{Deserialize, Serialize};

/// Decision modes, ordered weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionMode {
    /// Below every threshold: surfaced for information only.
    Informational,
    /// Reviewer recommendation.
    Recommendation,
    /// Hold pending review.
    SoftHold,
    /// Approve automatically.
    AutoApprove,
    /// Approve on the fast path.
    AutoApproveFast,
}

impl DecisionMode {
    /// Stable string form used in persisted results.
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionMode::Informational => "informational",
            DecisionMode::Recommendation => "recommendation",
            DecisionMode::SoftHold => "soft_hold",
            DecisionMode::AutoApprove => "auto_approve",
            DecisionMode::AutoApproveFast => "auto_approve_fast",
        }
    }
}

impl std::fmt::Display for DecisionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Score thresholds selecting the decision mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Minimum score for a recommendation.
    pub recommendation_min: f64,
    /// Minimum score for a soft hold.
    pub soft_hold_min: f64,
    /// Minimum score for auto-approval.
    pub auto_approve_min: f64,
    /// Minimum score for the fast path.
    pub fast_path_min: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            recommendation_min: 0.6,
            soft_hold_min: 0.8,
            auto_approve_min: 0.9,
            fast_path_min: 0.95,
        }
    }
}

impl ThresholdConfig {
    /// Select the decision mode for a score.
    pub fn decision_mode(&self, score: f64) -> DecisionMode {
        if score >= self.auto_approve_min {
            if score >= self.fast_path_min {
                DecisionMode::AutoApproveFast
            } else {
                DecisionMode::AutoApprove
            }
        } else if score >= self.soft_hold_min {
            DecisionMode::SoftHold
        } else if score >= self.recommendation_min {
            DecisionMode::Recommendation
        } else {
            DecisionMode::Informational
        }
    }

    /// Clamp a score into `[0, 1]`.
    pub fn clamp_score(score: f64) -> f64 {
        score.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_boundaries() {
        let thresholds = ThresholdConfig::default();
        assert_eq!(thresholds.decision_mode(0.95), DecisionMode::AutoApproveFast);
        assert_eq!(thresholds.decision_mode(0.94), DecisionMode::AutoApprove);
        assert_eq!(thresholds.decision_mode(0.90), DecisionMode::AutoApprove);
        assert_eq!(thresholds.decision_mode(0.89), DecisionMode::SoftHold);
        assert_eq!(thresholds.decision_mode(0.80), DecisionMode::SoftHold);
        assert_eq!(thresholds.decision_mode(0.68), DecisionMode::Recommendation);
        assert_eq!(thresholds.decision_mode(0.60), DecisionMode::Recommendation);
        assert_eq!(thresholds.decision_mode(0.59), DecisionMode::Informational);
    }

    #[test]
    fn mode_is_monotonic_in_score() {
        let thresholds = ThresholdConfig::default();
        let mut previous = DecisionMode::Informational;
        for step in 0..=100 {
            let score = f64::from(step) / 100.0;
            let mode = thresholds.decision_mode(score);
            assert!(mode >= previous, "downgrade at score {score}");
            previous = mode;
        }
    }

    #[test]
    fn clamp_bounds() {
        assert_eq!(ThresholdConfig::clamp_score(-0.3), 0.0);
        assert_eq!(ThresholdConfig::clamp_score(0.42), 0.42);
        assert_eq!(ThresholdConfig::clamp_score(1.7), 1.0);
    }
}
