//! Finding and evaluation models.

use serde::{Deserialize, Serialize};

/// Severity of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational.
    Low,
    /// Worth a look.
    Medium,
    /// Likely payment impact.
    High,
    /// Definite edit or exclusion hit.
    Critical,
}

impl Severity {
    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// One rule's emitted observation about a claim.
///
/// Weights may be positive (risk-increasing) or negative (risk-reducing,
/// e.g. an LCD mismatch arguing against payment).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Stable rule identifier (`NCCI_PTP`, `OIG_EXCLUSION`, …).
    pub rule_id: String,
    /// Human-readable description of what fired.
    pub description: String,
    /// Score contribution.
    pub weight: f64,
    /// Severity band.
    pub severity: Severity,
    /// Short flag routed into category flag lists.
    pub flag: String,
    /// Regulatory citation, when one backs the finding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation: Option<String>,
    /// Structured detail; `category` drives flag routing and
    /// `estimated_roi` feeds the ROI accumulator.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Finding {
    /// Build a finding with empty metadata.
    pub fn new(
        rule_id: impl Into<String>,
        description: impl Into<String>,
        weight: f64,
        severity: Severity,
        flag: impl Into<String>,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            description: description.into(),
            weight,
            severity,
            flag: flag.into(),
            citation: None,
            metadata: serde_json::json!({}),
        }
    }

    /// Attach a citation.
    #[must_use]
    pub fn with_citation(mut self, citation: impl Into<String>) -> Self {
        self.citation = Some(citation.into());
        self
    }

    /// Attach structured metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// The finding's category, when its metadata declares one.
    pub fn category(&self) -> Option<&str> {
        self.metadata["category"].as_str()
    }

    /// The finding's ROI estimate, when numeric.
    pub fn estimated_roi(&self) -> Option<f64> {
        self.metadata["estimated_roi"].as_f64()
    }
}

/// Aggregated outcome of evaluating one claim.
#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    /// Final score, clamped to `[0, 1]`.
    pub score: f64,
    /// Confidence (aligned with the score).
    pub confidence: f64,
    /// Selected decision mode.
    pub decision_mode: crate::thresholds::DecisionMode,
    /// All findings, in rule order.
    pub findings: Vec<Finding>,
    /// Deduplicated NCCI-category flags.
    pub ncci_flags: Vec<String>,
    /// Deduplicated coverage-category flags.
    pub coverage_flags: Vec<String>,
    /// Deduplicated provider-category flags.
    pub provider_flags: Vec<String>,
    /// Accumulated ROI estimate, when any finding produced one.
    pub roi_estimate: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn finding_serialization_roundtrip() {
        let finding = Finding::new(
            "NCCI_PTP",
            "PTP edit between 11042 and 11045",
            0.18,
            Severity::Critical,
            "ncci_ptp",
        )
        .with_citation("CMS NCCI")
        .with_metadata(json!({"category": "ncci", "line_indexes": [0, 1]}));

        let text = serde_json::to_string(&finding).unwrap();
        let back: Finding = serde_json::from_str(&text).unwrap();
        assert_eq!(back, finding);
    }

    #[test]
    fn category_and_roi_accessors() {
        let finding = Finding::new("X", "x", 0.1, Severity::Low, "x")
            .with_metadata(json!({"category": "financial", "estimated_roi": 120.5}));
        assert_eq!(finding.category(), Some("financial"));
        assert_eq!(finding.estimated_roi(), Some(120.5));

        let bare = Finding::new("Y", "y", 0.1, Severity::Low, "y");
        assert_eq!(bare.category(), None);
        assert_eq!(bare.estimated_roi(), None);
    }
}
