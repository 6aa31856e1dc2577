//! NCCI edits: procedure-to-procedure pairs and medically-unlikely-edit
//! limits.

use crate::context::{ptp_key, RuleContext};
use crate::model::{Finding, Severity};
use crate::RuleError;
use serde_json::json;

/// Flag code pairs present in the NCCI PTP table.
pub fn ncci_ptp_rule(context: &RuleContext<'_>) -> Result<Vec<Finding>, RuleError> {
    let items = context.items();
    let codes: Vec<Option<&str>> = items.iter().map(RuleContext::item_code).collect();
    let mut findings = Vec::new();

    for (i, code_a) in codes.iter().enumerate() {
        let Some(code_a) = code_a else { continue };
        for (j, code_b) in codes.iter().enumerate().skip(i + 1) {
            let Some(code_b) = code_b else { continue };
            let key = ptp_key(code_a, code_b);
            if let Some(edit) = context.datasets.ncci_ptp.get(&key) {
                let mut finding = Finding::new(
                    "NCCI_PTP",
                    format!("PTP edit between {code_a} and {code_b}"),
                    0.18,
                    Severity::Critical,
                    "ncci_ptp",
                )
                .with_metadata(json!({
                    "category": "ncci",
                    "line_indexes": [i, j],
                    "modifier": edit.modifier,
                }));
                if let Some(citation) = &edit.citation {
                    finding = finding.with_citation(citation.clone());
                }
                findings.push(finding);
            }
        }
    }
    Ok(findings)
}

/// Flag quantities above the MUE limit for their code.
pub fn ncci_mue_rule(context: &RuleContext<'_>) -> Result<Vec<Finding>, RuleError> {
    let mut findings = Vec::new();
    for (index, item) in context.items().iter().enumerate() {
        let Some(code) = RuleContext::item_code(item) else { continue };
        let quantity = RuleContext::item_quantity(item);
        if let Some(limit) = context.datasets.ncci_mue.get(code) {
            if quantity > *limit {
                findings.push(
                    Finding::new(
                        "NCCI_MUE",
                        format!("Quantity {quantity} exceeds MUE limit {limit} for {code}"),
                        0.16,
                        Severity::High,
                        "ncci_mue",
                    )
                    .with_citation("CMS NCCI MUE")
                    .with_metadata(json!({
                        "category": "ncci",
                        "line_index": index,
                        "limit": limit,
                    })),
                );
            }
        }
    }
    Ok(findings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{PtpEdit, ReferenceData, RuleConfig};
    use serde_json::Value;

    fn context<'a>(
        claim: &'a Value,
        datasets: &'a ReferenceData,
        config: &'a RuleConfig,
    ) -> RuleContext<'a> {
        RuleContext {
            claim,
            datasets,
            config,
        }
    }

    #[test]
    fn ptp_pair_fires_once_per_pair() {
        let mut datasets = ReferenceData::default();
        datasets.ncci_ptp.insert(
            ptp_key("11042", "11045"),
            PtpEdit {
                citation: Some("CMS NCCI".into()),
                modifier: Some("1".into()),
            },
        );
        let config = RuleConfig::default();
        let claim = serde_json::json!({
            "items": [
                {"procedure_code": "11042"},
                {"procedure_code": "11045"}
            ]
        });

        let findings = ncci_ptp_rule(&context(&claim, &datasets, &config)).unwrap();
        assert_eq!(findings.len(), 1);
        let finding = &findings[0];
        assert_eq!(finding.rule_id, "NCCI_PTP");
        assert_eq!(finding.weight, 0.18);
        assert_eq!(finding.severity, Severity::Critical);
        assert_eq!(finding.citation.as_deref(), Some("CMS NCCI"));
        assert_eq!(finding.metadata["line_indexes"], serde_json::json!([0, 1]));
    }

    #[test]
    fn ptp_matches_regardless_of_item_order() {
        let mut datasets = ReferenceData::default();
        datasets
            .ncci_ptp
            .insert(ptp_key("11042", "11045"), PtpEdit::default());
        let config = RuleConfig::default();
        let claim = serde_json::json!({
            "items": [
                {"procedure_code": "11045"},
                {"procedure_code": "11042"}
            ]
        });
        assert_eq!(
            ncci_ptp_rule(&context(&claim, &datasets, &config)).unwrap().len(),
            1
        );
    }

    #[test]
    fn no_pair_no_finding() {
        let datasets = ReferenceData::default();
        let config = RuleConfig::default();
        let claim = serde_json::json!({
            "items": [{"procedure_code": "11042"}, {"procedure_code": "11045"}]
        });
        assert!(ncci_ptp_rule(&context(&claim, &datasets, &config))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn mue_limit_enforced() {
        let mut datasets = ReferenceData::default();
        datasets.ncci_mue.insert("J1100".into(), 4.0);
        let config = RuleConfig::default();
        let claim = serde_json::json!({
            "items": [
                {"procedure_code": "J1100", "quantity": 6},
                {"procedure_code": "J1100", "quantity": 4}
            ]
        });

        let findings = ncci_mue_rule(&context(&claim, &datasets, &config)).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].metadata["line_index"], serde_json::json!(0));
        assert_eq!(findings[0].severity, Severity::High);
    }
}
