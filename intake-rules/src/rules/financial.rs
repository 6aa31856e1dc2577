//! Financial rules: high-dollar tiers, reimbursement outliers, duplicate
//! lines, miscellaneous codes.

use crate::context::RuleContext;
use crate::model::{Finding, Severity};
use crate::RuleError;
use serde_json::json;
use std::collections::HashMap;

/// Flag claims whose total billed amount crosses configured tiers. Every
/// crossed tier fires, smallest first.
pub fn high_dollar_rule(context: &RuleContext<'_>) -> Result<Vec<Finding>, RuleError> {
    let total_billed: f64 = context.items().iter().map(RuleContext::item_amount).sum();
    let mut tiers = context.config.high_dollar_tiers.clone();
    tiers.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut findings = Vec::new();
    for (threshold, weight) in tiers {
        if total_billed >= threshold {
            findings.push(
                Finding::new(
                    format!("HIGH_DOLLAR_{}", threshold as i64),
                    format!(
                        "Total billed amount ${total_billed:.2} exceeds threshold ${threshold:.2}"
                    ),
                    weight,
                    Severity::High,
                    "high_dollar",
                )
                .with_metadata(json!({
                    "category": "financial",
                    "threshold": threshold,
                    "total_billed": total_billed,
                })),
            );
        }
    }
    Ok(findings)
}

/// Flag line amounts far above the fee-schedule benchmark for their
/// region. The excess over benchmark feeds the ROI estimate.
pub fn reimbursement_outlier_rule(
    context: &RuleContext<'_>,
) -> Result<Vec<Finding>, RuleError> {
    let region = context.claim["provider"]["region"]
        .as_str()
        .unwrap_or("national");
    let percentile = context.config.outlier_percentile;
    let mut findings = Vec::new();

    for (index, item) in context.items().iter().enumerate() {
        let Some(code) = RuleContext::item_code(item) else { continue };
        let amount = RuleContext::item_amount(item);
        let Some(fee) = context.datasets.mpfs.get(code) else { continue };
        let benchmark = fee
            .regions
            .get(region)
            .or_else(|| fee.regions.get("national"))
            .copied();
        let Some(benchmark) = benchmark else { continue };

        if benchmark > 0.0 && amount >= benchmark * (1.0 + percentile) {
            let estimated_delta = amount - benchmark;
            findings.push(
                Finding::new(
                    "REIMB_OUTLIER",
                    format!("{code} billed ${amount:.2} vs benchmark ${benchmark:.2}"),
                    0.12,
                    Severity::Medium,
                    "reimbursement_outlier",
                )
                .with_citation("CMS MPFS")
                .with_metadata(json!({
                    "category": "financial",
                    "line_index": index,
                    "benchmark": benchmark,
                    "percentile": percentile,
                    "estimated_roi": estimated_delta,
                })),
            );
        }
    }
    Ok(findings)
}

/// Flag repeated `(procedure, modifier)` pairs across line items.
pub fn duplicate_line_rule(context: &RuleContext<'_>) -> Result<Vec<Finding>, RuleError> {
    let mut counts: HashMap<(Option<String>, Option<String>), usize> = HashMap::new();
    for item in context.items() {
        let code = RuleContext::item_code(item).map(str::to_string);
        let modifier = item["modifier"].as_str().map(str::to_string);
        *counts.entry((code, modifier)).or_insert(0) += 1;
    }

    let mut findings = Vec::new();
    let mut entries: Vec<_> = counts.into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    for ((code, modifier), count) in entries {
        let Some(code) = code else { continue };
        if count > 1 {
            findings.push(
                Finding::new(
                    "DUPLICATE_LINE",
                    format!("Procedure {code} repeated {count} times"),
                    0.08,
                    Severity::Medium,
                    "duplicate_line",
                )
                .with_metadata(json!({
                    "category": "financial",
                    "modifier": modifier,
                    "count": count,
                })),
            );
        }
    }
    Ok(findings)
}

/// Flag 99-prefixed miscellaneous codes.
pub fn misc_code_rule(context: &RuleContext<'_>) -> Result<Vec<Finding>, RuleError> {
    let mut findings = Vec::new();
    for (index, item) in context.items().iter().enumerate() {
        let Some(code) = RuleContext::item_code(item) else { continue };
        if code.starts_with("99") {
            findings.push(
                Finding::new(
                    "MISC_CODE",
                    format!("Procedure {code} is miscellaneous (99-prefix)"),
                    0.05,
                    Severity::Low,
                    "misc_code",
                )
                .with_metadata(json!({"category": "financial", "line_index": index})),
            );
        }
    }
    Ok(findings)
}
