//! Coverage rules: LCD/NCD determinations and global-surgery modifiers.

use crate::context::RuleContext;
use crate::model::{Finding, Severity};
use crate::RuleError;
use serde_json::json;

/// Flag procedures whose claim carries no LCD-covered diagnosis. Weight
/// is negative: a coverage mismatch argues against payment.
pub fn lcd_coverage_rule(context: &RuleContext<'_>) -> Result<Vec<Finding>, RuleError> {
    let diagnosis_codes = context.diagnosis_codes();
    let mut findings = Vec::new();

    for (index, item) in context.items().iter().enumerate() {
        let Some(code) = RuleContext::item_code(item) else { continue };
        let Some(entry) = context.datasets.lcd.get(code) else { continue };
        if entry.diagnosis_codes.is_empty() {
            continue;
        }
        if diagnosis_codes.is_disjoint(&entry.diagnosis_codes) {
            let mut allowed: Vec<&String> = entry.diagnosis_codes.iter().collect();
            allowed.sort();
            findings.push(
                Finding::new(
                    "LCD_MISMATCH",
                    format!("{code} lacks covered diagnosis per LCD/NCD"),
                    -0.2,
                    Severity::High,
                    "lcd_non_covered",
                )
                .with_citation("CMS LCD/NCD")
                .with_metadata(json!({
                    "category": "coverage",
                    "line_index": index,
                    "allowed_diagnoses": allowed,
                })),
            );
        }
    }
    Ok(findings)
}

/// Flag procedures outside the LCD's age or gender guidance.
pub fn lcd_age_gender_rule(context: &RuleContext<'_>) -> Result<Vec<Finding>, RuleError> {
    let member = if context.claim["member"].is_object() {
        &context.claim["member"]
    } else {
        &context.claim["patient"]
    };
    let age = member["age"].as_u64().map(|a| a as u32);
    let gender = member["gender"]
        .as_str()
        .or_else(|| member["gender_source_value"].as_str())
        .unwrap_or("")
        .to_uppercase();
    if age.is_none() && gender.is_empty() {
        return Ok(Vec::new());
    }

    let mut findings = Vec::new();
    for (index, item) in context.items().iter().enumerate() {
        let Some(code) = RuleContext::item_code(item) else { continue };
        let Some(entry) = context.datasets.lcd.get(code) else { continue };

        if let Some(age) = age {
            if !entry.age_ranges.is_empty() {
                let in_range = entry
                    .age_ranges
                    .iter()
                    .any(|(min, max)| *min <= age && age <= *max);
                if !in_range {
                    findings.push(
                        Finding::new(
                            "LCD_AGE_CONFLICT",
                            format!("{code} age {age} outside LCD guidance"),
                            -0.15,
                            Severity::High,
                            "lcd_age_mismatch",
                        )
                        .with_citation("CMS LCD/NCD")
                        .with_metadata(json!({
                            "category": "coverage",
                            "line_index": index,
                            "age": age,
                            "allowed_age_ranges": entry.age_ranges,
                        })),
                    );
                }
            }
        }

        if !entry.genders.is_empty() && !gender.is_empty() && !entry.genders.contains(&gender) {
            let mut allowed: Vec<&String> = entry.genders.iter().collect();
            allowed.sort();
            findings.push(
                Finding::new(
                    "LCD_GENDER_CONFLICT",
                    format!("{code} gender {gender} outside LCD guidance"),
                    -0.1,
                    Severity::Medium,
                    "lcd_gender_mismatch",
                )
                .with_citation("CMS LCD/NCD")
                .with_metadata(json!({
                    "category": "coverage",
                    "line_index": index,
                    "allowed_genders": allowed,
                })),
            );
        }
    }
    Ok(findings)
}

/// Flag codes the LCD marks experimental/investigational.
pub fn lcd_experimental_rule(context: &RuleContext<'_>) -> Result<Vec<Finding>, RuleError> {
    let mut findings = Vec::new();
    for (index, item) in context.items().iter().enumerate() {
        let Some(code) = RuleContext::item_code(item) else { continue };
        if context
            .datasets
            .lcd
            .get(code)
            .is_some_and(|entry| entry.experimental)
        {
            findings.push(
                Finding::new(
                    "LCD_EXPERIMENTAL",
                    format!("{code} marked experimental/investigational"),
                    0.14,
                    Severity::High,
                    "experimental_code",
                )
                .with_citation("CMS LCD/NCD")
                .with_metadata(json!({"category": "coverage", "line_index": index})),
            );
        }
    }
    Ok(findings)
}

/// Flag global-period procedures billed alongside E/M services without a
/// 25/57 modifier.
pub fn global_surgery_modifier_rule(
    context: &RuleContext<'_>,
) -> Result<Vec<Finding>, RuleError> {
    let items = context.items();
    let has_evaluation = items.iter().any(|item| {
        RuleContext::item_code(item).is_some_and(|code| code.starts_with("99"))
    });
    if !has_evaluation {
        return Ok(Vec::new());
    }

    let mut findings = Vec::new();
    for (index, item) in items.iter().enumerate() {
        let Some(code) = RuleContext::item_code(item) else { continue };
        let Some(fee) = context.datasets.mpfs.get(code) else { continue };
        let Some(indicator) = fee.global_surgery.as_deref() else { continue };
        if indicator != "090" && indicator != "010" {
            continue;
        }
        let modifiers = RuleContext::item_modifiers(item);
        if modifiers.iter().any(|m| m == "25" || m == "57") {
            continue;
        }
        findings.push(
            Finding::new(
                "GLOBAL_SURGERY_NO_MODIFIER",
                format!(
                    "{code} with global period lacks required modifier alongside E/M services"
                ),
                0.12,
                Severity::Medium,
                "global_surgery_no_modifier",
            )
            .with_citation("CMS MPFS")
            .with_metadata(json!({
                "category": "coverage",
                "line_index": index,
                "global_indicator": indicator,
            })),
        );
    }
    Ok(findings)
}
