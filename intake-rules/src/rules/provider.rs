//! Provider rules: OIG exclusions, fraud watchlists, and utilization
//! outliers.

use crate::context::RuleContext;
use crate::model::{Finding, Severity};
use crate::RuleError;
use serde_json::json;

/// Flag providers on the OIG LEIE exclusion list.
pub fn oig_exclusion_rule(context: &RuleContext<'_>) -> Result<Vec<Finding>, RuleError> {
    let Some(npi) = context.provider_npi() else {
        return Ok(Vec::new());
    };
    if context.datasets.oig_exclusions.contains(npi) {
        return Ok(vec![
            Finding::new(
                "OIG_EXCLUSION",
                format!("Provider NPI {npi} is on OIG exclusion list"),
                0.25,
                Severity::Critical,
                "oig_excluded_provider",
            )
            .with_citation("OIG LEIE")
            .with_metadata(json!({"category": "provider", "npi": npi})),
        ]);
    }
    Ok(Vec::new())
}

/// Flag providers on the internal fraud watchlist.
pub fn fwa_watchlist_rule(context: &RuleContext<'_>) -> Result<Vec<Finding>, RuleError> {
    let Some(npi) = context.provider_npi() else {
        return Ok(Vec::new());
    };
    if context.datasets.fwa_watchlist.contains(npi) {
        return Ok(vec![
            Finding::new(
                "FWA_WATCH",
                format!("Provider NPI {npi} appears on fraud watchlist"),
                0.12,
                Severity::High,
                "fwa_watch_provider",
            )
            .with_citation("Internal FWA Watchlist")
            .with_metadata(json!({"category": "provider", "npi": npi})),
        ]);
    }
    Ok(Vec::new())
}

/// Flag high-risk specialties, geographic distance outliers, and
/// utilization outliers (amount above the 99th percentile, quantity above
/// the configured multiple of average units).
pub fn provider_outlier_rule(context: &RuleContext<'_>) -> Result<Vec<Finding>, RuleError> {
    let fwa = &context.datasets.fwa;
    let mut findings = Vec::new();

    let provider = &context.claim["provider"];
    let specialty = provider["specialty"]
        .as_str()
        .or_else(|| provider["specialty_source_value"].as_str())
        .unwrap_or("")
        .to_lowercase();
    if !specialty.is_empty() && fwa.high_risk_specialties.contains(&specialty) {
        findings.push(
            Finding::new(
                "FWA_HIGH_RISK_SPECIALTY",
                format!("Provider specialty {specialty} flagged high risk"),
                0.08,
                Severity::Medium,
                "high_risk_specialty",
            )
            .with_citation("FWA configuration")
            .with_metadata(json!({"category": "provider", "specialty": specialty})),
        );
    }

    if let Some(limit) = fwa.geographic_distance_km {
        let distance = context.claim["service_distance_km"]
            .as_f64()
            .or_else(|| provider["distance_km"].as_f64())
            .or_else(|| {
                context
                    .items()
                    .iter()
                    .find_map(|item| item["service_distance_km"].as_f64())
            });
        if let Some(distance) = distance {
            if distance > limit {
                findings.push(
                    Finding::new(
                        "GEOGRAPHIC_DISTANCE_OUTLIER",
                        format!(
                            "Service distance {distance:.1}km exceeds configured limit {limit}km"
                        ),
                        0.1,
                        Severity::Medium,
                        "geographic_outlier",
                    )
                    .with_citation("FWA configuration")
                    .with_metadata(json!({
                        "category": "provider",
                        "distance_km": distance,
                        "limit_km": limit,
                    })),
                );
            }
        }
    }

    for (index, item) in context.items().iter().enumerate() {
        let Some(code) = RuleContext::item_code(item) else { continue };
        let Some(stats) = context.datasets.utilization.get(code) else { continue };
        let amount = RuleContext::item_amount(item);
        let quantity = RuleContext::item_quantity(item);

        if stats.pctile_99 > 0.0 && amount > stats.pctile_99 {
            let estimated_roi = (amount - stats.pctile_99) * fwa.roi_multiplier;
            findings.push(
                Finding::new(
                    "UTIL_AMOUNT_OUTLIER",
                    format!(
                        "{code} amount ${amount:.2} exceeds 99th percentile ${:.2}",
                        stats.pctile_99
                    ),
                    0.15,
                    Severity::High,
                    "amount_outlier",
                )
                .with_citation("CMS Utilization")
                .with_metadata(json!({
                    "category": "financial",
                    "line_index": index,
                    "pctile_99": stats.pctile_99,
                    "estimated_roi": estimated_roi,
                })),
            );
        }

        // With no recorded average, any quantity clears the threshold and
        // the line is flagged for review.
        if quantity >= stats.avg_units * fwa.volume_threshold {
            findings.push(
                Finding::new(
                    "UTIL_VOLUME_OUTLIER",
                    format!("{code} quantity {quantity} exceeds volume threshold"),
                    0.1,
                    Severity::Medium,
                    "volume_outlier",
                )
                .with_citation("CMS Utilization")
                .with_metadata(json!({
                    "category": "financial",
                    "line_index": index,
                    "avg_units": stats.avg_units,
                    "volume_threshold": fwa.volume_threshold,
                })),
            );
        }
    }

    Ok(findings)
}
