//! Evaluation inputs: the claim, typed reference datasets, and config.

use crate::model::Severity;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// One NCCI procedure-to-procedure edit.
#[derive(Debug, Clone, Default)]
pub struct PtpEdit {
    /// Regulatory citation.
    pub citation: Option<String>,
    /// Modifier indicator from the edit table.
    pub modifier: Option<String>,
}

/// One LCD/NCD coverage entry for a procedure code.
#[derive(Debug, Clone, Default)]
pub struct LcdEntry {
    /// Diagnosis codes that justify the procedure.
    pub diagnosis_codes: HashSet<String>,
    /// Allowed age ranges `(min, max)` inclusive.
    pub age_ranges: Vec<(u32, u32)>,
    /// Allowed genders (uppercase), empty meaning unrestricted.
    pub genders: HashSet<String>,
    /// Whether the code is flagged experimental/investigational.
    pub experimental: bool,
}

/// Fee-schedule entry for a procedure code.
#[derive(Debug, Clone, Default)]
pub struct FeeEntry {
    /// Benchmark amounts by region; `national` is the fallback.
    pub regions: HashMap<String, f64>,
    /// Global-surgery indicator (`090`, `010`, …).
    pub global_surgery: Option<String>,
}

/// Utilization statistics for a procedure code.
#[derive(Debug, Clone, Default)]
pub struct UtilizationStats {
    /// 99th percentile of billed amounts.
    pub pctile_99: f64,
    /// Average units per claim line.
    pub avg_units: f64,
}

/// FWA configuration knobs.
#[derive(Debug, Clone)]
pub struct FwaConfig {
    /// Multiplier applied to recovered-amount estimates.
    pub roi_multiplier: f64,
    /// Quantity multiple of average units that flags volume.
    pub volume_threshold: f64,
    /// Specialties (lowercase) considered high risk.
    pub high_risk_specialties: HashSet<String>,
    /// Optional service-distance limit in kilometers.
    pub geographic_distance_km: Option<f64>,
}

impl Default for FwaConfig {
    fn default() -> Self {
        Self {
            roi_multiplier: 1.0,
            volume_threshold: 3.0,
            high_risk_specialties: HashSet::new(),
            geographic_distance_km: None,
        }
    }
}

/// Read-only reference data available to every rule.
#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    /// NCCI PTP pairs keyed by sorted code pair.
    pub ncci_ptp: HashMap<(String, String), PtpEdit>,
    /// NCCI medically-unlikely-edit limits per code.
    pub ncci_mue: HashMap<String, f64>,
    /// LCD/NCD coverage entries per code.
    pub lcd: HashMap<String, LcdEntry>,
    /// OIG LEIE excluded provider NPIs.
    pub oig_exclusions: HashSet<String>,
    /// Internal fraud watchlist NPIs.
    pub fwa_watchlist: HashSet<String>,
    /// Fee schedule per code.
    pub mpfs: HashMap<String, FeeEntry>,
    /// Utilization statistics per code.
    pub utilization: HashMap<String, UtilizationStats>,
    /// FWA tuning.
    pub fwa: FwaConfig,
}

/// Canonical sorted key for a PTP code pair.
pub fn ptp_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Per-rule override: disable, or adjust weight and severity.
#[derive(Debug, Clone, Default)]
pub struct RuleOverride {
    /// Disabled rules contribute nothing.
    pub disabled: bool,
    /// Replacement weight.
    pub weight: Option<f64>,
    /// Replacement severity.
    pub severity: Option<Severity>,
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct RuleConfig {
    /// Starting score before rule deltas.
    pub base_score: f64,
    /// High-dollar tiers `(threshold, weight)`.
    pub high_dollar_tiers: Vec<(f64, f64)>,
    /// Reimbursement-outlier percentile margin.
    pub outlier_percentile: f64,
    /// Per-rule overrides keyed by rule id.
    pub rule_overrides: HashMap<String, RuleOverride>,
    /// Accepted timely-filing exception codes (static per deployment).
    pub timely_filing_exceptions: HashSet<String>,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            base_score: 0.5,
            high_dollar_tiers: vec![(10_000.0, 0.1), (25_000.0, 0.15)],
            outlier_percentile: 0.95,
            rule_overrides: HashMap::new(),
            timely_filing_exceptions: HashSet::new(),
        }
    }
}

/// Everything a rule may read. Rules are pure with respect to this.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    /// The normalized claim.
    pub claim: &'a Value,
    /// Reference datasets.
    pub datasets: &'a ReferenceData,
    /// Engine configuration.
    pub config: &'a RuleConfig,
}

impl RuleContext<'_> {
    /// The claim's line items.
    pub fn items(&self) -> &[Value] {
        self.claim["items"].as_array().map_or(&[], Vec::as_slice)
    }

    /// A line item's procedure code, canonical or source-form.
    pub fn item_code(item: &Value) -> Option<&str> {
        item["procedure_code"]
            .as_str()
            .or_else(|| item["procedure_source_value"].as_str())
    }

    /// A line item's billed amount.
    pub fn item_amount(item: &Value) -> f64 {
        item["line_amount"]
            .as_f64()
            .or_else(|| item["line_charge"].as_f64())
            .unwrap_or(0.0)
    }

    /// A line item's quantity.
    pub fn item_quantity(item: &Value) -> f64 {
        item["quantity"].as_f64().unwrap_or(0.0)
    }

    /// A line item's modifiers: the `modifiers` list plus the scalar
    /// `modifier` field.
    pub fn item_modifiers(item: &Value) -> Vec<String> {
        let mut modifiers: Vec<String> = item["modifiers"]
            .as_array()
            .map(|list| {
                list.iter()
                    .filter_map(|m| m.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        for key in ["modifier", "modifier_source_value"] {
            if let Some(single) = item[key].as_str() {
                if !single.is_empty() && !modifiers.iter().any(|m| m == single) {
                    modifiers.push(single.to_string());
                }
            }
        }
        modifiers
    }

    /// The rendering or billing provider NPI.
    pub fn provider_npi(&self) -> Option<&str> {
        let provider = &self.claim["provider"];
        provider["npi"]
            .as_str()
            .or_else(|| provider["billing_npi"].as_str())
    }

    /// The claim's diagnosis codes.
    pub fn diagnosis_codes(&self) -> HashSet<String> {
        self.claim["diagnosis_codes"]
            .as_array()
            .map(|codes| {
                codes
                    .iter()
                    .filter_map(|c| c.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}
