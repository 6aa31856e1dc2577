//! The baseline rule library.
//!
//! Rule ids, weights, severities, flags, and citations are stable
//! identifiers: downstream review queues and override tables key on them.

pub mod coverage;
pub mod financial;
pub mod ncci;
pub mod provider;

use crate::registry::RuleRegistry;

/// Register the baseline rules in their canonical order.
pub fn register_default_rules(registry: &mut RuleRegistry) {
    registry.extend([
        financial::high_dollar_rule as crate::Rule,
        financial::reimbursement_outlier_rule,
        ncci::ncci_ptp_rule,
        ncci::ncci_mue_rule,
        coverage::lcd_coverage_rule,
        coverage::lcd_age_gender_rule,
        coverage::lcd_experimental_rule,
        coverage::global_surgery_modifier_rule,
        provider::oig_exclusion_rule,
        provider::fwa_watchlist_rule,
        provider::provider_outlier_rule,
        financial::duplicate_line_rule,
        financial::misc_code_rule,
    ]);
}
