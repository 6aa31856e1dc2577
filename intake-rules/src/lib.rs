//! The payment-integrity rules engine.
//!
//! Rules are plain functions over a read-only [`RuleContext`]; the engine
//! collects their findings, applies per-rule overrides, aggregates weights
//! into a clamped `[0, 1]` score, routes category flags, and selects a
//! decision mode from the threshold ladder. Evaluation is deterministic
//! for identical inputs, side-effect free, and contains rule failures: a
//! rule that errors contributes zero findings and a warning log line.

#![deny(missing_docs)]

pub mod context;
pub mod engine;
pub mod model;
pub mod registry;
pub mod rules;
pub mod thresholds;

pub use context::{
    ptp_key, FeeEntry, FwaConfig, LcdEntry, PtpEdit, ReferenceData, RuleConfig, RuleContext,
    RuleOverride, UtilizationStats,
};
pub use engine::{evaluate, evaluate_with_registry};
pub use model::{Evaluation, Finding, Severity};
pub use registry::{default_registry, Rule, RuleRegistry};
pub use thresholds::{DecisionMode, ThresholdConfig};

use thiserror::Error;

/// A rule body failure (crate-local). The engine logs it and moves on.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum RuleError {
    /// The rule could not evaluate its inputs.
    #[error("rule evaluation failed: {0}")]
    Evaluation(String),
}
