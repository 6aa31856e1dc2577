//! The rule registry: an ordered, deduplicated list of active rules.

use crate::context::RuleContext;
use crate::model::Finding;
use crate::RuleError;
use std::sync::LazyLock;

/// A rule: a pure function from context to findings.
pub type Rule = fn(&RuleContext<'_>) -> Result<Vec<Finding>, RuleError>;

/// Ordered, deduplicated rule list, immutable after initialization.
#[derive(Default)]
pub struct RuleRegistry {
    rules: Vec<Rule>,
}

impl RuleRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule. Re-registering the same function is a no-op,
    /// which makes default registration idempotent.
    pub fn register(&mut self, rule: Rule) {
        if !self.rules.iter().any(|existing| {
            std::ptr::fn_addr_eq(*existing, rule)
        }) {
            self.rules.push(rule);
        }
    }

    /// Register several rules in order.
    pub fn extend(&mut self, rules: impl IntoIterator<Item = Rule>) {
        for rule in rules {
            self.register(rule);
        }
    }

    /// The active rules, in registration order.
    pub fn active_rules(&self) -> &[Rule] {
        &self.rules
    }
}

impl std::fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("rules", &self.rules.len())
            .finish()
    }
}

static DEFAULT_REGISTRY: LazyLock<RuleRegistry> = LazyLock::new(|| {
    let mut registry = RuleRegistry::new();
    crate::rules::register_default_rules(&mut registry);
    registry
});

/// The process-wide default registry, populated exactly once on first
/// access.
pub fn default_registry() -> &'static RuleRegistry {
    &DEFAULT_REGISTRY
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nothing(_context: &RuleContext<'_>) -> Result<Vec<Finding>, RuleError> {
        Ok(Vec::new())
    }

    fn also_nothing(_context: &RuleContext<'_>) -> Result<Vec<Finding>, RuleError> {
        Ok(Vec::new())
    }

    #[test]
    fn registration_deduplicates() {
        let mut registry = RuleRegistry::new();
        registry.register(nothing);
        registry.register(nothing);
        registry.register(also_nothing);
        assert_eq!(registry.active_rules().len(), 2);
    }

    #[test]
    fn default_registry_is_populated_and_stable() {
        let first = default_registry().active_rules().len();
        let second = default_registry().active_rules().len();
        assert!(first > 0);
        assert_eq!(first, second);
    }
}
