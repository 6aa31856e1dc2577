//! Policy document model and key derivation.

use serde::{Deserialize, Serialize};

/// Policy document sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicySource {
    /// MLN Matters articles.
    MlnMatters,
    /// Internet-Only Manuals.
    Iom,
    /// Local Coverage Determination updates.
    LcdUpdates,
    /// National Coverage Determination updates.
    NcdUpdates,
    /// NCCI edit releases.
    NcciEdits,
}

impl PolicySource {
    /// Stable lowercase name for persistence.
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicySource::MlnMatters => "mln_matters",
            PolicySource::Iom => "iom",
            PolicySource::LcdUpdates => "lcd_updates",
            PolicySource::NcdUpdates => "ncd_updates",
            PolicySource::NcciEdits => "ncci_edits",
        }
    }

    /// Uppercase prefix used in policy keys.
    pub fn key_prefix(&self) -> &'static str {
        match self {
            PolicySource::MlnMatters => "MLN_MATTERS",
            PolicySource::Iom => "IOM",
            PolicySource::LcdUpdates => "LCD_UPDATES",
            PolicySource::NcdUpdates => "NCD_UPDATES",
            PolicySource::NcciEdits => "NCCI_EDITS",
        }
    }
}

impl std::fmt::Display for PolicySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One policy document headed for the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDocument {
    /// Originating source.
    pub source: PolicySource,
    /// Source-side identifier (article number, manual chapter, edit id).
    pub source_value: String,
    /// Document title.
    pub title: String,
    /// Document body.
    pub content: String,
    /// Effective date, ISO-8601, when known.
    pub effective_date: Option<String>,
    /// Expiration date, ISO-8601, when known.
    pub expires_date: Option<String>,
    /// Search keywords.
    pub keywords: Vec<String>,
    /// Procedure/diagnosis codes the document touches.
    pub related_codes: Vec<String>,
}

impl PolicyDocument {
    /// The document's stable policy key.
    pub fn policy_key(&self) -> String {
        policy_key(self.source, &self.source_value, &self.title)
    }
}

/// Derive a stable policy key. The MD5 here is an identifier only.
pub fn policy_key(source: PolicySource, source_value: &str, title: &str) -> String {
    let digest = md5::compute(format!("{source_value}|{title}"));
    let hex = format!("{digest:x}");
    format!("{}_{}", source.key_prefix(), &hex[..12])
}

/// Per-source outcome of one sync run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncResult {
    /// Documents offered to the run.
    pub found: usize,
    /// New policy keys indexed.
    pub added: usize,
    /// Existing keys re-versioned.
    pub updated: usize,
    /// Documents skipped (throttled runs report everything skipped).
    pub skipped: usize,
    /// Per-document failure messages.
    pub errors: Vec<String>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_shape_and_stability() {
        let key = policy_key(PolicySource::MlnMatters, "MM13456", "Billing update");
        assert!(key.starts_with("MLN_MATTERS_"));
        assert_eq!(key.len(), "MLN_MATTERS_".len() + 12);
        assert_eq!(
            key,
            policy_key(PolicySource::MlnMatters, "MM13456", "Billing update")
        );
    }

    #[test]
    fn key_varies_by_source_value_and_title() {
        let base = policy_key(PolicySource::Iom, "100-04", "Chapter 12");
        assert_ne!(base, policy_key(PolicySource::Iom, "100-04", "Chapter 13"));
        assert_ne!(base, policy_key(PolicySource::Iom, "100-02", "Chapter 12"));
        assert_ne!(base, policy_key(PolicySource::LcdUpdates, "100-04", "Chapter 12"));
    }
}
