//! Read-only extraction query construction.
//!
//! Everything interpolated into SQL passes [`validate_identifier`] first;
//! the watermark value is the only non-identifier input and is quoted with
//! doubled single quotes. Custom query templates must be single
//! statements: `;` and `--` are rejected outright.

use crate::config::DbConfig;
use intake_core::{ConnectorError, SyncMode};
use regex::Regex;
use std::sync::LazyLock;

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*(\.[a-zA-Z_][a-zA-Z0-9_]*)?$")
        .expect("valid identifier regex")
});

/// Reserved words that may never appear as a bare identifier segment.
const RESERVED: &[&str] = &[
    "select", "insert", "update", "delete", "drop", "truncate", "alter", "create", "grant",
    "revoke", "union", "exec", "execute", "merge",
];

/// Watermark column assumed when a custom query needs an incremental
/// filter and none is configured.
const DEFAULT_WATERMARK_COLUMN: &str = "updated_at";

/// Validate a (possibly schema-qualified) SQL identifier.
pub fn validate_identifier(identifier: &str) -> Result<(), ConnectorError> {
    if !IDENTIFIER.is_match(identifier) {
        return Err(ConnectorError::Configuration(format!(
            "invalid SQL identifier '{identifier}'"
        )));
    }
    for segment in identifier.split('.') {
        if RESERVED.contains(&segment.to_lowercase().as_str()) {
            return Err(ConnectorError::Configuration(format!(
                "identifier '{identifier}' uses the reserved word '{segment}'"
            )));
        }
    }
    Ok(())
}

/// Validate a custom extraction query template.
pub fn validate_custom_query(query: &str) -> Result<(), ConnectorError> {
    if query.contains(';') || query.contains("--") {
        return Err(ConnectorError::Configuration(
            "custom queries cannot contain ';' or '--'".into(),
        ));
    }
    Ok(())
}

fn quote_value(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Build the extraction query for one run.
///
/// With a custom query template, the incremental filter is appended as a
/// `WHERE` (or `AND` when the template already filters). Otherwise the
/// query is `SELECT * FROM <qualified_table>`, filtered past the watermark
/// for incremental runs and ordered by the watermark column when one is
/// configured.
pub fn build_extraction_query(
    config: &DbConfig,
    mode: SyncMode,
    watermark: Option<&str>,
) -> Result<String, ConnectorError> {
    if let Some(template) = &config.query {
        let mut query = template.clone();
        if mode == SyncMode::Incremental {
            if let Some(watermark) = watermark {
                let column = config
                    .watermark_column
                    .as_deref()
                    .unwrap_or(DEFAULT_WATERMARK_COLUMN);
                validate_identifier(column)?;
                let keyword = if template.to_uppercase().contains("WHERE") {
                    "AND"
                } else {
                    "WHERE"
                };
                query.push_str(&format!(" {keyword} {column} > {}", quote_value(watermark)));
            }
        }
        return Ok(query);
    }

    let qualified = config.qualified_table().ok_or_else(|| {
        ConnectorError::Configuration("either 'query' or 'table' must be configured".into())
    })?;

    let mut query = format!("SELECT * FROM {qualified}");
    if mode == SyncMode::Incremental {
        if let (Some(column), Some(watermark)) = (&config.watermark_column, watermark) {
            query.push_str(&format!(" WHERE {column} > {}", quote_value(watermark)));
        }
    }
    if let Some(column) = &config.watermark_column {
        query.push_str(&format!(" ORDER BY {column}"));
    }
    Ok(query)
}

/// Build the `MAX(watermark_column)` probe, when the config allows one.
pub fn build_watermark_query(config: &DbConfig) -> Option<String> {
    let column = config.watermark_column.as_ref()?;
    let qualified = config.qualified_table()?;
    Some(format!("SELECT MAX({column}) FROM {qualified}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use intake_core::Record;
    use serde_json::json;

    fn config(entries: &[(&str, serde_json::Value)]) -> DbConfig {
        let mut record = Record::new();
        record.insert("host".into(), json!("h"));
        record.insert("port".into(), json!(5432));
        record.insert("database".into(), json!("d"));
        record.insert("username".into(), json!("u"));
        for (key, value) in entries {
            record.insert((*key).to_string(), value.clone());
        }
        DbConfig::from_record(&record).unwrap()
    }

    #[test]
    fn identifier_accepts_legitimate_names() {
        for ok in ["public.claims", "_private", "Claims2024", "a", "t_1.c_2"] {
            assert!(validate_identifier(ok).is_ok(), "rejected {ok}");
        }
    }

    #[test]
    fn identifier_rejects_injection_shapes() {
        for bad in [
            "claims; DROP",
            "claims--",
            "claims OR 1=1",
            "DROP",
            "DELETE",
            "TRUNCATE",
            "",
            "1table",
            "a.b.c",
        ] {
            assert!(validate_identifier(bad).is_err(), "accepted {bad}");
        }
    }

    #[test]
    fn custom_query_rejects_stacking_and_comments() {
        assert!(validate_custom_query("SELECT * FROM claims").is_ok());
        assert!(validate_custom_query("SELECT 1; SELECT 2").is_err());
        assert!(validate_custom_query("SELECT 1 -- nothing").is_err());
    }

    #[test]
    fn incremental_table_query_matches_contract() {
        let config = config(&[
            ("table", json!("claims")),
            ("watermark_column", json!("modified_at")),
        ]);
        let query = build_extraction_query(
            &config,
            SyncMode::Incremental,
            Some("2024-03-01T00:00:00Z"),
        )
        .unwrap();
        assert_eq!(
            query,
            "SELECT * FROM claims WHERE modified_at > '2024-03-01T00:00:00Z' ORDER BY modified_at"
        );
    }

    #[test]
    fn full_mode_skips_watermark_filter() {
        let config = config(&[
            ("table", json!("claims")),
            ("watermark_column", json!("modified_at")),
        ]);
        let query = build_extraction_query(&config, SyncMode::Full, None).unwrap();
        assert_eq!(query, "SELECT * FROM claims ORDER BY modified_at");
    }

    #[test]
    fn schema_qualification_applies() {
        let config = config(&[("table", json!("claims")), ("schema_name", json!("public"))]);
        let query = build_extraction_query(&config, SyncMode::Full, None).unwrap();
        assert_eq!(query, "SELECT * FROM public.claims");
    }

    #[test]
    fn custom_query_gets_where_or_and() {
        let config1 = config(&[
            ("query", json!("SELECT id, total FROM claims")),
            ("watermark_column", json!("modified_at")),
        ]);
        let query =
            build_extraction_query(&config1, SyncMode::Incremental, Some("w1")).unwrap();
        assert_eq!(
            query,
            "SELECT id, total FROM claims WHERE modified_at > 'w1'"
        );

        let config2 = config(&[
            ("query", json!("SELECT id FROM claims WHERE status = 'paid'")),
            ("watermark_column", json!("modified_at")),
        ]);
        let query =
            build_extraction_query(&config2, SyncMode::Incremental, Some("w1")).unwrap();
        assert!(query.ends_with("AND modified_at > 'w1'"));
    }

    #[test]
    fn watermark_value_quotes_are_doubled() {
        let config = config(&[
            ("table", json!("claims")),
            ("watermark_column", json!("modified_at")),
        ]);
        let query =
            build_extraction_query(&config, SyncMode::Incremental, Some("o'clock")).unwrap();
        assert!(query.contains("'o''clock'"));
    }

    #[test]
    fn missing_table_and_query_is_configuration_error() {
        let config = config(&[]);
        assert!(matches!(
            build_extraction_query(&config, SyncMode::Full, None),
            Err(ConnectorError::Configuration(_))
        ));
    }

    #[test]
    fn watermark_probe_needs_column_and_table() {
        let with_both = config(&[
            ("table", json!("claims")),
            ("watermark_column", json!("modified_at")),
        ]);
        assert_eq!(
            build_watermark_query(&with_both).unwrap(),
            "SELECT MAX(modified_at) FROM claims"
        );
        assert!(build_watermark_query(&config(&[("table", json!("claims"))])).is_none());
    }
}
