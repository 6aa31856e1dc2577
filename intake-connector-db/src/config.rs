//! Shared database connector configuration.

use crate::query::{validate_custom_query, validate_identifier};
use intake_core::{ConnectorError, Record};

/// Parsed configuration common to every database subtype. Subtype-specific
/// keys (`ssl_mode`, `charset`, `encrypt`, …) stay in `options`.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database host.
    pub host: String,
    /// Database port.
    pub port: u16,
    /// Database name.
    pub database: String,
    /// Login username.
    pub username: String,
    /// Login password, injected by the credential store before use.
    pub password: Option<String>,
    /// Schema qualifier for table references.
    pub schema_name: Option<String>,
    /// Table to extract from, when no custom query is configured.
    pub table: Option<String>,
    /// Custom read-only SQL template.
    pub query: Option<String>,
    /// Column driving incremental extraction and ordering.
    pub watermark_column: Option<String>,
    /// Remaining subtype-specific keys.
    pub options: Record,
}

fn required_str(config: &Record, key: &str) -> Result<String, ConnectorError> {
    config
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ConnectorError::Configuration(format!("missing required field '{key}'")))
}

fn optional_str(config: &Record, key: &str) -> Option<String> {
    config
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl DbConfig {
    /// Parse and validate a raw connection config. Identifiers and custom
    /// queries are checked here, before any SQL is ever built from them.
    pub fn from_record(config: &Record) -> Result<Self, ConnectorError> {
        let port = match config.get("port") {
            Some(value) => value
                .as_u64()
                .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
                .and_then(|p| u16::try_from(p).ok())
                .ok_or_else(|| {
                    ConnectorError::Configuration("field 'port' must be a valid port number".into())
                })?,
            None => return Err(ConnectorError::Configuration("missing required field 'port'".into())),
        };

        let schema_name = optional_str(config, "schema_name");
        let table = optional_str(config, "table");
        let watermark_column = optional_str(config, "watermark_column");
        for identifier in [&schema_name, &table, &watermark_column].into_iter().flatten() {
            validate_identifier(identifier)?;
        }

        let query = optional_str(config, "query");
        if let Some(query) = &query {
            validate_custom_query(query)?;
        }

        let mut options = config.clone();
        for consumed in [
            "host", "port", "database", "username", "password", "schema_name", "table", "query",
            "watermark_column",
        ] {
            options.remove(consumed);
        }

        Ok(Self {
            host: required_str(config, "host")?,
            port,
            database: required_str(config, "database")?,
            username: required_str(config, "username")?,
            password: optional_str(config, "password"),
            schema_name,
            table,
            query,
            watermark_column,
            options,
        })
    }

    /// Schema-qualified table reference, when a table is configured.
    pub fn qualified_table(&self) -> Option<String> {
        let table = self.table.as_ref()?;
        Some(match &self.schema_name {
            Some(schema) => format!("{schema}.{table}"),
            None => table.clone(),
        })
    }

    /// Borrow a subtype-specific option as a string.
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }

    /// Read a subtype-specific boolean option.
    pub fn option_bool(&self, key: &str) -> Option<bool> {
        self.options.get(key).and_then(|v| v.as_bool())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> Record {
        let mut config = Record::new();
        config.insert("host".into(), json!("db.internal"));
        config.insert("port".into(), json!(5432));
        config.insert("database".into(), json!("claims"));
        config.insert("username".into(), json!("etl"));
        config
    }

    #[test]
    fn parses_minimal_config() {
        let config = DbConfig::from_record(&base()).unwrap();
        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 5432);
        assert_eq!(config.qualified_table(), None);
    }

    #[test]
    fn missing_required_field_is_configuration_error() {
        let mut config = base();
        config.remove("username");
        assert!(matches!(
            DbConfig::from_record(&config),
            Err(ConnectorError::Configuration(_))
        ));
    }

    #[test]
    fn port_accepts_string_form() {
        let mut config = base();
        config.insert("port".into(), json!("5432"));
        assert_eq!(DbConfig::from_record(&config).unwrap().port, 5432);

        config.insert("port".into(), json!("not-a-port"));
        assert!(DbConfig::from_record(&config).is_err());
    }

    #[test]
    fn identifiers_are_validated_at_parse_time() {
        let mut config = base();
        config.insert("table".into(), json!("claims; DROP"));
        assert!(DbConfig::from_record(&config).is_err());

        let mut config = base();
        config.insert("watermark_column".into(), json!("modified_at"));
        config.insert("schema_name".into(), json!("public"));
        config.insert("table".into(), json!("claims"));
        let parsed = DbConfig::from_record(&config).unwrap();
        assert_eq!(parsed.qualified_table().unwrap(), "public.claims");
    }

    #[test]
    fn custom_query_validation_applies() {
        let mut config = base();
        config.insert("query".into(), json!("SELECT * FROM claims; DROP TABLE claims"));
        assert!(DbConfig::from_record(&config).is_err());
    }

    #[test]
    fn options_keep_subtype_keys() {
        let mut config = base();
        config.insert("ssl_mode".into(), json!("require"));
        let parsed = DbConfig::from_record(&config).unwrap();
        assert_eq!(parsed.option_str("ssl_mode"), Some("require"));
        assert!(parsed.options.get("host").is_none());
    }
}
