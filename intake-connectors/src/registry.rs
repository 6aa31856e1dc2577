//! The subtype → constructor registry.

use crate::schemas::config_schema;
use crate::validation::validate_config;
use intake_connector_db::{MysqlConnector, PostgresConnector, SqlServerConnector};
use intake_connector_file::FileConnector;
use intake_connector_http::{FhirConnector, RestConnector};
use intake_core::{Connector, ConnectorError, ConnectorId, ConnectorSubtype, DataType, Record};
use std::collections::HashMap;

/// Descriptive metadata for one registered subtype.
#[derive(Debug, Clone)]
pub struct ConnectorTypeInfo {
    /// The subtype.
    pub subtype: ConnectorSubtype,
    /// Human-readable display name.
    pub display_name: String,
    /// One-line description.
    pub description: String,
    /// Declarative configuration schema.
    pub config_schema: serde_json::Value,
    /// Data domains this transport typically feeds.
    pub supported_data_types: Vec<DataType>,
}

type Factory = Box<
    dyn Fn(ConnectorId, String, &Record, usize) -> Result<Box<dyn Connector>, ConnectorError>
        + Send
        + Sync,
>;

struct RegistryEntry {
    info: ConnectorTypeInfo,
    factory: Factory,
}

/// Subtype registry: the single construction entry point for connectors.
pub struct ConnectorRegistry {
    entries: HashMap<ConnectorSubtype, RegistryEntry>,
}

impl ConnectorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// A registry with every built-in subtype registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        let all_types = vec![
            DataType::Claims,
            DataType::Eligibility,
            DataType::Providers,
            DataType::Reference,
        ];

        registry.register(
            info(
                ConnectorSubtype::Postgresql,
                "PostgreSQL",
                "PostgreSQL database with streaming extraction",
                all_types.clone(),
            ),
            Box::new(|id, name, config, batch_size| {
                Ok(Box::new(PostgresConnector::new(id, name, config, batch_size)?))
            }),
        );
        registry.register(
            info(
                ConnectorSubtype::Mysql,
                "MySQL",
                "MySQL / MariaDB database with streaming extraction",
                all_types.clone(),
            ),
            Box::new(|id, name, config, batch_size| {
                Ok(Box::new(MysqlConnector::new(id, name, config, batch_size)?))
            }),
        );
        registry.register(
            info(
                ConnectorSubtype::Sqlserver,
                "SQL Server",
                "Microsoft SQL Server over TDS",
                all_types.clone(),
            ),
            Box::new(|id, name, config, batch_size| {
                Ok(Box::new(SqlServerConnector::new(id, name, config, batch_size)?))
            }),
        );
        registry.register(
            info(
                ConnectorSubtype::Rest,
                "REST API",
                "Generic paginated REST API",
                all_types.clone(),
            ),
            Box::new(|id, name, config, batch_size| {
                Ok(Box::new(RestConnector::new(id, name, config, batch_size)?))
            }),
        );
        registry.register(
            info(
                ConnectorSubtype::Fhir,
                "FHIR",
                "FHIR R4 server with Bundle pagination",
                vec![DataType::Claims, DataType::Eligibility, DataType::Providers],
            ),
            Box::new(|id, name, config, batch_size| {
                Ok(Box::new(FhirConnector::new(id, name, config, batch_size)?))
            }),
        );
        for (subtype, display, description) in [
            (ConnectorSubtype::S3, "Amazon S3", "S3 (and compatible) object storage drop"),
            (ConnectorSubtype::Sftp, "SFTP", "SFTP file drop"),
            (
                ConnectorSubtype::AzureBlob,
                "Azure Blob Storage",
                "Azure Blob Storage container drop",
            ),
            (ConnectorSubtype::Local, "Local files", "Local filesystem directory"),
        ] {
            registry.register(
                info(subtype, display, description, all_types.clone()),
                Box::new(move |id, name, config, batch_size| {
                    Ok(Box::new(FileConnector::new(
                        subtype, id, name, config, batch_size,
                    )?))
                }),
            );
        }

        registry
    }

    /// Register (or replace) a subtype.
    pub fn register(&mut self, info: ConnectorTypeInfo, factory: Factory) {
        self.entries
            .insert(info.subtype, RegistryEntry { info, factory });
    }

    /// Construct a connector. The config is validated against the
    /// subtype's schema first; an unknown subtype is a configuration
    /// error distinct from any transport failure.
    pub fn create(
        &self,
        subtype: &str,
        connector_id: ConnectorId,
        name: impl Into<String>,
        config: &Record,
        batch_size: usize,
    ) -> Result<Box<dyn Connector>, ConnectorError> {
        let parsed = ConnectorSubtype::parse(subtype).ok_or_else(|| {
            ConnectorError::Configuration(format!("unknown connector subtype '{subtype}'"))
        })?;
        let entry = self.entries.get(&parsed).ok_or_else(|| {
            ConnectorError::Configuration(format!("no connector registered for '{subtype}'"))
        })?;
        validate_config(parsed, config)?;
        tracing::debug!(subtype, connector_id = %connector_id, "constructing connector");
        (entry.factory)(connector_id, name.into(), config, batch_size)
    }

    /// Metadata for every registered subtype.
    pub fn list(&self) -> Vec<&ConnectorTypeInfo> {
        let mut infos: Vec<&ConnectorTypeInfo> =
            self.entries.values().map(|e| &e.info).collect();
        infos.sort_by_key(|i| i.subtype.as_str());
        infos
    }

    /// Metadata for one subtype.
    pub fn info(&self, subtype: ConnectorSubtype) -> Option<&ConnectorTypeInfo> {
        self.entries.get(&subtype).map(|e| &e.info)
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("subtypes", &self.entries.len())
            .finish()
    }
}

fn info(
    subtype: ConnectorSubtype,
    display_name: &str,
    description: &str,
    supported_data_types: Vec<DataType>,
) -> ConnectorTypeInfo {
    ConnectorTypeInfo {
        subtype,
        display_name: display_name.to_string(),
        description: description.to_string(),
        config_schema: config_schema(subtype),
        supported_data_types,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn defaults_cover_all_nine_subtypes() {
        let registry = ConnectorRegistry::with_defaults();
        assert_eq!(registry.list().len(), 9);
        assert!(registry.info(ConnectorSubtype::Fhir).is_some());
    }

    #[test]
    fn unknown_subtype_is_distinct_error() {
        let registry = ConnectorRegistry::with_defaults();
        let result = registry.create(
            "oracle",
            ConnectorId::new("c1"),
            "nope",
            &Record::new(),
            100,
        );
        assert!(matches!(result, Err(ConnectorError::Configuration(_))));
    }

    #[test]
    fn create_validates_config_before_construction() {
        let registry = ConnectorRegistry::with_defaults();
        let result = registry.create(
            "postgresql",
            ConnectorId::new("c1"),
            "pg",
            &record(json!({"host": "db"})),
            100,
        );
        assert!(result.is_err());
    }

    #[test]
    fn create_builds_database_connector() {
        let registry = ConnectorRegistry::with_defaults();
        let connector = registry
            .create(
                "postgresql",
                ConnectorId::new("c1"),
                "pg claims",
                &record(json!({
                    "host": "db", "port": 5432, "database": "claims",
                    "username": "etl", "table": "claims"
                })),
                100,
            )
            .unwrap();
        assert_eq!(connector.name(), "pg claims");
    }

    #[test]
    fn create_builds_file_connector() {
        let registry = ConnectorRegistry::with_defaults();
        let connector = registry
            .create(
                "local",
                ConnectorId::new("c1"),
                "drop folder",
                &record(json!({"path": "/data/drops", "file_format": "csv"})),
                100,
            )
            .unwrap();
        assert_eq!(connector.name(), "drop folder");
    }
}
