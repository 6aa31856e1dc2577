//! Declarative per-subtype configuration schemas.
//!
//! JSON-Schema-shaped declarations: required field list, per-field type,
//! enumerations for constrained values, and format hints (`password`,
//! `sql`, `textarea`) the configuration UI renders from.

use intake_core::ConnectorSubtype;
use serde_json::{json, Value};

fn database_schema(default_port: u16, extra_properties: Value) -> Value {
    let mut schema = json!({
        "type": "object",
        "required": ["host", "port", "database", "username"],
        "properties": {
            "host": { "type": "string" },
            "port": { "type": "integer", "default": default_port },
            "database": { "type": "string" },
            "username": { "type": "string" },
            "password": { "type": "string", "format": "password" },
            "schema_name": { "type": "string" },
            "table": { "type": "string" },
            "query": { "type": "string", "format": "sql" },
            "watermark_column": { "type": "string" }
        }
    });
    if let (Value::Object(properties), Value::Object(extra)) =
        (&mut schema["properties"], extra_properties)
    {
        properties.extend(extra);
    }
    schema
}

/// The configuration schema for a connector subtype.
pub fn config_schema(subtype: ConnectorSubtype) -> Value {
    match subtype {
        ConnectorSubtype::Postgresql => database_schema(
            5432,
            json!({
                "ssl_mode": {
                    "type": "string",
                    "enum": ["disable", "allow", "prefer", "require", "verify-ca", "verify-full"],
                    "default": "prefer"
                }
            }),
        ),
        ConnectorSubtype::Mysql => database_schema(
            3306,
            json!({
                "ssl_mode": { "type": "string" },
                "charset": { "type": "string" }
            }),
        ),
        ConnectorSubtype::Sqlserver => database_schema(
            1433,
            json!({
                "encrypt": { "type": "string", "enum": ["yes", "no", "strict"], "default": "yes" },
                "trust_server_certificate": { "type": "boolean", "default": false },
                "tds_version": {
                    "type": "string",
                    "enum": ["7.0", "7.1", "7.2", "7.3", "7.4"]
                },
                "charset": { "type": "string" }
            }),
        ),
        ConnectorSubtype::Rest => json!({
            "type": "object",
            "required": ["base_url", "endpoint"],
            "properties": {
                "base_url": { "type": "string" },
                "endpoint": { "type": "string" },
                "auth_type": {
                    "type": "string",
                    "enum": ["none", "api_key", "basic", "bearer", "oauth2"],
                    "default": "none"
                },
                "api_key": { "type": "string", "format": "password" },
                "api_key_header": { "type": "string", "default": "X-API-Key" },
                "bearer_token": { "type": "string", "format": "password" },
                "oauth2_config": { "type": "object" },
                "pagination_type": {
                    "type": "string",
                    "enum": ["none", "offset", "page", "cursor", "link_header"],
                    "default": "none"
                },
                "pagination_param": { "type": "string" },
                "limit_param": { "type": "string", "default": "limit" },
                "data_path": { "type": "string" },
                "watermark_field": { "type": "string" },
                "watermark_param": { "type": "string", "default": "since" },
                "timeout": { "type": "integer", "default": 30 },
                "rate_limit": { "type": "number", "default": 10 },
                "verify_ssl": { "type": "boolean", "default": true }
            }
        }),
        ConnectorSubtype::Fhir => json!({
            "type": "object",
            "required": ["base_url"],
            "properties": {
                "base_url": { "type": "string" },
                "resource_types": {
                    "type": "array",
                    "items": {
                        "type": "string",
                        "enum": [
                            "Claim", "ExplanationOfBenefit", "Coverage",
                            "Patient", "Practitioner", "Organization",
                            "Encounter", "Procedure", "Condition"
                        ]
                    },
                    "default": ["Claim"]
                },
                "auth_type": {
                    "type": "string",
                    "enum": ["none", "basic", "bearer", "oauth2"],
                    "default": "none"
                },
                "oauth2_config": { "type": "object" },
                "search_params": { "type": "object" },
                "include_params": { "type": "array", "items": { "type": "string" } },
                "timeout": { "type": "integer", "default": 30 },
                "rate_limit": { "type": "number", "default": 5 }
            }
        }),
        ConnectorSubtype::S3 => json!({
            "type": "object",
            "required": ["bucket"],
            "properties": {
                "bucket": { "type": "string" },
                "aws_region": { "type": "string" },
                "aws_access_key": { "type": "string", "format": "password" },
                "aws_secret_key": { "type": "string", "format": "password" },
                "endpoint": { "type": "string" },
                "prefix": { "type": "string" },
                "path_pattern": { "type": "string", "default": "*" },
                "file_format": {
                    "type": "string",
                    "enum": ["edi_837", "edi_837p", "edi_837i", "csv", "json"],
                    "default": "csv"
                },
                "delimiter": { "type": "string", "default": "," },
                "has_header": { "type": "boolean", "default": true },
                "archive_processed": { "type": "boolean", "default": false },
                "archive_path": { "type": "string", "default": "archive" }
            }
        }),
        ConnectorSubtype::Sftp => json!({
            "type": "object",
            "required": ["host", "username"],
            "properties": {
                "host": { "type": "string" },
                "port": { "type": "integer", "default": 22 },
                "username": { "type": "string" },
                "password": { "type": "string", "format": "password" },
                "private_key": { "type": "string", "format": "textarea" },
                "prefix": { "type": "string" },
                "path_pattern": { "type": "string", "default": "*" },
                "file_format": {
                    "type": "string",
                    "enum": ["edi_837", "edi_837p", "edi_837i", "csv", "json"],
                    "default": "csv"
                },
                "delimiter": { "type": "string", "default": "," },
                "has_header": { "type": "boolean", "default": true },
                "archive_processed": { "type": "boolean", "default": false },
                "archive_path": { "type": "string", "default": "archive" }
            }
        }),
        ConnectorSubtype::AzureBlob => json!({
            "type": "object",
            "required": ["azure_container"],
            "properties": {
                "azure_container": { "type": "string" },
                "azure_account_name": { "type": "string" },
                "account_key": { "type": "string", "format": "password" },
                "sas_token": { "type": "string", "format": "password" },
                "azure_connection_string": { "type": "string", "format": "password" },
                "prefix": { "type": "string" },
                "path_pattern": { "type": "string", "default": "*" },
                "file_format": {
                    "type": "string",
                    "enum": ["edi_837", "edi_837p", "edi_837i", "csv", "json"],
                    "default": "csv"
                },
                "delimiter": { "type": "string", "default": "," },
                "has_header": { "type": "boolean", "default": true },
                "archive_processed": { "type": "boolean", "default": false },
                "archive_path": { "type": "string", "default": "archive" }
            }
        }),
        ConnectorSubtype::Local => json!({
            "type": "object",
            "required": ["path"],
            "properties": {
                "path": { "type": "string" },
                "prefix": { "type": "string" },
                "path_pattern": { "type": "string", "default": "*" },
                "file_format": {
                    "type": "string",
                    "enum": ["edi_837", "edi_837p", "edi_837i", "csv", "json"],
                    "default": "csv"
                },
                "delimiter": { "type": "string", "default": "," },
                "has_header": { "type": "boolean", "default": true },
                "archive_processed": { "type": "boolean", "default": false },
                "archive_path": { "type": "string", "default": "archive" }
            }
        }),
    }
}
