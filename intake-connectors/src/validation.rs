//! Connector configuration validation.

use crate::schemas::config_schema;
use intake_core::{ConnectorError, ConnectorSubtype, Record};
use serde_json::Value;

/// Validate a connector display name. Rejects HTML-special characters that
/// would survive into rendered surfaces.
pub fn validate_connector_name(name: &str) -> Result<String, ConnectorError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ConnectorError::Configuration(
            "connector name cannot be empty".into(),
        ));
    }
    if trimmed.contains('<') || trimmed.contains('>') || trimmed.contains('&') {
        return Err(ConnectorError::Configuration(
            "connector name cannot contain '<', '>', or '&'".into(),
        ));
    }
    Ok(trimmed.to_string())
}

fn type_matches(declared: &str, value: &Value) -> bool {
    match declared {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64() || value.as_str().is_some_and(|s| s.parse::<i64>().is_ok()),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

/// Validate a raw connection config against the subtype's declarative
/// schema: required fields present, enum values legal, basic types right.
pub fn validate_config(
    subtype: ConnectorSubtype,
    config: &Record,
) -> Result<(), ConnectorError> {
    let schema = config_schema(subtype);

    if let Some(required) = schema["required"].as_array() {
        for field in required.iter().filter_map(|v| v.as_str()) {
            let present = config
                .get(field)
                .map(|v| !v.is_null() && v.as_str() != Some(""))
                .unwrap_or(false);
            if !present {
                return Err(ConnectorError::Configuration(format!(
                    "{subtype} config missing required field '{field}'"
                )));
            }
        }
    }

    if let Some(properties) = schema["properties"].as_object() {
        for (field, declaration) in properties {
            let Some(value) = config.get(field) else { continue };
            if value.is_null() {
                continue;
            }
            if let Some(declared) = declaration["type"].as_str() {
                if !type_matches(declared, value) {
                    return Err(ConnectorError::Configuration(format!(
                        "{subtype} config field '{field}' must be of type {declared}"
                    )));
                }
            }
            if let Some(allowed) = declaration["enum"].as_array() {
                if !allowed.contains(value) {
                    return Err(ConnectorError::Configuration(format!(
                        "{subtype} config field '{field}' must be one of {allowed:?}"
                    )));
                }
            }
            // Array items with enums (FHIR resource types).
            if let (Some(values), Some(allowed)) = (
                value.as_array(),
                declaration["items"]["enum"].as_array(),
            ) {
                for item in values {
                    if !allowed.contains(item) {
                        return Err(ConnectorError::Configuration(format!(
                            "{subtype} config field '{field}' has unsupported entry {item}"
                        )));
                    }
                }
            }
        }
    }

    Ok(())
}
