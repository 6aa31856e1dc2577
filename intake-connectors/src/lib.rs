//! Connector registry and configuration validation.
//!
//! The registry is the single construction entry point for connectors:
//! subtype → factory plus descriptive metadata (display name, config
//! schema, supported data types). Configurations are validated against
//! declarative per-subtype schemas before a factory ever runs.

#![deny(missing_docs)]

pub mod registry;
pub mod schemas;
pub mod validation;

pub use registry::{ConnectorRegistry, ConnectorTypeInfo};
pub use schemas::config_schema;
pub use validation::{validate_config, validate_connector_name};
