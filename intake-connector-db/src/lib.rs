//! Relational database connectors.
//!
//! Three transports behind the shared [`Connector`](intake_core::Connector)
//! contract: PostgreSQL and MySQL over `sqlx` pools, SQL Server over
//! `tiberius`. All of them share one read-only query builder with strict
//! identifier validation — extraction never interpolates anything that has
//! not passed the identifier grammar and reserved-word blocklist, and
//! every error message is run through secret redaction before it leaves
//! the crate.

#![deny(missing_docs)]

pub mod config;
pub mod mysql;
pub mod postgres;
pub mod query;
pub mod sqlserver;

pub use config::DbConfig;
pub use mysql::MysqlConnector;
pub use postgres::PostgresConnector;
pub use query::{build_extraction_query, validate_identifier, validate_custom_query};
pub use sqlserver::SqlServerConnector;
