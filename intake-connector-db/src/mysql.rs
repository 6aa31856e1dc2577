//! MySQL connector over a pooled `sqlx` driver.

use crate::config::DbConfig;
use crate::query::{build_extraction_query, build_watermark_query, validate_identifier};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use futures::TryStreamExt;
use intake_core::{
    redact_secrets, Batch, ColumnInfo, ConnectionTestResult, Connector, ConnectorError,
    ConnectorId, ExtractStream, Record, SchemaDiscoveryResult, SyncMode,
    DISCOVERY_SAMPLE_ROWS, DISCOVERY_TABLE_LIMIT,
};
use serde_json::Value;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::{Column, Row, TypeInfo};
use std::time::{Duration, Instant};

/// Connector for MySQL sources.
pub struct MysqlConnector {
    connector_id: ConnectorId,
    name: String,
    config: DbConfig,
    batch_size: usize,
    pool: Option<MySqlPool>,
}

impl MysqlConnector {
    /// Build a connector from a raw connection config.
    pub fn new(
        connector_id: ConnectorId,
        name: impl Into<String>,
        config: &Record,
        batch_size: usize,
    ) -> Result<Self, ConnectorError> {
        Ok(Self {
            connector_id,
            name: name.into(),
            config: DbConfig::from_record(config)?,
            batch_size: batch_size.max(1),
            pool: None,
        })
    }

    fn ssl_mode(&self) -> MySqlSslMode {
        match self.config.option_str("ssl_mode") {
            Some("disable") | Some("disabled") => MySqlSslMode::Disabled,
            Some("require") | Some("required") => MySqlSslMode::Required,
            Some("verify-ca") => MySqlSslMode::VerifyCa,
            Some("verify-full") | Some("verify_identity") => MySqlSslMode::VerifyIdentity,
            _ => MySqlSslMode::Preferred,
        }
    }

    fn connect_options(&self) -> MySqlConnectOptions {
        let mut options = MySqlConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.port)
            .database(&self.config.database)
            .username(&self.config.username)
            .ssl_mode(self.ssl_mode());
        if let Some(password) = &self.config.password {
            options = options.password(password);
        }
        if let Some(charset) = self.config.option_str("charset") {
            options = options.charset(charset);
        }
        options
    }

    async fn open_pool(&self, max_connections: u32) -> Result<MySqlPool, ConnectorError> {
        MySqlPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(self.connect_options())
            .await
            .map_err(|e| ConnectorError::Connection(redact_secrets(&e.to_string())))
    }

    async fn ensure_pool(&mut self) -> Result<MySqlPool, ConnectorError> {
        if self.pool.is_none() {
            self.connect().await?;
        }
        Ok(self.pool.clone().expect("pool present after connect"))
    }
}

#[async_trait]
impl Connector for MysqlConnector {
    fn connector_id(&self) -> &ConnectorId {
        &self.connector_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&mut self) -> Result<(), ConnectorError> {
        if self.pool.is_some() {
            return Ok(());
        }
        let pool = self.open_pool(5).await?;
        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(|e| ConnectorError::Connection(redact_secrets(&e.to_string())))?;
        self.pool = Some(pool);
        tracing::info!(connector = %self.name, "connected");
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
            tracing::info!(connector = %self.name, "disconnected");
        }
    }

    async fn test_connection(&self) -> ConnectionTestResult {
        let start = Instant::now();
        let pool = match self.open_pool(1).await {
            Ok(pool) => pool,
            Err(e) => return ConnectionTestResult::failure(e.to_string()),
        };

        let probe = sqlx::query("SELECT 1").execute(&pool).await;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        if let Err(e) = probe {
            pool.close().await;
            return ConnectionTestResult::failure(redact_secrets(&e.to_string()));
        }

        let tables: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = DATABASE()",
        )
        .fetch_one(&pool)
        .await
        .unwrap_or(0);
        pool.close().await;

        ConnectionTestResult::ok(
            format!("Successfully connected to {}", self.config.database),
            latency_ms,
        )
        .with_details(serde_json::json!({
            "driver": "mysql",
            "database": self.config.database,
            "host": self.config.host,
            "tables_found": tables,
        }))
    }

    async fn discover_schema(&mut self) -> Result<SchemaDiscoveryResult, ConnectorError> {
        let pool = self.ensure_pool().await?;

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT table_name FROM information_schema.tables
             WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE'
             ORDER BY table_name",
        )
        .fetch_all(&pool)
        .await
        .map_err(|e| ConnectorError::SchemaDiscovery(redact_secrets(&e.to_string())))?;

        let mut result = SchemaDiscoveryResult {
            tables: tables.clone(),
            ..Default::default()
        };

        for table in tables.iter().take(DISCOVERY_TABLE_LIMIT) {
            if validate_identifier(table).is_err() {
                continue;
            }
            let columns = sqlx::query(
                "SELECT column_name, data_type, is_nullable
                 FROM information_schema.columns
                 WHERE table_schema = DATABASE() AND table_name = ?
                 ORDER BY ordinal_position",
            )
            .bind(table)
            .fetch_all(&pool)
            .await;
            let columns = match columns {
                Ok(columns) => columns,
                Err(e) => {
                    tracing::warn!(table, error = %e, "could not inspect table");
                    continue;
                }
            };
            result.columns.insert(
                table.clone(),
                columns
                    .iter()
                    .map(|row| ColumnInfo {
                        name: row.get("column_name"),
                        data_type: row.get("data_type"),
                        nullable: row.get::<String, _>("is_nullable") == "YES",
                    })
                    .collect(),
            );

            let sample_sql = format!("SELECT * FROM {table} LIMIT {DISCOVERY_SAMPLE_ROWS}");
            if let Ok(rows) = sqlx::query(&sample_sql).fetch_all(&pool).await {
                if !rows.is_empty() {
                    result
                        .sample_data
                        .insert(table.clone(), rows.iter().map(row_to_record).collect());
                }
            }
        }

        Ok(result)
    }

    async fn extract(
        &mut self,
        mode: SyncMode,
        watermark: Option<String>,
    ) -> Result<ExtractStream, ConnectorError> {
        let pool = self.ensure_pool().await?;
        let query = build_extraction_query(&self.config, mode, watermark.as_deref())?;
        let batch_size = self.batch_size;
        tracing::debug!(connector = %self.name, query = %query, "starting extraction");

        let (sender, stream) = ExtractStream::channel();
        tokio::spawn(async move {
            let mut rows = sqlx::query(&query).fetch(&pool);
            let mut batch = Batch::new();
            loop {
                match rows.try_next().await {
                    Ok(Some(row)) => {
                        batch.push(row_to_record(&row));
                        if batch.len() >= batch_size
                            && !sender.send(std::mem::take(&mut batch)).await
                        {
                            return;
                        }
                    }
                    Ok(None) => {
                        if !batch.is_empty() {
                            sender.send(batch).await;
                        }
                        return;
                    }
                    Err(e) => {
                        sender
                            .fail(ConnectorError::Extraction(redact_secrets(&e.to_string())))
                            .await;
                        return;
                    }
                }
            }
        });
        Ok(stream)
    }

    async fn current_watermark(&mut self) -> Result<Option<String>, ConnectorError> {
        let Some(query) = build_watermark_query(&self.config) else {
            return Ok(None);
        };
        let pool = self.ensure_pool().await?;
        let row = sqlx::query(&query)
            .fetch_optional(&pool)
            .await
            .map_err(|e| ConnectorError::Extraction(redact_secrets(&e.to_string())))?;
        Ok(row.and_then(|row| {
            let record = row_to_record(&row);
            record.values().next().filter(|v| !v.is_null()).map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
        }))
    }
}

/// Decode a dynamic row into a JSON record, by column type name.
fn row_to_record(row: &MySqlRow) -> Record {
    let mut record = Record::new();
    for (i, column) in row.columns().iter().enumerate() {
        record.insert(
            column.name().to_string(),
            decode_value(row, i, column.type_info().name()),
        );
    }
    record
}

fn number(value: f64) -> Value {
    serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number)
}

fn decode_value(row: &MySqlRow, i: usize, type_name: &str) -> Value {
    match type_name {
        "BOOLEAN" => row
            .try_get::<Option<bool>, _>(i)
            .ok()
            .flatten()
            .map_or(Value::Null, Value::Bool),
        "TINYINT" => row
            .try_get::<Option<i8>, _>(i)
            .ok()
            .flatten()
            .map_or(Value::Null, |v| Value::from(v)),
        "SMALLINT" => row
            .try_get::<Option<i16>, _>(i)
            .ok()
            .flatten()
            .map_or(Value::Null, |v| Value::from(v)),
        "MEDIUMINT" | "INT" => row
            .try_get::<Option<i32>, _>(i)
            .ok()
            .flatten()
            .map_or(Value::Null, Value::from),
        "BIGINT" => row
            .try_get::<Option<i64>, _>(i)
            .ok()
            .flatten()
            .map_or(Value::Null, Value::from),
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => row
            .try_get::<Option<u64>, _>(i)
            .ok()
            .flatten()
            .map_or(Value::Null, Value::from),
        "FLOAT" => row
            .try_get::<Option<f32>, _>(i)
            .ok()
            .flatten()
            .map_or(Value::Null, |v| number(f64::from(v))),
        "DOUBLE" => row
            .try_get::<Option<f64>, _>(i)
            .ok()
            .flatten()
            .map_or(Value::Null, number),
        "DECIMAL" => row
            .try_get::<Option<rust_decimal::Decimal>, _>(i)
            .ok()
            .flatten()
            .map_or(Value::Null, |d| {
                d.to_string().parse::<f64>().map_or(Value::Null, number)
            }),
        "TIMESTAMP" => row
            .try_get::<Option<DateTime<Utc>>, _>(i)
            .ok()
            .flatten()
            .map_or(Value::Null, |v| Value::String(v.to_rfc3339())),
        "DATETIME" => row
            .try_get::<Option<NaiveDateTime>, _>(i)
            .ok()
            .flatten()
            .map_or(Value::Null, |v| {
                Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            }),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(i)
            .ok()
            .flatten()
            .map_or(Value::Null, |v| Value::String(v.to_string())),
        "JSON" => row
            .try_get::<Option<Value>, _>(i)
            .ok()
            .flatten()
            .unwrap_or(Value::Null),
        "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" => row
            .try_get::<Option<Vec<u8>>, _>(i)
            .ok()
            .flatten()
            .map_or(Value::Null, |bytes| {
                match String::from_utf8(bytes.clone()) {
                    Ok(text) => Value::String(text),
                    Err(_) => Value::String(bytes.iter().map(|b| format!("{b:02x}")).collect()),
                }
            }),
        _ => row
            .try_get::<Option<String>, _>(i)
            .ok()
            .flatten()
            .map_or(Value::Null, Value::String),
    }
}
