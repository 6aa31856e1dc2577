//! FHIR R4 connector with Bundle pagination.

use crate::auth::AuthConfig;
use crate::flatten::flatten_resource;
use crate::transport::{HttpTransport, TransportSettings};
use async_trait::async_trait;
use intake_core::{
    Batch, ConnectionTestResult, Connector, ConnectorError, ConnectorId, ExtractStream, Record,
    SchemaDiscoveryResult, SyncMode,
};
use serde_json::Value;
use std::time::Instant;

/// Default sustained request rate for FHIR servers.
const DEFAULT_RATE_LIMIT: f64 = 5.0;

/// Resource types extracted when the config does not name any.
const DEFAULT_RESOURCE_TYPES: &[&str] = &["Claim"];

/// Connector for FHIR R4 servers.
///
/// Walks each configured resource type's search results through Bundle
/// `link.relation = "next"` pagination; `_count` carries the batch size
/// and `_lastUpdated=ge<ts>` the incremental watermark. Resources are
/// flattened per type into flat records.
pub struct FhirConnector {
    connector_id: ConnectorId,
    name: String,
    config: Record,
    settings: TransportSettings,
    auth: AuthConfig,
    base_url: String,
    batch_size: usize,
    transport: Option<HttpTransport>,
}

impl FhirConnector {
    /// Build a connector from a raw connection config.
    pub fn new(
        connector_id: ConnectorId,
        name: impl Into<String>,
        config: &Record,
        batch_size: usize,
    ) -> Result<Self, ConnectorError> {
        let base_url = config
            .get("base_url")
            .and_then(|v| v.as_str())
            .map(|s| s.trim_end_matches('/').to_string())
            .ok_or_else(|| {
                ConnectorError::Configuration("missing required field 'base_url'".into())
            })?;

        Ok(Self {
            connector_id,
            name: name.into(),
            settings: TransportSettings::from_record(config, DEFAULT_RATE_LIMIT),
            auth: AuthConfig::from_record(config)?,
            base_url,
            batch_size: batch_size.max(1),
            transport: None,
            config: config.clone(),
        })
    }

    fn resource_types(&self) -> Vec<String> {
        match self.config.get("resource_types") {
            Some(Value::Array(types)) => types
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect(),
            Some(Value::String(single)) => vec![single.clone()],
            _ => DEFAULT_RESOURCE_TYPES.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    fn search_params(&self, mode: SyncMode, watermark: Option<&str>) -> Vec<(String, String)> {
        let mut params = vec![
            ("_count".to_string(), self.batch_size.to_string()),
            ("_format".to_string(), "json".to_string()),
        ];
        if let Some(Value::Array(includes)) = self.config.get("include_params") {
            for include in includes.iter().filter_map(|v| v.as_str()) {
                params.push(("_include".to_string(), include.to_string()));
            }
        }
        if let Some(Value::Object(search)) = self.config.get("search_params") {
            for (key, value) in search {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                params.push((key.clone(), rendered));
            }
        }
        if mode == SyncMode::Incremental {
            if let Some(watermark) = watermark {
                params.push(("_lastUpdated".to_string(), format!("ge{watermark}")));
            }
        }
        params
    }

    fn ensure_transport(&mut self) -> Result<HttpTransport, ConnectorError> {
        if self.transport.is_none() {
            self.transport = Some(HttpTransport::new(&self.settings, self.auth.clone())?);
        }
        Ok(self.transport.clone().expect("transport present"))
    }
}

#[async_trait]
impl Connector for FhirConnector {
    fn connector_id(&self) -> &ConnectorId {
        &self.connector_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&mut self) -> Result<(), ConnectorError> {
        self.ensure_transport()?;
        tracing::info!(connector = %self.name, base_url = %self.base_url, "connected");
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.transport = None;
    }

    async fn test_connection(&self) -> ConnectionTestResult {
        let transport = match HttpTransport::new(&self.settings, self.auth.clone()) {
            Ok(transport) => transport,
            Err(e) => return ConnectionTestResult::failure(e.to_string()),
        };
        let url = format!("{}/metadata", self.base_url);

        let start = Instant::now();
        match transport.get_json(&url, &[]).await {
            Ok(response) => {
                let fhir_version = response.body["fhirVersion"]
                    .as_str()
                    .unwrap_or("unknown")
                    .to_string();
                ConnectionTestResult::ok(
                    format!("Successfully connected to FHIR server: {}", self.base_url),
                    start.elapsed().as_secs_f64() * 1000.0,
                )
                .with_details(serde_json::json!({
                    "base_url": self.base_url,
                    "fhir_version": fhir_version,
                }))
            }
            Err(e) => ConnectionTestResult::failure(e.to_string()),
        }
    }

    async fn discover_schema(&mut self) -> Result<SchemaDiscoveryResult, ConnectorError> {
        let transport = self.ensure_transport()?;
        let mut result = SchemaDiscoveryResult {
            tables: self.resource_types(),
            ..Default::default()
        };

        for resource_type in result.tables.clone() {
            let url = format!("{}/{resource_type}", self.base_url);
            let params = vec![
                ("_count".to_string(), "3".to_string()),
                ("_format".to_string(), "json".to_string()),
            ];
            match transport.get_json(&url, &params).await {
                Ok(response) => {
                    let samples = bundle_records(&response.body);
                    if let Some(first) = samples.first() {
                        result.columns.insert(
                            resource_type.clone(),
                            first
                                .keys()
                                .map(|name| intake_core::ColumnInfo {
                                    name: name.clone(),
                                    data_type: "json".into(),
                                    nullable: true,
                                })
                                .collect(),
                        );
                    }
                    if !samples.is_empty() {
                        result.sample_data.insert(resource_type, samples);
                    }
                }
                Err(e) => {
                    tracing::warn!(resource_type = %resource_type, error = %e,
                        "resource discovery failed");
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
        let transport = self.ensure_transport()?;
        let resource_types = self.resource_types();
        let params = self.search_params(mode, watermark.as_deref());
        let base_url = self.base_url.clone();
        tracing::debug!(connector = %self.name, resources = ?resource_types,
            "starting extraction");

        let (sender, stream) = ExtractStream::channel();
        tokio::spawn(async move {
            for resource_type in resource_types {
                let mut url = format!("{base_url}/{resource_type}");
                let mut first = true;
                loop {
                    let page_params: &[(String, String)] = if first { &params } else { &[] };
                    let response = match transport.get_json(&url, page_params).await {
                        Ok(response) => response,
                        Err(e) => {
                            sender.fail(e).await;
                            return;
                        }
                    };
                    first = false;

                    let records = bundle_records(&response.body);
                    if records.is_empty() {
                        break;
                    }
                    if !sender.send(records).await {
                        return;
                    }

                    match next_link(&response.body) {
                        Some(next) => url = next,
                        None => break,
                    }
                }
            }
        });
        Ok(stream)
    }

    async fn current_watermark(&mut self) -> Result<Option<String>, ConnectorError> {
        // Watermarks ride on each resource's meta.lastUpdated; there is no
        // cheap server-side maximum to probe.
        Ok(None)
    }
}

/// Flatten every resource entry of a Bundle page.
fn bundle_records(bundle: &Value) -> Batch {
    bundle["entry"]
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter(|entry| entry["resource"].is_object())
                .map(|entry| flatten_resource(&entry["resource"]))
                .collect()
        })
        .unwrap_or_default()
}

/// The Bundle's `link.relation = "next"` URL, when present.
fn next_link(bundle: &Value) -> Option<String> {
    bundle["link"].as_array()?.iter().find_map(|link| {
        if link["relation"].as_str() == Some("next") {
            link["url"].as_str().map(str::to_string)
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> Record {
        let mut record = Record::new();
        record.insert("base_url".into(), json!("https://fhir.example.com/r4/"));
        record
    }

    #[test]
    fn base_url_is_required_and_trimmed() {
        let connector =
            FhirConnector::new(ConnectorId::new("c1"), "fhir", &config(), 50).unwrap();
        assert_eq!(connector.base_url, "https://fhir.example.com/r4");

        assert!(FhirConnector::new(ConnectorId::new("c1"), "fhir", &Record::new(), 50).is_err());
    }

    #[test]
    fn resource_types_default_and_override() {
        let connector =
            FhirConnector::new(ConnectorId::new("c1"), "fhir", &config(), 50).unwrap();
        assert_eq!(connector.resource_types(), vec!["Claim"]);

        let mut record = config();
        record.insert("resource_types".into(), json!(["Patient", "Coverage"]));
        let connector =
            FhirConnector::new(ConnectorId::new("c1"), "fhir", &record, 50).unwrap();
        assert_eq!(connector.resource_types(), vec!["Patient", "Coverage"]);
    }

    #[test]
    fn search_params_carry_count_and_watermark() {
        let mut record = config();
        record.insert("search_params".into(), json!({"status": "active"}));
        record.insert("include_params".into(), json!(["Claim:patient"]));
        let connector =
            FhirConnector::new(ConnectorId::new("c1"), "fhir", &record, 75).unwrap();

        let params =
            connector.search_params(SyncMode::Incremental, Some("2024-03-01T00:00:00Z"));
        assert!(params.contains(&("_count".to_string(), "75".to_string())));
        assert!(params.contains(&(
            "_lastUpdated".to_string(),
            "ge2024-03-01T00:00:00Z".to_string()
        )));
        assert!(params.contains(&("_include".to_string(), "Claim:patient".to_string())));
        assert!(params.contains(&("status".to_string(), "active".to_string())));

        let full = connector.search_params(SyncMode::Full, Some("2024-03-01T00:00:00Z"));
        assert!(!full.iter().any(|(k, _)| k == "_lastUpdated"));
    }

    #[test]
    fn bundle_pagination_link() {
        let bundle = json!({
            "resourceType": "Bundle",
            "link": [
                {"relation": "self", "url": "https://fhir/Claim?page=1"},
                {"relation": "next", "url": "https://fhir/Claim?page=2"}
            ],
            "entry": [{"resource": {"resourceType": "Claim", "id": "c-1"}}]
        });
        assert_eq!(next_link(&bundle).unwrap(), "https://fhir/Claim?page=2");
        assert_eq!(bundle_records(&bundle).len(), 1);

        let last_page = json!({"link": [{"relation": "self", "url": "x"}]});
        assert!(next_link(&last_page).is_none());
        assert!(bundle_records(&last_page).is_empty());
    }
}
