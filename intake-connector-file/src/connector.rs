//! The file/object connector over an OpenDAL operator.

use crate::parser::{parser_for, RecordParser};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::Glob;
use intake_core::{
    Batch, ColumnInfo, ConnectionTestResult, Connector, ConnectorError, ConnectorId,
    ConnectorSubtype, ConnectorType, ExtractStream, Record, SchemaDiscoveryResult, SyncMode,
    DISCOVERY_SAMPLE_ROWS,
};
use opendal::{services, Operator};
use std::io::Write as _;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// A file selected for extraction.
#[derive(Debug, Clone)]
struct RemoteFile {
    path: String,
    modified_at: DateTime<Utc>,
}

/// Connector for file and object sources (S3, Azure Blob, SFTP, local).
pub struct FileConnector {
    connector_id: ConnectorId,
    name: String,
    subtype: ConnectorSubtype,
    config: Record,
    batch_size: usize,
    parser: Option<Arc<dyn RecordParser>>,
    operator: Option<Operator>,
    // Holds SFTP private key material on disk for the transport's lifetime.
    key_file: Option<tempfile::NamedTempFile>,
    latest_seen: Arc<Mutex<Option<String>>>,
}

impl FileConnector {
    /// Build a connector from a raw connection config. EDI formats leave
    /// the parser unset; attach one with [`with_parser`](Self::with_parser)
    /// before extracting.
    pub fn new(
        subtype: ConnectorSubtype,
        connector_id: ConnectorId,
        name: impl Into<String>,
        config: &Record,
        batch_size: usize,
    ) -> Result<Self, ConnectorError> {
        if subtype.connector_type() != ConnectorType::File {
            return Err(ConnectorError::Configuration(format!(
                "'{subtype}' is not a file connector subtype"
            )));
        }

        let format = config
            .get("file_format")
            .and_then(|v| v.as_str())
            .unwrap_or("csv")
            .to_string();
        let delimiter = config
            .get("delimiter")
            .and_then(|v| v.as_str())
            .and_then(|s| s.bytes().next())
            .unwrap_or(b',');
        let has_header = config
            .get("has_header")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        let parser = match parser_for(&format, delimiter, has_header) {
            Ok(parser) => Some(parser),
            Err(_) if format.starts_with("edi_837") => None,
            Err(e) => return Err(e),
        };

        Ok(Self {
            subtype,
            connector_id,
            name: name.into(),
            config: config.clone(),
            batch_size: batch_size.max(1),
            parser,
            operator: None,
            key_file: None,
            latest_seen: Arc::new(Mutex::new(None)),
        })
    }

    /// Attach an external format parser (EDI 837 and friends).
    #[must_use]
    pub fn with_parser(mut self, parser: Arc<dyn RecordParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    fn option(&self, key: &str) -> Option<String> {
        self.config
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    fn required(&self, key: &str) -> Result<String, ConnectorError> {
        self.option(key).ok_or_else(|| {
            ConnectorError::Configuration(format!("missing required field '{key}'"))
        })
    }

    fn listing_prefix(&self) -> String {
        let mut prefix = self.option("prefix").unwrap_or_default();
        if prefix.is_empty() {
            return "/".to_string();
        }
        if !prefix.ends_with('/') {
            prefix.push('/');
        }
        prefix
    }

    fn build_operator(&mut self) -> Result<Operator, ConnectorError> {
        let configuration =
            |e: opendal::Error| ConnectorError::Configuration(e.to_string());
        match self.subtype {
            ConnectorSubtype::S3 => {
                let mut builder = services::S3::default().bucket(&self.required("bucket")?);
                if let Some(region) = self.option("aws_region").or_else(|| self.option("region")) {
                    builder = builder.region(&region);
                }
                if let Some(key) = self.option("aws_access_key") {
                    builder = builder.access_key_id(&key);
                }
                if let Some(secret) = self.option("aws_secret_key") {
                    builder = builder.secret_access_key(&secret);
                }
                if let Some(endpoint) = self.option("endpoint") {
                    builder = builder.endpoint(&endpoint);
                }
                Ok(Operator::new(builder).map_err(configuration)?.finish())
            }
            ConnectorSubtype::AzureBlob => {
                let container = self
                    .option("azure_container")
                    .or_else(|| self.option("container"))
                    .ok_or_else(|| {
                        ConnectorError::Configuration(
                            "missing required field 'azure_container'".into(),
                        )
                    })?;
                let mut builder = services::Azblob::default().container(&container);
                if let Some(connection_string) = self.option("azure_connection_string") {
                    for part in connection_string.split(';') {
                        if let Some(name) = part.strip_prefix("AccountName=") {
                            builder = builder.account_name(name);
                        } else if let Some(key) = part.strip_prefix("AccountKey=") {
                            builder = builder.account_key(key);
                        }
                    }
                } else {
                    if let Some(account) = self.option("azure_account_name") {
                        builder = builder.account_name(&account);
                    }
                    if let Some(key) = self.option("account_key") {
                        builder = builder.account_key(&key);
                    }
                    if let Some(sas) = self.option("sas_token") {
                        builder = builder.sas_token(&sas);
                    }
                }
                Ok(Operator::new(builder).map_err(configuration)?.finish())
            }
            ConnectorSubtype::Sftp => {
                let host = self.required("host")?;
                let port = self
                    .config
                    .get("port")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(22);
                let username = self.required("username")?;
                let Some(private_key) = self.option("private_key") else {
                    // The SFTP transport authenticates with keys; a
                    // password-only config cannot be honored.
                    return Err(ConnectorError::Configuration(
                        "sftp requires 'private_key'; password-only authentication is not supported"
                            .into(),
                    ));
                };

                let mut key_file = tempfile::NamedTempFile::new().map_err(|e| {
                    ConnectorError::Configuration(format!("cannot stage sftp key: {e}"))
                })?;
                key_file.write_all(private_key.as_bytes()).map_err(|e| {
                    ConnectorError::Configuration(format!("cannot stage sftp key: {e}"))
                })?;
                key_file.flush().map_err(|e| {
                    ConnectorError::Configuration(format!("cannot stage sftp key: {e}"))
                })?;

                let builder = services::Sftp::default()
                    .endpoint(&format!("ssh://{host}:{port}"))
                    .user(&username)
                    .key(&key_file.path().to_string_lossy());
                self.key_file = Some(key_file);
                Ok(Operator::new(builder).map_err(configuration)?.finish())
            }
            ConnectorSubtype::Local => {
                let root = self
                    .option("path")
                    .or_else(|| self.option("root"))
                    .ok_or_else(|| {
                        ConnectorError::Configuration("missing required field 'path'".into())
                    })?;
                let builder = services::Fs::default().root(&root);
                Ok(Operator::new(builder).map_err(configuration)?.finish())
            }
            _ => unreachable!("validated in new()"),
        }
    }

    fn ensure_operator(&mut self) -> Result<Operator, ConnectorError> {
        if self.operator.is_none() {
            self.operator = Some(self.build_operator()?);
        }
        Ok(self.operator.clone().expect("operator present"))
    }

    /// List files under the prefix matching the glob pattern, optionally
    /// filtered past the watermark, sorted by modification time ascending.
    async fn list_matching(
        &self,
        operator: &Operator,
        mode: SyncMode,
        watermark: Option<&str>,
    ) -> Result<Vec<RemoteFile>, ConnectorError> {
        let pattern = self.option("path_pattern").unwrap_or_else(|| "*".into());
        let matcher = Glob::new(&pattern)
            .map_err(|e| ConnectorError::Configuration(format!("bad path_pattern: {e}")))?
            .compile_matcher();
        let cutoff = match (mode, watermark) {
            (SyncMode::Incremental, Some(watermark)) => Some(
                DateTime::parse_from_rfc3339(watermark)
                    .map_err(|e| {
                        ConnectorError::Configuration(format!("bad watermark '{watermark}': {e}"))
                    })?
                    .with_timezone(&Utc),
            ),
            _ => None,
        };

        let prefix = self.listing_prefix();
        let entries = operator
            .list_with(&prefix)
            .recursive(true)
            .await
            .map_err(|e| ConnectorError::Connection(e.to_string()))?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry.path().to_string();
            if path.ends_with('/') {
                continue;
            }
            let file_name = path.rsplit('/').next().unwrap_or(&path);
            if !matcher.is_match(file_name) {
                continue;
            }
            let metadata = operator
                .stat(&path)
                .await
                .map_err(|e| ConnectorError::Connection(e.to_string()))?;
            if !metadata.mode().is_file() {
                continue;
            }
            let modified_at = metadata.last_modified().unwrap_or_else(|| {
                DateTime::<Utc>::from_timestamp(0, 0).expect("epoch is valid")
            });
            if let Some(cutoff) = cutoff {
                if modified_at <= cutoff {
                    continue;
                }
            }
            files.push(RemoteFile { path, modified_at });
        }
        files.sort_by_key(|f| f.modified_at);
        Ok(files)
    }
}

#[async_trait]
impl Connector for FileConnector {
    fn connector_id(&self) -> &ConnectorId {
        &self.connector_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&mut self) -> Result<(), ConnectorError> {
        self.ensure_operator()?;
        tracing::info!(connector = %self.name, subtype = %self.subtype, "connected");
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.operator = None;
        self.key_file = None;
    }

    async fn test_connection(&self) -> ConnectionTestResult {
        // Operator construction needs &mut for key staging; probe on a clone.
        let mut probe = match Self::new(
            self.subtype,
            self.connector_id.clone(),
            self.name.clone(),
            &self.config,
            self.batch_size,
        ) {
            Ok(probe) => probe,
            Err(e) => return ConnectionTestResult::failure(e.to_string()),
        };
        if let Some(parser) = &self.parser {
            probe.parser = Some(parser.clone());
        }

        let start = Instant::now();
        let operator = match probe.ensure_operator() {
            Ok(operator) => operator,
            Err(e) => return ConnectionTestResult::failure(e.to_string()),
        };
        match probe.list_matching(&operator, SyncMode::Full, None).await {
            Ok(files) => ConnectionTestResult::ok(
                format!("Successfully listed {} matching file(s)", files.len()),
                start.elapsed().as_secs_f64() * 1000.0,
            )
            .with_details(serde_json::json!({
                "subtype": self.subtype.as_str(),
                "prefix": probe.listing_prefix(),
                "files_found": files.len(),
            })),
            Err(e) => ConnectionTestResult::failure(e.to_string()),
        }
    }

    async fn discover_schema(&mut self) -> Result<SchemaDiscoveryResult, ConnectorError> {
        let operator = self.ensure_operator()?;
        let files = self.list_matching(&operator, SyncMode::Full, None).await?;
        let parser = self.parser.clone().ok_or_else(|| {
            ConnectorError::Configuration("no parser attached for configured file format".into())
        })?;

        let mut result = SchemaDiscoveryResult {
            tables: files.iter().map(|f| f.path.clone()).collect(),
            ..Default::default()
        };

        if let Some(first) = files.first() {
            let scratch = tempfile::tempdir()
                .map_err(|e| ConnectorError::SchemaDiscovery(e.to_string()))?;
            let local = download(&operator, &first.path, scratch.path()).await?;
            let records = parser.parse(&local).await?;
            if let Some(sample) = records.first() {
                result.columns.insert(
                    first.path.clone(),
                    sample
                        .iter()
                        .map(|(name, value)| ColumnInfo {
                            name: name.clone(),
                            data_type: match value {
                                serde_json::Value::Number(_) => "number".into(),
                                serde_json::Value::Bool(_) => "boolean".into(),
                                _ => "string".into(),
                            },
                            nullable: true,
                        })
                        .collect(),
                );
            }
            if !records.is_empty() {
                result.sample_data.insert(
                    first.path.clone(),
                    records.into_iter().take(DISCOVERY_SAMPLE_ROWS).collect(),
                );
            }
        }
        Ok(result)
    }

    async fn extract(
        &mut self,
        mode: SyncMode,
        watermark: Option<String>,
    ) -> Result<ExtractStream, ConnectorError> {
        let operator = self.ensure_operator()?;
        let parser = self.parser.clone().ok_or_else(|| {
            ConnectorError::Configuration("no parser attached for configured file format".into())
        })?;
        let files = self
            .list_matching(&operator, mode, watermark.as_deref())
            .await?;
        let batch_size = self.batch_size;
        let archive = self
            .config
            .get("archive_processed")
            .or_else(|| self.config.get("archive_after_sync"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let archive_path = self.option("archive_path").unwrap_or_else(|| "archive".into());
        let latest_seen = self.latest_seen.clone();
        tracing::debug!(connector = %self.name, files = files.len(), "starting extraction");

        let (sender, stream) = ExtractStream::channel();
        tokio::spawn(async move {
            let scratch = match tempfile::tempdir() {
                Ok(scratch) => scratch,
                Err(e) => {
                    sender
                        .fail(ConnectorError::Extraction(format!(
                            "cannot create scratch directory: {e}"
                        )))
                        .await;
                    return;
                }
            };

            let mut pending = Batch::new();
            for file in files {
                let local = match download(&operator, &file.path, scratch.path()).await {
                    Ok(local) => local,
                    Err(e) => {
                        sender.fail(e).await;
                        return;
                    }
                };
                let records = match parser.parse(&local).await {
                    Ok(records) => records,
                    Err(e) => {
                        sender.fail(e).await;
                        return;
                    }
                };

                for record in records {
                    pending.push(record);
                    if pending.len() >= batch_size
                        && !sender.send(std::mem::take(&mut pending)).await
                    {
                        return;
                    }
                }

                *latest_seen.lock().expect("watermark lock") =
                    Some(file.modified_at.to_rfc3339());

                if archive {
                    let file_name = file.path.rsplit('/').next().unwrap_or(&file.path);
                    let destination = format!("{}/{file_name}", archive_path.trim_end_matches('/'));
                    if let Err(e) = operator.copy(&file.path, &destination).await {
                        tracing::warn!(path = %file.path, error = %e, "archive copy failed");
                    } else if let Err(e) = operator.delete(&file.path).await {
                        tracing::warn!(path = %file.path, error = %e, "archive delete failed");
                    }
                }
            }
            if !pending.is_empty() {
                sender.send(pending).await;
            }
        });
        Ok(stream)
    }

    async fn current_watermark(&mut self) -> Result<Option<String>, ConnectorError> {
        if let Some(seen) = self.latest_seen.lock().expect("watermark lock").clone() {
            return Ok(Some(seen));
        }
        let operator = self.ensure_operator()?;
        let files = self.list_matching(&operator, SyncMode::Full, None).await?;
        Ok(files.last().map(|f| f.modified_at.to_rfc3339()))
    }
}

/// Download one remote object into the scratch directory.
async fn download(
    operator: &Operator,
    path: &str,
    scratch: &std::path::Path,
) -> Result<std::path::PathBuf, ConnectorError> {
    let bytes = operator
        .read(path)
        .await
        .map_err(|e| ConnectorError::Extraction(format!("download of '{path}' failed: {e}")))?;
    let file_name = path.replace('/', "_");
    let local = scratch.join(file_name);
    tokio::fs::write(&local, bytes.to_vec())
        .await
        .map_err(|e| ConnectorError::Extraction(format!("scratch write failed: {e}")))?;
    Ok(local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn local_config(root: &std::path::Path) -> Record {
        let mut config = Record::new();
        config.insert("path".into(), json!(root.to_string_lossy()));
        config.insert("file_format".into(), json!("csv"));
        config
    }

    #[test]
    fn rejects_non_file_subtype() {
        assert!(FileConnector::new(
            ConnectorSubtype::Postgresql,
            ConnectorId::new("c1"),
            "files",
            &Record::new(),
            100,
        )
        .is_err());
    }

    #[test]
    fn sftp_without_key_is_rejected() {
        let mut config = Record::new();
        config.insert("host".into(), json!("drop.example.com"));
        config.insert("username".into(), json!("etl"));
        config.insert("password".into(), json!("p"));
        let mut connector = FileConnector::new(
            ConnectorSubtype::Sftp,
            ConnectorId::new("c1"),
            "sftp drop",
            &config,
            100,
        )
        .unwrap();
        assert!(matches!(
            connector.build_operator(),
            Err(ConnectorError::Configuration(_))
        ));
    }

    #[test]
    fn edi_format_defers_parser() {
        let mut config = Record::new();
        config.insert("path".into(), json!("/tmp"));
        config.insert("file_format".into(), json!("edi_837"));
        let connector = FileConnector::new(
            ConnectorSubtype::Local,
            ConnectorId::new("c1"),
            "edi drop",
            &config,
            100,
        )
        .unwrap();
        assert!(connector.parser.is_none());
    }

    #[tokio::test]
    async fn local_extraction_end_to_end() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(
            root.path().join("claims_a.csv"),
            "claim_id,billed_amount\nC-1,100\nC-2,200\n",
        )
        .unwrap();
        std::fs::write(root.path().join("ignore.txt"), "noise").unwrap();

        let mut config = local_config(root.path());
        config.insert("path_pattern".into(), json!("*.csv"));
        let mut connector = FileConnector::new(
            ConnectorSubtype::Local,
            ConnectorId::new("c1"),
            "local drop",
            &config,
            10,
        )
        .unwrap();

        connector.connect().await.unwrap();
        let mut stream = connector.extract(SyncMode::Full, None).await.unwrap();
        let mut total = 0;
        while let Some(batch) = stream.next_batch().await {
            let batch = batch.unwrap();
            total += batch.len();
            assert!(batch.iter().all(|r| r.contains_key("claim_id")));
        }
        assert_eq!(total, 2);

        let watermark = connector.current_watermark().await.unwrap();
        assert!(watermark.is_some());
        connector.disconnect().await;
    }

    #[tokio::test]
    async fn incremental_filters_by_modification_time() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("old.csv"), "claim_id\nC-1\n").unwrap();

        let mut connector = FileConnector::new(
            ConnectorSubtype::Local,
            ConnectorId::new("c1"),
            "local drop",
            &local_config(root.path()),
            10,
        )
        .unwrap();
        connector.connect().await.unwrap();

        // A watermark in the future excludes everything on disk.
        let future = (Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
        let mut stream = connector
            .extract(SyncMode::Incremental, Some(future))
            .await
            .unwrap();
        assert!(stream.next_batch().await.is_none());
    }

    #[tokio::test]
    async fn batches_respect_configured_size() {
        let root = tempfile::tempdir().unwrap();
        let rows: String = (0..25).map(|i| format!("C-{i}\n")).collect();
        std::fs::write(root.path().join("claims.csv"), format!("claim_id\n{rows}")).unwrap();

        let mut connector = FileConnector::new(
            ConnectorSubtype::Local,
            ConnectorId::new("c1"),
            "local drop",
            &local_config(root.path()),
            10,
        )
        .unwrap();
        connector.connect().await.unwrap();

        let mut stream = connector.extract(SyncMode::Full, None).await.unwrap();
        let mut sizes = Vec::new();
        while let Some(batch) = stream.next_batch().await {
            sizes.push(batch.unwrap().len());
        }
        assert_eq!(sizes, vec![10, 10, 5]);
    }
}
