//! Extract stage: wraps a connector's batch stream with numbering and
//! watermark pickup.

use intake_core::{
    record_value_string, Batch, Connector, ConnectorError, ExtractStream, SyncMode,
};

/// One numbered extraction batch.
#[derive(Debug)]
pub struct ExtractionResult {
    /// The records.
    pub records: Batch,
    /// 1-based batch number within this run.
    pub batch_number: usize,
    /// Record count of this batch.
    pub in_batch: usize,
    /// Watermark value taken from the last record's watermark column,
    /// when one is configured and present.
    pub watermark_value: Option<String>,
    /// Run metadata (running total, sync mode).
    pub metadata: serde_json::Value,
}

/// Extract stage over one connector.
pub struct ExtractStage {
    connector: Box<dyn Connector>,
    watermark_column: Option<String>,
}

impl ExtractStage {
    /// Wrap a connector. `watermark_column` names the record field whose
    /// last-seen value becomes the batch watermark.
    pub fn new(connector: Box<dyn Connector>, watermark_column: Option<String>) -> Self {
        Self {
            connector,
            watermark_column,
        }
    }

    /// Connect (idempotent) and begin extraction.
    pub async fn begin(
        &mut self,
        mode: SyncMode,
        watermark: Option<String>,
    ) -> Result<ExtractionFeed, ConnectorError> {
        self.connector.connect().await?;
        let stream = self.connector.extract(mode, watermark).await?;
        Ok(ExtractionFeed {
            stream,
            watermark_column: self.watermark_column.clone(),
            batch_number: 0,
            total_extracted: 0,
            sync_mode: mode,
        })
    }

    /// Borrow the wrapped connector.
    pub fn connector_mut(&mut self) -> &mut dyn Connector {
        self.connector.as_mut()
    }
}

/// A running extraction; yields numbered batches until the source is
/// exhausted or fails.
pub struct ExtractionFeed {
    stream: ExtractStream,
    watermark_column: Option<String>,
    batch_number: usize,
    total_extracted: usize,
    sync_mode: SyncMode,
}

impl ExtractionFeed {
    /// The next batch, a terminal extraction error, or `None` at the end.
    pub async fn next(&mut self) -> Option<Result<ExtractionResult, ConnectorError>> {
        match self.stream.next_batch().await? {
            Ok(records) => {
                self.batch_number += 1;
                self.total_extracted += records.len();

                let watermark_value = self.watermark_column.as_ref().and_then(|column| {
                    records.last().and_then(|record| record_value_string(record, column))
                });

                tracing::debug!(
                    batch = self.batch_number,
                    records = records.len(),
                    total = self.total_extracted,
                    "extracted batch"
                );

                Some(Ok(ExtractionResult {
                    in_batch: records.len(),
                    batch_number: self.batch_number,
                    watermark_value,
                    metadata: serde_json::json!({
                        "total_extracted": self.total_extracted,
                        "sync_mode": self.sync_mode.as_str(),
                    }),
                    records,
                }))
            }
            Err(e) => Some(Err(e)),
        }
    }

    /// Records seen so far.
    pub fn total_extracted(&self) -> usize {
        self.total_extracted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intake_core::{
        BatchSender, ConnectionTestResult, ConnectorId, Record, SchemaDiscoveryResult,
    };
    use serde_json::json;

    struct ScriptedConnector {
        connector_id: ConnectorId,
        batches: Vec<Batch>,
        fail_after: Option<usize>,
    }

    #[async_trait::async_trait]
    impl Connector for ScriptedConnector {
        fn connector_id(&self) -> &ConnectorId {
            &self.connector_id
        }
        fn name(&self) -> &str {
            "scripted"
        }
        async fn connect(&mut self) -> Result<(), ConnectorError> {
            Ok(())
        }
        async fn disconnect(&mut self) {}
        async fn test_connection(&self) -> ConnectionTestResult {
            ConnectionTestResult::ok("ok", 1.0)
        }
        async fn discover_schema(&mut self) -> Result<SchemaDiscoveryResult, ConnectorError> {
            Ok(SchemaDiscoveryResult::default())
        }
        async fn extract(
            &mut self,
            _mode: SyncMode,
            _watermark: Option<String>,
        ) -> Result<ExtractStream, ConnectorError> {
            let (sender, stream): (BatchSender, ExtractStream) = ExtractStream::channel();
            let batches = self.batches.clone();
            let fail_after = self.fail_after;
            tokio::spawn(async move {
                for (i, batch) in batches.into_iter().enumerate() {
                    if Some(i) == fail_after {
                        sender
                            .fail(ConnectorError::Extraction("cursor lost".into()))
                            .await;
                        return;
                    }
                    sender.send(batch).await;
                }
            });
            Ok(stream)
        }
        async fn current_watermark(&mut self) -> Result<Option<String>, ConnectorError> {
            Ok(None)
        }
    }

    fn record(id: u64, modified: &str) -> Record {
        let mut r = Record::new();
        r.insert("claim_id".into(), json!(format!("C-{id}")));
        r.insert("modified_at".into(), json!(modified));
        r
    }

    #[tokio::test]
    async fn numbers_batches_and_picks_watermarks() {
        let connector = ScriptedConnector {
            connector_id: ConnectorId::new("c1"),
            batches: vec![
                vec![record(1, "2024-01-01"), record(2, "2024-01-02")],
                vec![record(3, "2024-01-03")],
            ],
            fail_after: None,
        };
        let mut stage = ExtractStage::new(Box::new(connector), Some("modified_at".into()));
        let mut feed = stage.begin(SyncMode::Full, None).await.unwrap();

        let first = feed.next().await.unwrap().unwrap();
        assert_eq!(first.batch_number, 1);
        assert_eq!(first.in_batch, 2);
        assert_eq!(first.watermark_value.as_deref(), Some("2024-01-02"));

        let second = feed.next().await.unwrap().unwrap();
        assert_eq!(second.batch_number, 2);
        assert_eq!(second.watermark_value.as_deref(), Some("2024-01-03"));
        assert_eq!(second.metadata["total_extracted"], json!(3));

        assert!(feed.next().await.is_none());
    }

    #[tokio::test]
    async fn missing_watermark_column_yields_none() {
        let connector = ScriptedConnector {
            connector_id: ConnectorId::new("c1"),
            batches: vec![vec![record(1, "2024-01-01")]],
            fail_after: None,
        };
        let mut stage = ExtractStage::new(Box::new(connector), None);
        let mut feed = stage.begin(SyncMode::Full, None).await.unwrap();
        let batch = feed.next().await.unwrap().unwrap();
        assert_eq!(batch.watermark_value, None);
    }

    #[tokio::test]
    async fn mid_stream_failure_surfaces() {
        let connector = ScriptedConnector {
            connector_id: ConnectorId::new("c1"),
            batches: vec![vec![record(1, "2024-01-01")], vec![record(2, "2024-01-02")]],
            fail_after: Some(1),
        };
        let mut stage = ExtractStage::new(Box::new(connector), None);
        let mut feed = stage.begin(SyncMode::Full, None).await.unwrap();

        assert!(feed.next().await.unwrap().is_ok());
        let failure = feed.next().await.unwrap();
        assert!(matches!(failure, Err(ConnectorError::Extraction(_))));
    }
}
