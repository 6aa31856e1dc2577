//! Transform stage: canonical mapping and per-record error accounting.

use intake_core::{Batch, Record, StageError};
use intake_mapper::FieldMapper;
use std::sync::Arc;

/// Outcome of transforming one batch.
#[derive(Debug)]
pub struct TransformationResult {
    /// Successfully transformed records.
    pub records: Batch,
    /// Count of successes.
    pub transformed_count: usize,
    /// Count of per-record failures.
    pub failed_count: usize,
    /// One entry per failure: `{record_index, error}`.
    pub errors: Vec<serde_json::Value>,
}

/// Transform stage.
///
/// With a mapper attached, records are normalized to the canonical claim
/// shape; without one they pass through unchanged (value-level
/// normalization — datetimes to ISO strings, decimals to floats, bytes to
/// text or hex — already happened at transport decode). Strict mode
/// additionally fails records that lack the canonical required fields.
pub struct TransformStage {
    mapper: Option<Arc<FieldMapper>>,
    strict: bool,
}

impl TransformStage {
    /// A pass-through stage.
    pub fn passthrough() -> Self {
        Self {
            mapper: None,
            strict: false,
        }
    }

    /// A stage that maps records through the given mapper.
    pub fn with_mapper(mapper: Arc<FieldMapper>) -> Self {
        Self {
            mapper: Some(mapper),
            strict: false,
        }
    }

    /// Fail records missing canonical required fields.
    #[must_use]
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Transform one batch. Failures are counted, never thrown.
    pub async fn transform(&self, records: Batch) -> TransformationResult {
        let mut transformed = Batch::with_capacity(records.len());
        let mut errors = Vec::new();

        for (index, record) in records.into_iter().enumerate() {
            match self.transform_record(record).await {
                Ok(record) => transformed.push(record),
                Err(e) => {
                    tracing::debug!(index, error = %e, "transform error");
                    errors.push(serde_json::json!({
                        "record_index": index,
                        "error": e.to_string(),
                    }));
                }
            }
        }

        TransformationResult {
            transformed_count: transformed.len(),
            failed_count: errors.len(),
            records: transformed,
            errors,
        }
    }

    async fn transform_record(&self, record: Record) -> Result<Record, StageError> {
        let output = match &self.mapper {
            Some(mapper) => mapper.transform(&record).await,
            None => record,
        };
        if self.strict {
            validate_required(&output)?;
        }
        Ok(output)
    }
}

/// Check canonical required fields, honoring the grouped member/provider
/// sub-structures.
fn validate_required(record: &Record) -> Result<(), StageError> {
    let mut missing = Vec::new();
    for field in intake_schema::required_fields() {
        let present_top = record.get(*field).map(|v| !v.is_null()).unwrap_or(false);
        let present_nested = match *field {
            "person_id" => record
                .get("member")
                .and_then(|m| m.get("person_id"))
                .map(|v| !v.is_null())
                .unwrap_or(false),
            "npi" => record
                .get("provider")
                .and_then(|p| p.get("npi"))
                .map(|v| !v.is_null())
                .unwrap_or(false),
            "procedure_source_value" => record
                .get("items")
                .and_then(|i| i.as_array())
                .map(|items| {
                    items
                        .iter()
                        .any(|item| !item["procedure_source_value"].is_null())
                })
                .unwrap_or(false),
            _ => false,
        };
        if !present_top && !present_nested {
            missing.push(*field);
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(StageError::Validation(format!(
            "missing required fields: {}",
            missing.join(", ")
        )))
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

    #[tokio::test]
    async fn passthrough_leaves_records_alone() {
        let stage = TransformStage::passthrough();
        let batch = vec![record(json!({"anything": 1, "nested": {"x": true}}))];
        let result = stage.transform(batch.clone()).await;
        assert_eq!(result.transformed_count, 1);
        assert_eq!(result.failed_count, 0);
        assert_eq!(result.records, batch);
    }

    #[tokio::test]
    async fn mapper_normalizes_batch() {
        let stage = TransformStage::with_mapper(Arc::new(FieldMapper::new()));
        let batch = vec![record(json!({
            "MemberID": "M-1",
            "ServiceDate": "2024-03-01",
            "claim_id": "C-1"
        }))];
        let result = stage.transform(batch).await;
        assert_eq!(result.transformed_count, 1);
        assert_eq!(result.records[0]["person_id"], json!("M-1"));
        assert_eq!(result.records[0]["visit_start_date"], json!("2024-03-01"));
    }

    #[tokio::test]
    async fn strict_mode_counts_incomplete_records() {
        let stage = TransformStage::with_mapper(Arc::new(FieldMapper::new())).strict();
        let batch = vec![
            record(json!({
                "claim_id": "C-1",
                "MemberID": "M-1",
                "ServiceDate": "2024-03-01",
                "ProviderNPI": "1234567893",
                "items": [{"cpt_code": "99213", "qty": 1}]
            })),
            record(json!({"unrelated": true})),
        ];
        let result = stage.transform(batch).await;
        assert_eq!(result.transformed_count, 1);
        assert_eq!(result.failed_count, 1);
        assert_eq!(result.errors[0]["record_index"], json!(1));
        assert!(result.errors[0]["error"]
            .as_str()
            .unwrap()
            .contains("missing required fields"));
    }
}
