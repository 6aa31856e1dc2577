//! The record parser seam and the built-in CSV/JSON parsers.

use async_trait::async_trait;
use intake_core::{ConnectorError, Record};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// Turns one downloaded file into source records.
///
/// Parsers are opaque record producers: the connector does not care how a
/// format decodes, only that records come out. Clearinghouse formats
/// (EDI 837 and friends) are supplied externally through this trait.
#[async_trait]
pub trait RecordParser: Send + Sync {
    /// Format label (`csv`, `json`, `edi_837`, …).
    fn format(&self) -> &str;

    /// Parse a local file into records.
    async fn parse(&self, path: &Path) -> Result<Vec<Record>, ConnectorError>;
}

/// Built-in delimited-text parser.
#[derive(Debug, Clone)]
pub struct CsvParser {
    delimiter: u8,
    has_header: bool,
}

impl CsvParser {
    /// Create a parser with the given delimiter and header behavior.
    pub fn new(delimiter: u8, has_header: bool) -> Self {
        Self {
            delimiter,
            has_header,
        }
    }
}

impl Default for CsvParser {
    fn default() -> Self {
        Self::new(b',', true)
    }
}

/// Interpret a CSV cell: integers and floats become numbers, empty cells
/// become null, everything else stays a string.
fn infer_value(cell: &str) -> Value {
    if cell.is_empty() {
        return Value::Null;
    }
    if let Ok(int) = cell.parse::<i64>() {
        return Value::from(int);
    }
    if let Ok(float) = cell.parse::<f64>() {
        if let Some(number) = serde_json::Number::from_f64(float) {
            return Value::Number(number);
        }
    }
    Value::String(cell.to_string())
}

#[async_trait]
impl RecordParser for CsvParser {
    fn format(&self) -> &str {
        "csv"
    }

    async fn parse(&self, path: &Path) -> Result<Vec<Record>, ConnectorError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(self.has_header)
            .flexible(true)
            .from_path(path)
            .map_err(|e| ConnectorError::Extraction(format!("csv open failed: {e}")))?;

        let headers: Vec<String> = if self.has_header {
            reader
                .headers()
                .map_err(|e| ConnectorError::Extraction(format!("csv header read failed: {e}")))?
                .iter()
                .map(str::to_string)
                .collect()
        } else {
            Vec::new()
        };

        let mut records = Vec::new();
        for row in reader.records() {
            let row =
                row.map_err(|e| ConnectorError::Extraction(format!("csv row failed: {e}")))?;
            let mut record = Record::new();
            for (i, cell) in row.iter().enumerate() {
                let key = headers
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("column_{i}"));
                record.insert(key, infer_value(cell));
            }
            records.push(record);
        }
        Ok(records)
    }
}

/// Built-in JSON parser: a top-level array of objects, a single object,
/// or newline-delimited objects.
#[derive(Debug, Clone, Default)]
pub struct JsonParser;

#[async_trait]
impl RecordParser for JsonParser {
    fn format(&self) -> &str {
        "json"
    }

    async fn parse(&self, path: &Path) -> Result<Vec<Record>, ConnectorError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConnectorError::Extraction(format!("json read failed: {e}")))?;
        let trimmed = contents.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        if trimmed.starts_with('[') || trimmed.starts_with('{') {
            let value: Value = serde_json::from_str(trimmed)
                .map_err(|e| ConnectorError::Extraction(format!("invalid JSON file: {e}")))?;
            return Ok(match value {
                Value::Array(array) => array
                    .into_iter()
                    .filter_map(|v| match v {
                        Value::Object(map) => Some(map),
                        _ => None,
                    })
                    .collect(),
                Value::Object(map) => vec![map],
                _ => Vec::new(),
            });
        }

        // Newline-delimited fallback.
        let mut records = Vec::new();
        for line in trimmed.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(line)
                .map_err(|e| ConnectorError::Extraction(format!("invalid JSON line: {e}")))?;
            if let Value::Object(map) = value {
                records.push(map);
            }
        }
        Ok(records)
    }
}

/// Resolve a built-in parser for a configured file format. Formats with no
/// built-in parser (EDI 837 variants) must be attached externally.
pub fn parser_for(
    format: &str,
    delimiter: u8,
    has_header: bool,
) -> Result<Arc<dyn RecordParser>, ConnectorError> {
    match format {
        "csv" => Ok(Arc::new(CsvParser::new(delimiter, has_header))),
        "json" => Ok(Arc::new(JsonParser)),
        "edi_837" | "edi_837p" | "edi_837i" => Err(ConnectorError::Configuration(format!(
            "file format '{format}' requires an external parser"
        ))),
        other => Err(ConnectorError::Configuration(format!(
            "unknown file format '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn temp_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn csv_with_headers_and_type_inference() {
        let file = temp_file("claim_id,billed_amount,note\nC-1,120.50,first\nC-2,80,\n");
        let records = CsvParser::default().parse(file.path()).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["claim_id"], json!("C-1"));
        assert_eq!(records[0]["billed_amount"], json!(120.5));
        assert_eq!(records[1]["billed_amount"], json!(80));
        assert_eq!(records[1]["note"], Value::Null);
    }

    #[tokio::test]
    async fn csv_without_headers_uses_positional_names() {
        let file = temp_file("C-1|120.50\n");
        let records = CsvParser::new(b'|', false).parse(file.path()).await.unwrap();
        assert_eq!(records[0]["column_0"], json!("C-1"));
        assert_eq!(records[0]["column_1"], json!(120.5));
    }

    #[tokio::test]
    async fn json_array_and_ndjson() {
        let array = temp_file(r#"[{"claim_id": "C-1"}, {"claim_id": "C-2"}]"#);
        let records = JsonParser.parse(array.path()).await.unwrap();
        assert_eq!(records.len(), 2);

        let ndjson = temp_file("{\"claim_id\": \"C-1\"}\n{\"claim_id\": \"C-2\"}\n");
        let records = JsonParser.parse(ndjson.path()).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["claim_id"], json!("C-2"));
    }

    #[tokio::test]
    async fn invalid_json_is_extraction_error() {
        let file = temp_file("[{broken");
        assert!(matches!(
            JsonParser.parse(file.path()).await,
            Err(ConnectorError::Extraction(_))
        ));
    }

    #[test]
    fn builtin_formats_resolve() {
        assert_eq!(parser_for("csv", b',', true).unwrap().format(), "csv");
        assert_eq!(parser_for("json", b',', true).unwrap().format(), "json");
    }

    #[test]
    fn edi_formats_require_external_parser() {
        for format in ["edi_837", "edi_837p", "edi_837i"] {
            assert!(matches!(
                parser_for(format, b',', true),
                Err(ConnectorError::Configuration(_))
            ));
        }
        assert!(parser_for("parquet", b',', true).is_err());
    }
}
