//! File and object storage connectors.
//!
//! One connector drives four transports (S3, Azure Blob, SFTP, local
//! filesystem) through an OpenDAL `Operator`. The flow per run: list
//! objects under a prefix, glob-filter by pattern, for incremental mode
//! keep only files modified past the watermark, download each into a
//! scoped temporary directory, hand it to the configured
//! [`RecordParser`], and optionally move processed files to an archive
//! location. The watermark is the ISO-8601 modification time of the
//! newest file seen.
//!
//! Format parsers are a seam: CSV and JSON are built in, EDI 837 and
//! other clearinghouse formats plug in through
//! [`FileConnector::with_parser`].

#![deny(missing_docs)]

pub mod connector;
pub mod parser;

pub use connector::FileConnector;
pub use parser::{parser_for, CsvParser, JsonParser, RecordParser};
