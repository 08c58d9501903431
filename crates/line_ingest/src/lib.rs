#![forbid(unsafe_code)]
//! Line-oriented ingestion primitives for subprocess output.
//!
//! The crate knows nothing about the payload format. It provides:
//! - Bounded line readers (sync + optional tokio) that cap per-line memory.
//! - The [`LineParser`] seam through which a payload codec turns a line into an event.
//! - Ingestors that pair the two and report per-line failures without stopping.

mod config;
mod error;
mod ingest;
mod line_parser;
mod reader;

pub use config::{ErrorDetailCapture, IngestConfig, IngestLimits, DEFAULT_MAX_LINE_BYTES};
pub use error::{ErrorDetail, ErrorDetailSink, LineErrorCode, LineRecord, LineRecordError};
pub use ingest::LineIngestor;
pub use line_parser::{ClassifiedParserError, LineParser};
pub use reader::{BoundedLine, SyncBoundedLineReader};

#[cfg(feature = "tokio")]
pub use ingest::AsyncLineIngestor;

#[cfg(feature = "tokio")]
pub use reader::AsyncBoundedLineReader;
