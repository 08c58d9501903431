#![forbid(unsafe_code)]
//! Processing of Singer tap output.
//!
//! A Singer tap writes newline-delimited JSON protocol messages (`SCHEMA`, `RECORD`, `STATE`,
//! `ACTIVATE_VERSION`) to stdout and logs, including metric reports, to stderr. This crate:
//! - decodes and encodes protocol messages ([`decode`], [`encode`], [`MessageCodec`]);
//! - classifies stderr lines into structured logs, metrics and raw text ([`classify`]);
//! - normalises metric events under a namespace ([`MetricAggregator`]);
//! - routes messages per stream, merging state in order ([`StreamProcessor`]);
//! - applies ordered selection overrides to a discovered catalog ([`CatalogSelector`]);
//! - drives both output streams concurrently with backpressure, cancellation and a timeout
//!   ([`TapRun`]).
//!
//! ```no_run
//! use singer_tap::{RunConfig, TapRun};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let stdout = tokio::fs::File::open("tap.stdout.jsonl").await?;
//! let stderr = tokio::fs::File::open("tap.stderr.log").await?;
//! let output = TapRun::new(RunConfig::builder().record_dir("records").build())
//!     .run(stdout, stderr)
//!     .await?;
//! println!("{} messages", output.total_messages());
//! # Ok(())
//! # }
//! ```

mod catalog;
mod config;
mod error;
mod log_line;
mod message;
mod metrics;
mod processor;
mod run;
mod sink;

pub use catalog::{
    apply_overrides, dotted_breadcrumb, Catalog, CatalogSelector, DiscoverMetadataPayload,
    DiscoverStream, Metadata, SelectionOverride,
};
pub use config::{RunConfig, RunConfigBuilder, DEFAULT_CHANNEL_CAPACITY};
pub use error::{
    CancelReason, CatalogError, DecodeError, EncodeError, OutputChannel, ProcessorError, RunError,
};
pub use log_line::{
    classify, emit, emit_structured, LogEvent, LogLevel, LogLineClassifier, MetricDecodeError,
    MetricEvent, MetricKind, StructuredLog, METRIC_SENTINEL,
};
pub use message::{
    decode, encode, ActivateVersionMessage, MessageCodec, MessageType, ProtocolMessage,
    RecordMessage, SchemaMessage, StateMessage,
};
pub use metrics::{
    normalize_metric_name, normalize_tags, seconds_to_nanos, ExportedMetric, MetricAggregator,
    MetricValue, DEFAULT_NAMESPACE,
};
pub use processor::{
    merge_state, process_reader, ProcessorOptions, ProcessorState, RunOutput, SkippedLine,
    StreamProcessor, StreamSchema, MAX_SKIPPED_DETAILS,
};
pub use run::TapRun;

pub use line_ingest::{ErrorDetail, ErrorDetailSink, IngestConfig, IngestLimits};
