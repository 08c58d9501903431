use std::{
    collections::BTreeMap,
    io::Read,
    path::{Path, PathBuf},
};

use line_ingest::{IngestConfig, LineIngestor, LineRecord, LineRecordError};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{
    error::ProcessorError,
    message::{self, MessageCodec, MessageType, ProtocolMessage},
    metrics::ExportedMetric,
    sink::StreamBuffer,
};

/// How many skipped lines keep their details in [`RunOutput::skipped`]; the count is exact.
pub const MAX_SKIPPED_DETAILS: usize = 100;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcessorState {
    Idle,
    Running,
    Draining,
    Done,
    Aborted,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProcessorOptions {
    /// Seed for the running state, usually the state persisted by the previous run.
    pub initial_state: Map<String, Value>,
    /// When set, every stream buffer also spills to `<dir>/<stream>.jsonl`.
    pub record_dir: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SkippedLine {
    pub line_number: usize,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StreamSchema {
    pub schema: Value,
    pub key_properties: Vec<String>,
    pub bookmark_properties: Vec<String>,
}

/// Everything one run produced, handed out once when the processor finishes.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RunOutput {
    pub counts: BTreeMap<MessageType, u64>,
    pub schemas: BTreeMap<String, Value>,
    pub key_properties: BTreeMap<String, Vec<String>>,
    pub streams: BTreeMap<String, Vec<Value>>,
    pub state: Map<String, Value>,
    pub metrics: Vec<ExportedMetric>,
    pub skipped_lines: usize,
    pub skipped: Vec<SkippedLine>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub record_files: BTreeMap<String, PathBuf>,
}

impl RunOutput {
    pub fn count(&self, message_type: MessageType) -> u64 {
        self.counts.get(&message_type).copied().unwrap_or(0)
    }

    pub fn total_messages(&self) -> u64 {
        self.counts.values().sum()
    }
}

/// Shallow merge: keys in `update` overwrite, keys only in `target` survive.
pub fn merge_state(target: &mut Map<String, Value>, update: Map<String, Value>) {
    for (key, value) in update {
        target.insert(key, value);
    }
}

/// Routes decoded tap stdout messages for a single run.
///
/// Messages must be fed in the order the tap wrote them: schema replacement and state merge are
/// both order dependent. A processor is created per run and consumed by [`finish`] or
/// [`abort`], so nothing leaks from one run into the next.
///
/// [`finish`]: StreamProcessor::finish
/// [`abort`]: StreamProcessor::abort
#[derive(Debug)]
pub struct StreamProcessor {
    state: ProcessorState,
    counts: BTreeMap<MessageType, u64>,
    schemas: BTreeMap<String, StreamSchema>,
    buffers: BTreeMap<String, StreamBuffer>,
    running_state: Map<String, Value>,
    record_dir: Option<PathBuf>,
    skipped_lines: usize,
    skipped: Vec<SkippedLine>,
}

impl Default for StreamProcessor {
    fn default() -> Self {
        Self::new(ProcessorOptions::default())
    }
}

impl StreamProcessor {
    pub fn new(options: ProcessorOptions) -> Self {
        Self {
            state: ProcessorState::Idle,
            counts: BTreeMap::new(),
            schemas: BTreeMap::new(),
            buffers: BTreeMap::new(),
            running_state: options.initial_state,
            record_dir: options.record_dir,
            skipped_lines: 0,
            skipped: Vec::new(),
        }
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    pub fn counts(&self) -> &BTreeMap<MessageType, u64> {
        &self.counts
    }

    pub fn running_state(&self) -> &Map<String, Value> {
        &self.running_state
    }

    pub fn schema(&self, stream: &str) -> Option<&StreamSchema> {
        self.schemas.get(stream)
    }

    pub fn buffered_records(&self, stream: &str) -> usize {
        self.buffers.get(stream).map_or(0, StreamBuffer::len)
    }

    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines
    }

    /// Decodes and routes one raw stdout line.
    pub fn process_line(&mut self, line_number: usize, line: &str) -> Result<(), ProcessorError> {
        self.ensure_accepting()?;
        self.begin();
        match message::decode(line) {
            Ok(message) => self.dispatch(message),
            Err(err) => {
                self.skip(line_number, err.to_string());
                Ok(())
            }
        }
    }

    /// Routes one ingested line. Only a read failure is fatal; every other per-line failure is
    /// counted as a skipped line and processing continues.
    pub fn handle(&mut self, record: LineRecord<ProtocolMessage>) -> Result<(), ProcessorError> {
        self.ensure_accepting()?;
        self.begin();
        match record.outcome {
            Ok(message) => self.dispatch(message),
            Err(LineRecordError::Io(source)) => Err(ProcessorError::Read(source)),
            Err(err) => {
                self.skip(record.line_number, err.to_string());
                Ok(())
            }
        }
    }

    pub fn dispatch(&mut self, message: ProtocolMessage) -> Result<(), ProcessorError> {
        self.ensure_accepting()?;
        self.begin();
        *self.counts.entry(message.message_type()).or_insert(0) += 1;

        match message {
            ProtocolMessage::Schema(schema) => {
                self.schemas.insert(
                    schema.stream,
                    StreamSchema {
                        schema: schema.schema,
                        key_properties: schema.key_properties,
                        bookmark_properties: schema.bookmark_properties,
                    },
                );
            }
            ProtocolMessage::Record(record) => {
                if !self.buffers.contains_key(&record.stream) {
                    let buffer = open_buffer(self.record_dir.as_deref(), &record.stream)?;
                    debug!(stream = %record.stream, "opened stream buffer");
                    self.buffers.insert(record.stream.clone(), buffer);
                }
                if let Some(buffer) = self.buffers.get_mut(&record.stream) {
                    buffer
                        .append(record.record)
                        .map_err(|source| ProcessorError::Sink {
                            stream: record.stream,
                            source,
                        })?;
                }
            }
            ProtocolMessage::State(state) => merge_state(&mut self.running_state, state.value),
            ProtocolMessage::ActivateVersion(activate) => {
                debug!(
                    stream = %activate.stream,
                    version = activate.version,
                    "tap activated stream version"
                );
            }
        }
        Ok(())
    }

    /// Drains every buffer and returns the run's output.
    ///
    /// If a buffer fails to close, the remaining buffers are discarded and the error returned.
    pub fn finish(mut self) -> Result<RunOutput, ProcessorError> {
        self.ensure_accepting()?;
        self.state = ProcessorState::Draining;
        debug!(streams = self.buffers.len(), "draining stream buffers");

        let mut streams = BTreeMap::new();
        let mut record_files = BTreeMap::new();
        let mut buffers = std::mem::take(&mut self.buffers).into_iter();
        while let Some((stream, buffer)) = buffers.next() {
            match buffer.close() {
                Ok((records, path)) => {
                    if let Some(path) = path {
                        record_files.insert(stream.clone(), path);
                    }
                    streams.insert(stream, records);
                }
                Err(source) => {
                    for (_, rest) in buffers.by_ref() {
                        rest.discard();
                    }
                    self.state = ProcessorState::Aborted;
                    return Err(ProcessorError::Sink { stream, source });
                }
            }
        }

        self.state = ProcessorState::Done;
        let schemas = std::mem::take(&mut self.schemas);
        let output = RunOutput {
            counts: std::mem::take(&mut self.counts),
            key_properties: schemas
                .iter()
                .map(|(stream, schema)| (stream.clone(), schema.key_properties.clone()))
                .collect(),
            schemas: schemas
                .into_iter()
                .map(|(stream, schema)| (stream, schema.schema))
                .collect(),
            streams,
            state: std::mem::take(&mut self.running_state),
            metrics: Vec::new(),
            skipped_lines: self.skipped_lines,
            skipped: std::mem::take(&mut self.skipped),
            record_files,
        };
        debug!(
            messages = output.total_messages(),
            skipped = output.skipped_lines,
            "stream processor done"
        );
        Ok(output)
    }

    /// Discards every buffer without persisting anything.
    pub fn abort(mut self) {
        let buffers = std::mem::take(&mut self.buffers);
        debug!(streams = buffers.len(), "aborting stream processor");
        for buffer in buffers.into_values() {
            buffer.discard();
        }
        self.state = ProcessorState::Aborted;
    }

    fn begin(&mut self) {
        if self.state == ProcessorState::Idle {
            debug!("stream processor running");
            self.state = ProcessorState::Running;
        }
    }

    fn ensure_accepting(&self) -> Result<(), ProcessorError> {
        match self.state {
            ProcessorState::Idle | ProcessorState::Running => Ok(()),
            _ => Err(ProcessorError::Finished),
        }
    }

    fn skip(&mut self, line_number: usize, reason: String) {
        warn!(line_number, %reason, "skipping undecodable tap output line");
        self.skipped_lines += 1;
        if self.skipped.len() < MAX_SKIPPED_DETAILS {
            self.skipped.push(SkippedLine {
                line_number,
                reason,
            });
        }
    }
}

fn open_buffer(record_dir: Option<&Path>, stream: &str) -> Result<StreamBuffer, ProcessorError> {
    match record_dir {
        Some(dir) => StreamBuffer::with_spill(dir, stream).map_err(|source| ProcessorError::Sink {
            stream: stream.to_string(),
            source,
        }),
        None => Ok(StreamBuffer::in_memory()),
    }
}

/// Runs a complete, already captured stdout stream through a fresh processor.
pub fn process_reader<R: Read>(
    reader: R,
    options: ProcessorOptions,
    config: IngestConfig,
) -> Result<RunOutput, ProcessorError> {
    let mut processor = StreamProcessor::new(options);
    for record in LineIngestor::new(reader, MessageCodec, config, "singer") {
        if let Err(err) = processor.handle(record) {
            processor.abort();
            return Err(err);
        }
    }
    processor.finish()
}
