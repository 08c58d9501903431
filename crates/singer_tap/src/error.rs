use std::{fmt, time::Duration};

use line_ingest::{ClassifiedParserError, LineErrorCode};
use thiserror::Error;

use crate::message::MessageType;

/// Why a single stdout line could not be turned into a [`crate::ProtocolMessage`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("line is not a JSON object: {source}")]
    MalformedJson {
        #[source]
        source: serde_json::Error,
    },
    #[error("message `type` is missing or not one of SCHEMA, RECORD, STATE, ACTIVATE_VERSION (found {found:?})")]
    UnknownType { found: Option<String> },
    #[error("invalid {message_type} message: {source}")]
    InvalidMessage {
        message_type: MessageType,
        #[source]
        source: serde_json::Error,
    },
    #[error("{message_type} message has an empty `stream`")]
    MissingStream { message_type: MessageType },
}

impl ClassifiedParserError for DecodeError {
    fn code(&self) -> LineErrorCode {
        match self {
            DecodeError::MalformedJson { .. } => LineErrorCode::JsonParse,
            DecodeError::UnknownType { .. } => LineErrorCode::Discriminator,
            DecodeError::InvalidMessage { .. } | DecodeError::MissingStream { .. } => {
                LineErrorCode::TypedParse
            }
        }
    }

    // serde_json data errors can quote field values, so summaries only carry positions and
    // message types.
    fn redacted_summary(&self) -> String {
        match self {
            DecodeError::MalformedJson { source } => {
                format!("malformed JSON at column {}", source.column())
            }
            DecodeError::UnknownType { .. } => "missing or unknown message type".to_string(),
            DecodeError::InvalidMessage { message_type, .. } => {
                format!("invalid {message_type} message")
            }
            DecodeError::MissingStream { message_type } => {
                format!("{message_type} message has an empty `stream`")
            }
        }
    }

    fn full_details(&self) -> String {
        self.to_string()
    }
}

#[derive(Debug, Error)]
#[error("failed to encode {message_type} message: {source}")]
pub struct EncodeError {
    pub message_type: MessageType,
    #[source]
    pub source: serde_json::Error,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("property pattern `{pattern}` is not a valid regular expression: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("failed to parse catalog JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Fatal failures inside the stdout pipeline.
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("failed reading tap output: {0}")]
    Read(#[source] std::io::Error),
    #[error("failed writing records for stream `{stream}`: {source}")]
    Sink {
        stream: String,
        #[source]
        source: std::io::Error,
    },
    #[error("stream processor already finished")]
    Finished,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OutputChannel {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputChannel::Stdout => f.write_str("stdout"),
            OutputChannel::Stderr => f.write_str("stderr"),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CancelReason {
    Requested,
    Timeout(Duration),
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Requested => f.write_str("cancellation requested"),
            CancelReason::Timeout(timeout) => write!(f, "timed out after {timeout:?}"),
        }
    }
}

/// Errors that abort a whole tap run. Per-line problems never surface here.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed reading tap {channel}: {source}")]
    Io {
        channel: OutputChannel,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Processor(ProcessorError),
    #[error("tap run aborted: {reason}")]
    Cancelled { reason: CancelReason },
    #[error("tap run task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<ProcessorError> for RunError {
    fn from(err: ProcessorError) -> Self {
        match err {
            ProcessorError::Read(source) => RunError::Io {
                channel: OutputChannel::Stdout,
                source,
            },
            other => RunError::Processor(other),
        }
    }
}

impl RunError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, RunError::Cancelled { .. })
    }
}
