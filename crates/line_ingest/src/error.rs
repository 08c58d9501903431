use thiserror::Error;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum LineErrorCode {
    JsonParse,
    Discriminator,
    TypedParse,
}

#[derive(Debug, Error)]
pub enum LineRecordError {
    #[error("I/O error while reading process output: {0}")]
    Io(#[source] std::io::Error),
    #[error("invalid UTF-8 in process output")]
    InvalidUtf8,
    #[error("line too long (observed_bytes={observed_bytes}, max_line_bytes={max_line_bytes})")]
    LineTooLong {
        observed_bytes: usize,
        max_line_bytes: usize,
    },
    #[error("parse failure ({code:?}): {summary}")]
    Parse { code: LineErrorCode, summary: String },
}

impl LineRecordError {
    /// Whether the underlying source is unusable after this error.
    ///
    /// Everything except I/O failures is local to one line.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

#[derive(Debug)]
pub struct LineRecord<T> {
    /// 1-based line number in the underlying source.
    pub line_number: usize,
    pub outcome: Result<T, LineRecordError>,
}

#[derive(Debug, Clone)]
pub struct ErrorDetail {
    pub line_number: usize,
    pub code: LineErrorCode,
    pub parser: &'static str,
    pub details: String,
}

pub trait ErrorDetailSink: Send + 'static {
    fn on_error(&mut self, detail: ErrorDetail);
}
