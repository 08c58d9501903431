use crate::error::ErrorDetailSink;

/// Default per-line cap.
pub const DEFAULT_MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum ErrorDetailCapture {
    /// Only the redacted summary leaves the parser; payload text never does.
    #[default]
    RedactedSummaryOnly,
    FullDetails,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct IngestLimits {
    pub max_line_bytes: usize,
}

impl IngestLimits {
    /// A zero limit would reject every non-empty line; it is raised to one byte.
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            max_line_bytes: max_line_bytes.max(1),
        }
    }
}

impl Default for IngestLimits {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_BYTES)
    }
}

#[derive(Default)]
pub struct IngestConfig {
    pub limits: IngestLimits,
    pub error_detail_capture: ErrorDetailCapture,
    pub error_sink: Option<Box<dyn ErrorDetailSink>>,
}

impl IngestConfig {
    pub fn with_limits(limits: IngestLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    /// Sends full parse-failure details to `sink`, in addition to the redacted per-line summary.
    pub fn with_error_sink(mut self, sink: Box<dyn ErrorDetailSink>) -> Self {
        self.error_detail_capture = ErrorDetailCapture::FullDetails;
        self.error_sink = Some(sink);
        self
    }
}

impl std::fmt::Debug for IngestConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestConfig")
            .field("limits", &self.limits)
            .field("error_detail_capture", &self.error_detail_capture)
            .field("error_sink", &self.error_sink.as_ref().map(|_| "<sink>"))
            .finish()
    }
}
