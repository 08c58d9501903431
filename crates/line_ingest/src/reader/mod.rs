mod sync;

#[cfg(feature = "tokio")]
mod tokio;

pub use sync::SyncBoundedLineReader;

#[cfg(feature = "tokio")]
pub use self::tokio::AsyncBoundedLineReader;

pub(crate) const CHUNK_SIZE_BYTES: usize = 8192;

#[derive(Debug)]
pub enum BoundedLine {
    Line {
        line_number: usize,
        bytes: Vec<u8>,
    },
    LineTooLong {
        line_number: usize,
        observed_bytes: usize,
        max_line_bytes: usize,
    },
    IoError {
        line_number: usize,
        source: std::io::Error,
    },
}

/// Splits a chunked byte stream into lines while holding at most `max_line_bytes` of any line.
///
/// Bytes past the limit are counted but not kept; the line is reported as too long once its
/// terminating newline (or EOF) is seen.
#[derive(Debug)]
pub(crate) struct LineAssembler {
    max_line_bytes: usize,
    current_line: Vec<u8>,
    observed_bytes: usize,
    discarding: bool,
    line_number: usize,
}

impl LineAssembler {
    pub(crate) fn new(max_line_bytes: usize) -> Self {
        Self {
            max_line_bytes,
            current_line: Vec::new(),
            observed_bytes: 0,
            discarding: false,
            line_number: 0,
        }
    }

    /// Consumes `chunk` up to and including the first newline.
    ///
    /// Returns how many bytes were consumed and the completed line, if any.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> (usize, Option<BoundedLine>) {
        match chunk.iter().position(|b| *b == b'\n') {
            None => {
                self.observe(chunk);
                (chunk.len(), None)
            }
            Some(newline_idx) => {
                self.observe(&chunk[..newline_idx]);
                (newline_idx + 1, Some(self.finish_line()))
            }
        }
    }

    pub(crate) fn finish_eof(&mut self) -> Option<BoundedLine> {
        if self.discarding || !self.current_line.is_empty() {
            Some(self.finish_line())
        } else {
            None
        }
    }

    pub(crate) fn io_error(&mut self, source: std::io::Error) -> BoundedLine {
        self.line_number += 1;
        BoundedLine::IoError {
            line_number: self.line_number,
            source,
        }
    }

    fn observe(&mut self, bytes: &[u8]) {
        self.observed_bytes = self.observed_bytes.saturating_add(bytes.len());
        if self.observed_bytes > self.max_line_bytes && !self.discarding {
            self.discarding = true;
            self.current_line = Vec::new();
        }
        if !self.discarding {
            self.current_line.extend_from_slice(bytes);
        }
    }

    fn finish_line(&mut self) -> BoundedLine {
        self.line_number += 1;
        let line_number = self.line_number;
        let observed_bytes = std::mem::take(&mut self.observed_bytes);

        if std::mem::take(&mut self.discarding) {
            return BoundedLine::LineTooLong {
                line_number,
                observed_bytes,
                max_line_bytes: self.max_line_bytes,
            };
        }

        BoundedLine::Line {
            line_number,
            bytes: std::mem::take(&mut self.current_line),
        }
    }
}
