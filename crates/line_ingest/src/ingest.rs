use std::io::Read;

use crate::config::{ErrorDetailCapture, IngestConfig};
use crate::error::{ErrorDetail, LineRecord, LineRecordError};
use crate::line_parser::{ClassifiedParserError, LineParser};
use crate::reader::{BoundedLine, SyncBoundedLineReader};

/// Parser plus error routing shared by the sync and async ingestors.
struct LineDecoder<P: LineParser> {
    parser: P,
    config: IngestConfig,
    parser_name: &'static str,
}

impl<P: LineParser> LineDecoder<P> {
    fn normalize_line(line: &str) -> &str {
        line.strip_suffix('\r').unwrap_or(line)
    }

    fn line_is_blank(line: &str) -> bool {
        line.chars().all(|ch| ch.is_whitespace())
    }

    fn record_error<T>(line_number: usize, err: LineRecordError) -> Option<LineRecord<T>> {
        Some(LineRecord {
            line_number,
            outcome: Err(err),
        })
    }

    fn parse_error_record(&mut self, line_number: usize, err: P::Error) -> LineRecord<P::Event> {
        let code = err.code();
        if self.config.error_detail_capture == ErrorDetailCapture::FullDetails {
            if let Some(sink) = self.config.error_sink.as_mut() {
                sink.on_error(ErrorDetail {
                    line_number,
                    code,
                    parser: self.parser_name,
                    details: err.full_details(),
                });
            }
        }
        LineRecord {
            line_number,
            outcome: Err(LineRecordError::Parse {
                code,
                summary: err.redacted_summary(),
            }),
        }
    }

    /// `None` means the line produced nothing worth reporting (blank or parser skip).
    fn decode(&mut self, next: BoundedLine) -> Option<LineRecord<P::Event>> {
        match next {
            BoundedLine::IoError {
                line_number,
                source,
            } => Self::record_error(line_number, LineRecordError::Io(source)),
            BoundedLine::LineTooLong {
                line_number,
                observed_bytes,
                max_line_bytes,
            } => Self::record_error(
                line_number,
                LineRecordError::LineTooLong {
                    observed_bytes,
                    max_line_bytes,
                },
            ),
            BoundedLine::Line { line_number, bytes } => {
                let Ok(raw_line) = String::from_utf8(bytes) else {
                    return Self::record_error(line_number, LineRecordError::InvalidUtf8);
                };
                let line = Self::normalize_line(&raw_line);
                if Self::line_is_blank(line) {
                    return None;
                }

                match self.parser.parse_line(line) {
                    Ok(None) => None,
                    Ok(Some(event)) => Some(LineRecord {
                        line_number,
                        outcome: Ok(event),
                    }),
                    Err(err) => Some(self.parse_error_record(line_number, err)),
                }
            }
        }
    }
}

pub struct LineIngestor<R: Read, P: LineParser> {
    reader: SyncBoundedLineReader<R>,
    decoder: LineDecoder<P>,
}

impl<R: Read, P: LineParser> LineIngestor<R, P> {
    pub fn new(reader: R, parser: P, config: IngestConfig, parser_name: &'static str) -> Self {
        Self {
            reader: SyncBoundedLineReader::new(reader, config.limits.max_line_bytes),
            decoder: LineDecoder {
                parser,
                config,
                parser_name,
            },
        }
    }
}

impl<R: Read, P: LineParser> Iterator for LineIngestor<R, P> {
    type Item = LineRecord<P::Event>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let next = self.reader.next()?;
            if let Some(record) = self.decoder.decode(next) {
                return Some(record);
            }
        }
    }
}

#[cfg(feature = "tokio")]
mod tokio_ingest {
    use tokio::io::AsyncRead;

    use super::LineDecoder;
    use crate::config::IngestConfig;
    use crate::error::LineRecord;
    use crate::line_parser::LineParser;
    use crate::reader::AsyncBoundedLineReader;

    pub struct AsyncLineIngestor<R: AsyncRead + Unpin, P: LineParser> {
        reader: AsyncBoundedLineReader<R>,
        decoder: LineDecoder<P>,
    }

    impl<R: AsyncRead + Unpin, P: LineParser> AsyncLineIngestor<R, P> {
        pub fn new(reader: R, parser: P, config: IngestConfig, parser_name: &'static str) -> Self {
            Self {
                reader: AsyncBoundedLineReader::new(reader, config.limits.max_line_bytes),
                decoder: LineDecoder {
                    parser,
                    config,
                    parser_name,
                },
            }
        }

        pub async fn next_record(&mut self) -> Option<LineRecord<P::Event>> {
            loop {
                let next = self.reader.next_line().await?;
                if let Some(record) = self.decoder.decode(next) {
                    return Some(record);
                }
            }
        }
    }

}

#[cfg(feature = "tokio")]
pub use tokio_ingest::AsyncLineIngestor;

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::{ErrorDetailSink, LineErrorCode};

    pub(crate) struct TestParser;

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    pub(crate) struct TestErr;

    impl ClassifiedParserError for TestErr {
        fn code(&self) -> LineErrorCode {
            LineErrorCode::TypedParse
        }

        fn redacted_summary(&self) -> String {
            "boom".to_string()
        }

        fn full_details(&self) -> String {
            "boom details".to_string()
        }
    }

    impl LineParser for TestParser {
        type Event = String;
        type Error = TestErr;

        fn parse_line(&mut self, line: &str) -> Result<Option<Self::Event>, Self::Error> {
            match line {
                "skip" => Ok(None),
                "fail" => Err(TestErr),
                other => Ok(Some(other.to_string())),
            }
        }
    }

    #[derive(Clone, Default)]
    struct CollectingSink(Arc<Mutex<Vec<ErrorDetail>>>);

    impl ErrorDetailSink for CollectingSink {
        fn on_error(&mut self, detail: ErrorDetail) {
            self.0.lock().unwrap().push(detail);
        }
    }

    #[test]
    fn blank_and_skipped_lines_produce_no_records() {
        let data = b"hello\r\n   \nskip\nworld\n";
        let ingestor = LineIngestor::new(
            std::io::Cursor::new(data),
            TestParser,
            IngestConfig::default(),
            "test",
        );

        let records: Vec<_> = ingestor
            .map(|rec| (rec.line_number, rec.outcome.unwrap()))
            .collect();
        assert_eq!(
            records,
            vec![(1, "hello".to_string()), (4, "world".to_string())]
        );
    }

    #[test]
    fn full_details_reach_the_sink_but_records_stay_redacted() {
        let sink = CollectingSink::default();
        let config = IngestConfig::default().with_error_sink(Box::new(sink.clone()));
        assert_eq!(config.error_detail_capture, ErrorDetailCapture::FullDetails);
        let mut ingestor =
            LineIngestor::new(std::io::Cursor::new(b"fail\n"), TestParser, config, "test");

        let rec = ingestor.next().unwrap();
        match rec.outcome {
            Err(LineRecordError::Parse { summary, .. }) => assert_eq!(summary, "boom"),
            other => panic!("expected parse error, got {other:?}"),
        }

        let details = sink.0.lock().unwrap();
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].details, "boom details");
        assert_eq!(details[0].parser, "test");
        assert_eq!(details[0].line_number, 1);
    }

    #[test]
    fn invalid_utf8_is_a_line_error() {
        let mut ingestor = LineIngestor::new(
            std::io::Cursor::new(vec![0xff, 0xfe, b'\n']),
            TestParser,
            IngestConfig::default(),
            "test",
        );
        let rec = ingestor.next().unwrap();
        assert!(matches!(rec.outcome, Err(LineRecordError::InvalidUtf8)));
        assert!(ingestor.next().is_none());
    }
}
