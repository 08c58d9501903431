use std::error::Error;

use crate::error::LineErrorCode;

/// Turns one logical line (trailing `\r` already stripped, never blank) into an event.
pub trait LineParser {
    type Event;
    type Error: ClassifiedParserError;

    /// `Ok(None)` means the line carries nothing for the consumer and is skipped silently.
    fn parse_line(&mut self, line: &str) -> Result<Option<Self::Event>, Self::Error>;
}

pub trait ClassifiedParserError: Error {
    fn code(&self) -> LineErrorCode;
    /// Summary that is safe to log; must not echo payload content.
    fn redacted_summary(&self) -> String;
    fn full_details(&self) -> String;
}

impl ClassifiedParserError for std::convert::Infallible {
    fn code(&self) -> LineErrorCode {
        match *self {}
    }

    fn redacted_summary(&self) -> String {
        match *self {}
    }

    fn full_details(&self) -> String {
        match *self {}
    }
}
