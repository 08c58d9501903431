//! Classification of tap stderr lines.
//!
//! Taps built on the Singer SDKs log JSON objects with `asctime`, `name`, `levelname` and
//! `message` keys, and report metrics by logging a message that starts with [`METRIC_SENTINEL`]
//! followed by a JSON payload. Anything that is not a JSON object is kept as a raw line.

use std::convert::Infallible;

use line_ingest::LineParser;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const METRIC_SENTINEL: &str = "METRIC: {";

/// The payload starts at the sentinel's opening brace.
const METRIC_PAYLOAD_OFFSET: usize = METRIC_SENTINEL.len() - 1;

const TAP_LOG_TARGET: &str = "tap";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Exact, case-sensitive match; anything unrecognised (or absent) is promoted to `Error` so
    /// it stays visible.
    pub fn from_levelname(levelname: Option<&str>) -> Self {
        match levelname {
            Some("DEBUG") => LogLevel::Debug,
            Some("INFO") => LogLevel::Info,
            Some("WARNING") => LogLevel::Warning,
            _ => LogLevel::Error,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StructuredLog {
    pub timestamp: Option<String>,
    pub logger_name: Option<String>,
    pub level: LogLevel,
    pub message: Option<String>,
    pub extras: Map<String, Value>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Timer,
}

/// Metric payload as emitted by the tap, before name/tag normalisation.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct MetricEvent {
    #[serde(rename = "type")]
    pub kind: MetricKind,
    #[serde(rename = "metric")]
    pub name: String,
    /// Kept as written so integer counters stay integers on export.
    pub value: Number,
    #[serde(default)]
    pub tags: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LogEvent {
    StructuredLog(StructuredLog),
    Metric(MetricEvent),
    RawLine { text: String },
}

/// The line carried the metric sentinel but its payload did not decode.
///
/// `fallback` is the same line classified as a plain structured log, so callers can still emit
/// it after reporting the failure.
#[derive(Debug, Error)]
#[error("malformed metric payload: {source}")]
pub struct MetricDecodeError {
    #[source]
    pub source: serde_json::Error,
    pub fallback: StructuredLog,
}

pub fn classify(line: &str) -> Result<LogEvent, MetricDecodeError> {
    let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(line) else {
        return Ok(LogEvent::RawLine {
            text: line.to_string(),
        });
    };

    let metric = fields
        .get("message")
        .and_then(Value::as_str)
        .filter(|message| message.starts_with(METRIC_SENTINEL))
        .map(|message| serde_json::from_str::<MetricEvent>(&message[METRIC_PAYLOAD_OFFSET..]));

    match metric {
        Some(Ok(event)) => Ok(LogEvent::Metric(event)),
        Some(Err(source)) => Err(MetricDecodeError {
            source,
            fallback: structured_log(fields),
        }),
        None => Ok(LogEvent::StructuredLog(structured_log(fields))),
    }
}

fn structured_log(mut fields: Map<String, Value>) -> StructuredLog {
    let level = LogLevel::from_levelname(fields.get("levelname").and_then(Value::as_str));
    fields.remove("levelname");
    StructuredLog {
        timestamp: take_text(&mut fields, "asctime"),
        logger_name: take_text(&mut fields, "name"),
        level,
        message: take_text(&mut fields, "message"),
        extras: fields,
    }
}

fn take_text(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    match fields.remove(key)? {
        Value::String(text) => Some(text),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// [`LineParser`] adapter for tap stderr; classification itself never fails, a bad metric
/// payload is handed to the caller as an `Err` event.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogLineClassifier;

impl LineParser for LogLineClassifier {
    type Event = Result<LogEvent, MetricDecodeError>;
    type Error = Infallible;

    fn parse_line(&mut self, line: &str) -> Result<Option<Self::Event>, Self::Error> {
        Ok(Some(classify(line)))
    }
}

/// Re-emits a tap log event through `tracing` under the `tap` target.
pub fn emit(event: &LogEvent) {
    match event {
        LogEvent::StructuredLog(log) => emit_structured(log),
        LogEvent::Metric(metric) => debug!(
            target: TAP_LOG_TARGET,
            metric = %metric.name,
            kind = ?metric.kind,
            value = %metric.value,
            "tap metric"
        ),
        LogEvent::RawLine { text } => info!(target: TAP_LOG_TARGET, "{text}"),
    }
}

pub fn emit_structured(log: &StructuredLog) {
    let logger = log.logger_name.as_deref().unwrap_or("");
    let timestamp = log.timestamp.as_deref().unwrap_or("");
    let message = log.message.as_deref().unwrap_or("");
    let extras = if log.extras.is_empty() {
        String::new()
    } else {
        Value::Object(log.extras.clone()).to_string()
    };

    match log.level {
        LogLevel::Debug => {
            debug!(target: TAP_LOG_TARGET, logger, timestamp, extras = %extras, "{message}")
        }
        LogLevel::Info => {
            info!(target: TAP_LOG_TARGET, logger, timestamp, extras = %extras, "{message}")
        }
        LogLevel::Warning => {
            warn!(target: TAP_LOG_TARGET, logger, timestamp, extras = %extras, "{message}")
        }
        LogLevel::Error => {
            error!(target: TAP_LOG_TARGET, logger, timestamp, extras = %extras, "{message}")
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn extracts_metric_from_sentinel_message() {
        let line = r#"{"message":"METRIC: {\"type\":\"counter\",\"metric\":\"record_count\",\"value\":5,\"tags\":{\"stream\":\"Category\"}}"}"#;
        match classify(line).unwrap() {
            LogEvent::Metric(metric) => {
                assert_eq!(metric.kind, MetricKind::Counter);
                assert_eq!(metric.name, "record_count");
                assert_eq!(metric.value, Number::from(5));
                assert_eq!(metric.tags.get("stream"), Some(&json!("Category")));
            }
            other => panic!("expected metric, got {other:?}"),
        }
    }

    #[test]
    fn structured_log_splits_well_known_fields_from_extras() {
        let line = r#"{"asctime":"2024-01-01 00:00:00","name":"tap_postgres","levelname":"INFO","message":"syncing","pid":42}"#;
        match classify(line).unwrap() {
            LogEvent::StructuredLog(log) => {
                assert_eq!(log.timestamp.as_deref(), Some("2024-01-01 00:00:00"));
                assert_eq!(log.logger_name.as_deref(), Some("tap_postgres"));
                assert_eq!(log.level, LogLevel::Info);
                assert_eq!(log.message.as_deref(), Some("syncing"));
                assert_eq!(log.extras.len(), 1);
                assert_eq!(log.extras.get("pid"), Some(&json!(42)));
            }
            other => panic!("expected structured log, got {other:?}"),
        }
    }

    #[test]
    fn unknown_or_missing_levels_fail_open_to_error() {
        assert_eq!(LogLevel::from_levelname(Some("WARNING")), LogLevel::Warning);
        assert_eq!(LogLevel::from_levelname(Some("DEBUG")), LogLevel::Debug);
        assert_eq!(LogLevel::from_levelname(Some("info")), LogLevel::Error);
        assert_eq!(LogLevel::from_levelname(Some("CRITICAL")), LogLevel::Error);
        assert_eq!(LogLevel::from_levelname(None), LogLevel::Error);

        match classify(r#"{"message":"no level"}"#).unwrap() {
            LogEvent::StructuredLog(log) => assert_eq!(log.level, LogLevel::Error),
            other => panic!("expected structured log, got {other:?}"),
        }
    }

    #[test]
    fn non_json_and_non_object_lines_are_raw() {
        assert_eq!(
            classify("Traceback (most recent call last):").unwrap(),
            LogEvent::RawLine {
                text: "Traceback (most recent call last):".to_string()
            }
        );
        assert!(matches!(
            classify("42").unwrap(),
            LogEvent::RawLine { .. }
        ));
    }

    #[test]
    fn malformed_metric_payload_falls_back_to_structured_log() {
        let line = r#"{"levelname":"INFO","message":"METRIC: {\"type\":\"gauge\",\"metric\":\"x\",\"value\":1}"}"#;
        let err = classify(line).unwrap_err();
        assert_eq!(err.fallback.level, LogLevel::Info);
        assert!(err
            .fallback
            .message
            .as_deref()
            .is_some_and(|message| message.starts_with(METRIC_SENTINEL)));
    }

    #[test]
    fn sentinel_must_be_a_prefix() {
        let line = r#"{"levelname":"INFO","message":"note: METRIC: {}"}"#;
        assert!(matches!(
            classify(line).unwrap(),
            LogEvent::StructuredLog(_)
        ));
    }
}
