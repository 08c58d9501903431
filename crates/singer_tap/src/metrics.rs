use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Number, Value};

use crate::log_line::{MetricEvent, MetricKind};

pub const DEFAULT_NAMESPACE: &str = "singer";

const NANOS_PER_SECOND: f64 = 1_000_000_000.0;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MetricValue {
    Counter { value: Number },
    Timer { nanos: i64 },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExportedMetric {
    pub name: String,
    pub tags: BTreeMap<String, String>,
    #[serde(flatten)]
    pub value: MetricValue,
}

/// Turns raw tap metric events into namespaced counters and timers.
#[derive(Clone, Debug)]
pub struct MetricAggregator {
    namespace: String,
}

impl Default for MetricAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl MetricAggregator {
    /// An empty namespace exports bare normalised names.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn ingest<I>(&self, events: I) -> Vec<ExportedMetric>
    where
        I: IntoIterator<Item = MetricEvent>,
    {
        events.into_iter().map(|event| self.export(&event)).collect()
    }

    pub fn export(&self, event: &MetricEvent) -> ExportedMetric {
        let normalized = normalize_metric_name(&event.name);
        let name = if self.namespace.is_empty() {
            normalized
        } else {
            format!("{}.{normalized}", self.namespace)
        };
        let value = match event.kind {
            MetricKind::Counter => MetricValue::Counter {
                value: event.value.clone(),
            },
            MetricKind::Timer => MetricValue::Timer {
                nanos: seconds_to_nanos(event.value.as_f64().unwrap_or_default()),
            },
        };
        ExportedMetric {
            name,
            tags: normalize_tags(&event.tags),
            value,
        }
    }
}

/// `record_count` and `record-count` both become `record.count`.
pub fn normalize_metric_name(name: &str) -> String {
    name.replace(&['_', '-'][..], ".")
}

/// Keeps string-valued tags only, lowercasing keys and values.
pub fn normalize_tags(tags: &Map<String, Value>) -> BTreeMap<String, String> {
    tags.iter()
        .filter_map(|(key, value)| {
            value
                .as_str()
                .map(|value| (key.to_lowercase(), value.to_lowercase()))
        })
        .collect()
}

/// One multiplication, then truncation toward zero; downstream keys off the exact integer.
pub fn seconds_to_nanos(seconds: f64) -> i64 {
    (seconds * NANOS_PER_SECOND) as i64
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn event(kind: MetricKind, name: &str, value: Value, tags: Value) -> MetricEvent {
        let Value::Object(tags) = tags else {
            panic!("tags must be an object");
        };
        let Value::Number(value) = value else {
            panic!("value must be a number");
        };
        MetricEvent {
            kind,
            name: name.to_string(),
            value,
            tags,
        }
    }

    #[test]
    fn counter_keeps_raw_value_and_normalises_name_and_tags() {
        let aggregator = MetricAggregator::default();
        let exported = aggregator.export(&event(
            MetricKind::Counter,
            "record_count",
            json!(5),
            json!({"stream": "Category", "Endpoint": "Users", "page": 3, "flag": null}),
        ));

        assert_eq!(exported.name, "singer.record.count");
        assert_eq!(
            exported.value,
            MetricValue::Counter {
                value: Number::from(5)
            }
        );
        assert_eq!(serde_json::to_value(&exported).unwrap()["value"], json!(5));
        assert_eq!(
            exported.tags,
            BTreeMap::from([
                ("endpoint".to_string(), "users".to_string()),
                ("stream".to_string(), "category".to_string()),
            ])
        );
    }

    #[test]
    fn timer_converts_seconds_by_truncation() {
        let aggregator = MetricAggregator::new("tap");
        let exported = aggregator.export(&event(
            MetricKind::Timer,
            "http-request_duration",
            json!(0.123456789),
            json!({}),
        ));

        assert_eq!(exported.name, "tap.http.request.duration");
        assert_eq!(
            exported.value,
            MetricValue::Timer {
                nanos: (0.123456789_f64 * 1e9) as i64
            }
        );
        assert_eq!(seconds_to_nanos(1.5), 1_500_000_000);
        assert_eq!(seconds_to_nanos(-0.0000000019), -1);
    }

    #[test]
    fn empty_namespace_exports_bare_names() {
        let aggregator = MetricAggregator::new("");
        let exported = aggregator.ingest([event(MetricKind::Counter, "a_b", json!(1), json!({}))]);
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].name, "a.b");
    }
}
