use std::{path::PathBuf, time::Duration};

use line_ingest::{ErrorDetailSink, IngestLimits};
use serde_json::{Map, Value};

use crate::metrics::DEFAULT_NAMESPACE;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Settings for one [`crate::TapRun`].
pub struct RunConfig {
    pub(crate) limits: IngestLimits,
    pub(crate) channel_capacity: usize,
    pub(crate) timeout: Option<Duration>,
    pub(crate) record_dir: Option<PathBuf>,
    pub(crate) metric_namespace: String,
    pub(crate) initial_state: Map<String, Value>,
    pub(crate) error_sink: Option<Box<dyn ErrorDetailSink>>,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfigBuilder::default().build()
    }
}

impl RunConfig {
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder::default()
    }

    pub fn limits(&self) -> IngestLimits {
        self.limits
    }

    pub fn channel_capacity(&self) -> usize {
        self.channel_capacity
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn record_dir(&self) -> Option<&PathBuf> {
        self.record_dir.as_ref()
    }

    pub fn metric_namespace(&self) -> &str {
        &self.metric_namespace
    }
}

impl std::fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunConfig")
            .field("limits", &self.limits)
            .field("channel_capacity", &self.channel_capacity)
            .field("timeout", &self.timeout)
            .field("record_dir", &self.record_dir)
            .field("metric_namespace", &self.metric_namespace)
            .field("initial_state_keys", &self.initial_state.len())
            .field("error_sink", &self.error_sink.as_ref().map(|_| "<sink>"))
            .finish()
    }
}

pub struct RunConfigBuilder {
    limits: IngestLimits,
    channel_capacity: usize,
    timeout: Option<Duration>,
    record_dir: Option<PathBuf>,
    metric_namespace: String,
    initial_state: Map<String, Value>,
    error_sink: Option<Box<dyn ErrorDetailSink>>,
}

impl Default for RunConfigBuilder {
    fn default() -> Self {
        Self {
            limits: IngestLimits::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            timeout: None,
            record_dir: None,
            metric_namespace: DEFAULT_NAMESPACE.to_string(),
            initial_state: Map::new(),
            error_sink: None,
        }
    }
}

impl RunConfigBuilder {
    /// Longest stdout/stderr line kept in memory; longer lines are skipped and counted.
    pub fn max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.limits = IngestLimits::new(max_line_bytes);
        self
    }

    /// Decoded stdout messages buffered between the reader and the processor. When full, the
    /// reader stops pulling from the pipe until the processor catches up. Clamped to at least 1.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn record_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.record_dir = Some(dir.into());
        self
    }

    pub fn metric_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.metric_namespace = namespace.into();
        self
    }

    /// State persisted by a previous run; `STATE` messages are merged on top of it.
    pub fn initial_state(mut self, state: Map<String, Value>) -> Self {
        self.initial_state = state;
        self
    }

    /// Routes full decode-failure details (which may contain record data) to `sink`.
    pub fn error_sink(mut self, sink: impl ErrorDetailSink) -> Self {
        self.error_sink = Some(Box::new(sink));
        self
    }

    pub fn build(self) -> RunConfig {
        RunConfig {
            limits: self.limits,
            channel_capacity: self.channel_capacity,
            timeout: self.timeout,
            record_dir: self.record_dir,
            metric_namespace: self.metric_namespace,
            initial_state: self.initial_state,
            error_sink: self.error_sink,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_bounded() {
        let config = RunConfig::default();
        assert_eq!(config.channel_capacity(), DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(config.limits().max_line_bytes, 16 * 1024 * 1024);
        assert_eq!(config.metric_namespace(), "singer");
        assert!(config.timeout().is_none());
        assert!(config.record_dir().is_none());
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let config = RunConfig::builder().channel_capacity(0).build();
        assert_eq!(config.channel_capacity(), 1);
    }
}
