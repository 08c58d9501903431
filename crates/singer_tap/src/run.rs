//! Concurrent processing of one tap run.
//!
//! stdout and stderr are read by independent tasks so a chatty stderr can never stall record
//! extraction. Decoded stdout lines flow to the [`StreamProcessor`] over a bounded channel: when
//! the processor falls behind, the stdout reader stops pulling from the pipe, which in turn
//! blocks the tap on its next write. The processor itself runs on the blocking pool because
//! record spilling does synchronous file I/O.

use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use line_ingest::{AsyncLineIngestor, IngestConfig, IngestLimits, LineRecord, LineRecordError};
use tokio::{
    io::AsyncRead,
    sync::mpsc,
    task::{self, JoinHandle},
    time,
};
use tracing::{debug, info, warn};

use crate::{
    config::RunConfig,
    error::{CancelReason, OutputChannel, ProcessorError, RunError},
    log_line::{self, LogEvent, LogLineClassifier, MetricEvent},
    message::{MessageCodec, ProtocolMessage},
    metrics::MetricAggregator,
    processor::{ProcessorOptions, RunOutput, StreamProcessor},
};

/// One tap run: consumes the tap's stdout and stderr until both reach EOF.
#[derive(Debug)]
pub struct TapRun {
    config: RunConfig,
}

impl TapRun {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    pub async fn run<O, E>(self, stdout: O, stderr: E) -> Result<RunOutput, RunError>
    where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        self.run_until(stdout, stderr, std::future::pending()).await
    }

    /// Like [`TapRun::run`], but stops early when `cancel` resolves or the configured timeout
    /// elapses. A stopped run returns [`RunError::Cancelled`] and persists no record files.
    pub async fn run_until<O, E, C>(
        self,
        stdout: O,
        stderr: E,
        cancel: C,
    ) -> Result<RunOutput, RunError>
    where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
        C: Future<Output = ()>,
    {
        let RunConfig {
            limits,
            channel_capacity,
            timeout,
            record_dir,
            metric_namespace,
            initial_state,
            error_sink,
        } = self.config;

        let mut stdout_config = IngestConfig::with_limits(limits);
        if let Some(sink) = error_sink {
            stdout_config = stdout_config.with_error_sink(sink);
        }
        let options = ProcessorOptions {
            initial_state,
            record_dir,
        };
        let cancelled = Arc::new(AtomicBool::new(false));

        info!(channel_capacity, ?timeout, "starting tap run");

        let (tx, rx) = mpsc::channel(channel_capacity);
        let mut tasks = RunTasks::new(
            tokio::spawn(forward_messages(stdout, tx, stdout_config)),
            tokio::spawn(consume_diagnostics(stderr, limits)),
            task::spawn_blocking({
                let cancelled = Arc::clone(&cancelled);
                move || drain_messages(rx, options, &cancelled)
            }),
        );

        let deadline = async {
            match timeout {
                Some(timeout) => time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };
        let mut cancel = std::pin::pin!(cancel);
        let mut deadline = std::pin::pin!(deadline);

        let joined = tokio::select! {
            joined = tasks.join() => joined,
            () = &mut cancel => Err(RunError::Cancelled {
                reason: CancelReason::Requested,
            }),
            () = &mut deadline => Err(RunError::Cancelled {
                reason: CancelReason::Timeout(timeout.unwrap_or_default()),
            }),
        };

        let (processor, metric_events) = match joined {
            Ok(done) => done,
            Err(err) => {
                warn!(error = %err, "stopping tap run");
                cancelled.store(true, Ordering::Release);
                tasks.shutdown().await;
                return Err(err);
            }
        };

        // Record files are only persisted once both streams closed cleanly.
        let mut output = task::spawn_blocking(move || processor.finish()).await??;
        output.metrics = MetricAggregator::new(metric_namespace).ingest(metric_events);

        info!(
            messages = output.total_messages(),
            skipped = output.skipped_lines,
            metrics = output.metrics.len(),
            "tap run finished"
        );
        Ok(output)
    }
}

type DrainResult = Result<Option<StreamProcessor>, ProcessorError>;

/// The three tasks of a run and whichever of them already completed.
struct RunTasks {
    stdout: JoinHandle<()>,
    stderr: JoinHandle<Result<Vec<MetricEvent>, RunError>>,
    processor: JoinHandle<DrainResult>,
    stdout_done: bool,
    metric_events: Option<Vec<MetricEvent>>,
    drained: Option<Option<StreamProcessor>>,
}

impl RunTasks {
    fn new(
        stdout: JoinHandle<()>,
        stderr: JoinHandle<Result<Vec<MetricEvent>, RunError>>,
        processor: JoinHandle<DrainResult>,
    ) -> Self {
        Self {
            stdout,
            stderr,
            processor,
            stdout_done: false,
            metric_events: None,
            drained: None,
        }
    }

    /// Waits until stdout is drained into the processor and stderr is closed. Returns as soon as
    /// any task fails.
    async fn join(&mut self) -> Result<(StreamProcessor, Vec<MetricEvent>), RunError> {
        while !self.stdout_done || self.metric_events.is_none() || self.drained.is_none() {
            tokio::select! {
                joined = &mut self.stdout, if !self.stdout_done => {
                    self.stdout_done = true;
                    joined?;
                }
                joined = &mut self.stderr, if self.metric_events.is_none() => {
                    self.metric_events = Some(joined??);
                }
                joined = &mut self.processor, if self.drained.is_none() => {
                    // Set before `?`: a finished handle must not be awaited again on shutdown.
                    self.drained = Some(None);
                    self.drained = Some(joined??);
                }
            }
        }
        let Some(Some(processor)) = self.drained.replace(None) else {
            return Err(RunError::Cancelled {
                reason: CancelReason::Requested,
            });
        };
        Ok((processor, self.metric_events.take().unwrap_or_default()))
    }

    /// Stops both readers and waits for the processor to discard everything it buffered.
    async fn shutdown(self) {
        self.stdout.abort();
        self.stderr.abort();
        let processor = match self.drained {
            Some(drained) => drained,
            None => match self.processor.await {
                Ok(Ok(drained)) => drained,
                Ok(Err(err)) => {
                    debug!(error = %err, "stream processor failed during shutdown");
                    None
                }
                Err(err) => {
                    debug!(error = %err, "stream processor task failed during shutdown");
                    None
                }
            },
        };
        if let Some(processor) = processor {
            if let Err(err) = task::spawn_blocking(move || processor.abort()).await {
                debug!(error = %err, "discarding stream buffers failed");
            }
        }
    }
}

/// Decodes tap stdout and feeds the processor. Stops after a read failure (which the processor
/// reports) or once the processor has gone away.
async fn forward_messages<R>(
    reader: R,
    sender: mpsc::Sender<LineRecord<ProtocolMessage>>,
    config: IngestConfig,
) where
    R: AsyncRead + Unpin,
{
    let mut ingestor = AsyncLineIngestor::new(reader, MessageCodec, config, "singer");
    while let Some(record) = ingestor.next_record().await {
        let fatal = record.outcome.as_ref().is_err_and(LineRecordError::is_fatal);
        if sender.send(record).await.is_err() || fatal {
            break;
        }
    }
    debug!("tap stdout closed");
}

/// Re-emits tap stderr through `tracing` and collects metric events.
async fn consume_diagnostics<R>(
    reader: R,
    limits: IngestLimits,
) -> Result<Vec<MetricEvent>, RunError>
where
    R: AsyncRead + Unpin,
{
    let config = IngestConfig::with_limits(limits);
    let mut ingestor = AsyncLineIngestor::new(reader, LogLineClassifier, config, "tap-log");
    let mut metric_events = Vec::new();
    while let Some(record) = ingestor.next_record().await {
        match record.outcome {
            Ok(Ok(event)) => {
                log_line::emit(&event);
                if let LogEvent::Metric(metric) = event {
                    metric_events.push(metric);
                }
            }
            Ok(Err(err)) => {
                warn!(line_number = record.line_number, error = %err, "tap emitted a bad metric");
                log_line::emit_structured(&err.fallback);
            }
            Err(LineRecordError::Io(source)) => {
                return Err(RunError::Io {
                    channel: OutputChannel::Stderr,
                    source,
                })
            }
            Err(err) => {
                warn!(line_number = record.line_number, error = %err, "skipping tap stderr line");
            }
        }
    }
    debug!(metrics = metric_events.len(), "tap stderr closed");
    Ok(metric_events)
}

/// Feeds every decoded stdout line to a fresh processor until the channel closes. The processor
/// is handed back unfinished so nothing is persisted before the whole run succeeded; `Ok(None)`
/// means the run was cancelled and every buffer was discarded.
fn drain_messages(
    mut receiver: mpsc::Receiver<LineRecord<ProtocolMessage>>,
    options: ProcessorOptions,
    cancelled: &AtomicBool,
) -> DrainResult {
    let mut processor = StreamProcessor::new(options);
    while let Some(record) = receiver.blocking_recv() {
        if cancelled.load(Ordering::Acquire) {
            processor.abort();
            return Ok(None);
        }
        if let Err(err) = processor.handle(record) {
            processor.abort();
            return Err(err);
        }
    }
    if cancelled.load(Ordering::Acquire) {
        processor.abort();
        return Ok(None);
    }
    Ok(Some(processor))
}
