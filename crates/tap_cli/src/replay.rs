use std::{path::PathBuf, time::Duration};

use clap::Parser;
use serde_json::{Map, Value};
use singer_tap::{RunConfig, TapRun, DEFAULT_CHANNEL_CAPACITY};
use tokio::io::AsyncRead;
use tracing::{info, warn};

use crate::{
    error::Error,
    files::{parse_json, write_output},
};

type TapOutput = Box<dyn AsyncRead + Unpin + Send>;

#[derive(Debug, Parser)]
pub struct Args {
    /// Captured tap stdout (Singer messages, one JSON object per line).
    #[arg(long)]
    pub stdout: PathBuf,

    /// Captured tap stderr (logs and metrics). Omit when only stdout was captured.
    #[arg(long)]
    pub stderr: Option<PathBuf>,

    /// State document from a previous run; `STATE` messages are merged on top of it.
    #[arg(long)]
    pub state: Option<PathBuf>,

    /// Persist each stream's records to `<dir>/<stream>.jsonl`.
    #[arg(long)]
    pub record_dir: Option<PathBuf>,

    /// Abort the run when it takes longer than this many seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Decoded messages buffered between the stdout reader and the processor.
    #[arg(long, default_value_t = DEFAULT_CHANNEL_CAPACITY)]
    pub channel_capacity: usize,

    /// Longest accepted line in bytes; longer lines are skipped.
    #[arg(long)]
    pub max_line_bytes: Option<usize>,

    /// Write the run output JSON here instead of stdout.
    #[arg(long)]
    pub output: Option<PathBuf>,
}

pub async fn run(args: Args) -> Result<(), Error> {
    let config = build_config(&args).await?;

    let stdout: TapOutput = Box::new(open(&args.stdout).await?);
    let stderr: TapOutput = match &args.stderr {
        Some(path) => Box::new(open(path).await?),
        None => Box::new(tokio::io::empty()),
    };

    let output = TapRun::new(config)
        .run_until(stdout, stderr, interrupted())
        .await?;
    if output.skipped_lines > 0 {
        warn!(skipped = output.skipped_lines, "some tap output lines were skipped");
    }
    info!(
        messages = output.total_messages(),
        streams = output.streams.len(),
        "replay finished"
    );

    let rendered = serde_json::to_string_pretty(&output).map_err(Error::Serialize)?;
    write_output(args.output.as_deref(), &rendered).await
}

async fn build_config(args: &Args) -> Result<RunConfig, Error> {
    let mut builder = RunConfig::builder()
        .channel_capacity(args.channel_capacity)
        .timeout(args.timeout_secs.map(Duration::from_secs));
    if let Some(max_line_bytes) = args.max_line_bytes {
        builder = builder.max_line_bytes(max_line_bytes);
    }
    if let Some(dir) = &args.record_dir {
        builder = builder.record_dir(dir);
    }
    if let Some(path) = &args.state {
        builder = builder.initial_state(load_state(path).await?);
    }
    Ok(builder.build())
}

async fn load_state(path: &std::path::Path) -> Result<Map<String, Value>, Error> {
    match parse_json(path).await? {
        Value::Object(state) => Ok(state),
        _ => Err(Error::StateNotObject {
            path: path.to_path_buf(),
        }),
    }
}

async fn open(path: &std::path::Path) -> Result<tokio::fs::File, Error> {
    tokio::fs::File::open(path)
        .await
        .map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })
}

/// Resolves on Ctrl-C. If the handler cannot be installed the run simply is not interruptible.
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
    info!("interrupt received, cancelling run");
}
