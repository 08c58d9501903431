mod error;
mod files;
mod replay;
mod select;
mod telemetry;

use clap::{Parser, Subcommand};

use crate::{error::Error, telemetry::LogFormat};

#[derive(Debug, Parser)]
#[command(name = "singer-tap")]
#[command(about = "Process Singer tap catalogs and captured tap output")]
struct Cli {
    /// Diagnostic log format on stderr. Filter with `RUST_LOG` (default `info`).
    #[arg(long, value_enum, default_value_t = LogFormat::Compact, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply ordered selection overrides to a discovered catalog.
    Select(select::Args),
    /// Run captured tap stdout/stderr through the stream processor and print the run output.
    Replay(replay::Args),
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let cli = Cli::parse();
    telemetry::initialise(cli.log_format)?;
    match cli.command {
        Command::Select(args) => select::run(args).await,
        Command::Replay(args) => replay::run(args).await,
    }
}
