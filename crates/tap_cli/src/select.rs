use std::path::PathBuf;

use clap::Parser;
use singer_tap::{Catalog, CatalogSelector, SelectionOverride};
use tracing::info;

use crate::{
    error::Error,
    files::{parse_json, read_text, write_output},
};

#[derive(Debug, Parser)]
pub struct Args {
    /// Catalog produced by the tap's discovery mode.
    #[arg(long)]
    pub catalog: PathBuf,

    /// JSON array of selection overrides, applied in order.
    #[arg(long)]
    pub overrides: PathBuf,

    /// Write the selected catalog here instead of stdout.
    #[arg(long)]
    pub output: Option<PathBuf>,
}

pub async fn run(args: Args) -> Result<(), Error> {
    let catalog_text = read_text(&args.catalog).await?;
    let catalog = Catalog::from_json(&catalog_text)?;
    let overrides: Vec<SelectionOverride> = parse_json(&args.overrides).await?;

    let selector = CatalogSelector::new(overrides)?;
    let selected = selector.apply(catalog);
    info!(
        streams = selected.streams.len(),
        selected = ?selected.selected_streams(),
        "applied selection overrides"
    );

    let rendered = selected.to_json_pretty()?;
    write_output(args.output.as_deref(), &rendered).await
}
