// crates/envqc/src/commands/preprocess.rs

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::Table;

use super::render_rows;
use crate::input::{parse_dataset, Settings};

#[derive(Args, Debug)]
pub struct PreprocessArgs {
    /// Dataset id, e.g. airup_sont_a_minute
    #[arg(long)]
    dataset: String,

    /// Rows of the normalized batch to print
    #[arg(long, default_value_t = 10)]
    head: usize,

    /// CSV export to preprocess
    file: PathBuf,
}

pub fn run(settings: &Settings, args: PreprocessArgs) -> Result<()> {
    let dataset = parse_dataset(&args.dataset)?;
    let raw = settings.read_csv(&args.file)?;

    let normalized = settings
        .orchestrator()
        .preprocess(dataset, &raw)
        .with_context(|| format!("preprocessing {} as {dataset} failed", args.file.display()))?;

    println!(
        "{dataset}: {} rows x {} columns in, {} rows x {} columns out",
        raw.height(),
        raw.width(),
        normalized.height(),
        normalized.width()
    );

    let mut schema = Table::new();
    schema.set_header(vec!["column", "dtype", "missing"]);
    for column in normalized.get_columns() {
        schema.add_row(vec![
            column.name().to_string(),
            column.dtype().to_string(),
            column.null_count().to_string(),
        ]);
    }
    println!("{schema}");

    if args.head > 0 {
        println!("{}", render_rows(&normalized, &[], args.head)?);
    }
    Ok(())
}
