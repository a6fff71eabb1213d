// crates/envqc/src/main.rs

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod input;

use commands::detect::DetectArgs;
use commands::preprocess::PreprocessArgs;

/// Data-quality checks for environmental sensor exports
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    /// TOML file with dataset profiles; entries replace the built-in ones
    #[arg(long, global = true)]
    profiles: Option<PathBuf>,

    /// TOML file selecting and configuring the anomaly detector
    #[arg(long, global = true)]
    detector_config: Option<PathBuf>,

    /// Field separator of the input CSV files
    #[arg(long, global = true, default_value_t = ',')]
    separator: char,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List registered dataset ids
    Datasets,
    /// Run a dataset's preprocessing chain over a CSV file
    Preprocess(PreprocessArgs),
    /// Preprocess reference and target files, fit a detector and flag anomalous target rows
    Detect(DetectArgs),
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env());
    if cli.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let settings = input::Settings::load(
        cli.profiles.as_deref(),
        cli.detector_config.as_deref(),
        cli.separator,
    )?;

    match cli.command {
        Command::Datasets => commands::handle_datasets(&settings),
        Command::Preprocess(args) => commands::preprocess::run(&settings, args),
        Command::Detect(args) => commands::detect::run(&settings, args),
    }
}
