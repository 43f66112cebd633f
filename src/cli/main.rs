//! Forest analysis CLI tool
//!
//! Command-line interface over [`ForestAnalyzer`]: analyze a coordinate,
//! compare two images, or inspect a weights file. Results are printed to
//! stdout as JSON; logs go to stderr.

use super::config::CliConfigBuilder;
use crate::{
    analysis::ForestAnalyzer,
    error::{EcoWatchError, ErrorClass},
    models::inspect_weights,
    tracing_config::{init_cli_tracing, TracingFormat},
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

/// Deforestation analysis from satellite imagery
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "ecowatch")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Weights file or checkpoint directory (overrides FORESTRY_MODEL_WEIGHTS)
    #[arg(long, global = true, value_name = "PATH")]
    pub weights: Option<PathBuf>,

    /// Artifact output directory (overrides ECOWATCH_OUTPUT_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Sample image directory (overrides ECOWATCH_SAMPLES_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    pub samples_dir: Option<PathBuf>,

    /// Forest probability threshold
    #[arg(long, global = true)]
    pub threshold: Option<f32>,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Plain compact log lines without colors (CI-friendly)
    #[arg(long, global = true)]
    pub compact_logs: bool,

    /// Emit logs as JSON
    #[cfg(feature = "tracing-json")]
    #[arg(long, global = true, conflicts_with = "compact_logs")]
    pub json_logs: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Analyze the sample image for a coordinate pair
    Analyze {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lng: f64,
        /// Analyze this image instead of the coordinate's sample
        #[arg(long, value_name = "IMAGE")]
        image: Option<PathBuf>,
    },
    /// Compare forest cover between two images
    Compare {
        #[arg(value_name = "BEFORE")]
        before: PathBuf,
        #[arg(value_name = "AFTER")]
        after: PathBuf,
    },
    /// Describe the configured weights without loading the model
    InspectWeights,
}

impl Cli {
    #[cfg(feature = "tracing-json")]
    fn tracing_format(&self) -> TracingFormat {
        if self.json_logs {
            TracingFormat::Json
        } else {
            self.text_format()
        }
    }

    #[cfg(not(feature = "tracing-json"))]
    fn tracing_format(&self) -> TracingFormat {
        self.text_format()
    }

    fn text_format(&self) -> TracingFormat {
        if self.compact_logs {
            TracingFormat::Compact
        } else {
            TracingFormat::Console
        }
    }
}

/// Main entry point for CLI application
pub fn main() -> Result<()> {
    let cli = Cli::parse();

    init_cli_tracing(cli.verbose, cli.tracing_format()).context("Failed to initialize tracing")?;

    let config = CliConfigBuilder::from_cli(&cli)?;
    info!(
        weights = %config.weights_path.display(),
        output = %config.output_dir.display(),
        "Starting forest analysis"
    );

    match &cli.command {
        Command::Analyze { lat, lng, image } => {
            let analyzer = ForestAnalyzer::new(config).map_err(describe)?;
            let report = match image {
                Some(path) => analyzer.analyze_image(path, *lat, *lng),
                None => analyzer.analyze_coordinates(*lat, *lng),
            }
            .map_err(describe)?;
            print_json(&report)
        },
        Command::Compare { before, after } => {
            let analyzer = ForestAnalyzer::new(config).map_err(describe)?;
            let report = analyzer.compare_images(before, after).map_err(describe)?;
            print_json(&report)
        },
        Command::InspectWeights => {
            let info = inspect_weights(&config.weights_path).map_err(describe)?;
            print_json(&info)
        },
    }
}

fn describe(error: EcoWatchError) -> anyhow::Error {
    let class = match error.class() {
        ErrorClass::ServerConfiguration => "configuration error",
        ErrorClass::ClientInput => "input error",
        ErrorClass::Internal => "internal error",
    };
    anyhow::Error::new(error).context(class)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize result")?;
    println!("{json}");
    Ok(())
}
