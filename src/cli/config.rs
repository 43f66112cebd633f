//! Configuration conversion utilities for CLI arguments

use crate::cli::main_impl::Cli;
use crate::config::{AnalysisConfig, AnalysisConfigBuilder};
use anyhow::{Context, Result};

/// Convert CLI arguments to an `AnalysisConfig`
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Environment defaults first, then explicit flags on top
    pub(crate) fn from_cli(cli: &Cli) -> Result<AnalysisConfig> {
        Self::from_cli_with_base(cli, AnalysisConfig::from_env())
    }

    pub(crate) fn from_cli_with_base(cli: &Cli, base: AnalysisConfig) -> Result<AnalysisConfig> {
        let mut builder = AnalysisConfigBuilder::from_config(base);

        if let Some(weights) = &cli.weights {
            builder = builder.weights_path(weights);
        }
        if let Some(dir) = &cli.output_dir {
            builder = builder.output_dir(dir);
        }
        if let Some(dir) = &cli.samples_dir {
            builder = builder.samples_dir(dir);
        }
        if let Some(threshold) = cli.threshold {
            builder = builder.threshold(threshold);
        }

        builder.build().context("Invalid analysis configuration")
    }
}
