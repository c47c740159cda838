//! Configuration conversion utilities for CLI arguments

use crate::cli::main_impl::Cli;
use crate::config::{AppConfig, BackendType, CacheValidation, ExecutionProvider};
use crate::models::ModelKind;
use anyhow::{Context, Result};
use std::path::PathBuf;

/// Convert CLI arguments to an [`AppConfig`]
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build the application configuration from CLI arguments
    ///
    /// A `--config` file is loaded first; flags given on the command line
    /// override the values it contains.
    pub(crate) fn from_cli(cli: &Cli) -> Result<AppConfig> {
        let base = match &cli.config {
            Some(path) => AppConfig::from_json_file(path)
                .with_context(|| format!("Failed to load configuration from {}", path))?,
            None => AppConfig::default(),
        };

        let mut builder = AppConfig::builder()
            .backend(base.backend)
            .execution_provider(base.execution_provider)
            .cache_validation(base.cache_validation)
            .alpha_matting(base.alpha_matting)
            .large_input_threshold(base.large_input_threshold_bytes)
            .download(base.download)
            .jpeg_quality(base.jpeg_quality)
            .notifications(base.notifications && !cli.no_notify);

        if let Some(dir) = cli.cache_dir.as_ref().map(PathBuf::from).or(base.cache_dir) {
            builder = builder.cache_dir(dir);
        }
        if let Some(backend) = &cli.backend {
            builder = builder.backend(Self::parse_backend(backend)?);
        }
        if let Some(provider) = &cli.execution_provider {
            builder = builder.execution_provider(Self::parse_provider(provider)?);
        }
        if cli.strict_cache {
            builder = builder.cache_validation(CacheValidation::Strict);
        }

        builder.build().context("Invalid configuration")
    }

    /// Mode selected with `--model`, objects when absent
    pub(crate) fn model_kind(cli: &Cli) -> Result<ModelKind> {
        match &cli.model {
            Some(mode) => mode
                .parse::<ModelKind>()
                .with_context(|| format!("Invalid mode '{}'", mode)),
            None => Ok(ModelKind::default()),
        }
    }

    /// Validate CLI arguments for consistency
    pub(crate) fn validate_cli(cli: &Cli) -> Result<()> {
        if let Some(backend) = &cli.backend {
            Self::parse_backend(backend)?;
        }
        if let Some(provider) = &cli.execution_provider {
            Self::parse_provider(provider)?;
        }
        Self::model_kind(cli)?;

        if let Some(output) = &cli.output {
            if cli.input.is_none() {
                anyhow::bail!("--output requires an input image");
            }
            if PathBuf::from(output).extension().is_none() {
                anyhow::bail!(
                    "Output '{}' has no extension; use .png, .jpg or .jpeg",
                    output
                );
            }
        }

        Ok(())
    }

    fn parse_backend(value: &str) -> Result<BackendType> {
        value
            .parse::<BackendType>()
            .context("Invalid backend")
    }

    fn parse_provider(value: &str) -> Result<ExecutionProvider> {
        value
            .parse::<ExecutionProvider>()
            .context("Invalid execution provider")
    }
}
