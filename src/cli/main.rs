//! Background Removal CLI Tool
//!
//! Command-line front end for the model cache and the single-flight
//! processor: one image per invocation, an indicatif bar for progress and a
//! confirmation prompt for large inputs.

use super::config::CliConfigBuilder;
use crate::{
    cache::{format_size, ModelCache, CACHE_DIR_ENV},
    config::AppConfig,
    download::{DownloadProgress, ModelDownloader},
    models::ModelRegistry,
    processor::{BackgroundRemovalProcessor, Submission},
    services::{
        InputAdvisory, NoOpNotifier, ProcessingStage, ProcessingTimings, ProgressReporter,
        ProgressUpdate,
    },
};
use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

/// Background removal CLI tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "efi-bgremove")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Input image file
    #[arg(value_name = "INPUT", required_unless_present_any = &["only_download", "list_models", "clear_cache", "show_cache_dir"])]
    pub input: Option<String>,

    /// Processing mode: objects or people [default: objects]
    #[arg(short, long)]
    pub model: Option<String>,

    /// Additionally export to this path (.png keeps transparency, .jpg/.jpeg flattens onto white)
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: Option<String>,

    /// Skip the confirmation prompt for large inputs
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Inference backend (onnx, tract)
    #[arg(short, long)]
    pub backend: Option<String>,

    /// Execution provider for the ONNX backend (auto, cpu, cuda, coreml)
    #[arg(short, long)]
    pub execution_provider: Option<String>,

    /// Treat cached models below their minimum size as missing
    #[arg(long)]
    pub strict_cache: bool,

    /// Use custom cache directory
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<String>,

    /// Load settings from a JSON configuration file
    #[arg(long, value_name = "FILE")]
    pub config: Option<String>,

    /// Do not emit the completion notification
    #[arg(long)]
    pub no_notify: bool,

    /// List cached models and exit
    #[arg(long)]
    pub list_models: bool,

    /// Clear cached models (combine with --model to clear a single mode)
    #[arg(long)]
    pub clear_cache: bool,

    /// Show current cache directory
    #[arg(long)]
    pub show_cache_dir: bool,

    /// Download the model for --model without processing any image
    #[arg(long)]
    pub only_download: bool,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Progress reporter drawing a single indicatif bar
struct BarProgressReporter {
    bar: ProgressBar,
}

impl BarProgressReporter {
    fn new() -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Self { bar }
    }
}

impl ProgressReporter for BarProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        self.bar.set_position(u64::from(update.progress));
        self.bar.set_message(update.description);
    }

    fn report_completion(&self, timings: ProcessingTimings) {
        self.bar.finish_with_message(format!(
            "Done in {}s",
            timings.elapsed_seconds_display()
        ));
    }

    fn report_error(&self, stage: ProcessingStage, error: &str) {
        self.bar
            .abandon_with_message(format!("Failed during {}: {}", stage.description(), error));
    }
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    crate::tracing_config::init_cli_tracing(cli.verbose)
        .context("Failed to initialize tracing")?;

    CliConfigBuilder::validate_cli(&cli).context("Invalid CLI arguments")?;
    let config = CliConfigBuilder::from_cli(&cli).context("Failed to build configuration")?;

    if cli.show_cache_dir {
        return show_current_cache_dir(&config);
    }

    if cli.list_models {
        return list_cached_models(&config);
    }

    if cli.clear_cache {
        return clear_cache_models(&cli, &config);
    }

    if cli.only_download {
        return download_model_only(&cli, &config).await;
    }

    let Some(input) = cli.input.as_deref() else {
        anyhow::bail!("An input image is required");
    };
    let input = PathBuf::from(input);
    let mode = CliConfigBuilder::model_kind(&cli)?;

    info!("Starting background removal");
    info!(
        "Backend: {}, Provider: {}",
        config.backend, config.execution_provider
    );
    #[cfg(feature = "onnx")]
    if config.backend == crate::config::BackendType::Onnx {
        for (name, available, description) in crate::backends::OnnxBackend::list_providers() {
            log::debug!(
                "Execution provider {}: {} - {}",
                name,
                if available { "available" } else { "not available" },
                description
            );
        }
    }

    let advisory = InputAdvisory::check(&input, config.large_input_threshold_bytes)
        .with_context(|| format!("Cannot read input {}", input.display()))?;
    if advisory.requires_confirmation() && !cli.yes {
        let prompt = format!(
            "The image is {:.1} MB and may take a while to process. Continue? [y/N] ",
            advisory.size_mb()
        );
        if !confirm(&prompt, &mut io::stdin().lock())? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let mut processor = BackgroundRemovalProcessor::from_config(config)
        .context("Failed to create background removal processor")?
        .with_reporter(Arc::new(BarProgressReporter::new()));
    if cli.no_notify {
        processor = processor.with_notifier(Arc::new(NoOpNotifier));
    }

    let handle = match processor.submit(&input, mode) {
        Submission::Accepted(handle) => handle,
        Submission::Rejected => anyhow::bail!("A background removal is already running"),
    };
    let report = handle
        .wait()
        .await
        .with_context(|| format!("Failed to remove background from {}", input.display()))?;

    let saved = processor.save_default().context("Failed to save result")?;
    println!("✅ {}", report.completion_message());
    println!("   Saved: {}", saved.display());

    if let Some(output) = &cli.output {
        processor
            .save_as(output)
            .with_context(|| format!("Failed to export to {}", output))?;
        println!("   Exported: {}", output);
    }

    Ok(())
}

/// Ask a yes/no question; anything but `y`/`yes` declines
fn confirm<R: BufRead>(prompt: &str, reader: &mut R) -> Result<bool> {
    print!("{}", prompt);
    io::stdout().flush().context("Failed to write prompt")?;

    let mut answer = String::new();
    reader
        .read_line(&mut answer)
        .context("Failed to read confirmation")?;
    Ok(is_affirmative(&answer))
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn open_cache(config: &AppConfig) -> Result<ModelCache> {
    ModelCache::from_override(config.cache_dir.as_deref()).context("Failed to open model cache")
}

/// Download the model for the selected mode without processing images
async fn download_model_only(cli: &Cli, config: &AppConfig) -> Result<()> {
    let mode = CliConfigBuilder::model_kind(cli)?;
    let downloader =
        ModelDownloader::from_config(config).context("Failed to create model downloader")?;

    if downloader.cache().is_model_present(
        downloader.registry().artifact(mode)?,
        config.cache_validation,
    ) {
        println!("✅ Model for {} mode is already cached", mode.label());
        println!("   Cache location: {}", downloader.model_path(mode)?.display());
        return Ok(());
    }

    println!("📦 Downloading model for {} mode...", mode.label());
    let bar = BarProgressReporter::new().bar;
    let path = downloader
        .ensure_model(mode, |progress: &DownloadProgress| {
            if let Some(percent) = progress.percent() {
                bar.set_position(u64::from(percent));
            }
            bar.set_message(format!(
                "{} ({})",
                progress.file_name,
                format_size(progress.downloaded)
            ));
        })
        .await
        .context("Failed to download model")?;
    bar.finish_and_clear();

    println!("✅ Successfully downloaded model!");
    println!("   Cache location: {}", path.display());
    Ok(())
}

/// List cached models available for processing
fn list_cached_models(config: &AppConfig) -> Result<()> {
    let cache = open_cache(config)?;
    let registry = ModelRegistry::default();
    let models = cache
        .list_cached_models(&registry)
        .context("Failed to list cached models")?;

    println!("📦 Cached Models");
    println!("   Cache location: {}", cache.cache_dir().display());

    if models.is_empty() {
        println!("No cached models found.");
        println!("\n💡 To download a model, use:");
        println!("  efi-bgremove --only-download --model objects");
        return Ok(());
    }

    for model in models {
        let status = if model.meets_min_size {
            "✅ Complete"
        } else {
            "⚠️  Smaller than expected, possibly truncated"
        };
        println!("📁 {} ({})", model.kind.label(), model.kind);
        println!("  └─ File: {}", model.path.display());
        println!("  └─ Size: {}", format_size(model.size_bytes));
        println!("  └─ Status: {}", status);
    }

    Ok(())
}

/// Clear one mode's model or the whole cache
fn clear_cache_models(cli: &Cli, config: &AppConfig) -> Result<()> {
    let cache = open_cache(config)?;

    if cli.model.is_some() {
        let mode = CliConfigBuilder::model_kind(cli)?;
        let registry = ModelRegistry::default();
        let artifact = registry.artifact(mode)?;
        println!("🗑️  Clearing model for {} mode", mode.label());

        if cache.clear_model(artifact).context("Failed to clear model")? {
            println!("✅ Removed {}", artifact.filename);
        } else {
            println!("⚠️  No cached model for {} mode", mode.label());
        }
    } else {
        println!("🗑️  Clearing entire model cache...");
        let removed = cache.clear_all().context("Failed to clear cache")?;
        if removed.is_empty() {
            println!("💡 Cache was already empty");
        } else {
            println!("✅ Successfully removed {} file(s):", removed.len());
            for name in &removed {
                println!("   • {}", name);
            }
        }
    }

    println!("   Cache location: {}", cache.cache_dir().display());
    Ok(())
}

/// Show the current cache directory and where it came from
fn show_current_cache_dir(config: &AppConfig) -> Result<()> {
    let cache = open_cache(config)?;

    println!("📁 Current cache directory:");
    println!("   Path: {}", cache.cache_dir().display());

    let source = if config.cache_dir.is_some() {
        "--cache-dir / configuration file".to_string()
    } else if std::env::var_os(CACHE_DIR_ENV).is_some() {
        format!("{} environment variable", CACHE_DIR_ENV)
    } else {
        "platform cache directory".to_string()
    };
    println!("   Source: {}", source);

    let cached = cache
        .list_cached_models(&ModelRegistry::default())
        .context("Failed to list cached models")?;
    if cached.is_empty() {
        warn!("No model cached yet; the first run will download it");
    }
    Ok(())
}
