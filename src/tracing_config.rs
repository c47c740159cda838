//! Tracing configuration for structured logging
//!
//! Applications configure the subscriber; the library only emits spans and
//! events through the helpers in [`spans`] and [`events`].

#[cfg(feature = "cli")]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Configuration for tracing output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable console output (default for CLI)
    Console,
    /// Compact console output for CI environments
    Compact,
    /// JSON structured logging
    #[cfg(feature = "tracing-json")]
    Json,
}

/// Tracing configuration builder
#[derive(Debug)]
pub struct TracingConfig {
    /// Verbosity level (maps to log levels)
    pub verbosity: u8,
    /// Output format
    pub format: TracingFormat,
    /// Environment filter string (overrides verbosity if set)
    pub env_filter: Option<String>,
    /// Session ID for correlation
    pub session_id: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            format: TracingFormat::Console,
            env_filter: None,
            session_id: None,
        }
    }
}

impl TracingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set verbosity level (0-2+)
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    /// Set custom environment filter
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Set session ID for correlation across a CLI run
    pub fn with_session_id<S: Into<String>>(mut self, session_id: S) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Convert verbosity level to tracing filter string
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Initialize the global tracing subscriber
    ///
    /// `log` records are forwarded through tracing-subscriber's log bridge, so
    /// both `log::` and `tracing::` output end up in the same sink.
    #[cfg(feature = "cli")]
    pub fn init(self) -> anyhow::Result<()> {
        use tracing_subscriber::fmt;

        let filter = match &self.env_filter {
            Some(env_filter) => EnvFilter::try_new(env_filter)?,
            None => EnvFilter::try_new(self.verbosity_to_filter())?,
        };

        let registry = Registry::default().with(filter);

        match self.format {
            TracingFormat::Console => {
                let fmt_layer = fmt::layer()
                    .with_ansi(true)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .compact();
                registry.with(fmt_layer).try_init()?;
            },
            TracingFormat::Compact => {
                let fmt_layer = fmt::layer().with_ansi(false).with_target(true).compact();
                registry.with(fmt_layer).try_init()?;
            },
            #[cfg(feature = "tracing-json")]
            TracingFormat::Json => {
                let fmt_layer = fmt::layer().json().with_current_span(true);
                registry.with(fmt_layer).try_init()?;
            },
        }

        if let Some(session_id) = &self.session_id {
            tracing::debug!(session_id = %session_id, "Background removal session started");
        }

        Ok(())
    }
}

/// Initialize tracing with CLI defaults and a fresh session id
#[cfg(feature = "cli")]
pub fn init_cli_tracing(verbosity: u8) -> anyhow::Result<()> {
    TracingConfig::new()
        .with_verbosity(verbosity)
        .with_session_id(uuid::Uuid::new_v4().to_string())
        .init()
}

/// Span creation helpers for common operations
pub mod spans {
    use tracing::{Level, Span};

    /// Span covering one processing job
    pub fn job(job_id: u64, input: &std::path::Path, mode: &str) -> Span {
        tracing::span!(
            Level::INFO,
            "job",
            job_id = %job_id,
            input = %input.display(),
            mode = %mode
        )
    }

    /// Create a span for download operations
    pub fn download(url: &str, destination: &std::path::Path) -> Span {
        tracing::span!(
            Level::INFO,
            "download",
            url = %url,
            destination = %destination.display()
        )
    }

    /// Create a span for a segmentation call
    pub fn segmentation(model_name: &str, dimensions: (u32, u32)) -> Span {
        tracing::span!(
            Level::DEBUG,
            "segmentation",
            model_name = %model_name,
            width = %dimensions.0,
            height = %dimensions.1
        )
    }
}

/// Event helpers for common logging patterns
pub mod events {
    use tracing::debug;

    /// Log performance metrics
    pub fn performance_metric(operation: &str, duration_ms: u64, detail: Option<&str>) {
        match detail {
            Some(detail) => debug!(
                operation = %operation,
                duration_ms = %duration_ms,
                detail = %detail,
                "⏱️  Performance metric"
            ),
            None => debug!(
                operation = %operation,
                duration_ms = %duration_ms,
                "⏱️  Performance metric"
            ),
        }
    }

    pub fn cache_hit(cache_key: &str, operation: &str) {
        debug!(cache_key = %cache_key, operation = %operation, "💾 Cache hit");
    }

    pub fn cache_miss(cache_key: &str, operation: &str) {
        debug!(cache_key = %cache_key, operation = %operation, "🔍 Cache miss");
    }

    /// Log download progress
    pub fn download_progress(url: &str, bytes_downloaded: u64, total_bytes: Option<u64>) {
        match total_bytes {
            Some(total) if total > 0 => debug!(
                url = %url,
                bytes_downloaded = %bytes_downloaded,
                total_bytes = %total,
                progress_percent = %(bytes_downloaded * 100 / total),
                "📥 Download progress"
            ),
            _ => debug!(
                url = %url,
                bytes_downloaded = %bytes_downloaded,
                "📥 Download progress"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_mapping() {
        assert_eq!(TracingConfig::new().with_verbosity(0).verbosity_to_filter(), "info");
        assert_eq!(TracingConfig::new().with_verbosity(1).verbosity_to_filter(), "debug");
        assert_eq!(TracingConfig::new().with_verbosity(2).verbosity_to_filter(), "trace");
        assert_eq!(TracingConfig::new().with_verbosity(10).verbosity_to_filter(), "trace");
    }

    #[test]
    fn test_config_builder() {
        let config = TracingConfig::new()
            .with_verbosity(2)
            .with_format(TracingFormat::Compact)
            .with_env_filter("efi_bgremove=debug")
            .with_session_id("test-session");

        assert_eq!(config.verbosity, 2);
        assert_eq!(config.format, TracingFormat::Compact);
        assert_eq!(config.env_filter.as_deref(), Some("efi_bgremove=debug"));
        assert_eq!(config.session_id.as_deref(), Some("test-session"));
    }

    #[test]
    fn test_default_config() {
        let config = TracingConfig::default();
        assert_eq!(config.verbosity, 0);
        assert_eq!(config.format, TracingFormat::Console);
        assert!(config.env_filter.is_none());
    }

    #[test]
    fn test_helpers_without_subscriber() {
        let _span = spans::job(1, std::path::Path::new("photo.jpg"), "objects").entered();
        events::download_progress("http://localhost/m.onnx", 10, Some(0));
        events::download_progress("http://localhost/m.onnx", 10, Some(20));
        events::performance_metric("segmentation", 5, Some("4x4"));
    }
}
