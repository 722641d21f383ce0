//! Structured logging setup, modeled on the teacher's `telemetry::logging`
//! module: a format selector driven by env var, a builder-style config, and
//! one `init_structured_logging` entry point.

use std::path::PathBuf;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        match std::env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("compact") => LogFormat::Compact,
            _ => LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    pub service_name: String,
    pub level: u8,
    pub log_to_file: bool,
    pub log_dir: PathBuf,
}

impl LogConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            format: LogFormat::from_env(),
            service_name: service_name.into(),
            level: 1,
            log_to_file: false,
            log_dir: PathBuf::from("."),
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: u8) -> Self {
        self.level = level;
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self.log_to_file = true;
        self
    }

    fn default_directive(&self) -> &'static str {
        if self.level >= 2 {
            "debug"
        } else {
            "info"
        }
    }
}

/// Returns the non-blocking file-writer guard when file logging is enabled;
/// the caller must hold it for the process lifetime or log lines get dropped
/// on exit.
pub fn init_structured_logging(
    config: &LogConfig,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directive()));

    let registry = tracing_subscriber::registry().with(filter);

    let (file_layer, guard) = if config.log_to_file {
        let appender = tracing_appender::rolling::daily(&config.log_dir, "dvr-sentinel.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer().with_writer(non_blocking).with_ansi(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    match config.format {
        LogFormat::Json => {
            registry
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_current_span(true)
                        .with_span_list(false),
                )
                .with(file_layer)
                .init();
        }
        LogFormat::Compact => {
            registry
                .with(fmt::layer().compact().with_target(false))
                .with(file_layer)
                .init();
        }
        LogFormat::Pretty => {
            registry
                .with(fmt::layer().pretty().with_line_number(true))
                .with(file_layer)
                .init();
        }
    }

    tracing::info!(service = %config.service_name, format = ?config.format, "logging initialized");
    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_from_env_defaults_to_pretty() {
        std::env::remove_var("LOG_FORMAT");
        assert_eq!(LogFormat::from_env(), LogFormat::Pretty);
    }

    #[test]
    fn log_format_from_env_reads_json() {
        std::env::set_var("LOG_FORMAT", "json");
        assert_eq!(LogFormat::from_env(), LogFormat::Json);
        std::env::remove_var("LOG_FORMAT");
    }

    #[test]
    fn log_config_builder_sets_file_dir() {
        let cfg = LogConfig::new("dvr-sentinel").with_log_dir("/tmp/logs");
        assert!(cfg.log_to_file);
        assert_eq!(cfg.log_dir, PathBuf::from("/tmp/logs"));
    }

    #[test]
    fn default_directive_honors_level() {
        let cfg = LogConfig::new("dvr-sentinel").with_level(2);
        assert_eq!(cfg.default_directive(), "debug");
    }
}
