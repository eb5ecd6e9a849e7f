use std::path::PathBuf;

use tracing::Level;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_log::LogTracer;
use tracing_subscriber::{
    fmt::time::ChronoUtc, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

/// Configuration for the logging system
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level for the application (default: INFO)
    pub level: Level,
    /// Whether to use json format for logs (default: false)
    pub json_format: bool,
    /// Path to store log files. If None, logs only go to stdout
    pub log_dir: Option<String>,
    /// Whether to colorize console output (default: true)
    pub colorize: bool,
    /// Log file name to use if log_dir is specified
    pub log_file_name: String,
    /// Targets the level applies to; everything else stays at warn
    pub log_targets: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            log_dir: None,
            colorize: true,
            log_file_name: "sgl-token-streamer".to_string(),
            log_targets: vec!["sgl_token_streamer".to_string(), "actix_web".to_string()],
        }
    }
}

impl LoggingConfig {
    /// Parse a level name such as "debug"; unknown names fall back to info
    pub fn parse_level(level: Option<&str>) -> Level {
        level
            .and_then(|l| l.parse::<Level>().ok())
            .unwrap_or(Level::INFO)
    }

    fn filter_directives(&self) -> String {
        let level = self.level.as_str().to_lowercase();
        std::iter::once("warn".to_string())
            .chain(
                self.log_targets
                    .iter()
                    .map(|target| format!("{}={}", target, level)),
            )
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Guard that keeps the file appender worker thread alive
///
/// Keep it in scope for the lifetime of the program, or buffered file logs
/// are lost on exit.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize the logging system
///
/// `RUST_LOG` overrides the configured level. Safe to call more than once;
/// later calls leave the first subscriber in place.
pub fn init_logging(config: LoggingConfig) -> LogGuard {
    // Forward `log` records from dependencies into tracing
    let _ = LogTracer::init();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let time_format = "%Y-%m-%d %H:%M:%S".to_string();
    let mut layers = Vec::new();

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_ansi(config.colorize)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::new(time_format.clone()));
    layers.push(if config.json_format {
        stdout_layer.json().flatten_event(true).boxed()
    } else {
        stdout_layer.boxed()
    });

    let mut file_guard = None;
    if let Some(log_dir) = &config.log_dir {
        let log_dir = PathBuf::from(log_dir);
        if let Err(e) = std::fs::create_dir_all(&log_dir) {
            eprintln!("Failed to create log directory {}: {}", log_dir.display(), e);
            return LogGuard { _file_guard: None };
        }

        let file_appender =
            RollingFileAppender::new(Rotation::DAILY, log_dir, config.log_file_name.clone());
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        file_guard = Some(guard);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::new(time_format))
            .with_writer(non_blocking);
        layers.push(if config.json_format {
            file_layer.json().flatten_event(true).boxed()
        } else {
            file_layer.boxed()
        });
    }

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init();

    LogGuard {
        _file_guard: file_guard,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(LoggingConfig::parse_level(Some("debug")), Level::DEBUG);
        assert_eq!(LoggingConfig::parse_level(Some("WARN")), Level::WARN);
        assert_eq!(LoggingConfig::parse_level(Some("loud")), Level::INFO);
        assert_eq!(LoggingConfig::parse_level(None), Level::INFO);
    }

    #[test]
    fn test_filter_directives() {
        let config = LoggingConfig {
            level: Level::DEBUG,
            ..Default::default()
        };
        assert_eq!(
            config.filter_directives(),
            "warn,sgl_token_streamer=debug,actix_web=debug"
        );
    }
}
