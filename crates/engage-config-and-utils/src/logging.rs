//! Logging initialization.
//!
//! Thin wrapper over the observability crate: structured JSONL to
//! `~/.engage/logs/engage.jsonl`, filtered by `RUST_LOG` or the configured level.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

pub use observability::LogConfig;

/// Initialize logging for the engage binary.
///
/// `log_path` overrides the default central log file.
pub fn init_logging(level: &str, log_path: Option<PathBuf>, also_stderr: bool) -> CoreResult<()> {
    observability::init_with_config(LogConfig {
        service_name: "engage".into(),
        default_level: level.into(),
        log_path,
        also_stderr,
    })
    .map_err(|e| CoreError::Config(format!("failed to initialize logging: {}", e)))
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
