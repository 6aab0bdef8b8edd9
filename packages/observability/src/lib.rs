//! # Observability
//!
//! Logging bootstrap shared by every crate of the session subsystem.
//!
//! Crates never configure logging themselves. They use the standard `tracing`
//! macros and the host process calls [`init_with_config`] exactly once at
//! startup. The installed subscriber writes:
//!
//! - one JSON object per event to an append-only JSONL file
//!   (`~/.recipe-session/logs/session.jsonl` unless overridden)
//! - optionally a compact human-readable stream on stderr
//!
//! Field values whose names look like credentials are redacted before they
//! reach any sink, see [`redact_field`].
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "recipe-session".into(),
//!     default_level: "debug".into(),
//!     also_stderr: true,
//!     ..Default::default()
//! });
//! tracing::info!("session runtime started");
//! ```

mod file_sink;
mod json_layer;

use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub use file_sink::{CentralLogWriter, WriterFactory};
pub use json_layer::{redact_field, JsonLayer, LogEntry, REDACTED};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, included in every JSONL line.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG` environment variable.
    pub default_level: String,

    /// Optional custom log file path.
    /// Defaults to `~/.recipe-session/logs/session.jsonl`.
    pub log_path: Option<PathBuf>,

    /// Write JSONL to the log file. When false only stderr is used.
    pub file_output: bool,

    /// Also emit compact logs to stderr for immediate feedback.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            file_output: true,
            also_stderr: false,
        }
    }
}

/// Initialize logging with custom configuration.
///
/// Calling this more than once is harmless: the first subscriber stays
/// installed and later calls are ignored. If the log file cannot be opened the
/// subscriber falls back to stderr only.
pub fn init_with_config(config: LogConfig) {
    let log_path = config.log_path.clone().unwrap_or_else(default_log_path);

    let json_layer = if config.file_output {
        match CentralLogWriter::new(&log_path) {
            Ok(writer) => Some(JsonLayer::new(
                config.service_name.clone(),
                WriterFactory::new(writer),
            )),
            Err(e) => {
                eprintln!("failed to open log file {}: {}", log_path.display(), e);
                None
            }
        }
    } else {
        None
    };
    let file_enabled = json_layer.is_some();

    // Without a file sink stderr is the only place logs can go.
    let stderr_layer = if config.also_stderr || !file_enabled {
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_file(false)
                .with_line_number(false)
                .compact()
                .with_writer(std::io::stderr),
        )
    } else {
        None
    };

    let result = tracing_subscriber::registry()
        .with(json_layer.map(|l| l.with_filter(env_filter(&config.default_level))))
        .with(stderr_layer.map(|l| l.with_filter(env_filter(&config.default_level))))
        .try_init();

    if result.is_ok() && file_enabled {
        tracing::debug!(
            log_path = %log_path.display(),
            service = %config.service_name,
            "observability initialized"
        );
    }
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Default log file location.
fn default_log_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".recipe-session")
        .join("logs")
        .join("session.jsonl")
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;
