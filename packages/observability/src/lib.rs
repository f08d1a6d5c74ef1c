//! # Observability
//!
//! Centralized logging layer for the hivelink workspace.
//!
//! Processes (the initiator, the responder, the local demo) call
//! `observability::init()` once at startup and use the standard `tracing`
//! macros everywhere else. They never decide where log lines end up.
//!
//! ## Sinks
//!
//! - A structured JSONL file, `~/.hivelink/logs/dev.jsonl` by default, shared
//!   by every process on the machine. Writes are append-only and flushed per
//!   line so initiator and responder can log into the same file.
//! - An optional compact stderr sink for foreground runs.
//!
//! `RUST_LOG` overrides the configured default level for both sinks.
//!
//! ## Usage
//!
//! ```rust,ignore
//! fn main() {
//!     observability::init_with_config(observability::LogConfig {
//!         service_name: "responder".into(),
//!         default_level: "debug".into(),
//!         also_stderr: true,
//!         ..Default::default()
//!     });
//!
//!     tracing::info!("listening");
//! }
//! ```

mod file_sink;
mod json_layer;

use std::path::PathBuf;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub use file_sink::{default_log_path, CentralLogWriter};
pub use json_layer::{JsonLayer, LogEntry};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the process role (e.g. "initiator", "responder").
    /// Included in every JSONL line for filtering.
    pub service_name: String,

    /// Default level filter (e.g. "debug", "info").
    /// Overridden by `RUST_LOG` when set.
    pub default_level: String,

    /// Custom log file path. Defaults to `~/.hivelink/logs/dev.jsonl`.
    pub log_path: Option<PathBuf>,

    /// Write JSONL to the central log file.
    pub file_output: bool,

    /// Also emit compact logs to stderr.
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

/// Initialize logging with default settings for the given service.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize logging with custom configuration.
///
/// If the central log file cannot be opened, file output is skipped and a
/// stderr sink is installed instead so the process still logs somewhere.
pub fn init_with_config(config: LogConfig) {
    let log_path = config.log_path.clone().or_else(default_log_path);

    let (json_layer, file_error) = match (config.file_output, log_path.as_ref()) {
        (true, Some(path)) => match CentralLogWriter::new(path) {
            Ok(writer) => (
                Some(
                    JsonLayer::new(config.service_name.clone(), writer)
                        .with_filter(env_filter(&config.default_level)),
                ),
                None,
            ),
            Err(e) => (None, Some(e)),
        },
        _ => (None, None),
    };

    let want_stderr = config.also_stderr || json_layer.is_none();
    let stderr_layer = want_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(std::io::stderr)
            .with_filter(env_filter(&config.default_level))
    });

    let installed = tracing_subscriber::registry()
        .with(json_layer)
        .with(stderr_layer)
        .try_init();

    if installed.is_err() {
        // A global subscriber already exists (tests, embedding hosts).
        return;
    }

    match (file_error, log_path) {
        (Some(e), Some(path)) => tracing::warn!(
            log_path = %path.display(),
            error = %e,
            "central log file unavailable, logging to stderr only"
        ),
        (None, Some(path)) if config.file_output => tracing::debug!(
            log_path = %path.display(),
            service = %config.service_name,
            "observability initialized"
        ),
        _ => {}
    }
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;
