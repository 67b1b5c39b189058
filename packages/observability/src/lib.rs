//! # Observability
//!
//! Tracing setup shared by every Courier process.
//!
//! Processes call [`init`] or [`init_with_config`] once at startup and use
//! the `tracing` macros everywhere else. Every event is appended as one JSON
//! object per line to a central file (`~/.courier/logs/courier.jsonl` unless
//! configured otherwise), so the log can be followed with
//! `tail -f ~/.courier/logs/courier.jsonl | jq`.
//!
//! ```rust,ignore
//! fn main() {
//!     observability::init("courier");
//!     tracing::info!("ready");
//! }
//! ```

mod file;
mod json_layer;

pub use file::{default_log_path, LogFileWriter};
pub use json_layer::{JsonLayer, LogEntry};

use std::io;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Written as `service` on every log line.
    pub service_name: String,

    /// Filter used when `RUST_LOG` is unset (e.g. "debug", "info,courier_ipc=trace").
    pub default_level: String,

    /// Log file path. Defaults to [`default_log_path`].
    pub log_path: Option<PathBuf>,

    /// Also emit compact human-readable logs to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Initialize with defaults for `service_name`.
pub fn init(service_name: &str) -> io::Result<PathBuf> {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    })
}

/// Install the global subscriber. Returns the log file path.
///
/// Fails if the log file cannot be opened or a global subscriber is
/// already installed.
pub fn init_with_config(config: LogConfig) -> io::Result<PathBuf> {
    let log_path = config.log_path.clone().unwrap_or_else(default_log_path);
    let writer = LogFileWriter::open(&log_path)?;

    let json_layer = JsonLayer::new(config.service_name.clone(), writer);

    let stderr_layer = config.also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(io::stderr)
            .with_filter(env_filter(&config.default_level))
    });

    tracing_subscriber::registry()
        .with(json_layer.with_filter(env_filter(&config.default_level)))
        .with(stderr_layer)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

    tracing::info!(
        service = %config.service_name,
        log_path = %log_path.display(),
        "observability initialized"
    );
    Ok(log_path)
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

pub use tracing::{debug, error, info, trace, warn, Level};
