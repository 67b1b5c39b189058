//! Logging initialization.
//!
//! Thin wrapper over the observability package: structured JSONL to
//! `<base>/logs/courier.jsonl`, filtered by `RUST_LOG` or the configured
//! level.

use crate::Paths;
use std::io;
use std::path::PathBuf;
use tracing::debug;

/// Initialize logging for `service_name`.
///
/// `also_stderr` mirrors events to stderr in compact form, which is what a
/// foreground broker wants.
pub fn init_logging(
    paths: &Paths,
    service_name: &str,
    level: &str,
    also_stderr: bool,
) -> io::Result<PathBuf> {
    let log_path = observability::init_with_config(observability::LogConfig {
        service_name: service_name.into(),
        default_level: level.into(),
        log_path: Some(paths.log_file()),
        also_stderr,
    })?;
    debug!(path = %log_path.display(), level, "Logging initialized");
    Ok(log_path)
}
