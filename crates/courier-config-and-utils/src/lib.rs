//! Configuration, paths, errors and logging setup for the Courier broker.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{Config, DEFAULT_LOG_LEVEL, DEFAULT_SCAN_INTERVAL_MS, LOG_LEVEL_ENV};
pub use error::{CoreError, CoreResult};
pub use logging::init_logging;
pub use paths::Paths;
