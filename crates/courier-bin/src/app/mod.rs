//! Broker wiring and lifecycle management.

mod init;
mod lifecycle;

pub use init::run_broker;
pub use lifecycle::{check_status, stop_broker};
