//! Post-accept observers.

use courier_protocol_types::Envelope;
use thiserror::Error;

/// Observer failure. Logged by the engine and never surfaced to the producer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ObserverError {
    #[error("Observer {observer} failed: {reason}")]
    Failed { observer: String, reason: String },
}

/// Result type alias using ObserverError.
pub type ObserverResult<T> = Result<T, ObserverError>;

/// Receives every envelope the engine accepts, in registration order.
///
/// Returned envelopes are follow-ups: the engine enqueues each one onto the
/// stream named by its `to` field once every observer has seen the current
/// envelope.
pub trait EnqueueObserver: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    fn on_accept(&self, envelope: &Envelope) -> ObserverResult<Vec<Envelope>>;
}
