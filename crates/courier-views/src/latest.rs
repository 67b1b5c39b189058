//! Latest envelope per agent inbox.

use courier_protocol_types::{Envelope, LATEST_PER_AGENT_VIEW};
use courier_queue::{EnqueueObserver, ObserverResult};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use tracing::trace;

/// Buffered change notifications per listener before it lags.
pub const VIEW_CHANNEL_CAPACITY: usize = 256;

/// One snapshot row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewRow {
    pub addr: String,
    pub env: Envelope,
}

/// Published whenever an inbox row changes.
pub type ViewChange = ViewRow;

/// Whether `addr` has the form `agents/<name>/inbox` with a non-empty name.
pub fn is_agent_inbox(addr: &str) -> bool {
    addr.strip_prefix("agents/")
        .and_then(|rest| rest.strip_suffix("/inbox"))
        .is_some_and(|name| !name.is_empty())
}

pub struct LatestPerAgentView {
    rows: RwLock<BTreeMap<String, Envelope>>,
    changes: broadcast::Sender<ViewChange>,
}

impl LatestPerAgentView {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(VIEW_CHANNEL_CAPACITY);
        Self {
            rows: RwLock::new(BTreeMap::new()),
            changes,
        }
    }

    /// Record `envelope` if it targets an agent inbox. Returns whether the
    /// view changed.
    pub fn update(&self, envelope: &Envelope) -> bool {
        if !is_agent_inbox(&envelope.to) {
            return false;
        }

        self.rows
            .write()
            .insert(envelope.to.clone(), envelope.clone());

        // No listeners is not an error.
        let _ = self.changes.send(ViewRow {
            addr: envelope.to.clone(),
            env: envelope.clone(),
        });
        trace!(addr = %envelope.to, id = %envelope.id, "View row updated");
        true
    }

    /// Rows ordered by address.
    pub fn snapshot(&self) -> Vec<ViewRow> {
        self.rows
            .read()
            .iter()
            .map(|(addr, env)| ViewRow {
                addr: addr.clone(),
                env: env.clone(),
            })
            .collect()
    }

    /// Listen for changes made after this call. Earlier changes are not
    /// replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<ViewChange> {
        self.changes.subscribe()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

impl Default for LatestPerAgentView {
    fn default() -> Self {
        Self::new()
    }
}

impl EnqueueObserver for LatestPerAgentView {
    fn name(&self) -> &str {
        LATEST_PER_AGENT_VIEW
    }

    fn on_accept(&self, envelope: &Envelope) -> ObserverResult<Vec<Envelope>> {
        self.update(envelope);
        Ok(Vec::new())
    }
}
