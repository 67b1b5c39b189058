//! In-flight delivery leases.

use crate::SubscriberId;
use courier_protocol_types::Envelope;
use std::collections::HashMap;

/// One in-flight, unacknowledged delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Lease {
    /// Envelope id.
    pub id: String,
    /// Per-stream lease number; every delivery gets a fresh one.
    pub seq: u64,
    pub subscriber_id: SubscriberId,
    /// Absolute expiry in Unix milliseconds.
    pub expires_at: i64,
    /// Delivery attempt, starting at 1.
    pub attempt: u32,
    pub envelope: Envelope,
}

/// Leases keyed by envelope id. At most one lease exists per id.
#[derive(Debug, Default)]
pub struct LeaseTable {
    leases: HashMap<String, Lease>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a lease, returning the lease it replaced for the same id.
    pub fn insert(&mut self, lease: Lease) -> Option<Lease> {
        self.leases.insert(lease.id.clone(), lease)
    }

    pub fn remove(&mut self, id: &str) -> Option<Lease> {
        self.leases.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&Lease> {
        self.leases.get(id)
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    /// Remove every lease with `expires_at <= now`, oldest delivery first.
    pub fn take_expired(&mut self, now: i64) -> Vec<Lease> {
        self.take_where(|lease| lease.expires_at <= now)
    }

    /// Remove every lease held by a subscriber, oldest delivery first.
    pub fn take_for_subscriber(&mut self, subscriber_id: &SubscriberId) -> Vec<Lease> {
        self.take_where(|lease| &lease.subscriber_id == subscriber_id)
    }

    fn take_where(&mut self, predicate: impl Fn(&Lease) -> bool) -> Vec<Lease> {
        let ids: Vec<String> = self
            .leases
            .values()
            .filter(|lease| predicate(lease))
            .map(|lease| lease.id.clone())
            .collect();
        let mut taken: Vec<Lease> = ids
            .iter()
            .filter_map(|id| self.leases.remove(id))
            .collect();
        taken.sort_by_key(|lease| lease.seq);
        taken
    }
}
