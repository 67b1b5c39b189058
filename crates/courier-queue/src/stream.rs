//! Per-stream state: ring, leases, dedup window, stats and the subscriber slot.

use crate::engine::{DeliverFn, EngineConfig, SubscriberId};
use crate::{DedupWindow, Lease, LeaseTable, RingStore, StatsAggregator};
use courier_protocol_types::{Envelope, StreamStats};
use tracing::{debug, warn};

/// Envelope waiting in the ring, with the number of deliveries it has had.
#[derive(Debug)]
pub(crate) struct QueuedEnvelope {
    pub envelope: Envelope,
    pub attempts: u32,
}

/// Nacked envelope held back until `ready_at`.
#[derive(Debug)]
struct DelayedEnvelope {
    ready_at: i64,
    queued: QueuedEnvelope,
}

pub(crate) struct Subscriber {
    pub id: SubscriberId,
    pub credit: u32,
    pub deliver: Option<DeliverFn>,
}

impl Subscriber {
    pub fn new(id: SubscriberId) -> Self {
        Self {
            id,
            credit: 0,
            deliver: None,
        }
    }
}

/// Outcome of one expiry pass over a stream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ExpiryOutcome {
    pub requeued: usize,
    pub dead_lettered: usize,
}

pub(crate) struct StreamState {
    name: String,
    ring: RingStore<QueuedEnvelope>,
    pub(crate) leases: LeaseTable,
    pub(crate) dedup: DedupWindow,
    stats: StatsAggregator,
    delayed: Vec<DelayedEnvelope>,
    pub(crate) subscriber: Option<Subscriber>,
    next_lease_seq: u64,
}

impl StreamState {
    pub fn new(name: &str, config: &EngineConfig) -> Self {
        Self {
            name: name.to_string(),
            ring: RingStore::new(config.max_depth),
            leases: LeaseTable::new(),
            dedup: DedupWindow::new(config.dedup_capacity),
            stats: StatsAggregator::new(config.latency_window),
            delayed: Vec::new(),
            subscriber: None,
            next_lease_seq: 0,
        }
    }

    /// Push a freshly accepted envelope.
    pub fn accept(&mut self, envelope: Envelope) {
        self.stats.record_accept(&envelope.ts);
        self.ring.push(QueuedEnvelope {
            envelope,
            attempts: 0,
        });
    }

    /// Return a leased envelope to the ring tail.
    pub fn requeue(&mut self, lease: Lease) {
        self.stats.redelivered += 1;
        self.ring.push(QueuedEnvelope {
            envelope: lease.envelope,
            attempts: lease.attempt,
        });
    }

    /// Park a leased envelope until `ready_at`.
    pub fn delay(&mut self, lease: Lease, ready_at: i64) {
        self.delayed.push(DelayedEnvelope {
            ready_at,
            queued: QueuedEnvelope {
                envelope: lease.envelope,
                attempts: lease.attempt,
            },
        });
    }

    /// Deliver while the subscriber has credit and the ring is non-empty.
    /// Returns the number of envelopes delivered.
    pub fn deliver_ready(&mut self, now: i64, lease_ms: u64) -> usize {
        let Some(subscriber) = self.subscriber.as_mut() else {
            return 0;
        };

        let mut delivered = 0;
        while subscriber.credit > 0 {
            let Some(queued) = self.ring.pop() else {
                break;
            };

            self.next_lease_seq += 1;
            let latency = latency_ms(&queued.envelope.ts, now);
            subscriber.credit -= 1;
            self.stats.record_delivery(latency);

            let id = queued.envelope.id.clone();
            let lease = Lease {
                id: id.clone(),
                seq: self.next_lease_seq,
                subscriber_id: subscriber.id.clone(),
                expires_at: now.saturating_add(i64::try_from(lease_ms).unwrap_or(i64::MAX)),
                attempt: queued.attempts + 1,
                envelope: queued.envelope,
            };
            if let Some(replaced) = self.leases.insert(lease) {
                debug!(stream = %self.name, id = %replaced.id, "Replaced lease for duplicate id");
            }

            if let (Some(deliver), Some(leased)) = (subscriber.deliver.as_mut(), self.leases.get(&id)) {
                deliver(&leased.envelope);
            }
            delivered += 1;
        }

        if delivered > 0 {
            debug!(stream = %self.name, delivered, "Delivered envelopes");
        }
        delivered
    }

    /// Requeue (or dead-letter) every lease that expired at `now`.
    pub fn expire_leases(&mut self, now: i64, max_redeliveries: Option<u32>) -> ExpiryOutcome {
        let mut outcome = ExpiryOutcome::default();
        for lease in self.leases.take_expired(now) {
            if max_redeliveries.is_some_and(|max| lease.attempt > max) {
                warn!(
                    stream = %self.name,
                    id = %lease.id,
                    attempts = lease.attempt,
                    "Redelivery ceiling reached, dropping envelope"
                );
                self.stats.dead_lettered += 1;
                outcome.dead_lettered += 1;
                continue;
            }
            debug!(stream = %self.name, id = %lease.id, "Lease expired, requeueing");
            self.requeue(lease);
            outcome.requeued += 1;
        }
        outcome
    }

    /// Move delayed envelopes whose delay elapsed to the ring tail.
    pub fn release_delayed(&mut self, now: i64) -> usize {
        if self.delayed.is_empty() {
            return 0;
        }
        let (mut due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.delayed)
            .into_iter()
            .partition(|delayed| delayed.ready_at <= now);
        self.delayed = pending;
        due.sort_by_key(|delayed| delayed.ready_at);

        let released = due.len();
        for delayed in due {
            self.stats.redelivered += 1;
            self.ring.push(delayed.queued);
        }
        released
    }

    /// Remove the subscriber and return its leases to the ring.
    pub fn release_subscriber(&mut self, subscriber_id: &SubscriberId) -> usize {
        if self
            .subscriber
            .as_ref()
            .is_some_and(|subscriber| &subscriber.id == subscriber_id)
        {
            self.subscriber = None;
        }
        let leases = self.leases.take_for_subscriber(subscriber_id);
        let returned = leases.len();
        for lease in leases {
            self.requeue(lease);
        }
        returned
    }

    pub fn stats(&self) -> StreamStats {
        let (lat_p50, lat_p95) = self.stats.latency_percentiles();
        StreamStats {
            depth: self.ring.len(),
            inflight: self.leases.len(),
            rate_in: self.stats.rate_in,
            rate_out: self.stats.rate_out,
            lat_p50,
            lat_p95,
            last_ts: self.stats.last_ts.clone(),
            delayed: self.delayed.len(),
            redelivered: self.stats.redelivered,
            dead_lettered: self.stats.dead_lettered,
        }
    }

    pub fn queued_ids(&self) -> Vec<String> {
        self.ring
            .iter()
            .map(|queued| queued.envelope.id.clone())
            .collect()
    }
}

/// `max(0, now - ts)`; an unparseable timestamp counts as zero latency.
fn latency_ms(ts: &str, now: i64) -> u64 {
    chrono::DateTime::parse_from_rfc3339(ts)
        .map(|sent| (now - sent.timestamp_millis()).max(0) as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_from_rfc3339() {
        let sent = chrono::DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .timestamp_millis();
        assert_eq!(latency_ms("2025-01-01T00:00:00Z", sent + 250), 250);
        assert_eq!(latency_ms("2025-01-01T00:00:00Z", sent - 10), 0);
        assert_eq!(latency_ms("yesterday", sent), 0);
    }
}
