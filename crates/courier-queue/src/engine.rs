//! Queue engine: registry of lazily created streams.

use crate::stream::StreamState;
use crate::{Clock, EnqueueObserver, Lease, QueueError, QueueResult, SystemClock};
use courier_protocol_types::{Envelope, StreamStats};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default ring capacity per stream.
pub const DEFAULT_MAX_DEPTH: usize = 100_000;

/// Default lease duration.
pub const DEFAULT_LEASE_MS: u64 = 30_000;

/// Default number of acknowledged ids remembered per stream.
pub const DEFAULT_DEDUP_CAPACITY: usize = 10_000;

/// Default number of latency samples kept per stream.
pub const DEFAULT_LATENCY_WINDOW: usize = 64;

/// Upper bound on observer follow-ups triggered by one enqueue.
pub const MAX_FOLLOW_UPS: usize = 64;

/// Push callback invoked for every delivered envelope.
pub type DeliverFn = Box<dyn FnMut(&Envelope) + Send>;

/// Engine shared across tasks. The mutex is the single serialization point
/// for every stream mutation.
pub type SharedEngine = Arc<Mutex<QueueEngine>>;

/// Wrap an engine for sharing.
pub fn shared(engine: QueueEngine) -> SharedEngine {
    Arc::new(Mutex::new(engine))
}

/// Engine tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Ring capacity per stream.
    pub max_depth: usize,
    /// Lease duration in milliseconds.
    pub lease_ms: u64,
    /// Acknowledged ids remembered per stream.
    pub dedup_capacity: usize,
    /// Latency samples kept per stream.
    pub latency_window: usize,
    /// Expiry requeues allowed before an envelope is dropped. `None` means
    /// unbounded.
    pub max_redeliveries: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            lease_ms: DEFAULT_LEASE_MS,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            latency_window: DEFAULT_LATENCY_WINDOW,
            max_redeliveries: None,
        }
    }
}

/// Opaque subscriber identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriberId(String);

impl SubscriberId {
    fn generate() -> Self {
        let raw = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("sub-{}", &raw[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SubscriberId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Subscription returned by [`QueueEngine::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberHandle {
    pub id: SubscriberId,
    pub stream: String,
}

/// Counts from one lease scan.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanReport {
    pub expired: usize,
    pub dead_lettered: usize,
    pub released_delayed: usize,
    pub delivered: usize,
}

impl ScanReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// In-memory queue engine.
pub struct QueueEngine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    streams: HashMap<String, StreamState>,
    subscribers: HashMap<SubscriberId, String>,
    observers: Vec<Arc<dyn EnqueueObserver>>,
}

impl QueueEngine {
    /// Create an engine on the wall clock.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            streams: HashMap::new(),
            subscribers: HashMap::new(),
            observers: Vec::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Append an observer. Observers run in registration order.
    pub fn register_observer(&mut self, observer: Arc<dyn EnqueueObserver>) {
        info!(observer = observer.name(), "Registered enqueue observer");
        self.observers.push(observer);
    }

    /// Accept an envelope onto a stream and return its id.
    ///
    /// An id still in the stream's dedup window is answered with the same id
    /// and nothing else happens. Otherwise the envelope is queued, delivery
    /// is attempted and the observers run.
    ///
    /// An envelope without its own `to` is addressed to `stream`.
    pub fn enqueue(&mut self, stream: &str, mut envelope: Envelope) -> QueueResult<String> {
        if envelope.to.is_empty() {
            envelope.to = stream.to_string();
        }
        let id = envelope.id.clone();
        if self.accept(stream, &envelope)? {
            self.notify_observers(envelope);
        }
        Ok(id)
    }

    /// Bind a subscriber to a stream. Fails if one is already bound.
    pub fn subscribe(&mut self, stream: &str) -> QueueResult<SubscriberHandle> {
        if stream.is_empty() {
            return Err(QueueError::InvalidStream(stream.to_string()));
        }

        let state = self.stream_mut(stream);
        if let Some(existing) = &state.subscriber {
            return Err(QueueError::AlreadySubscribed {
                stream: stream.to_string(),
                subscriber: existing.id.to_string(),
            });
        }

        let id = SubscriberId::generate();
        state.subscriber = Some(crate::stream::Subscriber::new(id.clone()));
        self.subscribers.insert(id.clone(), stream.to_string());

        info!(stream = %stream, subscriber = %id, "Subscriber bound");
        Ok(SubscriberHandle {
            id,
            stream: stream.to_string(),
        })
    }

    /// Register the push callback for a subscriber.
    pub fn bind_deliver(&mut self, subscriber_id: &SubscriberId, deliver: DeliverFn) -> QueueResult<()> {
        let (now, lease_ms) = self.timing();
        let state = self.subscribed_stream(subscriber_id)?;
        if let Some(subscriber) = state.subscriber.as_mut() {
            subscriber.deliver = Some(deliver);
        }
        state.deliver_ready(now, lease_ms);
        Ok(())
    }

    /// Add credit and deliver what it allows.
    pub fn grant_credit(&mut self, subscriber_id: &SubscriberId, n: u32) -> QueueResult<()> {
        let (now, lease_ms) = self.timing();
        let state = self.subscribed_stream(subscriber_id)?;
        if let Some(subscriber) = state.subscriber.as_mut() {
            subscriber.credit = subscriber.credit.saturating_add(n);
        }
        state.deliver_ready(now, lease_ms);
        Ok(())
    }

    /// Acknowledge a delivery. Returns whether a lease matched.
    pub fn ack(&mut self, subscriber_id: &SubscriberId, id: &str) -> QueueResult<bool> {
        let (now, lease_ms) = self.timing();
        let state = self.subscribed_stream(subscriber_id)?;
        let matched = state.leases.remove(id).is_some();
        if matched {
            state.dedup.insert(id);
        }
        state.deliver_ready(now, lease_ms);
        Ok(matched)
    }

    /// Reject a delivery. The envelope returns to the ring tail immediately,
    /// or after `delay_ms` when a positive delay is given. Returns whether a
    /// lease matched.
    pub fn nack(
        &mut self,
        subscriber_id: &SubscriberId,
        id: &str,
        delay_ms: Option<u64>,
    ) -> QueueResult<bool> {
        let (now, lease_ms) = self.timing();
        let ready_at = delay_ms.filter(|delay| *delay > 0).map(|delay| {
            now.saturating_add(i64::try_from(delay).unwrap_or(i64::MAX))
        });
        let state = self.subscribed_stream(subscriber_id)?;
        let lease = state.leases.remove(id);
        let matched = lease.is_some();
        match (lease, ready_at) {
            (Some(lease), Some(ready_at)) => state.delay(lease, ready_at),
            (Some(lease), None) => state.requeue(lease),
            (None, _) => {}
        }
        state.deliver_ready(now, lease_ms);
        Ok(matched)
    }

    /// Unbind a subscriber and return its leases to the ring.
    pub fn release(&mut self, subscriber_id: &SubscriberId) -> QueueResult<()> {
        let stream = self
            .subscribers
            .remove(subscriber_id)
            .ok_or_else(|| QueueError::UnknownSubscriber(subscriber_id.to_string()))?;
        if let Some(state) = self.streams.get_mut(&stream) {
            let returned = state.release_subscriber(subscriber_id);
            info!(stream = %stream, subscriber = %subscriber_id, returned, "Subscriber released");
        }
        Ok(())
    }

    /// Requeue expired leases, release due delayed nacks and deliver.
    pub fn scan_timeouts(&mut self) -> ScanReport {
        let (now, lease_ms) = self.timing();
        let max_redeliveries = self.config.max_redeliveries;

        let mut report = ScanReport::default();
        for state in self.streams.values_mut() {
            let outcome = state.expire_leases(now, max_redeliveries);
            report.expired += outcome.requeued;
            report.dead_lettered += outcome.dead_lettered;
            report.released_delayed += state.release_delayed(now);
            report.delivered += state.deliver_ready(now, lease_ms);
        }
        report
    }

    /// Stats for one stream.
    pub fn stats(&self, stream: &str) -> QueueResult<StreamStats> {
        self.streams
            .get(stream)
            .map(StreamState::stats)
            .ok_or_else(|| QueueError::UnknownStream(stream.to_string()))
    }

    /// Stats for every stream, ordered by address.
    pub fn all_stats(&self) -> BTreeMap<String, StreamStats> {
        self.streams
            .iter()
            .map(|(name, state)| (name.clone(), state.stats()))
            .collect()
    }

    /// Current credit balance of a subscriber.
    pub fn credit(&self, subscriber_id: &SubscriberId) -> Option<u32> {
        let stream = self.subscribers.get(subscriber_id)?;
        self.streams
            .get(stream)?
            .subscriber
            .as_ref()
            .map(|subscriber| subscriber.credit)
    }

    /// The live lease for an envelope id on a stream.
    pub fn lease(&self, stream: &str, id: &str) -> Option<&Lease> {
        self.streams.get(stream)?.leases.get(id)
    }

    /// Ids waiting in a stream's ring, oldest first.
    pub fn queued_ids(&self, stream: &str) -> Vec<String> {
        self.streams
            .get(stream)
            .map(StreamState::queued_ids)
            .unwrap_or_default()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    fn timing(&self) -> (i64, u64) {
        (self.clock.now_ms(), self.config.lease_ms)
    }

    fn stream_mut(&mut self, stream: &str) -> &mut StreamState {
        self.streams
            .entry(stream.to_string())
            .or_insert_with(|| {
                debug!(stream = %stream, "Created stream");
                StreamState::new(stream, &self.config)
            })
    }

    fn subscribed_stream(&mut self, subscriber_id: &SubscriberId) -> QueueResult<&mut StreamState> {
        let stream = self
            .subscribers
            .get(subscriber_id)
            .ok_or_else(|| QueueError::UnknownSubscriber(subscriber_id.to_string()))?;
        self.streams
            .get_mut(stream)
            .ok_or_else(|| QueueError::UnknownStream(stream.clone()))
    }

    /// Validate, dedup-check, queue and deliver. Returns `false` for a
    /// dedup replay.
    fn accept(&mut self, stream: &str, envelope: &Envelope) -> QueueResult<bool> {
        validate(stream, envelope)?;

        let (now, lease_ms) = self.timing();
        let state = self.stream_mut(stream);
        if state.dedup.contains(&envelope.id) {
            debug!(stream = %stream, id = %envelope.id, "Dropped replay of acknowledged id");
            return Ok(false);
        }

        state.accept(envelope.clone());
        state.deliver_ready(now, lease_ms);
        debug!(stream = %stream, id = %envelope.id, "Accepted envelope");
        Ok(true)
    }

    fn notify_observers(&mut self, envelope: Envelope) {
        if self.observers.is_empty() {
            return;
        }

        let observers = self.observers.clone();
        let mut pending = VecDeque::from([envelope]);
        let mut follow_ups = 0usize;

        while let Some(accepted) = pending.pop_front() {
            let mut emitted = Vec::new();
            for observer in &observers {
                match observer.on_accept(&accepted) {
                    Ok(envelopes) => emitted.extend(envelopes),
                    Err(e) => {
                        warn!(observer = observer.name(), id = %accepted.id, error = %e, "Observer failed");
                    }
                }
            }

            for follow_up in emitted {
                if follow_ups >= MAX_FOLLOW_UPS {
                    warn!(id = %follow_up.id, "Follow-up limit reached, dropping envelope");
                    continue;
                }
                follow_ups += 1;

                let target = follow_up.to.clone();
                match self.accept(&target, &follow_up) {
                    Ok(true) => pending.push_back(follow_up),
                    Ok(false) => {}
                    Err(e) => warn!(id = %follow_up.id, error = %e, "Rejected follow-up envelope"),
                }
            }
        }
    }
}

fn validate(stream: &str, envelope: &Envelope) -> QueueResult<()> {
    if envelope.id.is_empty() {
        return Err(QueueError::InvalidEnvelope("missing id".to_string()));
    }
    if envelope.ts.is_empty() {
        return Err(QueueError::InvalidEnvelope("missing ts".to_string()));
    }
    if stream.is_empty() {
        return Err(QueueError::InvalidEnvelope("missing to".to_string()));
    }
    Ok(())
}
