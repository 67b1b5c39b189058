//! Stream queue engine for the Courier broker.
//!
//! This crate provides:
//! - Ring store: capacity-bounded FIFO with overwrite-oldest on overflow
//! - Lease table, dedup window and stats aggregator per stream
//! - Queue engine: enqueue/subscribe/grant/ack/nack/stats over lazily created streams
//! - Post-accept observers invoked after every accepted envelope
//! - Lease scanner: owned background task that expires leases and releases delayed nacks
//!
//! All engine mutations go through `&mut QueueEngine`. Hosts that share the
//! engine across tasks wrap it in a [`SharedEngine`], which is the single
//! serialization point for every stream.

mod clock;
mod dedup;
mod engine;
mod error;
mod lease;
mod observer;
mod ring;
mod scanner;
mod stats;
mod stream;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dedup::DedupWindow;
pub use engine::{
    shared, DeliverFn, EngineConfig, QueueEngine, ScanReport, SharedEngine, SubscriberHandle,
    SubscriberId, DEFAULT_DEDUP_CAPACITY, DEFAULT_LATENCY_WINDOW, DEFAULT_LEASE_MS,
    DEFAULT_MAX_DEPTH, MAX_FOLLOW_UPS,
};
pub use error::{QueueError, QueueResult};
pub use lease::{Lease, LeaseTable};
pub use observer::{EnqueueObserver, ObserverError, ObserverResult};
pub use ring::RingStore;
pub use scanner::{LeaseScanner, DEFAULT_SCAN_INTERVAL};
pub use stats::{percentile, StatsAggregator};
