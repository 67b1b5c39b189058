//! Post-accept observers for the Courier broker.
//!
//! - [`LatestPerAgentView`]: latest envelope per `agents/<name>/inbox` address,
//!   with change notifications on a broadcast channel
//! - [`TriggerEngine`]: rule-driven `notify` envelopes with per-rule cooldown
//!
//! Both implement [`courier_queue::EnqueueObserver`] and are registered on the
//! engine by the host.

mod latest;
mod triggers;

pub use latest::{is_agent_inbox, LatestPerAgentView, ViewChange, ViewRow, VIEW_CHANNEL_CAPACITY};
pub use triggers::{
    TriggerAction, TriggerEngine, TriggerLimits, TriggerRule, TriggerWhen, NOTIFY_FROM,
    NOTIFY_TYPE,
};
