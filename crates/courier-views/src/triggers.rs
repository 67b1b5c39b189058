//! Trigger rules.
//!
//! A rule matches accepted envelopes on `from`, `to`, `type` and a set of
//! required tags. Every matching rule outside its cooldown emits one
//! `notify` envelope per action; the engine enqueues those as follow-ups.

use courier_protocol_types::Envelope;
use courier_queue::{Clock, EnqueueObserver, ObserverResult, SystemClock};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Origin address of generated notifications.
pub const NOTIFY_FROM: &str = "system/courier";

/// Envelope type of generated notifications.
pub const NOTIFY_TYPE: &str = "notify";

/// Envelope predicate. Absent fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerWhen {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub envelope_type: Option<String>,
    /// Every listed tag must be present on the envelope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl TriggerWhen {
    pub fn matches(&self, envelope: &Envelope) -> bool {
        if let Some(from) = &self.from {
            if envelope.from.as_deref() != Some(from.as_str()) {
                return false;
            }
        }
        if self.to.as_ref().is_some_and(|to| *to != envelope.to) {
            return false;
        }
        if self
            .envelope_type
            .as_ref()
            .is_some_and(|t| *t != envelope.envelope_type)
        {
            return false;
        }
        self.tags
            .as_ref()
            .map(|tags| tags.iter().all(|tag| envelope.has_tag(tag)))
            .unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum TriggerAction {
    /// Send a notification to `to`. Object payloads are merged over the
    /// default `{title, ref}` body.
    Notify {
        to: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerLimits {
    #[serde(rename = "cooldownMs", default, skip_serializing_if = "Option::is_none")]
    pub cooldown_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRule {
    pub id: String,
    #[serde(default)]
    pub when: TriggerWhen,
    #[serde(rename = "do", default)]
    pub actions: Vec<TriggerAction>,
    #[serde(default)]
    pub limits: TriggerLimits,
}

/// Evaluates rules against accepted envelopes.
pub struct TriggerEngine {
    rules: Vec<TriggerRule>,
    last_fire: Mutex<HashMap<String, i64>>,
    clock: Arc<dyn Clock>,
}

impl TriggerEngine {
    pub fn new(rules: Vec<TriggerRule>) -> Self {
        Self::with_clock(rules, Arc::new(SystemClock))
    }

    pub fn with_clock(rules: Vec<TriggerRule>, clock: Arc<dyn Clock>) -> Self {
        info!(rules = rules.len(), "Trigger engine loaded");
        Self {
            rules,
            last_fire: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn rules(&self) -> &[TriggerRule] {
        &self.rules
    }

    /// Notifications produced by `envelope`. Fired rules enter cooldown.
    pub fn evaluate(&self, envelope: &Envelope) -> Vec<Envelope> {
        let now = self.clock.now_ms();
        let mut last_fire = self.last_fire.lock();
        let mut emitted = Vec::new();

        for rule in &self.rules {
            if !rule.when.matches(envelope) {
                continue;
            }

            let cooldown = rule.limits.cooldown_ms.unwrap_or(0) as i64;
            if let Some(last) = last_fire.get(&rule.id) {
                if now - last < cooldown {
                    debug!(rule = %rule.id, id = %envelope.id, "Trigger in cooldown");
                    continue;
                }
            }

            for action in &rule.actions {
                match action {
                    TriggerAction::Notify { to, payload } => {
                        emitted.push(notification(envelope, to, payload.as_ref(), now));
                    }
                }
            }
            debug!(rule = %rule.id, id = %envelope.id, "Trigger fired");
            last_fire.insert(rule.id.clone(), now);
        }

        emitted
    }
}

impl EnqueueObserver for TriggerEngine {
    fn name(&self) -> &str {
        "triggers"
    }

    fn on_accept(&self, envelope: &Envelope) -> ObserverResult<Vec<Envelope>> {
        Ok(self.evaluate(envelope))
    }
}

fn notification(source: &Envelope, to: &str, extra: Option<&Value>, now_ms: i64) -> Envelope {
    let mut body = json!({
        "title": "Notification",
        "ref": source.id,
    });
    if let (Some(Value::Object(extra)), Value::Object(body)) = (extra, &mut body) {
        for (key, value) in extra {
            body.insert(key.clone(), value.clone());
        }
    }

    Envelope::new(&format!("n-{}", source.id), &rfc3339(now_ms), to, NOTIFY_TYPE)
        .with_from(NOTIFY_FROM)
        .with_payload(body)
}

fn rfc3339(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .unwrap_or_default()
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
