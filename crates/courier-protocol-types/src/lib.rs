//! Pure control protocol types for the Courier broker.
//!
//! This crate contains only data types and serialization. There is no I/O,
//! no async and no transport here. It defines the shared language between client and server:
//! the [`Envelope`] carried through streams, the [`ControlFrame`] variants
//! exchanged over a connection, and the [`StreamStats`] read model.

use serde::{Deserialize, Serialize};

/// Protocol version announced in the `hello` reply.
pub const PROTOCOL_VERSION: &str = "v1";

/// Capabilities announced in the `hello` reply.
pub const SERVER_FEATURES: [&str; 3] = ["credit", "views", "triggers"];

/// Fixed request id used by the `hello` exchange.
pub const HELLO_REQ_ID: &str = "hello";

/// Reply id for an `enqueue` that did not carry its own `reqId`.
pub const ENQUEUE_REQ_ID: &str = "enqueue";

/// Reply id for an error raised by a frame that did not carry a `reqId`.
pub const FALLBACK_REQ_ID: &str = "req";

/// Name of the latest-per-agent snapshot view.
pub const LATEST_PER_AGENT_VIEW: &str = "latestPerAgent";

/// Immutable unit of message data exchanged through a stream.
///
/// `id`, `ts` and `to` default to empty strings when absent on the wire, so
/// an envelope missing `id` or `ts` reaches validation and is rejected with
/// [`ErrorCode::InvalidEnvelope`] instead of being dropped as a malformed
/// frame. An empty `to` is filled with the enqueue target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Producer-chosen id, used for deduplication.
    #[serde(default)]
    pub id: String,
    /// RFC 3339 creation timestamp.
    #[serde(default)]
    pub ts: String,
    /// Origin address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Destination stream address.
    #[serde(default)]
    pub to: String,
    /// Message type discriminator.
    #[serde(rename = "type", default)]
    pub envelope_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    /// Schema version. Any JSON number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<serde_json::Number>,
    /// Correlation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<serde_json::Map<String, serde_json::Value>>,
    /// Opaque payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Create an envelope with the required fields and an empty payload.
    pub fn new(id: &str, ts: &str, to: &str, envelope_type: &str) -> Self {
        Self {
            id: id.to_string(),
            ts: ts.to_string(),
            from: None,
            to: to.to_string(),
            envelope_type: envelope_type.to_string(),
            schema: None,
            version: None,
            corr: None,
            refs: None,
            tags: None,
            headers: None,
            payload: serde_json::Value::Null,
        }
    }

    /// Set the origin address.
    pub fn with_from(mut self, from: &str) -> Self {
        self.from = Some(from.to_string());
        self
    }

    /// Set the payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Set the tags.
    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = Some(tags.iter().map(|t| t.to_string()).collect());
        self
    }

    /// Whether the envelope carries a tag.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags
            .as_ref()
            .map(|tags| tags.iter().any(|t| t == tag))
            .unwrap_or(false)
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Per-stream counters and latency percentiles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStats {
    /// Envelopes waiting in the ring.
    pub depth: usize,
    /// Envelopes leased and not yet acknowledged.
    pub inflight: usize,
    /// Envelopes accepted since the stream was created.
    pub rate_in: u64,
    /// Envelopes delivered since the stream was created.
    pub rate_out: u64,
    pub lat_p50: u64,
    pub lat_p95: u64,
    /// Timestamp of the most recently accepted envelope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_ts: Option<String>,
    /// Nacked envelopes parked until their delay elapses.
    #[serde(default)]
    pub delayed: usize,
    /// Envelopes returned to the ring by nack or lease expiry.
    #[serde(default)]
    pub redelivered: u64,
    /// Envelopes dropped after reaching the redelivery ceiling.
    #[serde(default)]
    pub dead_lettered: u64,
}

/// Stable error codes carried by `error` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Missing or empty required envelope field.
    InvalidEnvelope,
    /// Read of a stream that was never referenced.
    UnknownStream,
    /// Snapshot of an unrecognized view.
    UnknownView,
    /// Frame type not recognized, or not accepted in this direction.
    Unsupported,
    /// Known frame type with invalid fields.
    InvalidRequest,
    /// Stream already has a bound subscriber.
    AlreadySubscribed,
    /// Any other failure.
    Internal,
}

impl ErrorCode {
    /// Wire representation of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidEnvelope => "InvalidEnvelope",
            ErrorCode::UnknownStream => "UnknownStream",
            ErrorCode::UnknownView => "UnknownView",
            ErrorCode::Unsupported => "Unsupported",
            ErrorCode::InvalidRequest => "InvalidRequest",
            ErrorCode::AlreadySubscribed => "AlreadySubscribed",
            ErrorCode::Internal => "Internal",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structured unit of the request/response/push protocol.
///
/// Frames are tagged by their `type` field. Requests carrying a `reqId`
/// expect exactly one terminal `ok` or `error` reply with the same id;
/// `deliver` is an unsolicited push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlFrame {
    Hello {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        features: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    Ok {
        #[serde(rename = "reqId")]
        req_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
    },
    Error {
        #[serde(rename = "reqId")]
        req_id: String,
        code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    Enqueue {
        to: String,
        env: Envelope,
        #[serde(rename = "reqId", default, skip_serializing_if = "Option::is_none")]
        req_id: Option<String>,
    },
    Subscribe {
        stream: String,
    },
    Grant {
        n: i64,
    },
    Ack {
        id: String,
    },
    Nack {
        id: String,
        #[serde(rename = "delayMs", default, skip_serializing_if = "Option::is_none")]
        delay_ms: Option<u64>,
    },
    Deliver {
        env: Envelope,
    },
    Stats {
        #[serde(rename = "reqId")]
        req_id: String,
        stream: String,
    },
    Snapshot {
        #[serde(rename = "reqId")]
        req_id: String,
        view: String,
    },
    Metrics {
        #[serde(rename = "reqId")]
        req_id: String,
    },
}

/// Every frame type name, in declaration order.
pub const FRAME_TYPES: [&str; 12] = [
    "hello",
    "ok",
    "error",
    "enqueue",
    "subscribe",
    "grant",
    "ack",
    "nack",
    "deliver",
    "stats",
    "snapshot",
    "metrics",
];

impl ControlFrame {
    /// Create an `ok` reply.
    pub fn ok(req_id: &str, result: serde_json::Value) -> Self {
        ControlFrame::Ok {
            req_id: req_id.to_string(),
            result: Some(result),
        }
    }

    /// Create an `error` reply.
    pub fn error(req_id: &str, code: ErrorCode, detail: impl Into<String>) -> Self {
        ControlFrame::Error {
            req_id: req_id.to_string(),
            code: code.as_str().to_string(),
            detail: Some(detail.into()),
        }
    }

    /// The `type` tag of this frame.
    pub fn frame_type(&self) -> &'static str {
        match self {
            ControlFrame::Hello { .. } => "hello",
            ControlFrame::Ok { .. } => "ok",
            ControlFrame::Error { .. } => "error",
            ControlFrame::Enqueue { .. } => "enqueue",
            ControlFrame::Subscribe { .. } => "subscribe",
            ControlFrame::Grant { .. } => "grant",
            ControlFrame::Ack { .. } => "ack",
            ControlFrame::Nack { .. } => "nack",
            ControlFrame::Deliver { .. } => "deliver",
            ControlFrame::Stats { .. } => "stats",
            ControlFrame::Snapshot { .. } => "snapshot",
            ControlFrame::Metrics { .. } => "metrics",
        }
    }

    /// The request id carried by this frame, if any.
    pub fn req_id(&self) -> Option<&str> {
        match self {
            ControlFrame::Ok { req_id, .. }
            | ControlFrame::Error { req_id, .. }
            | ControlFrame::Stats { req_id, .. }
            | ControlFrame::Snapshot { req_id, .. }
            | ControlFrame::Metrics { req_id } => Some(req_id),
            ControlFrame::Enqueue { req_id, .. } => req_id.as_deref(),
            _ => None,
        }
    }

    /// Whether `type_name` names a known frame variant.
    pub fn is_known_type(type_name: &str) -> bool {
        FRAME_TYPES.contains(&type_name)
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_envelope() -> Envelope {
        Envelope::new("m-1", "2025-01-01T00:00:00Z", "agents/jen/inbox", "chat")
            .with_from("agents/bob/outbox")
            .with_payload(json!({ "text": "hi" }))
    }

    #[test]
    fn test_envelope_type_field_renamed() {
        let json = sample_envelope().to_json().unwrap();
        assert!(json.contains("\"type\":\"chat\""));
        assert!(!json.contains("envelope_type"));
        assert!(!json.contains("\"schema\""));
    }

    #[test]
    fn test_envelope_missing_required_fields_default_to_empty() {
        let env = Envelope::from_json(r#"{"type":"chat","payload":1}"#).unwrap();
        assert!(env.id.is_empty());
        assert!(env.ts.is_empty());
        assert!(env.to.is_empty());
        assert_eq!(env.payload, json!(1));
    }

    #[test]
    fn test_envelope_version_accepts_any_number() {
        let env = Envelope::from_json(r#"{"id":"a","ts":"t","to":"s","type":"chat","version":1.5}"#)
            .unwrap();
        assert_eq!(env.version.as_ref().and_then(|v| v.as_f64()), Some(1.5));

        let env = Envelope::from_json(r#"{"id":"a","ts":"t","to":"s","type":"chat","version":2}"#)
            .unwrap();
        assert_eq!(env.version.as_ref().and_then(|v| v.as_u64()), Some(2));
        assert!(env.to_json().unwrap().contains("\"version\":2"));
    }

    #[test]
    fn test_envelope_has_tag() {
        let env = sample_envelope().with_tags(&["urgent", "ops"]);
        assert!(env.has_tag("ops"));
        assert!(!env.has_tag("other"));
        assert!(!sample_envelope().has_tag("ops"));
    }

    #[test]
    fn test_frame_wire_names() {
        let frame = ControlFrame::Nack {
            id: "m-1".to_string(),
            delay_ms: Some(250),
        };
        let json = frame.to_json().unwrap();
        assert!(json.contains("\"type\":\"nack\""));
        assert!(json.contains("\"delayMs\":250"));

        let frame = ControlFrame::Stats {
            req_id: "r1".to_string(),
            stream: "agents/jen/inbox".to_string(),
        };
        let json = frame.to_json().unwrap();
        assert!(json.contains("\"reqId\":\"r1\""));
    }

    #[test]
    fn test_every_variant_round_trips() {
        let frames = vec![
            ControlFrame::Hello {
                version: Some("v1".to_string()),
                features: Some(vec!["credit".to_string()]),
                token: None,
            },
            ControlFrame::ok("r1", json!({ "id": "m-1" })),
            ControlFrame::error("r2", ErrorCode::UnknownView, "nope"),
            ControlFrame::Enqueue {
                to: "agents/jen/inbox".to_string(),
                env: sample_envelope(),
                req_id: Some("r3".to_string()),
            },
            ControlFrame::Subscribe {
                stream: "agents/jen/inbox".to_string(),
            },
            ControlFrame::Grant { n: 5 },
            ControlFrame::Ack {
                id: "m-1".to_string(),
            },
            ControlFrame::Nack {
                id: "m-1".to_string(),
                delay_ms: None,
            },
            ControlFrame::Deliver {
                env: sample_envelope(),
            },
            ControlFrame::Stats {
                req_id: "r4".to_string(),
                stream: "s".to_string(),
            },
            ControlFrame::Snapshot {
                req_id: "r5".to_string(),
                view: LATEST_PER_AGENT_VIEW.to_string(),
            },
            ControlFrame::Metrics {
                req_id: "r6".to_string(),
            },
        ];

        let mut seen = Vec::new();
        for frame in frames {
            let json = frame.to_json().unwrap();
            let parsed = ControlFrame::from_json(&json).unwrap();
            assert_eq!(parsed, frame, "frame {} should round-trip", json);
            seen.push(frame.frame_type());
        }
        assert_eq!(seen, FRAME_TYPES.to_vec());
    }

    #[test]
    fn test_req_id_accessor() {
        assert_eq!(
            ControlFrame::Metrics {
                req_id: "r9".to_string()
            }
            .req_id(),
            Some("r9")
        );
        assert_eq!(ControlFrame::Grant { n: 1 }.req_id(), None);
        let enqueue = ControlFrame::Enqueue {
            to: "s".to_string(),
            env: sample_envelope(),
            req_id: None,
        };
        assert_eq!(enqueue.req_id(), None);
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(ControlFrame::from_json(r#"{"type":"shutdown"}"#).is_err());
        assert!(!ControlFrame::is_known_type("shutdown"));
        assert!(ControlFrame::is_known_type("deliver"));
    }

    #[test]
    fn test_error_code_wire_strings() {
        let frame = ControlFrame::error("r1", ErrorCode::InvalidEnvelope, "missing id");
        let json = frame.to_json().unwrap();
        assert!(json.contains("\"code\":\"InvalidEnvelope\""));
        assert_eq!(
            serde_json::to_string(&ErrorCode::AlreadySubscribed).unwrap(),
            "\"AlreadySubscribed\""
        );
        assert_eq!(ErrorCode::Internal.to_string(), "Internal");
    }

    #[test]
    fn test_stream_stats_camel_case() {
        let stats = StreamStats {
            depth: 1,
            rate_in: 2,
            lat_p95: 40,
            last_ts: Some("2025-01-01T00:00:00Z".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"rateIn\":2"));
        assert!(json.contains("\"latP95\":40"));
        assert!(json.contains("\"lastTs\""));
        assert!(json.contains("\"deadLettered\":0"));
    }
}
