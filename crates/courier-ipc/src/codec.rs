//! NDJSON frame codec.
//!
//! One JSON object per line, `\n` terminated. The decoder buffers partial
//! input across reads. Blank lines and lines that are not JSON are dropped;
//! JSON that does not decode as a [`ControlFrame`] is surfaced as
//! [`Inbound::Rejected`] so the server can reply to it.

use courier_protocol_types::ControlFrame;
use serde_json::Value;
use tracing::debug;

/// One decoded line.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Frame(ControlFrame),
    /// Valid JSON that is not a known frame, or a known frame type with
    /// invalid fields.
    Rejected {
        frame_type: String,
        req_id: Option<String>,
        detail: String,
        raw: Value,
    },
}

#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every complete line it finished.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Inbound> {
        self.buf.extend_from_slice(chunk);

        let mut decoded = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buf[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            if let Some(inbound) = decode_line(&self.buf[start..end]) {
                decoded.push(inbound);
            }
            start = end + 1;
        }
        self.buf.drain(..start);
        decoded
    }

    /// Bytes held for an unterminated line.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }
}

fn decode_line(line: &[u8]) -> Option<Inbound> {
    let Ok(text) = std::str::from_utf8(line) else {
        debug!(bytes = line.len(), "Dropped non-UTF-8 line");
        return None;
    };
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "Dropped malformed line");
            return None;
        }
    };

    match serde_json::from_value::<ControlFrame>(value.clone()) {
        Ok(frame) => Some(Inbound::Frame(frame)),
        Err(e) => Some(Inbound::Rejected {
            frame_type: value
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            req_id: value
                .get("reqId")
                .and_then(Value::as_str)
                .map(String::from),
            detail: e.to_string(),
            raw: value,
        }),
    }
}

/// Serialize a frame as one terminated line.
pub fn encode_frame(frame: &ControlFrame) -> Result<String, serde_json::Error> {
    let mut line = frame.to_json()?;
    line.push('\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_protocol_types::Envelope;

    fn frames(inbound: Vec<Inbound>) -> Vec<ControlFrame> {
        inbound
            .into_iter()
            .filter_map(|i| match i {
                Inbound::Frame(f) => Some(f),
                Inbound::Rejected { .. } => None,
            })
            .collect()
    }

    #[test]
    fn test_encode_appends_newline() {
        let line = encode_frame(&ControlFrame::Grant { n: 3 }).unwrap();
        assert_eq!(line, "{\"type\":\"grant\",\"n\":3}\n");
    }

    #[test]
    fn test_round_trip_drops_corrupted_record() {
        let enqueue = ControlFrame::Enqueue {
            to: "s".to_string(),
            env: Envelope::new("a", "2025-01-01T00:00:00Z", "s", "chat"),
            req_id: Some("r1".to_string()),
        };
        let ack = ControlFrame::Ack { id: "a".to_string() };

        let mut stream = encode_frame(&enqueue).unwrap();
        stream.push_str("{\"type\":\"grant\",\"n\":\n");
        stream.push_str(&encode_frame(&ack).unwrap());

        let mut decoder = FrameDecoder::new();
        assert_eq!(frames(decoder.push(stream.as_bytes())), vec![enqueue, ack]);
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_partial_input_is_buffered() {
        let line = encode_frame(&ControlFrame::Metrics {
            req_id: "r9".to_string(),
        })
        .unwrap();
        let (head, tail) = line.as_bytes().split_at(7);

        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(head).is_empty());
        assert_eq!(decoder.pending_len(), 7);
        let decoded = frames(decoder.push(tail));
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].req_id(), Some("r9"));
    }

    #[test]
    fn test_blank_lines_skipped() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"\n   \n\r\n").is_empty());
    }

    #[test]
    fn test_unknown_type_is_rejected_with_req_id() {
        let mut decoder = FrameDecoder::new();
        let decoded = decoder.push(b"{\"type\":\"purge\",\"reqId\":\"r4\"}\n");
        match &decoded[..] {
            [Inbound::Rejected {
                frame_type, req_id, ..
            }] => {
                assert_eq!(frame_type, "purge");
                assert_eq!(req_id.as_deref(), Some("r4"));
            }
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn test_known_type_with_bad_fields_is_rejected() {
        let mut decoder = FrameDecoder::new();
        let decoded = decoder.push(b"{\"type\":\"grant\",\"n\":\"lots\"}\n");
        assert!(matches!(
            &decoded[..],
            [Inbound::Rejected { frame_type, req_id: None, .. }] if frame_type == "grant"
        ));
    }
}
