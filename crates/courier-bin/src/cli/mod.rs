//! Client subcommands: one connection per invocation, JSON on stdout.

use chrono::{SecondsFormat, Utc};
use courier_config_and_utils::Paths;
use courier_ipc::CourierClient;
use courier_protocol_types::Envelope;
use serde_json::Value;
use tracing::debug;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Arguments of `courier enqueue`.
pub struct EnqueueRequest {
    pub to: String,
    pub envelope_type: String,
    pub id: Option<String>,
    pub payload: Option<String>,
    pub from: Option<String>,
    pub tags: Vec<String>,
}

impl EnqueueRequest {
    fn into_envelope(self) -> CliResult<Envelope> {
        let id = self
            .id
            .unwrap_or_else(|| format!("e-{}", uuid::Uuid::new_v4().simple()));
        let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        let mut envelope = Envelope::new(&id, &ts, &self.to, &self.envelope_type);
        envelope.from = self.from;
        if !self.tags.is_empty() {
            envelope.tags = Some(self.tags);
        }
        if let Some(raw) = self.payload {
            envelope.payload = serde_json::from_str(&raw)
                .map_err(|e| format!("--payload is not valid JSON: {}", e))?;
        }
        Ok(envelope)
    }
}

async fn connect(paths: &Paths) -> CliResult<CourierClient> {
    let socket_path = paths.socket_file();
    let client = CourierClient::connect(&socket_path.to_string_lossy())
        .await
        .map_err(|e| format!("Cannot reach Courier at {}: {}", socket_path.display(), e))?;
    client.hello(None).await?;
    Ok(client)
}

fn print_json(value: &Value) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// `courier enqueue`: prints the accepted id.
pub async fn enqueue(paths: &Paths, request: EnqueueRequest) -> CliResult<()> {
    let to = request.to.clone();
    let envelope = request.into_envelope()?;
    let client = connect(paths).await?;
    let id = client.enqueue(&to, envelope).await?;
    print_json(&serde_json::json!({ "id": id }))
}

/// `courier subscribe`: prints each delivery on one line and keeps `credit`
/// deliveries in flight until `count` is reached, the broker goes away, or
/// Ctrl-C.
pub async fn subscribe(
    paths: &Paths,
    stream: &str,
    credit: u32,
    count: Option<usize>,
    auto_ack: bool,
) -> CliResult<()> {
    let client = connect(paths).await?;
    let mut deliveries = client.subscribe(stream)?;
    client.grant(credit)?;

    let mut received = 0usize;
    loop {
        if count.is_some_and(|limit| received >= limit) {
            break;
        }
        let envelope = tokio::select! {
            envelope = deliveries.recv() => match envelope {
                Some(envelope) => envelope,
                None => {
                    debug!("Connection closed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        };

        println!("{}", serde_json::to_string(&envelope)?);
        received += 1;

        if auto_ack {
            client.ack(&envelope.id)?;
            client.grant(1)?;
        }
    }
    Ok(())
}

/// `courier stats`
pub async fn stats(paths: &Paths, stream: &str) -> CliResult<()> {
    let client = connect(paths).await?;
    let stats = client.stats(stream).await?;
    print_json(&serde_json::to_value(stats)?)
}

/// `courier snapshot`
pub async fn snapshot(paths: &Paths, view: &str) -> CliResult<()> {
    let client = connect(paths).await?;
    let rows = client.snapshot(view).await?;
    print_json(&rows)
}

/// `courier metrics`
pub async fn metrics(paths: &Paths) -> CliResult<()> {
    let client = connect(paths).await?;
    let streams = client.metrics().await?;
    print_json(&serde_json::json!({ "streams": streams }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> EnqueueRequest {
        EnqueueRequest {
            to: "agents/amy/inbox".into(),
            envelope_type: "chat".into(),
            id: None,
            payload: None,
            from: None,
            tags: Vec::new(),
        }
    }

    #[test]
    fn test_envelope_defaults() {
        let env = request().into_envelope().unwrap();
        assert!(env.id.starts_with("e-"));
        assert!(env.ts.ends_with('Z'));
        assert_eq!(env.to, "agents/amy/inbox");
        assert_eq!(env.envelope_type, "chat");
        assert!(env.tags.is_none());
        assert_eq!(env.payload, Value::Null);
    }

    #[test]
    fn test_envelope_from_flags() {
        let env = EnqueueRequest {
            id: Some("m1".into()),
            payload: Some(r#"{"text":"hi"}"#.into()),
            from: Some("agents/bob".into()),
            tags: vec!["urgent".into()],
            ..request()
        }
        .into_envelope()
        .unwrap();
        assert_eq!(env.id, "m1");
        assert_eq!(env.from.as_deref(), Some("agents/bob"));
        assert_eq!(env.tags, Some(vec!["urgent".to_string()]));
        assert_eq!(env.payload["text"], "hi");
    }

    #[test]
    fn test_invalid_payload_rejected() {
        let err = EnqueueRequest {
            payload: Some("{not json".into()),
            ..request()
        }
        .into_envelope()
        .unwrap_err();
        assert!(err.to_string().contains("--payload"));
    }
}
