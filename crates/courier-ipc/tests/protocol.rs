//! End-to-end protocol tests over in-memory duplex streams.

use courier_ipc::{serve_connection, ClientError, CourierClient, ServerContext};
use courier_protocol_types::Envelope;
use courier_queue::{shared, EngineConfig, QueueEngine};
use courier_views::LatestPerAgentView;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const TS: &str = "2025-01-01T00:00:00Z";

struct Harness {
    context: Arc<ServerContext>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Harness {
    fn new() -> Self {
        let view = Arc::new(LatestPerAgentView::new());
        let mut engine = QueueEngine::new(EngineConfig::default());
        engine.register_observer(view.clone());
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            context: Arc::new(ServerContext::new(shared(engine), view)),
            shutdown_tx,
        }
    }

    fn connect(&self) -> CourierClient {
        let (client_side, server_side) = tokio::io::duplex(64 * 1024);
        let context = self.context.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let _ = serve_connection(server_side, context, shutdown_rx).await;
        });
        CourierClient::new(client_side)
    }
}

fn env(id: &str, to: &str) -> Envelope {
    Envelope::new(id, TS, to, "chat")
}

async fn next_delivery(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Envelope>) -> Envelope {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("delivery timed out")
        .expect("delivery channel closed")
}

#[tokio::test]
async fn test_hello_and_enqueue() {
    let harness = Harness::new();
    let client = harness.connect();

    let hello = client.hello(Some("token")).await.unwrap();
    assert_eq!(hello["version"], "v1");

    let id = client.enqueue("s", env("a", "s")).await.unwrap();
    assert_eq!(id, "a");

    let stats = client.stats("s").await.unwrap();
    assert_eq!(stats.depth, 1);
    assert_eq!(stats.rate_in, 1);
}

#[tokio::test]
async fn test_remote_errors_are_typed() {
    let harness = Harness::new();
    let client = harness.connect();

    let err = client.stats("nowhere").await.unwrap_err();
    assert_eq!(err.code(), Some("UnknownStream"));

    let err = client.enqueue("s", env("", "s")).await.unwrap_err();
    assert_eq!(err.code(), Some("InvalidEnvelope"));

    let err = client.snapshot("bogus").await.unwrap_err();
    assert_eq!(
        err,
        ClientError::Remote {
            code: "UnknownView".to_string(),
            detail: "bogus".to_string(),
        }
    );
}

#[tokio::test]
async fn test_credit_flow_end_to_end() {
    let harness = Harness::new();
    let producer = harness.connect();
    let consumer = harness.connect();

    for id in ["a", "b", "c"] {
        producer.enqueue("jobs", env(id, "jobs")).await.unwrap();
    }

    let mut deliveries = consumer.subscribe("jobs").unwrap();
    consumer.grant(2).unwrap();
    assert_eq!(next_delivery(&mut deliveries).await.id, "a");
    assert_eq!(next_delivery(&mut deliveries).await.id, "b");

    consumer.ack("a").unwrap();
    consumer.nack("b", None).unwrap();
    consumer.grant(2).unwrap();
    assert_eq!(next_delivery(&mut deliveries).await.id, "c");
    assert_eq!(next_delivery(&mut deliveries).await.id, "b");

    let stats = producer.stats("jobs").await.unwrap();
    assert_eq!(stats.depth, 0);
    assert_eq!(stats.inflight, 2);
    assert_eq!(stats.rate_out, 4);
    assert_eq!(stats.redelivered, 1);
}

#[tokio::test]
async fn test_acked_id_is_deduplicated() {
    let harness = Harness::new();
    let client = harness.connect();

    let mut deliveries = client.subscribe("s").unwrap();
    client.grant(5).unwrap();
    client.enqueue("s", env("x", "s")).await.unwrap();
    assert_eq!(next_delivery(&mut deliveries).await.id, "x");
    client.ack("x").unwrap();

    assert_eq!(client.enqueue("s", env("x", "s")).await.unwrap(), "x");
    let stats = client.stats("s").await.unwrap();
    assert_eq!(stats.rate_in, 1);
    assert_eq!(stats.depth, 0);
    assert_eq!(stats.inflight, 0);
}

#[tokio::test]
async fn test_concurrent_requests_are_correlated() {
    let harness = Harness::new();
    let client = Arc::new(harness.connect());

    let mut tasks = Vec::new();
    for i in 0..20 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            let id = format!("m-{}", i);
            let stream = format!("s-{}", i % 4);
            client.enqueue(&stream, env(&id, &stream)).await.unwrap() == id
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap());
    }

    let metrics = client.metrics().await.unwrap();
    assert_eq!(metrics.len(), 4);
    assert_eq!(metrics.values().map(|s| s.rate_in).sum::<u64>(), 20);
}

#[tokio::test]
async fn test_disconnect_releases_subscription() {
    let harness = Harness::new();

    let first = harness.connect();
    let _deliveries = first.subscribe("s").unwrap();
    first.enqueue("s", env("a", "s")).await.unwrap();
    first.grant(1).unwrap();
    first.stats("s").await.unwrap();
    drop(first);

    let mut released = false;
    for _ in 0..200 {
        tokio::time::sleep(Duration::from_millis(5)).await;
        let stats = harness.context.engine.lock().stats("s").unwrap();
        if stats.inflight == 0 && stats.depth == 1 {
            released = true;
            break;
        }
    }
    assert!(released);

    let second = harness.connect();
    let mut deliveries = second.subscribe("s").unwrap();
    second.grant(1).unwrap();
    assert_eq!(next_delivery(&mut deliveries).await.id, "a");
}

#[tokio::test]
async fn test_snapshot_reflects_latest_inbox_envelopes() {
    let harness = Harness::new();
    let client = harness.connect();

    client
        .enqueue("agents/amy/inbox", env("1", "agents/amy/inbox"))
        .await
        .unwrap();
    client
        .enqueue("agents/amy/inbox", env("2", "agents/amy/inbox"))
        .await
        .unwrap();
    client.enqueue("rooms/lobby", env("3", "rooms/lobby")).await.unwrap();

    let snapshot = client.snapshot("latestPerAgent").await.unwrap();
    let rows = snapshot["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["addr"], "agents/amy/inbox");
    assert_eq!(rows[0]["env"]["id"], "2");
}

#[tokio::test]
async fn test_pending_requests_fail_on_shutdown() {
    let harness = Harness::new();
    let client = harness.connect();
    client.hello(None).await.unwrap();

    let _ = harness.shutdown_tx.send(());

    let mut closed = false;
    for _ in 0..200 {
        match client.metrics().await {
            Err(ClientError::ConnectionClosed) => {
                closed = true;
                break;
            }
            _ => tokio::time::sleep(Duration::from_millis(5)).await,
        }
    }
    assert!(closed);
}
