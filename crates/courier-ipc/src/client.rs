//! Control protocol client.
//!
//! Requests are correlated by `reqId` (`r1`, `r2`, ... per client; `hello`
//! always uses `hello`). Flow control frames are fire-and-forget. The most
//! recent `subscribe` owns the delivery channel.

use crate::{
    encode_frame, ClientError, ClientResult, Direction, FrameDecoder, FrameRecorder, Inbound,
};
use courier_protocol_types::{ControlFrame, Envelope, StreamStats, HELLO_REQ_ID};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type Reply = ClientResult<Option<Value>>;

#[derive(Default)]
struct Pending {
    waiters: HashMap<String, oneshot::Sender<Reply>>,
    closed: bool,
}

/// Client for one connection.
pub struct CourierClient {
    outbound: mpsc::UnboundedSender<ControlFrame>,
    pending: Arc<Mutex<Pending>>,
    deliveries: Arc<Mutex<Option<mpsc::UnboundedSender<Envelope>>>>,
    next_id: AtomicU64,
    recorder: Option<Arc<FrameRecorder>>,
    reader_task: JoinHandle<()>,
}

impl CourierClient {
    /// Connect to a server socket.
    pub async fn connect(socket_path: &str) -> ClientResult<Self> {
        let stream = UnixStream::connect(socket_path)
            .await
            .map_err(|e| ClientError::Connect(format!("{}: {}", socket_path, e)))?;
        Ok(Self::new(stream))
    }

    /// Wrap an established byte stream.
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::build(stream, None)
    }

    /// Like [`CourierClient::new`], recording every frame sent and received.
    pub fn with_recorder<S>(stream: S, recorder: Arc<FrameRecorder>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::build(stream, Some(recorder))
    }

    fn build<S>(stream: S, recorder: Option<Arc<FrameRecorder>>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ControlFrame>();
        let pending = Arc::new(Mutex::new(Pending::default()));
        let deliveries = Arc::new(Mutex::new(None));

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let line = match encode_frame(&frame) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(error = %e, "Failed to encode frame");
                        continue;
                    }
                };
                if writer.write_all(line.as_bytes()).await.is_err()
                    || writer.flush().await.is_err()
                {
                    debug!("Failed to write frame, connection closed");
                    break;
                }
            }
            let _ = writer.shutdown().await;
        });

        let reader_task = tokio::spawn(read_frames(
            reader,
            pending.clone(),
            deliveries.clone(),
            recorder.clone(),
        ));

        Self {
            outbound,
            pending,
            deliveries,
            next_id: AtomicU64::new(1),
            recorder,
            reader_task,
        }
    }

    /// Open the session. Returns `{version, features}`.
    pub async fn hello(&self, token: Option<&str>) -> ClientResult<Value> {
        let reply = self
            .request(
                HELLO_REQ_ID.to_string(),
                ControlFrame::Hello {
                    version: Some(courier_protocol_types::PROTOCOL_VERSION.to_string()),
                    features: None,
                    token: token.map(String::from),
                },
            )
            .await?;
        Ok(reply.unwrap_or(Value::Null))
    }

    /// Enqueue `env` onto `to`. Returns the accepted id.
    pub async fn enqueue(&self, to: &str, env: Envelope) -> ClientResult<String> {
        let req_id = self.next_req_id();
        let frame = ControlFrame::Enqueue {
            to: to.to_string(),
            env,
            req_id: Some(req_id.clone()),
        };
        let reply = self.request(req_id, frame).await?;
        reply
            .as_ref()
            .and_then(|r| r.get("id"))
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| ClientError::UnexpectedReply(format!("{:?}", reply)))
    }

    /// Bind this connection to `stream`. Deliveries arrive on the returned
    /// channel, which replaces any earlier one.
    pub fn subscribe(&self, stream: &str) -> ClientResult<mpsc::UnboundedReceiver<Envelope>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.deliveries.lock() = Some(tx);
        self.send(ControlFrame::Subscribe {
            stream: stream.to_string(),
        })?;
        Ok(rx)
    }

    pub fn grant(&self, n: u32) -> ClientResult<()> {
        self.send(ControlFrame::Grant { n: i64::from(n) })
    }

    pub fn ack(&self, id: &str) -> ClientResult<()> {
        self.send(ControlFrame::Ack { id: id.to_string() })
    }

    pub fn nack(&self, id: &str, delay_ms: Option<u64>) -> ClientResult<()> {
        self.send(ControlFrame::Nack {
            id: id.to_string(),
            delay_ms,
        })
    }

    pub async fn stats(&self, stream: &str) -> ClientResult<StreamStats> {
        let req_id = self.next_req_id();
        let frame = ControlFrame::Stats {
            req_id: req_id.clone(),
            stream: stream.to_string(),
        };
        let reply = self.request(req_id, frame).await?;
        Ok(serde_json::from_value(reply.unwrap_or(Value::Null))?)
    }

    /// Snapshot a view. Returns the reply's `result`.
    pub async fn snapshot(&self, view: &str) -> ClientResult<Value> {
        let req_id = self.next_req_id();
        let frame = ControlFrame::Snapshot {
            req_id: req_id.clone(),
            view: view.to_string(),
        };
        Ok(self.request(req_id, frame).await?.unwrap_or(Value::Null))
    }

    pub async fn metrics(&self) -> ClientResult<BTreeMap<String, StreamStats>> {
        let req_id = self.next_req_id();
        let frame = ControlFrame::Metrics {
            req_id: req_id.clone(),
        };
        let reply = self.request(req_id, frame).await?;
        let streams = reply
            .and_then(|mut r| r.get_mut("streams").map(Value::take))
            .unwrap_or(Value::Null);
        Ok(serde_json::from_value(streams)?)
    }

    fn next_req_id(&self) -> String {
        format!("r{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn request(&self, req_id: String, frame: ControlFrame) -> Reply {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if pending.closed {
                return Err(ClientError::ConnectionClosed);
            }
            if pending.waiters.insert(req_id.clone(), tx).is_some() {
                debug!(req_id = %req_id, "Replaced pending request with the same id");
            }
        }

        if let Err(e) = self.send(frame) {
            self.pending.lock().waiters.remove(&req_id);
            return Err(e);
        }

        rx.await.unwrap_or(Err(ClientError::ConnectionClosed))
    }

    fn send(&self, frame: ControlFrame) -> ClientResult<()> {
        if let Some(recorder) = &self.recorder {
            recorder.record(Direction::Out, &frame);
        }
        self.outbound
            .send(frame)
            .map_err(|_| ClientError::ConnectionClosed)
    }
}

impl Drop for CourierClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn read_frames<R>(
    mut reader: R,
    pending: Arc<Mutex<Pending>>,
    deliveries: Arc<Mutex<Option<mpsc::UnboundedSender<Envelope>>>>,
    recorder: Option<Arc<FrameRecorder>>,
) where
    R: AsyncRead + Unpin,
{
    let mut decoder = FrameDecoder::new();
    let mut chunk = vec![0u8; 8 * 1024];

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "Read failed");
                break;
            }
        };

        for inbound in decoder.push(&chunk[..n]) {
            let frame = match inbound {
                Inbound::Frame(frame) => frame,
                Inbound::Rejected { frame_type, .. } => {
                    debug!(frame_type = %frame_type, "Ignored unrecognized frame");
                    continue;
                }
            };
            if let Some(recorder) = &recorder {
                recorder.record(Direction::In, &frame);
            }

            match frame {
                ControlFrame::Ok { req_id, result } => resolve(&pending, &req_id, Ok(result)),
                ControlFrame::Error {
                    req_id,
                    code,
                    detail,
                } => resolve(
                    &pending,
                    &req_id,
                    Err(ClientError::Remote {
                        code,
                        detail: detail.unwrap_or_default(),
                    }),
                ),
                ControlFrame::Deliver { env } => match deliveries.lock().as_ref() {
                    Some(tx) => {
                        let _ = tx.send(env);
                    }
                    None => debug!(id = %env.id, "Delivery without a subscription handler"),
                },
                other => debug!(frame_type = other.frame_type(), "Ignored client-bound frame"),
            }
        }
    }

    deliveries.lock().take();
    let mut pending = pending.lock();
    pending.closed = true;
    for (_, waiter) in pending.waiters.drain() {
        let _ = waiter.send(Err(ClientError::ConnectionClosed));
    }
}

fn resolve(pending: &Mutex<Pending>, req_id: &str, reply: Reply) {
    let waiter = pending.lock().waiters.remove(req_id);
    match waiter {
        Some(waiter) => {
            let _ = waiter.send(reply);
        }
        None => match reply {
            Err(e) => warn!(req_id = %req_id, error = %e, "Unmatched error reply"),
            Ok(_) => warn!(req_id = %req_id, "Unmatched reply"),
        },
    }
}
