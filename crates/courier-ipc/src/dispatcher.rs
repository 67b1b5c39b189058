//! Per-connection frame dispatch.
//!
//! A [`Dispatcher`] owns one connection's protocol state: its single
//! subscription binding and whether `hello` carried a token. Replies and
//! deliveries go out on the connection's unbounded [`Outbound`] channel, so
//! nothing here blocks while the engine lock is held. Inbound frames are
//! recorded here; outbound frames are recorded by the connection's writer.

use crate::{Direction, FrameRecorder, Inbound};
use courier_protocol_types::{
    ControlFrame, Envelope, ErrorCode, ENQUEUE_REQ_ID, FALLBACK_REQ_ID, HELLO_REQ_ID,
    LATEST_PER_AGENT_VIEW, PROTOCOL_VERSION, SERVER_FEATURES,
};
use courier_queue::{QueueError, SharedEngine, SubscriberHandle, SubscriberId};
use courier_views::LatestPerAgentView;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Outbound frame queue for one connection.
pub type Outbound = mpsc::UnboundedSender<ControlFrame>;

/// State shared by every connection of a server.
pub struct ServerContext {
    pub engine: SharedEngine,
    pub view: Arc<LatestPerAgentView>,
    pub recorder: Option<Arc<FrameRecorder>>,
}

impl ServerContext {
    pub fn new(engine: SharedEngine, view: Arc<LatestPerAgentView>) -> Self {
        Self {
            engine,
            view,
            recorder: None,
        }
    }

    pub fn with_recorder(mut self, recorder: Arc<FrameRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }
}

pub struct Dispatcher {
    context: Arc<ServerContext>,
    outbound: Outbound,
    subscription: Option<SubscriberHandle>,
    token_present: bool,
    connection_id: String,
}

impl Dispatcher {
    pub fn new(context: Arc<ServerContext>, outbound: Outbound) -> Self {
        let raw = uuid::Uuid::new_v4().simple().to_string();
        Self {
            context,
            outbound,
            subscription: None,
            token_present: false,
            connection_id: format!("conn-{}", &raw[..8]),
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Whether the last `hello` carried a non-empty token.
    pub fn token_present(&self) -> bool {
        self.token_present
    }

    pub fn subscription(&self) -> Option<&SubscriberId> {
        self.subscription.as_ref().map(|handle| &handle.id)
    }

    pub fn handle(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Frame(frame) => self.handle_frame(frame),
            Inbound::Rejected {
                frame_type,
                req_id,
                detail,
                raw,
            } => {
                self.record(&raw);
                let req_id = req_id.as_deref().unwrap_or(FALLBACK_REQ_ID);
                if ControlFrame::is_known_type(&frame_type) {
                    debug!(conn = %self.connection_id, frame_type = %frame_type, detail = %detail, "Invalid frame");
                    self.send(ControlFrame::error(req_id, ErrorCode::InvalidRequest, detail));
                } else {
                    debug!(conn = %self.connection_id, frame_type = %frame_type, "Unsupported frame");
                    self.send(ControlFrame::error(req_id, ErrorCode::Unsupported, frame_type));
                }
            }
        }
    }

    pub fn handle_frame(&mut self, frame: ControlFrame) {
        self.record(&frame);
        debug!(conn = %self.connection_id, frame_type = frame.frame_type(), "Received frame");

        match frame {
            ControlFrame::Hello { token, .. } => {
                self.token_present = token.is_some_and(|t| !t.is_empty());
                self.send(ControlFrame::ok(
                    HELLO_REQ_ID,
                    json!({ "version": PROTOCOL_VERSION, "features": SERVER_FEATURES }),
                ));
            }
            ControlFrame::Enqueue { to, env, req_id } => {
                let result = self.context.engine.lock().enqueue(&to, env);
                match result {
                    Ok(id) => {
                        let req_id = req_id.as_deref().unwrap_or(ENQUEUE_REQ_ID);
                        self.send(ControlFrame::ok(req_id, json!({ "id": id })));
                    }
                    Err(e) => self.send_queue_error(req_id.as_deref(), e),
                }
            }
            ControlFrame::Subscribe { stream } => self.subscribe(&stream),
            ControlFrame::Grant { n } => {
                if n < 0 {
                    self.send(ControlFrame::error(
                        FALLBACK_REQ_ID,
                        ErrorCode::InvalidRequest,
                        format!("grant n must be non-negative, got {}", n),
                    ));
                    return;
                }
                let n = u32::try_from(n).unwrap_or(u32::MAX);
                self.with_subscription("grant", |engine, sub| engine.grant_credit(sub, n));
            }
            ControlFrame::Ack { id } => {
                self.with_subscription("ack", |engine, sub| engine.ack(sub, &id).map(|_| ()));
            }
            ControlFrame::Nack { id, delay_ms } => {
                self.with_subscription("nack", |engine, sub| {
                    engine.nack(sub, &id, delay_ms).map(|_| ())
                });
            }
            ControlFrame::Stats { req_id, stream } => {
                let result = self.context.engine.lock().stats(&stream);
                match result {
                    Ok(stats) => self.send_ok(&req_id, &stats),
                    Err(e) => self.send_queue_error(Some(&req_id), e),
                }
            }
            ControlFrame::Snapshot { req_id, view } => {
                if view == LATEST_PER_AGENT_VIEW {
                    let rows = self.context.view.snapshot();
                    self.send_ok(&req_id, &json!({ "rows": rows }));
                } else {
                    self.send(ControlFrame::error(&req_id, ErrorCode::UnknownView, view));
                }
            }
            ControlFrame::Metrics { req_id } => {
                let streams = self.context.engine.lock().all_stats();
                self.send_ok(&req_id, &json!({ "streams": streams }));
            }
            frame @ (ControlFrame::Ok { .. }
            | ControlFrame::Error { .. }
            | ControlFrame::Deliver { .. }) => {
                let req_id = frame.req_id().unwrap_or(FALLBACK_REQ_ID).to_string();
                self.send(ControlFrame::error(
                    &req_id,
                    ErrorCode::Unsupported,
                    frame.frame_type(),
                ));
            }
        }
    }

    /// Release the connection's subscription, returning its leases to the
    /// stream.
    pub fn close(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            if let Err(e) = self.context.engine.lock().release(&subscription.id) {
                warn!(conn = %self.connection_id, subscriber = %subscription.id, error = %e, "Failed to release subscription");
            }
        }
    }

    fn subscribe(&mut self, stream: &str) {
        if self
            .subscription
            .as_ref()
            .is_some_and(|current| current.stream == stream)
        {
            debug!(conn = %self.connection_id, stream = %stream, "Already subscribed to stream");
            return;
        }

        let mut engine = self.context.engine.lock();

        let handle = match engine.subscribe(stream) {
            Ok(handle) => handle,
            Err(e) => {
                drop(engine);
                self.send_queue_error(None, e);
                return;
            }
        };

        let outbound = self.outbound.clone();
        let deliver = Box::new(move |env: &Envelope| {
            // A closed channel means the connection is gone; release follows.
            let _ = outbound.send(ControlFrame::Deliver { env: env.clone() });
        });

        if let Err(e) = engine.bind_deliver(&handle.id, deliver) {
            if let Err(release_err) = engine.release(&handle.id) {
                warn!(conn = %self.connection_id, subscriber = %handle.id, error = %release_err, "Failed to release unbound subscription");
            }
            drop(engine);
            self.send_queue_error(None, e);
            return;
        }

        info!(conn = %self.connection_id, stream = %stream, subscriber = %handle.id, "Connection subscribed");
        if let Some(previous) = self.subscription.replace(handle) {
            if let Err(e) = engine.release(&previous.id) {
                warn!(conn = %self.connection_id, subscriber = %previous.id, error = %e, "Failed to release previous subscription");
            }
        }
    }

    fn with_subscription<F>(&mut self, op: &str, apply: F)
    where
        F: FnOnce(&mut courier_queue::QueueEngine, &SubscriberId) -> Result<(), QueueError>,
    {
        let Some(subscriber) = self.subscription.as_ref().map(|handle| handle.id.clone()) else {
            debug!(conn = %self.connection_id, op, "Ignored frame without a subscription");
            return;
        };

        let result = apply(&mut self.context.engine.lock(), &subscriber);
        if let Err(e) = result {
            self.send_queue_error(None, e);
        }
    }

    fn send_ok<T: serde::Serialize>(&self, req_id: &str, result: &T) {
        match serde_json::to_value(result) {
            Ok(value) => self.send(ControlFrame::ok(req_id, value)),
            Err(e) => self.send(ControlFrame::error(
                req_id,
                ErrorCode::Internal,
                e.to_string(),
            )),
        }
    }

    fn send_queue_error(&self, req_id: Option<&str>, error: QueueError) {
        let req_id = req_id.unwrap_or(FALLBACK_REQ_ID);
        debug!(conn = %self.connection_id, req_id, error = %error, "Request failed");
        self.send(ControlFrame::error(req_id, error.error_code(), error.to_string()));
    }

    fn send(&self, frame: ControlFrame) {
        if self.outbound.send(frame).is_err() {
            debug!(conn = %self.connection_id, "Dropped frame for closed connection");
        }
    }

    fn record<T: serde::Serialize>(&self, frame: &T) {
        if let Some(recorder) = &self.context.recorder {
            recorder.record(Direction::In, frame);
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.close();
    }
}
