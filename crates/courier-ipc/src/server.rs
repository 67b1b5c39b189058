//! Unix domain socket server.
//!
//! Each accepted connection gets a reader loop feeding a [`Dispatcher`] and
//! a writer task draining the connection's outbound channel. The writer also
//! records outbound frames, so recorder I/O never runs under the engine lock.
//! All connections share one engine through [`ServerContext`].

use crate::{
    encode_frame, Direction, Dispatcher, FrameDecoder, FrameRecorder, IpcError, IpcResult,
    ServerContext,
};
use courier_protocol_types::ControlFrame;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::net::UnixListener;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

const READ_CHUNK: usize = 8 * 1024;

/// Control protocol server listening on a Unix domain socket.
pub struct CourierServer {
    socket_path: String,
    context: Arc<ServerContext>,
    shutdown_tx: broadcast::Sender<()>,
}

impl CourierServer {
    pub fn new(socket_path: &str, context: Arc<ServerContext>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            socket_path: socket_path.to_string(),
            context,
            shutdown_tx,
        }
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }

    /// Get a shutdown receiver.
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Get a shutdown sender (for tasks that need to trigger shutdown).
    pub fn shutdown_sender(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Trigger shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Listen until shutdown. A stale socket file is replaced and the socket
    /// file is removed on exit.
    pub async fn run(&self) -> IpcResult<()> {
        let socket_path = Path::new(&self.socket_path);
        if socket_path.exists() {
            std::fs::remove_file(socket_path)?;
        }
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(socket_path)
            .map_err(|e| IpcError::Socket(format!("Failed to bind {}: {}", self.socket_path, e)))?;
        info!(path = %self.socket_path, "Courier server listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _)) => {
                            let context = self.context.clone();
                            let shutdown_rx = self.shutdown_tx.subscribe();
                            tokio::spawn(async move {
                                if let Err(e) = serve_connection(stream, context, shutdown_rx).await {
                                    error!(error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Accept error");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Courier server shutting down");
                    break;
                }
            }
        }

        let _ = std::fs::remove_file(&self.socket_path);
        Ok(())
    }
}

/// Serve one connection until EOF, a read error or shutdown. The
/// connection's subscription is released before returning.
pub async fn serve_connection<S>(
    stream: S,
    context: Arc<ServerContext>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> IpcResult<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, writer) = tokio::io::split(stream);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(write_frames(writer, outbound_rx, context.recorder.clone()));

    let mut dispatcher = Dispatcher::new(context, outbound_tx);
    let conn = dispatcher.connection_id().to_string();
    debug!(conn = %conn, "Client connected");

    let mut decoder = FrameDecoder::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    let outcome = loop {
        tokio::select! {
            read = reader.read(&mut chunk) => {
                match read {
                    Ok(0) => {
                        debug!(conn = %conn, "Client disconnected");
                        break Ok(());
                    }
                    Ok(n) => {
                        for inbound in decoder.push(&chunk[..n]) {
                            dispatcher.handle(inbound);
                        }
                    }
                    Err(e) => break Err(IpcError::Io(e)),
                }
            }
            _ = shutdown_rx.recv() => {
                debug!(conn = %conn, "Closing connection for shutdown");
                break Ok(());
            }
        }
    };

    dispatcher.close();
    drop(dispatcher);
    if let Err(e) = writer_task.await {
        warn!(conn = %conn, error = %e, "Writer task failed");
    }
    outcome
}

async fn write_frames<S>(
    mut writer: WriteHalf<S>,
    mut outbound: mpsc::UnboundedReceiver<ControlFrame>,
    recorder: Option<Arc<FrameRecorder>>,
) where
    S: AsyncWrite,
{
    while let Some(frame) = outbound.recv().await {
        if let Some(recorder) = &recorder {
            recorder.record(Direction::Out, &frame);
        }
        let line = match encode_frame(&frame) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to encode frame");
                continue;
            }
        };
        if writer.write_all(line.as_bytes()).await.is_err() || writer.flush().await.is_err() {
            debug!("Failed to write frame, client disconnected");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CourierClient;
    use courier_queue::{shared, EngineConfig, QueueEngine};
    use courier_views::LatestPerAgentView;
    use std::time::Duration;
    use tempfile::TempDir;

    fn context() -> Arc<ServerContext> {
        let view = Arc::new(LatestPerAgentView::new());
        let engine = shared(QueueEngine::new(EngineConfig::default()));
        Arc::new(ServerContext::new(engine, view))
    }

    #[tokio::test]
    async fn test_server_shutdown() {
        let server = CourierServer::new("/tmp/courier-test-unused.sock", context());
        let mut receiver = server.shutdown_receiver();
        server.shutdown();

        let result = tokio::time::timeout(Duration::from_millis(100), receiver.recv()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_server_over_unix_socket() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("courier.sock");
        let socket_str = socket.to_string_lossy().to_string();

        let server = Arc::new(CourierServer::new(&socket_str, context()));
        let running = server.clone();
        let handle = tokio::spawn(async move { running.run().await });

        for _ in 0..100 {
            if socket.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let client = CourierClient::connect(&socket_str).await.unwrap();
        let hello = client.hello(None).await.unwrap();
        assert_eq!(hello["version"], "v1");

        server.shutdown();
        handle.await.unwrap().unwrap();
        assert!(!socket.exists());
    }

    #[tokio::test]
    async fn test_writer_records_outbound_frames() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("frames.jsonl");
        let recorder = Arc::new(FrameRecorder::open(&path).unwrap());
        let view = Arc::new(LatestPerAgentView::new());
        let engine = shared(QueueEngine::new(EngineConfig::default()));
        let context = Arc::new(ServerContext::new(engine, view).with_recorder(recorder));

        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(serve_connection(server_io, context, shutdown_rx));

        let client = CourierClient::new(client_io);
        let mut deliveries = client.subscribe("s").unwrap();
        client.grant(1).unwrap();
        let env = courier_protocol_types::Envelope::new("a", "2025-01-01T00:00:00Z", "s", "chat");
        client.enqueue("s", env).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), deliveries.recv())
            .await
            .unwrap()
            .unwrap();

        let _ = shutdown_tx.send(());
        task.await.unwrap().unwrap();

        let lines: Vec<serde_json::Value> = std::fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        let outbound: Vec<&str> = lines
            .iter()
            .filter(|line| line["dir"] == "out")
            .map(|line| line["frame"]["type"].as_str().unwrap())
            .collect();
        assert!(outbound.contains(&"deliver"));
        assert!(outbound.contains(&"ok"));
    }
}
