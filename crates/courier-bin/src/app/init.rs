//! Broker initialization.

use courier_config_and_utils::{Config, Paths};
use courier_ipc::{CourierClient, CourierServer, FrameRecorder, ServerContext};
use courier_queue::{shared, LeaseScanner, QueueEngine};
use courier_views::{LatestPerAgentView, TriggerEngine};
use std::sync::Arc;
use tracing::{info, warn};

/// Build the engine, its observers and the shared server context.
pub fn build_context(config: &Config) -> Result<Arc<ServerContext>, Box<dyn std::error::Error>> {
    let view = Arc::new(LatestPerAgentView::new());
    let triggers = Arc::new(TriggerEngine::new(config.triggers.clone()));

    let mut engine = QueueEngine::new(config.engine_config());
    engine.register_observer(view.clone());
    engine.register_observer(triggers);

    let mut context = ServerContext::new(shared(engine), view);
    if let Some(path) = &config.record_path {
        context = context.with_recorder(Arc::new(FrameRecorder::open(path)?));
    }
    Ok(Arc::new(context))
}

/// Run the broker until SIGINT or SIGTERM.
pub async fn run_broker(config: Config, paths: Paths) -> Result<(), Box<dyn std::error::Error>> {
    let socket_path = paths.socket_file();
    let socket_str = socket_path.to_string_lossy().to_string();

    if socket_path.exists() {
        if let Ok(client) = CourierClient::connect(&socket_str).await {
            if client.hello(None).await.is_ok() {
                return Err("Courier is already running. Use 'courier stop' to stop it first.".into());
            }
        }
        eprintln!("Removing stale socket file");
        let _ = std::fs::remove_file(&socket_path);
    }

    paths.ensure_dirs()?;
    let pid = std::process::id();
    std::fs::write(paths.pid_file(), pid.to_string())?;

    info!(
        pid,
        max_depth = config.max_depth,
        lease_ms = config.lease_ms,
        triggers = config.triggers.len(),
        "Starting Courier"
    );

    let context = build_context(&config)?;
    let scanner = LeaseScanner::start(context.engine.clone(), config.scan_interval());
    let server = CourierServer::new(&socket_str, context);

    let shutdown_tx = server.shutdown_sender();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    let server_result = server.run().await;

    scanner.stop().await;
    let _ = std::fs::remove_file(paths.pid_file());
    let _ = std::fs::remove_file(&socket_path);
    info!("Courier stopped");

    server_result.map_err(|e| e.into())
}

async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, waiting for Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}
