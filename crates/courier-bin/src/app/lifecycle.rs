//! Broker lifecycle management (stop, status).

use courier_config_and_utils::Paths;
use courier_ipc::CourierClient;
use std::path::Path;
use std::time::Duration;

/// Stop the broker: SIGTERM, then SIGKILL if it is still up after 3 seconds.
pub async fn stop_broker(paths: &Paths) -> Result<(), Box<dyn std::error::Error>> {
    let socket_path = paths.socket_file();
    let pid_path = paths.pid_file();

    let Some(pid) = read_pid(&pid_path) else {
        println!("Courier is not running (no PID file)");
        if socket_path.exists() {
            let _ = std::fs::remove_file(&socket_path);
            println!("Cleaned up stale socket file");
        }
        return Ok(());
    };

    // SAFETY: kill(2) with a PID read from our own PID file.
    let signalled = unsafe { libc::kill(pid, libc::SIGTERM) } == 0;
    if !signalled {
        println!("Courier is not running (PID {} not found)", pid);
        let _ = std::fs::remove_file(&socket_path);
        let _ = std::fs::remove_file(&pid_path);
        return Ok(());
    }
    println!("Courier shutdown initiated");

    for _ in 0..30 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if !socket_path.exists() {
            println!("Courier stopped");
            return Ok(());
        }
    }

    println!(
        "Courier did not stop gracefully, sending SIGKILL to PID {}",
        pid
    );
    // SAFETY: as above.
    unsafe {
        libc::kill(pid, libc::SIGKILL);
    }
    let _ = std::fs::remove_file(&socket_path);
    let _ = std::fs::remove_file(&pid_path);
    println!("Courier killed");
    Ok(())
}

/// Print broker status.
pub async fn check_status(paths: &Paths) -> Result<(), Box<dyn std::error::Error>> {
    let socket_path = paths.socket_file();
    if !socket_path.exists() {
        println!("Courier is not running (socket not found)");
        return Ok(());
    }

    let client = match CourierClient::connect(&socket_path.to_string_lossy()).await {
        Ok(client) => client,
        Err(e) => {
            println!("Failed to connect to Courier: {}", e);
            println!("Courier may not be running or the socket may be stale");
            return Ok(());
        }
    };

    let hello = client.hello(None).await?;
    let streams = client.metrics().await?;

    println!("Courier is running");
    println!(
        "  Version: {}",
        hello.get("version").and_then(|v| v.as_str()).unwrap_or("unknown")
    );
    if let Some(pid) = read_pid(&paths.pid_file()) {
        println!("  PID:     {}", pid);
    }
    println!("  Socket:  {}", socket_path.display());
    println!("  Streams: {}", streams.len());
    Ok(())
}

fn read_pid(path: &Path) -> Option<i32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.pid");
        assert_eq!(read_pid(&path), None);

        std::fs::write(&path, "4242\n").unwrap();
        assert_eq!(read_pid(&path), Some(4242));

        std::fs::write(&path, "not a pid").unwrap();
        assert_eq!(read_pid(&path), None);
    }

    #[tokio::test]
    async fn test_stop_without_pid_file_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());
        stop_broker(&paths).await.unwrap();
    }
}
