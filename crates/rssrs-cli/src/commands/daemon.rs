use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use rssrs_core::{
    ipc::DaemonClient,
    scheduler::{SchedulerEvent, SchedulerService},
    storage::Database,
    AppConfig, Backend, DaemonServer, EventBus,
};

/// PID of a live daemon, cleaning up a stale PID file
fn running_pid(pid_path: &Path) -> Option<u32> {
    let contents = fs::read_to_string(pid_path).ok()?;
    let pid: u32 = contents.trim().parse().ok()?;

    let alive = Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false);
    if alive {
        return Some(pid);
    }

    let _ = fs::remove_file(pid_path);
    None
}

fn write_pid_file(pid_path: &Path) -> Result<()> {
    if let Some(parent) = pid_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::File::create(pid_path)?;
    writeln!(file, "{}", std::process::id())?;
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

/// Start the daemon
pub async fn start(config: Arc<AppConfig>) -> Result<()> {
    let pid_path = config.pid_path();
    if let Some(pid) = running_pid(&pid_path) {
        println!("Daemon is already running (PID: {})", pid);
        return Ok(());
    }

    println!("Starting rssrs daemon...");

    let db = Database::new(&config).await?;
    let backend = Backend::new(db, EventBus::new());
    let server = DaemonServer::new(backend.clone(), Arc::clone(&config))?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let scheduler = SchedulerService::new(backend, Arc::clone(&config))?.with_event_sender(event_tx);
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                SchedulerEvent::FeedsRefreshed { new_items, failed } => {
                    info!("Refresh pass: {} new items, {} feeds failed", new_items, failed)
                }
                SchedulerEvent::Error { task, message } => error!("{} failed: {}", task, message),
            }
        }
    });

    write_pid_file(&pid_path)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal");
        let _ = signal_tx.send(true);
    });

    println!(
        "Daemon started (PID: {}). Press Ctrl+C or run 'rssrs daemon stop' to stop.",
        std::process::id()
    );
    println!("  Socket: {}", config.socket_path().display());
    println!("  Refresh interval: {} seconds", config.sync.refresh_interval_secs);

    let serve = async {
        let result = server.run(shutdown_rx.clone()).await;
        if result.is_err() {
            // Without the socket there is nothing to serve; stop the scheduler too
            let _ = shutdown_tx.send(true);
        }
        result
    };
    let (served, ()) = tokio::join!(serve, scheduler.run(shutdown_rx.clone()));

    let _ = fs::remove_file(&pid_path);
    served?;
    println!("Daemon stopped.");

    Ok(())
}

/// Stop the daemon
pub async fn stop(config: &AppConfig) -> Result<()> {
    let pid_path = config.pid_path();
    let Some(pid) = running_pid(&pid_path) else {
        println!("Daemon is not running.");
        return Ok(());
    };

    println!("Stopping daemon (PID: {})...", pid);
    let output = Command::new("kill").arg("-TERM").arg(pid.to_string()).output()?;
    if !output.status.success() {
        println!("Failed to stop daemon. You may need to kill it manually: kill {}", pid);
        return Ok(());
    }

    // Wait a moment for graceful shutdown
    tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;

    if running_pid(&pid_path).is_none() {
        println!("Daemon stopped successfully.");
    } else {
        let _ = Command::new("kill").arg("-9").arg(pid.to_string()).output();
        let _ = fs::remove_file(&pid_path);
        println!("Daemon forcefully terminated.");
    }

    Ok(())
}

/// Show daemon status
pub async fn status(config: &AppConfig) -> Result<()> {
    let pid_path = config.pid_path();
    let Some(pid) = running_pid(&pid_path) else {
        println!("Daemon is not running.");
        return Ok(());
    };

    println!("Daemon is running (PID: {})", pid);
    println!("PID file: {}", pid_path.display());

    match DaemonClient::new(config.socket_path()).status().await {
        Ok(status) => {
            println!("Uptime: {} seconds", status.uptime_secs);
            println!(
                "Scheduler: {}",
                if status.scheduler_running { "running" } else { "disabled" }
            );
            println!("Event subscribers: {}", status.event_subscribers);
        }
        Err(e) => println!("Socket not answering: {}", e),
    }

    Ok(())
}
