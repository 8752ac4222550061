//! Shutdown signal handling
//!
//! Waits for SIGINT (Ctrl+C) or, on unix, SIGTERM and stops every task on the
//! monitor instance it was handed. No process-wide registry is involved.

use crate::monitor::ProgressMonitor;

/// Resolves when the process is asked to terminate
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = term.recv() => Ok(()),
    }
}

/// Resolves when the process is asked to terminate
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Waits for a shutdown signal, then shuts `monitor` down
pub async fn shutdown_on_signal(monitor: &ProgressMonitor) -> std::io::Result<()> {
    wait_for_shutdown_signal().await?;
    tracing::info!(
        "Shutdown signal received, stopping {} task(s)",
        monitor.active_count()
    );
    monitor.shutdown().await;
    Ok(())
}
