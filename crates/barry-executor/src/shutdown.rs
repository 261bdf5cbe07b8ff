use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

use crate::AppState;

/// Wait for SIGTERM or ctrl-c, then mark the service as draining.
pub async fn wait_for_shutdown(state: Arc<AppState>) {
    shutdown_signal().await;
    info!("shutdown signal received");
    state.shutting_down.store(true, Ordering::Relaxed);
}

/// Listen for SIGTERM (container stop) or ctrl-c.
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let ctrl_c = tokio::signal::ctrl_c();
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = sigterm.recv() => info!("SIGTERM received"),
                _ = ctrl_c => info!("ctrl-c received"),
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to listen for SIGTERM, ctrl-c only");
            let _ = ctrl_c.await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
