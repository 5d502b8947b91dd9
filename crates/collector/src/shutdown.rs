//! Shutdown signal handling for the daemon and one-shot runs.

/// Completes when the process receives SIGTERM or SIGINT.
#[cfg(unix)]
pub async fn signal_handler() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let received = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    tracing::info!(signal = received, "initiating graceful shutdown");
}

/// Best-effort implementation for non-unix systems.
#[cfg(not(unix))]
pub async fn signal_handler() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C handler");
    tracing::info!("received CTRL+C, initiating graceful shutdown");
}
