use anyhow::Result;
use tokio::signal;

/// Wait for a termination signal: Ctrl+C anywhere, SIGTERM on unix.
pub async fn wait_for_shutdown() -> Result<()> {
    let ctrl_c = async {
        signal::ctrl_c().await.inspect_err(|e| {
            tracing::error!(%e, "Failed to install Ctrl+C handler");
        })
    };

    #[cfg(unix)]
    let terminate = async {
        let mut handler = signal::unix::signal(signal::unix::SignalKind::terminate()).inspect_err(|e| {
            tracing::error!(%e, "Failed to install SIGTERM handler");
        })?;
        handler.recv().await;
        Ok::<(), std::io::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<std::io::Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            tracing::info!("Received Ctrl+C signal");
        },
        result = terminate => {
            result?;
            tracing::info!("Received SIGTERM signal");
        },
    }

    tracing::info!("Shutdown signal received, initiating graceful shutdown");
    Ok(())
}
