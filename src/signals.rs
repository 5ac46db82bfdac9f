// src/signals.rs

//! OS shutdown signals.
//!
//! On unix, SIGINT, SIGTERM and SIGQUIT all request a graceful shutdown.
//! Elsewhere only Ctrl-C is available.

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Completes when a termination signal arrives.
///
/// Fails only if the signal listeners cannot be registered.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv() => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigquit.recv() => info!("received SIGQUIT"),
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("received Ctrl-C");
    Ok(())
}

/// Cancel `token` on the first termination signal.
pub fn spawn_signal_listener(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            res = wait_for_shutdown_signal() => match res {
                Ok(()) => token.cancel(),
                Err(e) => error!(error = %e, "failed to listen for shutdown signals"),
            },
            _ = token.cancelled() => {}
        }
    })
}
