//! OS signal handling.
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - SIGHUP triggers config reload, not shutdown

use tokio::sync::mpsc;

use crate::lifecycle::Shutdown;

/// Wait for SIGINT/SIGTERM and trigger `shutdown`. Each SIGHUP sends a
/// reload request on `reload` when one is given.
#[cfg(unix)]
pub async fn listen(shutdown: Shutdown, reload: Option<mpsc::UnboundedSender<()>>) {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut term, mut hup) = match (signal(SignalKind::terminate()), signal(SignalKind::hangup())) {
        (Ok(term), Ok(hup)) => (term, hup),
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!(error = %e, "Failed to install signal handlers, falling back to Ctrl+C");
            let _ = tokio::signal::ctrl_c().await;
            shutdown.trigger();
            return;
        }
    };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("SIGINT received, shutting down");
                break;
            }
            _ = term.recv() => {
                tracing::info!("SIGTERM received, shutting down");
                break;
            }
            _ = hup.recv() => {
                match &reload {
                    Some(tx) => {
                        tracing::info!("SIGHUP received, reloading configuration");
                        let _ = tx.send(());
                    }
                    None => tracing::info!("SIGHUP received, nothing to reload"),
                }
            }
        }
    }
    shutdown.trigger();
}

#[cfg(not(unix))]
pub async fn listen(shutdown: Shutdown, _reload: Option<mpsc::UnboundedSender<()>>) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Ctrl+C received, shutting down");
    shutdown.trigger();
}
