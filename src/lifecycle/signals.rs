//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT, SIGHUP)
//! - Translate signals to internal events
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - SIGHUP triggers config reload, not shutdown
//! - A reload that fails to load is logged and dropped; the server never sees it

use std::path::PathBuf;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::loader::load_config;
use crate::config::ProxyConfig;
use crate::observability::metrics;

/// Resolve on the first SIGINT or SIGTERM.
pub async fn wait_for_termination() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("SIGINT received"),
        _ = terminate => tracing::info!("SIGTERM received"),
    }
}

/// Re-read `path` on every SIGHUP and send the result to `update_tx`.
#[cfg(unix)]
pub fn spawn_reload_on_sighup(
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<ProxyConfig>,
) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    Ok(tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            tracing::info!(path = ?path, "SIGHUP received, reloading configuration");
            match load_config(&path) {
                Ok(config) => {
                    if update_tx.send(config).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Reload failed, keeping current configuration");
                    metrics::record_reload(false);
                }
            }
        }
    }))
}
