//! Startup orchestration.
//!
//! # Responsibilities
//! - Compile the first configuration generation
//! - Build the TLS acceptor config when any listener needs it
//! - Bind listeners
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners are bound last and served only once the server runs

use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use thiserror::Error;

use crate::config::snapshot::{Snapshot, SnapshotError, SnapshotStore};
use crate::config::ProxyConfig;
use crate::net::listener::{BoundListener, ListenerError};
use crate::net::tls::{rustls_config, TlsError};

/// Reasons the server cannot start.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// Everything the server needs before it can accept traffic.
pub struct Prepared {
    pub store: Arc<SnapshotStore>,
    pub tls: Option<RustlsConfig>,
    pub listeners: Vec<BoundListener>,
}

/// Compile the configuration and load its certificates without binding anything.
///
/// Returns the name of the profile that would be served.
pub fn check(config: &ProxyConfig, profile_override: Option<&str>) -> Result<String, StartupError> {
    let snapshot = Snapshot::build(config, profile_override, 0)?;
    Ok(snapshot.profile)
}

/// Config → snapshot → TLS → listeners.
pub fn prepare(config: &ProxyConfig, profile_override: Option<String>) -> Result<Prepared, StartupError> {
    let store = Arc::new(SnapshotStore::new(config, profile_override)?);
    let snapshot = store.load();

    let tls = if snapshot.listeners.iter().any(|l| l.tls) {
        Some(rustls_config(Arc::clone(&store))?)
    } else {
        None
    };

    let listeners = snapshot
        .listeners
        .iter()
        .map(BoundListener::bind)
        .collect::<Result<Vec<_>, _>>()?;

    tracing::info!(
        profile = %snapshot.profile,
        listeners = listeners.len(),
        "Startup complete"
    );

    Ok(Prepared {
        store,
        tls,
        listeners,
    })
}
