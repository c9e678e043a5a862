//! Immutable configuration generations.
//!
//! # Responsibilities
//! - Compile a validated ProxyConfig into the structures requests read
//! - Load every certificate the active profile references
//! - Swap generations atomically on reload
//!
//! # Data Flow
//! ```text
//! ProxyConfig (validated)
//!     → select profile
//!     → compile hosts (VirtualHost, HostMatcher)
//!     → load certificates (CertStore)
//!     → Snapshot { generation }
//!     → ArcSwap store (requests hold an Arc for their whole lifetime)
//! ```
//!
//! # Design Decisions
//! - A snapshot is fully built before it becomes visible
//! - A failed build leaves the current generation in place
//! - In-flight requests keep the generation they started with

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use thiserror::Error;

use crate::config::schema::{ListenerConfig, ProxyConfig, TimeoutConfig};
use crate::config::validation::{validate_config, ValidationError};
use crate::net::tls::{CertStore, TlsError};
use crate::observability::metrics;
use crate::routing::{CompileError, HostMatcher, HostTableError, VirtualHost};

/// Reasons a configuration cannot become the active generation.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("invalid configuration: {}", join(.0))]
    Validation(Vec<ValidationError>),

    #[error("profile {0:?} is not defined")]
    UnknownProfile(String),

    #[error("no profile selected")]
    NoProfile,

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    HostTable(#[from] HostTableError),

    #[error(transparent)]
    Tls(#[from] TlsError),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// One compiled configuration generation.
#[derive(Debug)]
pub struct Snapshot {
    pub generation: u64,
    pub profile: String,
    pub hosts: HostMatcher,
    pub certs: CertStore,
    pub listeners: Vec<ListenerConfig>,
    pub timeouts: TimeoutConfig,
}

impl Snapshot {
    /// Build generation `generation` from `config`.
    pub fn build(
        config: &ProxyConfig,
        profile_override: Option<&str>,
        generation: u64,
    ) -> Result<Self, SnapshotError> {
        validate_config(config).map_err(SnapshotError::Validation)?;

        let (name, profile) = match config.selected_profile_name(profile_override) {
            Some(name) => config
                .profiles
                .get(name)
                .map(|p| (name, p))
                .ok_or_else(|| SnapshotError::UnknownProfile(name.to_string()))?,
            None => return Err(SnapshotError::NoProfile),
        };

        let hosts = profile
            .hosts
            .iter()
            .map(VirtualHost::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        let hosts = HostMatcher::new(hosts, &profile.unknown_host)?;
        let certs = CertStore::load(&profile.hosts)?;

        Ok(Self {
            generation,
            profile: name.to_string(),
            hosts,
            certs,
            listeners: profile.listeners.clone(),
            timeouts: config.timeouts.clone(),
        })
    }
}

/// Holder of the current generation.
#[derive(Debug)]
pub struct SnapshotStore {
    current: ArcSwap<Snapshot>,
    profile_override: Option<String>,
    next_generation: AtomicU64,
}

impl SnapshotStore {
    /// Build generation 1. Startup fails if this fails.
    pub fn new(config: &ProxyConfig, profile_override: Option<String>) -> Result<Self, SnapshotError> {
        let snapshot = Snapshot::build(config, profile_override.as_deref(), 1)?;
        tracing::info!(
            profile = %snapshot.profile,
            hosts = snapshot.hosts.hosts().len(),
            certificates = snapshot.certs.len(),
            "Configuration generation 1 loaded"
        );
        Ok(Self {
            current: ArcSwap::from_pointee(snapshot),
            profile_override,
            next_generation: AtomicU64::new(2),
        })
    }

    /// Current generation. Hold the Arc for the whole request.
    pub fn load(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Build and publish a new generation, returning its number.
    ///
    /// On error the previous generation stays active.
    pub fn reload(&self, config: &ProxyConfig) -> Result<u64, SnapshotError> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        match Snapshot::build(config, self.profile_override.as_deref(), generation) {
            Ok(snapshot) => {
                let previous = self.current.load();
                if previous.listeners != snapshot.listeners {
                    tracing::warn!(
                        generation,
                        "Listener set changed; restart required for listener changes to apply"
                    );
                }
                tracing::info!(
                    generation,
                    profile = %snapshot.profile,
                    hosts = snapshot.hosts.hosts().len(),
                    "Configuration reloaded"
                );
                self.current.store(Arc::new(snapshot));
                metrics::record_reload(true);
                Ok(generation)
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    active_generation = self.current.load().generation,
                    "Configuration reload rejected, keeping current generation"
                );
                metrics::record_reload(false);
                Err(e)
            }
        }
    }
}
