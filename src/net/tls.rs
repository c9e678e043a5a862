//! TLS configuration and certificate loading.
//!
//! # Responsibilities
//! - Load PEM certificate chains and private keys per virtual host
//! - Select the certificate from the SNI name on every handshake
//! - Build the rustls server config shared by all TLS listeners
//!
//! # Design Decisions
//! - Certificates live in the Snapshot, so a reload swaps them with the routes
//! - No SNI match (or no SNI at all) fails the handshake; there is no default certificate
//! - ALPN offers h2 and http/1.1

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use rustls::crypto::aws_lc_rs::{self, sign::any_supported_type};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use thiserror::Error;

use crate::config::snapshot::SnapshotStore;
use crate::config::{HostConfig, TlsConfig};
use crate::http::request::normalize_host;
use crate::observability::metrics;

/// Errors loading TLS material.
#[derive(Debug, Error)]
pub enum TlsError {
    /// Certificate file missing, unreadable or not PEM.
    #[error("failed to load certificate {path}: {message}")]
    Certificate { path: String, message: String },

    /// Key file missing, unreadable or empty.
    #[error("failed to load private key {path}: {message}")]
    PrivateKey { path: String, message: String },

    /// Key type unsupported by the crypto provider.
    #[error("unsupported private key {path}: {source}")]
    SigningKey {
        path: String,
        #[source]
        source: rustls::Error,
    },

    /// rustls rejected the server configuration.
    #[error("TLS configuration error: {0}")]
    Config(#[from] rustls::Error),
}

fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let failed = |message: String| TlsError::Certificate {
        path: path.display().to_string(),
        message,
    };
    let file = File::open(path).map_err(|e| failed(e.to_string()))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| failed(e.to_string()))?;
    if certs.is_empty() {
        return Err(failed("no certificates found in file".to_string()));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let failed = |message: String| TlsError::PrivateKey {
        path: path.display().to_string(),
        message,
    };
    let file = File::open(path).map_err(|e| failed(e.to_string()))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| failed(e.to_string()))?
        .ok_or_else(|| failed("no private key found in file".to_string()))
}

/// Load a certificate chain and its key into a rustls CertifiedKey.
pub fn load_certified_key(tls: &TlsConfig) -> Result<CertifiedKey, TlsError> {
    let chain = load_certificates(&tls.cert_path)?;
    let key = load_private_key(&tls.key_path)?;
    let signing_key = any_supported_type(&key).map_err(|source| TlsError::SigningKey {
        path: tls.key_path.display().to_string(),
        source,
    })?;
    Ok(CertifiedKey::new(chain, signing_key))
}

/// Certificates of one generation, indexed by hostname.
#[derive(Debug, Default)]
pub struct CertStore {
    by_name: HashMap<String, Arc<CertifiedKey>>,
}

impl CertStore {
    /// Load the certificate of every host that declares one.
    pub fn load(hosts: &[HostConfig]) -> Result<Self, TlsError> {
        let mut by_name = HashMap::new();
        for host in hosts {
            let Some(tls) = &host.tls else { continue };
            let key = Arc::new(load_certified_key(tls)?);
            tracing::debug!(
                names = ?host.names,
                cert = %tls.cert_path.display(),
                "Loaded certificate"
            );
            for name in &host.names {
                by_name.insert(normalize_host(name), Arc::clone(&key));
            }
        }
        Ok(Self { by_name })
    }

    pub fn get(&self, server_name: &str) -> Option<Arc<CertifiedKey>> {
        self.by_name.get(&normalize_host(server_name)).cloned()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Picks the certificate for a handshake from the current generation.
#[derive(Debug)]
pub struct SniResolver {
    store: Arc<SnapshotStore>,
}

impl SniResolver {
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self { store }
    }
}

impl ResolvesServerCert for SniResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let Some(sni) = client_hello.server_name() else {
            tracing::debug!("TLS handshake without SNI rejected");
            metrics::record_tls_handshake_failure();
            return None;
        };
        let key = self.store.load().certs.get(sni);
        if key.is_none() {
            tracing::warn!(sni = %sni, "No certificate for SNI");
            metrics::record_tls_handshake_failure();
        }
        key
    }
}

/// Build the rustls config for TLS listeners.
pub fn rustls_config(store: Arc<SnapshotStore>) -> Result<RustlsConfig, TlsError> {
    let mut config = ServerConfig::builder_with_provider(Arc::new(aws_lc_rs::default_provider()))
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(SniResolver::new(store)));
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(RustlsConfig::from_config(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{generate_simple_self_signed, CertifiedKey as Generated};

    fn write_pair(dir: &Path, name: &str) -> TlsConfig {
        let Generated { cert, signing_key } = generate_simple_self_signed(vec![name.to_string()]).unwrap();
        let cert_path = dir.join(format!("{name}.pem"));
        let key_path = dir.join(format!("{name}.key"));
        std::fs::write(&cert_path, cert.pem()).unwrap();
        std::fs::write(&key_path, signing_key.serialize_pem()).unwrap();
        TlsConfig { cert_path, key_path }
    }

    fn host(names: &[&str], tls: Option<TlsConfig>) -> HostConfig {
        HostConfig {
            names: names.iter().map(|n| n.to_string()).collect(),
            tls,
            ..HostConfig::default()
        }
    }

    #[test]
    fn loads_generated_pair() {
        let dir = tempfile::tempdir().unwrap();
        let tls = write_pair(dir.path(), "example.com");
        let key = load_certified_key(&tls).unwrap();
        assert_eq!(key.cert.len(), 1);
    }

    #[test]
    fn store_indexes_every_host_name() {
        let dir = tempfile::tempdir().unwrap();
        let apex = write_pair(dir.path(), "example.com");
        let ops = write_pair(dir.path(), "ops.example.com");
        let store = CertStore::load(&[
            host(&["example.com", "www.example.com"], Some(apex)),
            host(&["ops.example.com"], Some(ops)),
            host(&["plain.example.com"], None),
        ])
        .unwrap();

        assert_eq!(store.len(), 3);
        assert!(store.get("WWW.example.com").is_some());
        assert!(store.get("plain.example.com").is_none());
        assert!(!Arc::ptr_eq(
            &store.get("example.com").unwrap(),
            &store.get("ops.example.com").unwrap()
        ));
    }

    #[test]
    fn missing_files_are_reported() {
        let tls = TlsConfig {
            cert_path: "/nonexistent/cert.pem".into(),
            key_path: "/nonexistent/key.pem".into(),
        };
        assert!(matches!(load_certified_key(&tls), Err(TlsError::Certificate { .. })));
    }

    #[test]
    fn key_file_without_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut tls = write_pair(dir.path(), "example.com");
        tls.key_path = tls.cert_path.clone();
        assert!(matches!(load_certified_key(&tls), Err(TlsError::PrivateKey { .. })));
    }
}
