//! Listener binding with load shedding.
//!
//! # Responsibilities
//! - Bind to configured address(es)
//! - Serve plain or TLS connections through axum-server
//! - Enforce max_connections as an in-flight request limit
//!
//! # Design Decisions
//! - Sockets are bound synchronously at startup so bind errors are fatal early
//! - Over the limit, requests are shed with 503 rather than queued
//! - One shutdown handle drains every listener together

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;

use axum::Router;
use axum_server::tls_rustls::{from_tcp_rustls, RustlsConfig};
use axum_server::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::{ListenerConfig, ListenerMode};
use crate::http::request::Scheme;
use crate::http::response::RouteError;

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Address did not parse.
    Address(String),
    /// Failed to bind to address.
    Bind(SocketAddr, std::io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Address(raw) => write!(f, "Invalid listen address: {}", raw),
            ListenerError::Bind(addr, e) => write!(f, "Failed to bind {}: {}", addr, e),
        }
    }
}

impl std::error::Error for ListenerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ListenerError::Address(_) => None,
            ListenerError::Bind(_, e) => Some(e),
        }
    }
}

/// Per-listener facts every request on it needs.
#[derive(Debug)]
pub struct ListenerContext {
    pub local_addr: SocketAddr,
    pub scheme: Scheme,
    pub mode: ListenerMode,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
}

impl ListenerContext {
    /// Take an in-flight slot, or shed the request.
    ///
    /// The slot is released when the permit drops.
    pub fn try_admit(&self) -> Result<OwnedSemaphorePermit, RouteError> {
        Arc::clone(&self.permits).try_acquire_owned().map_err(|_| {
            tracing::warn!(
                listener = %self.local_addr,
                max_in_flight = self.max_in_flight,
                "Listener at capacity, shedding request"
            );
            RouteError::Overloaded
        })
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

/// A bound socket waiting to be served.
#[derive(Debug)]
pub struct BoundListener {
    inner: TcpListener,
    context: Arc<ListenerContext>,
    tls: bool,
}

impl BoundListener {
    /// Bind to the configured address.
    pub fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config
            .bind_address
            .parse()
            .map_err(|_| ListenerError::Address(config.bind_address.clone()))?;

        let listener = TcpListener::bind(addr).map_err(|e| ListenerError::Bind(addr, e))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| ListenerError::Bind(addr, e))?;
        let local_addr = listener.local_addr().map_err(|e| ListenerError::Bind(addr, e))?;

        tracing::info!(
            address = %local_addr,
            tls = config.tls,
            mode = ?config.mode,
            max_connections = config.max_connections,
            "Listener bound"
        );

        Ok(Self {
            inner: listener,
            context: Arc::new(ListenerContext {
                local_addr,
                scheme: if config.tls { Scheme::Https } else { Scheme::Http },
                mode: config.mode,
                permits: Arc::new(Semaphore::new(config.max_connections)),
                max_in_flight: config.max_connections,
            }),
            tls: config.tls,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.context.local_addr
    }

    pub fn context(&self) -> Arc<ListenerContext> {
        Arc::clone(&self.context)
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    /// Serve `app` until `handle` shuts down.
    ///
    /// `tls` must be set for TLS listeners.
    pub async fn serve(self, app: Router, handle: Handle, tls: Option<RustlsConfig>) -> std::io::Result<()> {
        let service = app.into_make_service_with_connect_info::<SocketAddr>();
        match tls {
            Some(config) => {
                from_tcp_rustls(self.inner, config)
                    .handle(handle)
                    .serve(service)
                    .await
            }
            None => axum_server::from_tcp(self.inner).handle(handle).serve(service).await,
        }
    }
}
