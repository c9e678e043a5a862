//! HTTP server setup and request dispatch.
//!
//! # Responsibilities
//! - Create Axum Router with the edge handler
//! - Wire up middleware (request ID, tracing, compression, timeout)
//! - Serve every bound listener until shutdown
//! - Dispatch requests: listener mode → host → route → action
//! - Apply configuration reloads between requests
//! - Observability (metrics, correlation IDs)

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use http_body_util::BodyExt;
use tokio::sync::{broadcast, mpsc, OwnedSemaphorePermit};
use tokio::task::JoinSet;
use tower::ServiceBuilder;
use tower_http::compression::predicate::{DefaultPredicate, Predicate};
use tower_http::compression::CompressionLayer;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::actions::proxy::{self, build_client, UpstreamClient};
use crate::actions::{redirect, static_files, Action, RedirectTemplate};
use crate::config::snapshot::{Snapshot, SnapshotStore};
use crate::config::{ListenerMode, ProxyConfig};
use crate::http::request::{MakeRequestUuid, RequestMeta, X_REQUEST_ID};
use crate::http::response::{GzipAllowed, HostOptIn, RouteError};
use crate::lifecycle::startup::{self, Prepared, StartupError};
use crate::net::listener::{BoundListener, ListenerContext};
use crate::observability::metrics;

/// Label used when no virtual host or action applies.
const UNMATCHED: &str = "-";

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SnapshotStore>,
    pub listener: Arc<ListenerContext>,
    pub client: UpstreamClient,
}

/// The edge router: every listener of the active profile.
pub struct EdgeServer {
    store: Arc<SnapshotStore>,
    listeners: Vec<BoundListener>,
    tls: Option<RustlsConfig>,
    client: UpstreamClient,
    request_timeout: Duration,
}

impl EdgeServer {
    /// Compile the configuration and bind every listener.
    pub fn new(config: &ProxyConfig, profile_override: Option<String>) -> Result<Self, StartupError> {
        let Prepared {
            store,
            tls,
            listeners,
        } = startup::prepare(config, profile_override)?;

        Ok(Self {
            store,
            listeners,
            tls,
            client: build_client(Duration::from_secs(config.timeouts.connect_secs)),
            request_timeout: Duration::from_secs(config.timeouts.request_secs),
        })
    }

    /// Bound addresses, in listener declaration order.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners.iter().map(BoundListener::local_addr).collect()
    }

    pub fn snapshots(&self) -> Arc<SnapshotStore> {
        Arc::clone(&self.store)
    }

    /// Serve until `shutdown` fires, applying configs from `config_updates` as they arrive.
    pub async fn run(
        self,
        mut config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> io::Result<()> {
        let handle = Handle::new();
        let mut tasks = JoinSet::new();

        for listener in self.listeners {
            let tls = match (listener.is_tls(), &self.tls) {
                (true, Some(config)) => Some(config.clone()),
                (true, None) => {
                    return Err(io::Error::other(format!(
                        "TLS listener {} has no TLS configuration",
                        listener.local_addr()
                    )))
                }
                (false, _) => None,
            };
            let state = AppState {
                store: Arc::clone(&self.store),
                listener: listener.context(),
                client: self.client.clone(),
            };
            tracing::info!(address = %listener.local_addr(), tls = tls.is_some(), "Serving");
            tasks.spawn(listener.serve(build_router(state, self.request_timeout), handle.clone(), tls));
        }

        let mut outcome = Ok(());
        loop {
            tokio::select! {
                Some(config) = config_updates.recv() => {
                    // Failures are logged and counted by the store; the old generation stays.
                    let _ = self.store.reload(&config);
                }
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown requested, draining listeners");
                    break;
                }
                Some(joined) = tasks.join_next() => {
                    outcome = match joined {
                        Ok(Ok(())) => Err(io::Error::other("listener stopped unexpectedly")),
                        Ok(Err(e)) => Err(e),
                        Err(e) => Err(io::Error::other(e)),
                    };
                    if let Err(e) = &outcome {
                        tracing::error!(error = %e, "Listener failed, shutting down");
                    }
                    break;
                }
            }
        }

        let grace = Duration::from_secs(self.store.load().timeouts.shutdown_grace_secs);
        handle.graceful_shutdown(Some(grace));
        while let Some(joined) = tasks.join_next().await {
            if let Ok(Err(e)) = joined {
                tracing::warn!(error = %e, "Listener stopped with error");
            }
        }

        tracing::info!("HTTP server stopped");
        outcome
    }
}

/// Build the Axum router with all middleware layers.
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
        .layer(CompressionLayer::new().compress_when(DefaultPredicate::new().and(HostOptIn)))
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, request_timeout));

    Router::new()
        .fallback(edge_handler)
        .with_state(state)
        .layer(middleware)
}

fn request_span(request: &Request<Body>) -> tracing::Span {
    let request_id = request
        .headers()
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(UNMATCHED);
    tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        uri = %request.uri(),
    )
}

/// Result of dispatching one request, with its metric labels.
struct Outcome {
    host: String,
    action: &'static str,
    gzip: bool,
    result: Result<Response, RouteError>,
}

impl Outcome {
    fn unmatched(error: RouteError) -> Self {
        Self {
            host: UNMATCHED.to_string(),
            action: "none",
            gzip: false,
            result: Err(error),
        }
    }
}

/// Single entry point for every request on every listener.
async fn edge_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let meta = RequestMeta::from_request(&request, peer, state.listener.scheme);

    let (outcome, permit) = match state.listener.try_admit() {
        Ok(permit) => {
            let snapshot = state.store.load();
            (dispatch(&state, &snapshot, &meta, request).await, Some(permit))
        }
        Err(e) => (Outcome::unmatched(e), None),
    };

    let response = finish(&meta, &method, outcome, start);
    match permit {
        Some(permit) => hold_until_streamed(response, permit),
        None => response,
    }
}

/// Keep the in-flight slot until the response body is done or dropped.
fn hold_until_streamed(response: Response, permit: OwnedSemaphorePermit) -> Response {
    response.map(|body| {
        Body::new(body.map_frame(move |frame| {
            let _held = &permit;
            frame
        }))
    })
}

async fn dispatch(state: &AppState, snapshot: &Snapshot, meta: &RequestMeta, request: Request<Body>) -> Outcome {
    if state.listener.mode == ListenerMode::RedirectHttps {
        let result = if meta.host.is_empty() {
            Err(RouteError::BadRequest("missing Host header".to_string()))
        } else {
            redirect::respond(&RedirectTemplate::https_upgrade(), meta)
        };
        return Outcome {
            host: UNMATCHED.to_string(),
            action: "redirect_https",
            gzip: false,
            result,
        };
    }

    if meta.host.is_empty() {
        return Outcome::unmatched(RouteError::BadRequest("missing Host header".to_string()));
    }
    let vhost = match snapshot.hosts.resolve(&meta.host) {
        Ok(vhost) => vhost,
        Err(e) => return Outcome::unmatched(e),
    };
    let route = match vhost.match_route(&meta.path) {
        Ok(route) => route,
        Err(e) => {
            return Outcome {
                host: vhost.label().to_string(),
                ..Outcome::unmatched(e)
            }
        }
    };

    tracing::debug!(
        host = %vhost.label(),
        prefix = %route.prefix.as_str(),
        action = route.action.kind(),
        generation = snapshot.generation,
        "Route matched"
    );

    let timeouts = &snapshot.timeouts;
    let result = match &route.action {
        Action::Redirect(template) => redirect::respond(template, meta),
        Action::Static(site) => {
            static_files::serve(
                site,
                request.method(),
                &meta.path,
                Duration::from_secs(timeouts.static_read_secs),
            )
            .await
        }
        Action::Proxy(target) => {
            proxy::forward(
                &state.client,
                target,
                vhost.max_body_size,
                meta,
                request,
                Duration::from_secs(timeouts.upstream_secs),
            )
            .await
        }
    };

    Outcome {
        host: vhost.label().to_string(),
        action: route.action.kind(),
        gzip: vhost.gzip,
        result,
    }
}

fn finish(meta: &RequestMeta, method: &Method, outcome: Outcome, start: Instant) -> Response {
    let mut response = match outcome.result {
        Ok(response) => response,
        Err(e) => {
            if e.status().is_server_error() {
                tracing::warn!(host = %meta.host, path = %meta.path, error = %e, "Request failed");
            } else {
                tracing::debug!(host = %meta.host, path = %meta.path, error = %e, "Request rejected");
            }
            e.into_response()
        }
    };
    if outcome.gzip {
        response.extensions_mut().insert(GzipAllowed);
    }

    let status = response.status().as_u16();
    metrics::record_request(&outcome.host, outcome.action, status, start);
    tracing::info!(
        client = %meta.client_ip,
        host = %meta.host,
        method = %method,
        path = %meta.path,
        status,
        action = outcome.action,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Request completed"
    );
    response
}
