//! Response handling and transformation.
//!
//! # Responsibilities
//! - Map routing and upstream failures to HTTP status codes
//! - Mark responses that may be gzip-compressed for their host
//!
//! # Design Decisions
//! - Every error is terminal for the request; nothing is retried
//! - Error bodies are short plain text, no internals leaked
//! - Compression is opted into per response, so the layer stays global

use std::time::Duration;

use axum::body::HttpBody;
use axum::http::{header, HeaderValue, Method, Response as HttpResponse, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tower_http::compression::Predicate;

/// Terminal per-request failures.
#[derive(Debug, Error)]
pub enum RouteError {
    /// Hostname matched no virtual host and the policy is reject.
    #[error("no virtual host for {0:?}")]
    UnknownHost(String),

    /// No route prefix matched the path.
    #[error("no route for {0}")]
    NoRoute(String),

    /// Static fallback chain exhausted.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// Static routes only answer GET and HEAD.
    #[error("method {0} not allowed")]
    MethodNotAllowed(Method),

    /// Request body over the host or route limit.
    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: u64 },

    /// Upstream refused, reset or otherwise failed.
    #[error("upstream {upstream} failed: {source}")]
    UpstreamUnavailable {
        upstream: String,
        #[source]
        source: hyper_util::client::legacy::Error,
    },

    /// Upstream did not answer in time.
    #[error("upstream {upstream} timed out after {after:?}")]
    UpstreamTimeout { upstream: String, after: Duration },

    /// Filesystem did not answer in time.
    #[error("static read timed out after {0:?}")]
    StaticTimeout(Duration),

    /// Listener is at its in-flight request limit.
    #[error("listener at capacity")]
    Overloaded,

    /// Malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl RouteError {
    pub fn status(&self) -> StatusCode {
        match self {
            RouteError::UnknownHost(_) => StatusCode::MISDIRECTED_REQUEST,
            RouteError::NoRoute(_) | RouteError::FileNotFound(_) => StatusCode::NOT_FOUND,
            RouteError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            RouteError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            RouteError::UpstreamUnavailable { .. } | RouteError::UpstreamTimeout { .. } => {
                StatusCode::BAD_GATEWAY
            }
            RouteError::StaticTimeout(_) | RouteError::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
            RouteError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = format!(
            "{} {}\n",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Error")
        );
        let mut response = (status, body).into_response();
        if let RouteError::MethodNotAllowed(_) = self {
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("GET, HEAD"));
        }
        response
    }
}

/// Response extension marking a body as eligible for gzip.
#[derive(Debug, Clone, Copy)]
pub struct GzipAllowed;

/// Compression predicate honouring [`GzipAllowed`].
#[derive(Debug, Clone, Copy, Default)]
pub struct HostOptIn;

impl Predicate for HostOptIn {
    fn should_compress<B>(&self, response: &HttpResponse<B>) -> bool
    where
        B: HttpBody,
    {
        response.extensions().get::<GzipAllowed>().is_some()
    }
}
