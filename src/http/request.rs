//! Request handling and transformation.
//!
//! # Responsibilities
//! - Generate unique request ID (UUID v4)
//! - Extract routing-relevant information (host, path, client address, scheme)
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Host comes from the URI authority (HTTP/2) or the Host header (HTTP/1.1)
//! - Hostnames are normalized once: port stripped, lowercased

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use axum::http::{header, HeaderName, HeaderValue, Request};
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

/// Header carrying the per-request correlation ID.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Generates UUID v4 request IDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = HeaderValue::from_str(&Uuid::new_v4().to_string()).ok()?;
        Some(RequestId::new(id))
    }
}

/// Scheme of the client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the router needs to know about a request, independent of its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMeta {
    /// Normalized hostname (no port, lowercase). Empty when absent.
    pub host: String,
    /// Address of the connected peer.
    pub client_ip: IpAddr,
    /// Scheme of the client connection.
    pub scheme: Scheme,
    /// Path component of the request target, as received.
    pub path: String,
    /// Query string without the leading `?`.
    pub query: Option<String>,
}

impl RequestMeta {
    /// Collect metadata from a request received on a listener with `scheme`.
    pub fn from_request<B>(request: &Request<B>, peer: SocketAddr, scheme: Scheme) -> Self {
        let raw_host = request
            .uri()
            .authority()
            .map(|a| a.as_str())
            .or_else(|| {
                request
                    .headers()
                    .get(header::HOST)
                    .and_then(|h| h.to_str().ok())
            })
            .unwrap_or("");

        Self {
            host: normalize_host(raw_host),
            client_ip: peer.ip(),
            scheme,
            path: request.uri().path().to_string(),
            query: request.uri().query().map(str::to_string),
        }
    }

    /// Path plus query, as originally requested.
    pub fn request_uri(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }
}

/// Strip the port and any trailing dot, then lowercase.
///
/// Bracketed IPv6 literals keep their brackets.
pub fn normalize_host(raw: &str) -> String {
    let raw = raw.trim();
    let without_userinfo = raw.rsplit('@').next().unwrap_or(raw);
    let host = if without_userinfo.starts_with('[') {
        match without_userinfo.find(']') {
            Some(end) => &without_userinfo[..=end],
            None => without_userinfo,
        }
    } else {
        without_userinfo
            .split(':')
            .next()
            .unwrap_or(without_userinfo)
    };
    host.trim_end_matches('.').to_ascii_lowercase()
}
