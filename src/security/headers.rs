//! Header manipulation for proxied requests.
//!
//! # Responsibilities
//! - Add Host, X-Real-IP, X-Forwarded-For, X-Forwarded-Proto
//! - Strip hop-by-hop headers in both directions
//!
//! # Design Decisions
//! - X-Real-IP is always the connected peer, never a client-supplied value
//! - X-Forwarded-For appends the peer to any chain already present
//! - The header set is built once per request and never mutated

use std::net::IpAddr;

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};

use crate::http::request::RequestMeta;

pub const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
];

/// Forwarding metadata attached to every proxied request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedHeaders {
    host: String,
    client_ip: IpAddr,
    forwarded_for: String,
    proto: String,
}

impl ForwardedHeaders {
    /// Derive the set from request metadata and the incoming headers.
    ///
    /// `proto_override` pins `X-Forwarded-Proto` regardless of the connection scheme.
    pub fn new(meta: &RequestMeta, incoming: &HeaderMap, proto_override: Option<&str>) -> Self {
        let client = meta.client_ip.to_string();
        let prior: Vec<&str> = incoming
            .get_all(&X_FORWARDED_FOR)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .collect();
        let forwarded_for = if prior.is_empty() {
            client
        } else {
            format!("{}, {}", prior.join(", "), client)
        };

        Self {
            host: meta.host.clone(),
            client_ip: meta.client_ip,
            forwarded_for,
            proto: proto_override.unwrap_or(meta.scheme.as_str()).to_string(),
        }
    }

    pub fn forwarded_for(&self) -> &str {
        &self.forwarded_for
    }

    pub fn proto(&self) -> &str {
        &self.proto
    }

    /// Write the set into an outgoing header map, replacing existing values.
    pub fn apply(&self, headers: &mut HeaderMap) {
        let pairs = [
            (header::HOST, self.host.as_str()),
            (X_FORWARDED_PROTO, self.proto.as_str()),
            (X_FORWARDED_FOR, self.forwarded_for.as_str()),
        ];
        for (name, value) in pairs {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.insert(name, value);
            }
        }
        if let Ok(value) = HeaderValue::from_str(&self.client_ip.to_string()) {
            headers.insert(X_REAL_IP, value);
        }
    }
}

/// Remove hop-by-hop headers, including any named by `Connection`.
///
/// `Upgrade` is left alone; upgrades are not proxied and hyper drops it for plain requests.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();

    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}
