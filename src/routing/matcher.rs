//! Host and path matching.
//!
//! # Responsibilities
//! - Match the requested hostname (exact match, case-insensitive)
//! - Apply the unknown-host policy
//! - Match path prefixes (case-sensitive)
//!
//! # Design Decisions
//! - Host matching is case-insensitive (RFC 9110)
//! - Path matching is case-sensitive
//! - No wildcards or regex: O(1) host lookup, O(n) prefix scan

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::config::UnknownHostPolicy;
use crate::http::request::normalize_host;
use crate::http::response::RouteError;
use crate::routing::router::VirtualHost;

/// Errors building the host table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostTableError {
    #[error("hostname {0} claimed by more than one host")]
    DuplicateName(String),

    #[error("fallback host {0} is not defined")]
    UnknownFallback(String),
}

/// Matches the request path prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPrefix(String);

impl PathPrefix {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self(prefix.into())
    }

    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Selects a virtual host by name.
#[derive(Debug)]
pub struct HostMatcher {
    hosts: Vec<Arc<VirtualHost>>,
    by_name: HashMap<String, usize>,
    fallback: Option<usize>,
}

impl HostMatcher {
    /// Index `hosts` by every name they declare.
    pub fn new(hosts: Vec<VirtualHost>, policy: &UnknownHostPolicy) -> Result<Self, HostTableError> {
        let mut by_name = HashMap::new();
        for (index, host) in hosts.iter().enumerate() {
            for name in &host.names {
                let key = normalize_host(name);
                if by_name.insert(key, index).is_some() {
                    return Err(HostTableError::DuplicateName(name.clone()));
                }
            }
        }

        let fallback = match policy {
            UnknownHostPolicy::Reject => None,
            UnknownHostPolicy::Fallback(name) => Some(
                *by_name
                    .get(&normalize_host(name))
                    .ok_or_else(|| HostTableError::UnknownFallback(name.clone()))?,
            ),
        };

        Ok(Self {
            hosts: hosts.into_iter().map(Arc::new).collect(),
            by_name,
            fallback,
        })
    }

    /// Find the host for an already-normalized hostname.
    pub fn resolve(&self, host: &str) -> Result<&Arc<VirtualHost>, RouteError> {
        if let Some(&index) = self.by_name.get(host) {
            return Ok(&self.hosts[index]);
        }
        match self.fallback {
            Some(index) => {
                tracing::debug!(host = %host, fallback = %self.hosts[index].label(), "Unknown host, using fallback");
                Ok(&self.hosts[index])
            }
            None => Err(RouteError::UnknownHost(host.to_string())),
        }
    }

    pub fn hosts(&self) -> &[Arc<VirtualHost>] {
        &self.hosts
    }
}
