//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the router.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Root configuration for the edge router.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Profile served when no `--profile` override is given.
    pub active_profile: Option<String>,

    /// Named deployment profiles. Hostnames are never merged across profiles.
    pub profiles: BTreeMap<String, ProfileConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl ProxyConfig {
    /// Build a configuration holding a single profile named `default`.
    pub fn single(profile: ProfileConfig) -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert("default".to_string(), profile);
        Self {
            active_profile: Some("default".to_string()),
            profiles,
            ..Self::default()
        }
    }

    /// Name of the profile that should be served.
    ///
    /// The override wins, then `active_profile`, then the only profile if
    /// there is exactly one.
    pub fn selected_profile_name<'a>(&'a self, profile_override: Option<&'a str>) -> Option<&'a str> {
        if let Some(name) = profile_override.or(self.active_profile.as_deref()) {
            return Some(name);
        }
        if self.profiles.len() == 1 {
            return self.profiles.keys().next().map(String::as_str);
        }
        None
    }

    /// Look up the selected profile.
    pub fn selected_profile<'a>(
        &'a self,
        profile_override: Option<&'a str>,
    ) -> Option<(&'a str, &'a ProfileConfig)> {
        let name = self.selected_profile_name(profile_override)?;
        self.profiles.get(name).map(|p| (name, p))
    }
}

/// A deployable set of listeners and virtual hosts.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProfileConfig {
    /// Ports to bind.
    pub listeners: Vec<ListenerConfig>,

    /// Virtual hosts, matched by exact hostname.
    pub hosts: Vec<HostConfig>,

    /// What to do with a hostname no virtual host claims.
    pub unknown_host: UnknownHostPolicy,
}

/// Listener configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:443").
    pub bind_address: String,

    /// Terminate TLS on this listener using the hosts' certificates.
    pub tls: bool,

    /// Whether the listener routes requests or only upgrades them to HTTPS.
    pub mode: ListenerMode,

    /// Maximum concurrent in-flight requests (load shedding with 503).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: false,
            mode: ListenerMode::Route,
            max_connections: 10_000,
        }
    }
}

/// Listener behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ListenerMode {
    /// Match host and route, then execute the route's action.
    #[default]
    Route,
    /// Answer every request with a 301 to `https://$host$request_uri`.
    RedirectHttps,
}

/// Policy for hostnames that match no virtual host.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnknownHostPolicy {
    /// Respond 421 Misdirected Request.
    #[default]
    Reject,
    /// Route the request as if it had been sent to the named host.
    Fallback(String),
}

/// TLS material for a virtual host.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: PathBuf,

    /// Path to private key file (PEM).
    pub key_path: PathBuf,
}

/// Virtual host configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HostConfig {
    /// Hostnames this host answers to (exact, case-insensitive).
    pub names: Vec<String>,

    /// Certificate used for SNI on TLS listeners.
    pub tls: Option<TlsConfig>,

    /// Default root for static routes.
    pub root: Option<PathBuf>,

    /// Directory index document.
    pub index: String,

    /// Try `<path>.html` before falling back.
    pub clean_urls: bool,

    /// Serve the root index document for paths with no file.
    pub spa_fallback: bool,

    /// Path prefixes served with long-lived immutable caching headers.
    pub immutable_prefixes: Vec<String>,

    /// `max-age` used for immutable prefixes.
    pub immutable_max_age_secs: u64,

    /// Maximum proxied request body; unlimited when absent.
    pub max_body_size: Option<ByteSize>,

    /// Gzip compressible responses.
    pub gzip: bool,

    /// Ordered routes, first match wins.
    pub routes: Vec<RouteConfig>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            names: Vec::new(),
            tls: None,
            root: None,
            index: "index.html".to_string(),
            clean_urls: false,
            spa_fallback: false,
            immutable_prefixes: Vec::new(),
            immutable_max_age_secs: 365 * 24 * 60 * 60,
            max_body_size: None,
            gzip: false,
            routes: Vec::new(),
        }
    }
}

/// Route kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteKind {
    Redirect,
    Static,
    Proxy,
}

/// Route configuration. Which optional fields are required depends on `kind`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Path prefix to match.
    pub prefix: String,

    /// Action executed when the route matches.
    pub kind: RouteKind,

    /// Redirect target template (`$scheme`, `$host`, `$request_uri`, `$uri`, `$args`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Static root overriding the host root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    /// Upstream `host:port` reached over plain HTTP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<String>,

    /// Replace the matched prefix with `/` before forwarding.
    #[serde(default)]
    pub strip_prefix: bool,

    /// Fixed `X-Forwarded-Proto` value instead of the connection scheme.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarded_proto: Option<String>,

    /// Body limit overriding the host limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_body_size: Option<ByteSize>,
}

impl RouteConfig {
    /// A static route using the host root.
    pub fn static_files(prefix: impl Into<String>) -> Self {
        Self::new(prefix, RouteKind::Static)
    }

    /// A proxy route to `upstream`.
    pub fn proxy(prefix: impl Into<String>, upstream: impl Into<String>) -> Self {
        Self {
            upstream: Some(upstream.into()),
            ..Self::new(prefix, RouteKind::Proxy)
        }
    }

    /// A redirect route rendering `target`.
    pub fn redirect(prefix: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            ..Self::new(prefix, RouteKind::Redirect)
        }
    }

    fn new(prefix: impl Into<String>, kind: RouteKind) -> Self {
        Self {
            prefix: prefix.into(),
            kind,
            target: None,
            root: None,
            upstream: None,
            strip_prefix: false,
            forwarded_proto: None,
            max_body_size: None,
        }
    }
}

/// A size in bytes, written either as an integer or with a `k`/`m`/`g` suffix ("20M").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Parse nginx-style sizes: `512`, `64k`, `20M`, `1g`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (digits, multiplier) = match raw.char_indices().last()? {
            (i, 'k' | 'K') => (&raw[..i], 1024),
            (i, 'm' | 'M') => (&raw[..i], 1024 * 1024),
            (i, 'g' | 'G') => (&raw[..i], 1024 * 1024 * 1024),
            _ => (raw, 1),
        };
        let value: u64 = digits.trim().parse().ok()?;
        value.checked_mul(multiplier).map(ByteSize)
    }
}

impl Serialize for ByteSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ByteSizeVisitor;

        impl Visitor<'_> for ByteSizeVisitor {
            type Value = ByteSize;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a byte count or a size such as \"20M\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<ByteSize, E> {
                Ok(ByteSize(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<ByteSize, E> {
                u64::try_from(v)
                    .map(ByteSize)
                    .map_err(|_| E::custom("size must not be negative"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<ByteSize, E> {
                ByteSize::parse(v).ok_or_else(|| E::custom(format!("invalid size {v:?}")))
            }
        }

        deserializer.deserialize_any(ByteSizeVisitor)
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Time allowed for an upstream to produce response headers, and the
    /// longest gap tolerated between body chunks, in seconds.
    pub upstream_secs: u64,

    /// Time allowed to resolve and read a static file, in seconds.
    pub static_read_secs: u64,

    /// Overall request timeout in seconds.
    pub request_secs: u64,

    /// Drain deadline for in-flight requests at shutdown, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            upstream_secs: 60,
            static_read_secs: 10,
            request_secs: 120,
            shutdown_grace_secs: 10,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human-readable or JSON lines.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
