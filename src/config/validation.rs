//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (fallback host exists, routes have their parameters)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Detect duplicate hostnames and shadowed routes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system
//! - Every profile is checked, not only the active one

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::http::uri::Authority;
use thiserror::Error;

use crate::actions::redirect::RedirectTemplate;
use crate::config::schema::{
    HostConfig, ProfileConfig, ProxyConfig, RouteConfig, RouteKind, UnknownHostPolicy,
};
use crate::http::request::{RequestMeta, Scheme};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no profiles defined")]
    NoProfiles,

    #[error("active profile {0:?} is not defined")]
    UnknownProfile(String),

    #[error("several profiles defined but none selected (set active_profile)")]
    AmbiguousProfile,

    #[error("timeouts.{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("timeouts.{inner} ({inner_secs}s) must be shorter than timeouts.request_secs ({request_secs}s)")]
    TimeoutExceedsRequest {
        inner: &'static str,
        inner_secs: u64,
        request_secs: u64,
    },

    #[error("observability.metrics_address {0:?} is not a socket address")]
    InvalidMetricsAddress(String),

    #[error("profile {profile}: no listeners")]
    NoListeners { profile: String },

    #[error("profile {profile}: listener address {address:?} is not a socket address")]
    InvalidBindAddress { profile: String, address: String },

    #[error("profile {profile}: listener {address} declared twice")]
    DuplicateListener { profile: String, address: String },

    #[error("profile {profile}: listener {address} has max_connections = 0")]
    ZeroMaxConnections { profile: String, address: String },

    #[error("profile {profile}: TLS listener {address} but no host has a certificate")]
    TlsWithoutCertificates { profile: String, address: String },

    #[error("profile {profile}: host #{index} has no names")]
    EmptyHostNames { profile: String, index: usize },

    #[error("profile {profile}: invalid hostname {name:?}")]
    InvalidHostName { profile: String, name: String },

    #[error("profile {profile}: hostname {name} defined by more than one host")]
    DuplicateHostName { profile: String, name: String },

    #[error("profile {profile}: unknown_host fallback {name} is not a defined host")]
    UnknownFallbackHost { profile: String, name: String },

    #[error("host {host}: no routes")]
    NoRoutes { host: String },

    #[error("host {host}: prefix {prefix:?} must start with '/'")]
    InvalidPrefix { host: String, prefix: String },

    #[error("host {host}: route {prefix} can never match, {shadowed_by} is declared before it")]
    ShadowedRoute {
        host: String,
        prefix: String,
        shadowed_by: String,
    },

    #[error("host {host}: {kind:?} route {prefix} requires `{field}`")]
    MissingRouteField {
        host: String,
        prefix: String,
        kind: RouteKind,
        field: &'static str,
    },

    #[error("host {host}: upstream {upstream:?} is not a host:port pair")]
    InvalidUpstream { host: String, upstream: String },

    #[error("host {host}: redirect target {target:?} is invalid: {reason}")]
    InvalidRedirectTarget {
        host: String,
        target: String,
        reason: String,
    },

    #[error("host {host}: forwarded_proto must be http or https, got {value:?}")]
    InvalidForwardedProto { host: String, value: String },

    #[error("host {host}: immutable prefix {prefix:?} must start with '/'")]
    InvalidImmutablePrefix { host: String, prefix: String },
}

/// Validate the whole configuration, collecting every error.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.profiles.is_empty() {
        errors.push(ValidationError::NoProfiles);
    } else if let Some(active) = &config.active_profile {
        if !config.profiles.contains_key(active) {
            errors.push(ValidationError::UnknownProfile(active.clone()));
        }
    } else if config.profiles.len() > 1 {
        errors.push(ValidationError::AmbiguousProfile);
    }

    let timeouts = &config.timeouts;
    for (name, value) in [
        ("connect_secs", timeouts.connect_secs),
        ("upstream_secs", timeouts.upstream_secs),
        ("static_read_secs", timeouts.static_read_secs),
        ("request_secs", timeouts.request_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::ZeroTimeout(name));
        }
    }
    // The request timeout answers 408; inner deadlines must fire first to yield 502/503.
    for (name, value) in [
        ("upstream_secs", timeouts.upstream_secs),
        ("static_read_secs", timeouts.static_read_secs),
    ] {
        if value >= timeouts.request_secs && timeouts.request_secs > 0 {
            errors.push(ValidationError::TimeoutExceedsRequest {
                inner: name,
                inner_secs: value,
                request_secs: timeouts.request_secs,
            });
        }
    }

    let observability = &config.observability;
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            observability.metrics_address.clone(),
        ));
    }

    for (name, profile) in &config.profiles {
        validate_profile(name, profile, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_profile(name: &str, profile: &ProfileConfig, errors: &mut Vec<ValidationError>) {
    let profile_name = || name.to_string();

    if profile.listeners.is_empty() {
        errors.push(ValidationError::NoListeners { profile: profile_name() });
    }

    let any_certificate = profile.hosts.iter().any(|h| h.tls.is_some());
    let mut addresses = HashSet::new();
    for listener in &profile.listeners {
        let address = listener.bind_address.clone();
        match address.parse::<SocketAddr>() {
            Ok(addr) => {
                // Port 0 is an ephemeral bind and may repeat.
                if addr.port() != 0 && !addresses.insert(addr) {
                    errors.push(ValidationError::DuplicateListener {
                        profile: profile_name(),
                        address: address.clone(),
                    });
                }
            }
            Err(_) => errors.push(ValidationError::InvalidBindAddress {
                profile: profile_name(),
                address: address.clone(),
            }),
        }
        if listener.max_connections == 0 {
            errors.push(ValidationError::ZeroMaxConnections {
                profile: profile_name(),
                address: address.clone(),
            });
        }
        if listener.tls && !any_certificate {
            errors.push(ValidationError::TlsWithoutCertificates {
                profile: profile_name(),
                address,
            });
        }
    }

    let mut seen_names = HashSet::new();
    for (index, host) in profile.hosts.iter().enumerate() {
        if host.names.is_empty() {
            errors.push(ValidationError::EmptyHostNames { profile: profile_name(), index });
        }
        for host_name in &host.names {
            if !is_valid_hostname(host_name) {
                errors.push(ValidationError::InvalidHostName {
                    profile: profile_name(),
                    name: host_name.clone(),
                });
            } else if !seen_names.insert(host_name.to_ascii_lowercase()) {
                errors.push(ValidationError::DuplicateHostName {
                    profile: profile_name(),
                    name: host_name.clone(),
                });
            }
        }
        validate_host(host, errors);
    }

    if let UnknownHostPolicy::Fallback(fallback) = &profile.unknown_host {
        if !seen_names.contains(&fallback.to_ascii_lowercase()) {
            errors.push(ValidationError::UnknownFallbackHost {
                profile: profile_name(),
                name: fallback.clone(),
            });
        }
    }
}

fn validate_host(host: &HostConfig, errors: &mut Vec<ValidationError>) {
    let label = host_label(host);

    if host.routes.is_empty() {
        errors.push(ValidationError::NoRoutes { host: label.clone() });
    }

    for prefix in &host.immutable_prefixes {
        if !prefix.starts_with('/') {
            errors.push(ValidationError::InvalidImmutablePrefix {
                host: label.clone(),
                prefix: prefix.clone(),
            });
        }
    }

    let mut earlier: Vec<&str> = Vec::new();
    for route in &host.routes {
        if !route.prefix.starts_with('/') {
            errors.push(ValidationError::InvalidPrefix {
                host: label.clone(),
                prefix: route.prefix.clone(),
            });
        } else {
            if let Some(shadow) = earlier.iter().find(|p| route.prefix.starts_with(**p)) {
                errors.push(ValidationError::ShadowedRoute {
                    host: label.clone(),
                    prefix: route.prefix.clone(),
                    shadowed_by: shadow.to_string(),
                });
            }
            earlier.push(&route.prefix);
        }
        validate_route(&label, host, route, errors);
    }
}

fn validate_route(label: &str, host: &HostConfig, route: &RouteConfig, errors: &mut Vec<ValidationError>) {
    let missing = |field| ValidationError::MissingRouteField {
        host: label.to_string(),
        prefix: route.prefix.clone(),
        kind: route.kind,
        field,
    };

    match route.kind {
        RouteKind::Redirect => match &route.target {
            None => errors.push(missing("target")),
            Some(target) => {
                if let Err(reason) = check_redirect_target(target) {
                    errors.push(ValidationError::InvalidRedirectTarget {
                        host: label.to_string(),
                        target: target.clone(),
                        reason,
                    });
                }
            }
        },
        RouteKind::Static => {
            if route.root.is_none() && host.root.is_none() {
                errors.push(missing("root"));
            }
        }
        RouteKind::Proxy => {
            match &route.upstream {
                None => errors.push(missing("upstream")),
                Some(upstream) => {
                    let valid = upstream
                        .parse::<Authority>()
                        .map(|a| a.port_u16().is_some())
                        .unwrap_or(false);
                    if !valid {
                        errors.push(ValidationError::InvalidUpstream {
                            host: label.to_string(),
                            upstream: upstream.clone(),
                        });
                    }
                }
            }
            if let Some(proto) = &route.forwarded_proto {
                if proto != "http" && proto != "https" {
                    errors.push(ValidationError::InvalidForwardedProto {
                        host: label.to_string(),
                        value: proto.clone(),
                    });
                }
            }
        }
    }
}

/// Parse the template and make sure an absolute rendering is a valid URL.
fn check_redirect_target(target: &str) -> Result<(), String> {
    let template: RedirectTemplate = target.parse().map_err(|e| format!("{e}"))?;
    if target.starts_with('/') {
        return Ok(());
    }
    let sample = RequestMeta {
        host: "example.com".to_string(),
        client_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
        scheme: Scheme::Https,
        path: "/sample".to_string(),
        query: Some("q=1".to_string()),
    };
    url::Url::parse(&template.render(&sample))
        .map(|_| ())
        .map_err(|e| e.to_string())
}

fn is_valid_hostname(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 253
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_')
}

/// Human-readable label for error messages.
pub(crate) fn host_label(host: &HostConfig) -> String {
    host.names
        .first()
        .cloned()
        .unwrap_or_else(|| "<unnamed>".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{ListenerConfig, TlsConfig};

    fn host(names: &[&str], routes: Vec<RouteConfig>) -> HostConfig {
        HostConfig {
            names: names.iter().map(|n| n.to_string()).collect(),
            root: Some("/srv/www".into()),
            routes,
            ..HostConfig::default()
        }
    }

    fn profile(hosts: Vec<HostConfig>) -> ProfileConfig {
        ProfileConfig {
            listeners: vec![ListenerConfig::default()],
            hosts,
            ..ProfileConfig::default()
        }
    }

    fn errors_for(profile: ProfileConfig) -> Vec<ValidationError> {
        validate_config(&ProxyConfig::single(profile)).err().unwrap_or_default()
    }

    #[test]
    fn accepts_valid_profile() {
        let config = ProxyConfig::single(profile(vec![host(
            &["ops.example.com"],
            vec![
                RouteConfig::proxy("/api/", "127.0.0.1:8090"),
                RouteConfig::static_files("/"),
            ],
        )]));
        assert_eq!(validate_config(&config), Ok(()));
    }

    #[test]
    fn upstream_timeout_must_fire_before_request_timeout() {
        let mut config = ProxyConfig::single(profile(vec![host(
            &["ops.example.com"],
            vec![RouteConfig::proxy("/", "127.0.0.1:8090")],
        )]));
        config.timeouts.upstream_secs = 30;
        config.timeouts.request_secs = 30;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::TimeoutExceedsRequest {
                inner: "upstream_secs",
                inner_secs: 30,
                request_secs: 30,
            }]
        );
    }

    #[test]
    fn catch_all_before_specific_route_is_shadowing() {
        let errors = errors_for(profile(vec![host(
            &["a.test"],
            vec![
                RouteConfig::static_files("/"),
                RouteConfig::proxy("/api/", "127.0.0.1:8090"),
            ],
        )]));
        assert_eq!(
            errors,
            vec![ValidationError::ShadowedRoute {
                host: "a.test".into(),
                prefix: "/api/".into(),
                shadowed_by: "/".into(),
            }]
        );
    }

    #[test]
    fn duplicate_hostnames_are_not_merged() {
        let errors = errors_for(profile(vec![
            host(&["example.com", "www.example.com"], vec![RouteConfig::static_files("/")]),
            host(&["EXAMPLE.com"], vec![RouteConfig::proxy("/", "127.0.0.1:8000")]),
        ]));
        assert!(errors.contains(&ValidationError::DuplicateHostName {
            profile: "default".into(),
            name: "EXAMPLE.com".into(),
        }));
    }

    #[test]
    fn same_hostname_in_two_profiles_is_fine() {
        let mut config = ProxyConfig::single(profile(vec![host(
            &["example.com"],
            vec![RouteConfig::static_files("/")],
        )]));
        config.profiles.insert(
            "app".into(),
            profile(vec![host(&["example.com"], vec![RouteConfig::proxy("/", "127.0.0.1:8000")])]),
        );
        assert_eq!(validate_config(&config), Ok(()));
    }

    #[test]
    fn route_parameters_are_required() {
        let mut static_host = host(&["a.test"], vec![RouteConfig::static_files("/assets/")]);
        static_host.root = None;
        let mut broken_proxy = RouteConfig::proxy("/api/", "localhost");
        broken_proxy.forwarded_proto = Some("ftp".into());
        let mut no_upstream = RouteConfig::proxy("/b/", "x:1");
        no_upstream.upstream = None;
        static_host.routes.push(broken_proxy);
        static_host.routes.push(no_upstream);

        let errors = errors_for(profile(vec![static_host]));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::MissingRouteField { field: "root", .. })));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::MissingRouteField { field: "upstream", .. })));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::InvalidUpstream { .. })));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::InvalidForwardedProto { .. })));
    }

    #[test]
    fn redirect_templates_are_checked() {
        let errors = errors_for(profile(vec![host(
            &["www.a.test"],
            vec![RouteConfig::redirect("/", "https://a.test$request_path")],
        )]));
        assert!(matches!(errors.as_slice(), [ValidationError::InvalidRedirectTarget { .. }]));

        let ok = errors_for(profile(vec![host(
            &["www.a.test"],
            vec![RouteConfig::redirect("/", "https://a.test$request_uri")],
        )]));
        assert!(ok.is_empty(), "{ok:?}");
    }

    #[test]
    fn fallback_host_must_exist() {
        let mut p = profile(vec![host(&["a.test"], vec![RouteConfig::static_files("/")])]);
        p.unknown_host = UnknownHostPolicy::Fallback("b.test".into());
        assert_eq!(
            errors_for(p),
            vec![ValidationError::UnknownFallbackHost {
                profile: "default".into(),
                name: "b.test".into(),
            }]
        );
    }

    #[test]
    fn tls_listener_needs_a_certificate() {
        let mut p = profile(vec![host(&["a.test"], vec![RouteConfig::static_files("/")])]);
        p.listeners[0].tls = true;
        assert!(matches!(errors_for(p.clone()).as_slice(), [ValidationError::TlsWithoutCertificates { .. }]));

        p.hosts[0].tls = Some(TlsConfig {
            cert_path: "/etc/ssl/a.pem".into(),
            key_path: "/etc/ssl/a.key".into(),
        });
        assert!(errors_for(p).is_empty());
    }

    #[test]
    fn active_profile_must_exist() {
        let mut config = ProxyConfig::single(profile(vec![host(
            &["a.test"],
            vec![RouteConfig::static_files("/")],
        )]));
        config.active_profile = Some("missing".into());
        assert_eq!(
            validate_config(&config),
            Err(vec![ValidationError::UnknownProfile("missing".into())])
        );
    }
}
