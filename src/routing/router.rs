//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Compile a host's route list into actions
//! - Look up the first route whose prefix matches the path
//! - Return matched route or explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) path prefix scan in declaration order (acceptable for typical route counts)
//! - Explicit NoRoute rather than silent default

use std::sync::Arc;

use axum::http::uri::Authority;
use thiserror::Error;

use crate::actions::redirect::TemplateError;
use crate::actions::{Action, ProxyTarget, RedirectTemplate, StaticSite};
use crate::config::{HostConfig, RouteConfig, RouteKind};
use crate::config::validation::host_label;
use crate::http::response::RouteError;
use crate::routing::matcher::PathPrefix;

/// Errors turning a route config into an action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("{kind:?} route {prefix} on {host} is missing `{field}`")]
    MissingField {
        host: String,
        prefix: String,
        kind: RouteKind,
        field: &'static str,
    },

    #[error("redirect on {host}: {source}")]
    Template {
        host: String,
        #[source]
        source: TemplateError,
    },

    #[error("invalid upstream {upstream} on {host}")]
    Upstream { host: String, upstream: String },
}

/// A compiled route.
#[derive(Debug, Clone)]
pub struct Route {
    pub prefix: PathPrefix,
    pub action: Action,
}

/// A compiled virtual host.
#[derive(Debug)]
pub struct VirtualHost {
    pub names: Vec<String>,
    pub routes: Vec<Route>,
    pub max_body_size: Option<u64>,
    pub gzip: bool,
}

impl VirtualHost {
    pub fn from_config(config: &HostConfig) -> Result<Self, CompileError> {
        let label = host_label(config);
        let routes = config
            .routes
            .iter()
            .map(|route| compile_route(&label, config, route))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            names: config.names.clone(),
            routes,
            max_body_size: config.max_body_size.map(|b| b.as_u64()),
            gzip: config.gzip,
        })
    }

    /// First declared name, used in logs and metrics.
    pub fn label(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or("<unnamed>")
    }

    /// First route in declaration order whose prefix matches `path`.
    pub fn match_route(&self, path: &str) -> Result<&Route, RouteError> {
        self.routes
            .iter()
            .find(|route| route.prefix.matches(path))
            .ok_or_else(|| RouteError::NoRoute(path.to_string()))
    }
}

fn compile_route(label: &str, host: &HostConfig, route: &RouteConfig) -> Result<Route, CompileError> {
    let missing = |field| CompileError::MissingField {
        host: label.to_string(),
        prefix: route.prefix.clone(),
        kind: route.kind,
        field,
    };

    let action = match route.kind {
        RouteKind::Redirect => {
            let target = route.target.as_deref().ok_or_else(|| missing("target"))?;
            let template: RedirectTemplate = target.parse().map_err(|source| CompileError::Template {
                host: label.to_string(),
                source,
            })?;
            Action::Redirect(template)
        }
        RouteKind::Static => {
            let root = route
                .root
                .clone()
                .or_else(|| host.root.clone())
                .ok_or_else(|| missing("root"))?;
            Action::Static(Arc::new(StaticSite {
                root,
                index: host.index.clone(),
                clean_urls: host.clean_urls,
                spa_fallback: host.spa_fallback,
                immutable_prefixes: host.immutable_prefixes.clone(),
                immutable_max_age_secs: host.immutable_max_age_secs,
            }))
        }
        RouteKind::Proxy => {
            let raw = route.upstream.as_deref().ok_or_else(|| missing("upstream"))?;
            let upstream: Authority = raw.parse().map_err(|_| CompileError::Upstream {
                host: label.to_string(),
                upstream: raw.to_string(),
            })?;
            Action::Proxy(ProxyTarget {
                upstream,
                strip_prefix: route.strip_prefix.then(|| route.prefix.clone()),
                forwarded_proto: route.forwarded_proto.clone(),
                max_body_size: route.max_body_size.map(|b| b.as_u64()),
            })
        }
    };

    Ok(Route {
        prefix: PathPrefix::new(route.prefix.clone()),
        action,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ByteSize;

    fn ops_host() -> HostConfig {
        HostConfig {
            names: vec!["ops.example.com".into()],
            root: Some("/srv/ops/dist".into()),
            spa_fallback: true,
            routes: vec![
                RouteConfig {
                    strip_prefix: true,
                    forwarded_proto: Some("https".into()),
                    ..RouteConfig::proxy("/api/", "127.0.0.1:8090")
                },
                RouteConfig::static_files("/"),
            ],
            ..HostConfig::default()
        }
    }

    #[test]
    fn first_matching_prefix_wins() {
        let host = VirtualHost::from_config(&ops_host()).unwrap();

        let api = host.match_route("/api/login").unwrap();
        assert_eq!(api.prefix.as_str(), "/api/");
        assert_eq!(api.action.kind(), "proxy");

        let page = host.match_route("/dashboard").unwrap();
        assert_eq!(page.prefix.as_str(), "/");
        assert_eq!(page.action.kind(), "static");

        // No trailing slash: not under /api/.
        assert_eq!(host.match_route("/api").unwrap().action.kind(), "static");
    }

    #[test]
    fn no_matching_prefix_is_not_found() {
        let mut config = ops_host();
        config.routes.truncate(1);
        let host = VirtualHost::from_config(&config).unwrap();
        assert_eq!(host.match_route("/index.html").unwrap_err().status(), 404);
    }

    #[test]
    fn proxy_route_compiles_forwarding_options() {
        let mut config = ops_host();
        config.max_body_size = Some(ByteSize(20 * 1024 * 1024));
        config.routes[0].max_body_size = Some(ByteSize(1024));
        let host = VirtualHost::from_config(&config).unwrap();

        assert_eq!(host.max_body_size, Some(20 * 1024 * 1024));
        match &host.routes[0].action {
            Action::Proxy(target) => {
                assert_eq!(target.upstream.as_str(), "127.0.0.1:8090");
                assert_eq!(target.strip_prefix.as_deref(), Some("/api/"));
                assert_eq!(target.forwarded_proto.as_deref(), Some("https"));
                assert_eq!(target.max_body_size, Some(1024));
            }
            other => panic!("expected proxy, got {other:?}"),
        }
    }

    #[test]
    fn static_route_inherits_host_settings() {
        let host = VirtualHost::from_config(&ops_host()).unwrap();
        match &host.routes[1].action {
            Action::Static(site) => {
                assert_eq!(site.root, std::path::PathBuf::from("/srv/ops/dist"));
                assert!(site.spa_fallback);
                assert_eq!(site.index, "index.html");
            }
            other => panic!("expected static, got {other:?}"),
        }
    }

    #[test]
    fn route_root_overrides_host_root() {
        let mut config = ops_host();
        config.routes[1].root = Some("/srv/other".into());
        let host = VirtualHost::from_config(&config).unwrap();
        let Action::Static(site) = &host.routes[1].action else {
            panic!("expected static");
        };
        assert_eq!(site.root, std::path::PathBuf::from("/srv/other"));
    }

    #[test]
    fn missing_fields_fail_compilation() {
        let config = HostConfig {
            names: vec!["a.test".into()],
            routes: vec![RouteConfig::static_files("/")],
            ..HostConfig::default()
        };
        assert!(matches!(
            VirtualHost::from_config(&config),
            Err(CompileError::MissingField { field: "root", .. })
        ));
    }
}
