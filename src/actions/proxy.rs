//! Proxy action.
//!
//! Forwards a request to a single local upstream over plain HTTP and streams
//! the answer back. There is no retry: a refused connection or a slow upstream
//! is reported to the client as 502 straight away. Once headers are in, the
//! body must keep flowing: a gap longer than the upstream timeout aborts it.

use std::time::Duration;

use axum::body::Body;
use axum::http::uri::{Authority, PathAndQuery, Scheme as UriScheme};
use axum::http::{Request, Response, Uri, Version};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use tower_http::timeout::TimeoutBody;

use crate::http::request::RequestMeta;
use crate::http::response::RouteError;
use crate::security::headers::{strip_hop_by_hop, ForwardedHeaders};
use crate::security::limits::enforce_body_limit;

/// Shared HTTP client for upstream calls.
pub type UpstreamClient = Client<HttpConnector, Body>;

/// Build the upstream client with a bounded connect phase.
pub fn build_client(connect_timeout: Duration) -> UpstreamClient {
    let mut connector = HttpConnector::new();
    connector.set_connect_timeout(Some(connect_timeout));
    connector.set_nodelay(true);
    Client::builder(TokioExecutor::new()).build(connector)
}

/// A compiled proxy route.
#[derive(Debug, Clone)]
pub struct ProxyTarget {
    /// `host:port` of the upstream.
    pub upstream: Authority,
    /// Prefix replaced by `/` before forwarding, when set.
    pub strip_prefix: Option<String>,
    /// Fixed `X-Forwarded-Proto` value.
    pub forwarded_proto: Option<String>,
    /// Route-level body limit, overriding the host's.
    pub max_body_size: Option<u64>,
}

impl ProxyTarget {
    /// Path and query sent upstream.
    pub fn upstream_path(&self, meta: &RequestMeta) -> String {
        let path = match &self.strip_prefix {
            Some(prefix) => {
                let rest = meta.path.strip_prefix(prefix.as_str()).unwrap_or(&meta.path);
                format!("/{}", rest.trim_start_matches('/'))
            }
            None => meta.path.clone(),
        };
        match &meta.query {
            Some(q) => format!("{path}?{q}"),
            None => path,
        }
    }

    fn upstream_uri(&self, meta: &RequestMeta) -> Result<Uri, RouteError> {
        let path_and_query: PathAndQuery = self
            .upstream_path(meta)
            .parse()
            .map_err(|_| RouteError::BadRequest(format!("unforwardable path {}", meta.path)))?;
        Uri::builder()
            .scheme(UriScheme::HTTP)
            .authority(self.upstream.clone())
            .path_and_query(path_and_query)
            .build()
            .map_err(|e| RouteError::BadRequest(e.to_string()))
    }
}

/// Forward `request` to `target`.
///
/// `host_limit` is the virtual host's body limit; the route's own limit wins when set.
pub async fn forward(
    client: &UpstreamClient,
    target: &ProxyTarget,
    host_limit: Option<u64>,
    meta: &RequestMeta,
    request: Request<Body>,
    upstream_timeout: Duration,
) -> Result<Response<Body>, RouteError> {
    let (mut parts, body) = request.into_parts();
    let limit = target.max_body_size.or(host_limit);
    let body = enforce_body_limit(&parts.headers, body, limit).await?;

    let forwarded = ForwardedHeaders::new(meta, &parts.headers, target.forwarded_proto.as_deref());
    strip_hop_by_hop(&mut parts.headers);
    forwarded.apply(&mut parts.headers);

    let uri = target.upstream_uri(meta)?;
    let upstream = target.upstream.to_string();

    tracing::debug!(
        upstream = %upstream,
        uri = %uri,
        forwarded_for = %forwarded.forwarded_for(),
        "Forwarding request"
    );

    let mut outgoing = Request::new(body);
    *outgoing.method_mut() = parts.method;
    *outgoing.uri_mut() = uri;
    *outgoing.version_mut() = Version::HTTP_11;
    *outgoing.headers_mut() = parts.headers;

    // Dropping this future (client went away) drops the upstream call with it.
    let response = match tokio::time::timeout(upstream_timeout, client.request(outgoing)).await {
        Ok(Ok(response)) => response,
        Ok(Err(source)) => {
            tracing::warn!(upstream = %upstream, error = %source, "Upstream request failed");
            return Err(RouteError::UpstreamUnavailable { upstream, source });
        }
        Err(_) => {
            tracing::warn!(upstream = %upstream, timeout = ?upstream_timeout, "Upstream timed out");
            return Err(RouteError::UpstreamTimeout {
                upstream,
                after: upstream_timeout,
            });
        }
    };

    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    let body = TimeoutBody::new(upstream_timeout, body);
    Ok(Response::from_parts(parts, Body::new(body)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::Scheme;
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Upstream that reads the request, writes `reply` and then goes quiet.
    async fn quiet_upstream(reply: &'static [u8]) -> Authority {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket.write_all(reply).await;
                    tokio::time::sleep(Duration::from_secs(30)).await;
                });
            }
        });
        addr.to_string().parse().unwrap()
    }

    fn meta(path: &str, query: Option<&str>) -> RequestMeta {
        RequestMeta {
            host: "ops.example.com".to_string(),
            client_ip: "127.0.0.1".parse().unwrap(),
            scheme: Scheme::Https,
            path: path.to_string(),
            query: query.map(str::to_string),
        }
    }

    fn target(strip: Option<&str>) -> ProxyTarget {
        ProxyTarget {
            upstream: Authority::from_static("127.0.0.1:8090"),
            strip_prefix: strip.map(str::to_string),
            forwarded_proto: None,
            max_body_size: None,
        }
    }

    #[test]
    fn keeps_path_without_strip() {
        assert_eq!(target(None).upstream_path(&meta("/api/items", Some("a=1"))), "/api/items?a=1");
    }

    #[test]
    fn strips_route_prefix() {
        let t = target(Some("/api/"));
        assert_eq!(t.upstream_path(&meta("/api/items/7", None)), "/items/7");
        assert_eq!(t.upstream_path(&meta("/api/", Some("x=y"))), "/?x=y");

        let t = target(Some("/api"));
        assert_eq!(t.upstream_path(&meta("/api/items", None)), "/items");
    }

    #[test]
    fn builds_absolute_upstream_uri() {
        let uri = target(Some("/api/")).upstream_uri(&meta("/api/login", None)).unwrap();
        assert_eq!(uri.to_string(), "http://127.0.0.1:8090/login");
    }

    #[tokio::test]
    async fn refused_connection_is_bad_gateway() {
        // Bind then drop to get a port with nothing listening.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let mut t = target(None);
        t.upstream = format!("127.0.0.1:{port}").parse().unwrap();

        let client = build_client(Duration::from_secs(1));
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let err = forward(&client, &t, None, &meta("/", None), request, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert_eq!(err.status(), 502);
    }

    #[tokio::test]
    async fn silent_upstream_is_bad_gateway_after_timeout() {
        let mut t = target(None);
        t.upstream = quiet_upstream(b"").await;

        let client = build_client(Duration::from_secs(1));
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let started = Instant::now();
        let err = forward(&client, &t, None, &meta("/", None), request, Duration::from_millis(300))
            .await
            .unwrap_err();

        assert!(matches!(err, RouteError::UpstreamTimeout { .. }));
        assert_eq!(err.status(), 502);
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn body_stalled_after_headers_is_aborted() {
        let mut t = target(None);
        t.upstream = quiet_upstream(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nhello").await;

        let client = build_client(Duration::from_secs(1));
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = forward(&client, &t, None, &meta("/", None), request, Duration::from_millis(300))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let body = tokio::time::timeout(
            Duration::from_secs(5),
            axum::body::to_bytes(response.into_body(), usize::MAX),
        )
        .await
        .expect("stalled body was never aborted");
        assert!(body.is_err());
    }
}
