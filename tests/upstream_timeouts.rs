//! Slow and stalled upstreams are cut off and never pin a listener slot.

use std::time::{Duration, Instant};

use edge_router::config::{HostConfig, ListenerMode, ProfileConfig, ProxyConfig, RouteConfig};
use reqwest::StatusCode;

mod common;

const STALLED_BODY: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 100\r\n\r\nhello";

fn config(hosts: Vec<HostConfig>, max_connections: usize) -> ProxyConfig {
    let mut listener = common::listener(false, ListenerMode::Route);
    listener.max_connections = max_connections;
    let mut config = ProxyConfig::single(ProfileConfig {
        listeners: vec![listener],
        hosts,
        ..ProfileConfig::default()
    });
    config.timeouts.upstream_secs = 1;
    config.timeouts.request_secs = 5;
    config
}

fn proxy_host(name: &str, upstream: std::net::SocketAddr) -> HostConfig {
    HostConfig {
        names: vec![name.to_string()],
        routes: vec![RouteConfig::proxy("/", upstream.to_string())],
        ..HostConfig::default()
    }
}

#[tokio::test]
async fn test_silent_upstream_is_bad_gateway() {
    let upstream = common::start_quiet_upstream(b"").await;
    let server = common::start_server(config(vec![proxy_host("example.com", upstream)], 64)).await;
    let port = server.port(0);
    let client = common::client_for(&["example.com"], server.addrs[0]);

    let started = Instant::now();
    let res = client
        .get(format!("http://example.com:{port}/"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_stalled_body_is_cut_off() {
    let upstream = common::start_quiet_upstream(STALLED_BODY).await;
    let server = common::start_server(config(vec![proxy_host("example.com", upstream)], 64)).await;
    let port = server.port(0);
    let client = common::client_for(&["example.com"], server.addrs[0]);

    let res = client
        .get(format!("http://example.com:{port}/"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body = tokio::time::timeout(Duration::from_secs(5), res.bytes())
        .await
        .expect("stalled body was never cut off");
    assert!(body.is_err());
}

#[tokio::test]
async fn test_streaming_body_holds_listener_slot() {
    let upstream = common::start_quiet_upstream(STALLED_BODY).await;
    let redirect = HostConfig {
        names: vec!["www.example.com".into()],
        routes: vec![RouteConfig::redirect("/", "https://example.com$request_uri")],
        ..HostConfig::default()
    };
    let server = common::start_server(config(vec![proxy_host("example.com", upstream), redirect], 1)).await;
    let port = server.port(0);
    let client = common::client_for(&["example.com", "www.example.com"], server.addrs[0]);

    let streaming = client
        .get(format!("http://example.com:{port}/"))
        .send()
        .await
        .unwrap();
    assert_eq!(streaming.status(), StatusCode::OK);

    // Headers are out but the body is still open, so the only slot is taken.
    let shed = client
        .get(format!("http://www.example.com:{port}/"))
        .send()
        .await
        .unwrap();
    assert_eq!(shed.status(), StatusCode::SERVICE_UNAVAILABLE);

    assert!(streaming.bytes().await.is_err());
    tokio::time::sleep(Duration::from_millis(100)).await;

    let admitted = client
        .get(format!("http://www.example.com:{port}/"))
        .send()
        .await
        .unwrap();
    assert_eq!(admitted.status(), StatusCode::MOVED_PERMANENTLY);
}
