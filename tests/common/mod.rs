//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use edge_router::config::snapshot::SnapshotStore;
use edge_router::config::{ListenerConfig, ListenerMode, ProxyConfig};
use edge_router::{EdgeServer, Shutdown};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// A raw-TCP upstream that answers 200 with the request head it received.
pub struct EchoUpstream {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl EchoUpstream {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// Start an echo upstream on an ephemeral port.
pub async fn start_echo_upstream() -> EchoUpstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    let counter = counter.clone();
                    tokio::spawn(async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        echo(socket).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    EchoUpstream { addr, hits }
}

async fn echo(mut socket: TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < head_end + content_length {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        head.len(),
        head
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

/// An upstream that reads the request, writes `reply` and then never says another word.
pub async fn start_quiet_upstream(reply: &'static [u8]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(reply).await;
                tokio::time::sleep(Duration::from_secs(60)).await;
            });
        }
    });
    addr
}

/// An address with nothing listening on it.
pub fn dead_upstream_addr() -> SocketAddr {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
}

/// A loopback listener on an ephemeral port.
pub fn listener(tls: bool, mode: ListenerMode) -> ListenerConfig {
    ListenerConfig {
        bind_address: "127.0.0.1:0".to_string(),
        tls,
        mode,
        ..ListenerConfig::default()
    }
}

/// A running edge router.
pub struct TestServer {
    pub addrs: Vec<SocketAddr>,
    pub store: Arc<SnapshotStore>,
    pub updates: mpsc::UnboundedSender<ProxyConfig>,
    pub shutdown: Shutdown,
}

impl TestServer {
    pub fn port(&self, index: usize) -> u16 {
        self.addrs[index].port()
    }

    /// Push a configuration and wait until it is applied or rejected.
    pub async fn push_config(&self, config: ProxyConfig) {
        let before = self.store.load().generation;
        self.updates.send(config).unwrap();
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.store.load().generation != before {
                return;
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Start the router and wait until its listeners accept connections.
pub async fn start_server(config: ProxyConfig) -> TestServer {
    let server = EdgeServer::new(&config, None).unwrap();
    let addrs = server.local_addrs();
    let store = server.snapshots();
    let shutdown = Shutdown::new(Duration::from_secs(1));
    let (updates, update_rx) = mpsc::unbounded_channel();

    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(update_rx, server_shutdown).await;
    });

    for addr in &addrs {
        wait_for_port(*addr).await;
    }

    TestServer {
        addrs,
        store,
        updates,
        shutdown,
    }
}

async fn wait_for_port(addr: SocketAddr) {
    for _ in 0..50 {
        if TcpStream::connect(addr).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("listener {addr} never came up");
}

/// HTTP client that resolves `names` to `addr` and never follows redirects.
pub fn client_for(names: &[&str], addr: SocketAddr) -> reqwest::Client {
    let mut builder = reqwest::Client::builder()
        .no_proxy()
        .redirect(reqwest::redirect::Policy::none())
        .pool_max_idle_per_host(0)
        .danger_accept_invalid_certs(true)
        .tls_info(true)
        .timeout(Duration::from_secs(10));
    for name in names {
        builder = builder.resolve(name, addr);
    }
    builder.build().unwrap()
}

/// Lay out a built single-page site under `root`.
pub fn write_site(root: &Path) {
    let files = [
        ("index.html", "<!doctype html><html><body>spa shell index page</body></html>"),
        ("about.html", "<!doctype html><html><body>about page, served by clean url</body></html>"),
        ("docs/index.html", "<!doctype html><html><body>docs directory index</body></html>"),
        ("_astro/app.4f2a.js", "console.log('hashed asset bundle');"),
    ];
    for (path, contents) in files {
        let path = root.join(path);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }
}
