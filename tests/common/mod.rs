//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use rr_proxy::config::{BackendConfig, ProxyConfig};
use rr_proxy::http::body::relay_body;
use rr_proxy::http::{HttpStream, RequestHead};
use rr_proxy::{Proxy, Registry, Shutdown};

/// A request as seen by a mock backend.
#[derive(Debug, Clone)]
pub struct Received {
    pub head: RequestHead,
    /// Body bytes exactly as they arrived (chunk framing included).
    pub body: Vec<u8>,
}

pub struct MockBackend {
    pub addr: SocketAddr,
    pub received: mpsc::UnboundedReceiver<Received>,
}

/// Start a backend that answers every request with `handler`'s bytes.
/// Connections stay open while the client asks for keep-alive.
pub async fn start_backend<F, Fut>(handler: F) -> MockBackend
where
    F: Fn(Received) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Vec<u8>> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, received) = mpsc::unbounded_channel();
    let handler = Arc::new(handler);

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let handler = Arc::clone(&handler);
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut stream = HttpStream::new(socket);
                loop {
                    let Ok(Some(raw)) = stream.read_head(64 * 1024).await else { break };
                    let head = RequestHead::parse(&raw).unwrap();
                    let framing = head.framing().unwrap();
                    let mut body = Vec::new();
                    let mut buf = vec![0u8; 16 * 1024];
                    let mut count = 0;
                    if relay_body(&mut stream, &mut body, framing, &mut buf, &mut count).await.is_err() {
                        break;
                    }
                    let keep_alive = head.keep_alive();
                    let request = Received { head, body };
                    let _ = tx.send(request.clone());
                    let response = handler(request).await;
                    if stream.write_all(&response).await.is_err() || !keep_alive {
                        break;
                    }
                }
            });
        }
    });

    MockBackend { addr, received }
}

/// Backend that answers every request with its own name as the body.
pub async fn start_named_backend(name: &'static str) -> MockBackend {
    start_backend(move |_| async move { text_response(name) }).await
}

pub fn text_response(body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    )
    .into_bytes()
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Proxy config listening on an ephemeral port with probes disabled.
pub fn proxy_config(backends: &[SocketAddr]) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.health_check.enabled = false;
    config.backends = backends
        .iter()
        .map(|addr| BackendConfig::new(addr.to_string()))
        .collect();
    config
}

pub struct RunningProxy {
    pub addr: SocketAddr,
    pub admin_addr: Option<SocketAddr>,
    pub registry: Arc<Registry>,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<()>,
}

pub async fn start_proxy(config: ProxyConfig) -> RunningProxy {
    let proxy = Proxy::build(&config).await.unwrap();
    let addr = proxy.local_addr().unwrap();
    let admin_addr = proxy.admin_addr();
    let registry = Arc::clone(proxy.registry());
    let shutdown = Shutdown::new();
    let run_shutdown = shutdown.clone();
    let handle = tokio::spawn(async move {
        proxy.run(run_shutdown).await.unwrap();
    });
    RunningProxy {
        addr,
        admin_addr,
        registry,
        shutdown,
        handle,
    }
}

/// Send raw bytes and read until the proxy closes the connection.
pub async fn raw_exchange(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut response))
        .await
        .expect("proxy did not close the connection")
        .unwrap();
    response
}

/// `GET /` with `Connection: close`; returns the whole response as text.
pub async fn get(addr: SocketAddr) -> String {
    let raw = raw_exchange(addr, b"GET / HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n").await;
    String::from_utf8(raw).unwrap()
}

pub fn status_of(response: &str) -> u16 {
    response
        .split(' ')
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

pub fn body_of(response: &str) -> &str {
    response.split_once("\r\n\r\n").map_or("", |(_, body)| body)
}
