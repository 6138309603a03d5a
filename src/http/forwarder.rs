//! Connection forwarder.
//!
//! # Responsibilities
//! - Dial the chosen backend under a connect timeout
//! - Relay one request and its response, streaming both bodies
//! - Bound the whole cycle with the request deadline
//! - Report exactly one outcome per cycle to the registry
//!
//! # Design Decisions
//! - One backend connection per request cycle; nothing is pooled
//! - No retries: once a backend is chosen the cycle succeeds or fails there
//! - The outcome is decided after the deadline race settles, so a timeout
//!   and a completion can never both be recorded

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::ProxyConfig;
use crate::health::passive;
use crate::http::body::{relay_body, RelayError};
use crate::http::context::{Outcome, ProxyRequestContext};
use crate::http::head::{BodyFraming, HeadError};
use crate::http::request::RequestHead;
use crate::http::response::{send_error, ResponseHead};
use crate::http::stream::HttpStream;
use crate::load_balancer::{Backend, FailureKind, Registry};
use crate::security::headers::{prepare_request, prepare_response};

/// Timeouts and buffer sizes used while forwarding.
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_header_bytes: usize,
    pub buffer_bytes: usize,
}

impl ForwarderConfig {
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.timeouts.connect_secs),
            request_timeout: Duration::from_secs(config.timeouts.request_secs),
            max_header_bytes: config.limits.max_header_bytes,
            buffer_bytes: config.limits.buffer_bytes.max(1),
        }
    }
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self::from_config(&ProxyConfig::default())
    }
}

/// Why a forwarded request cycle failed.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("connect to {0} timed out")]
    ConnectTimeout(SocketAddr),
    #[error("backend I/O failed: {0}")]
    BackendIo(std::io::Error),
    #[error("backend closed the connection early")]
    BackendClosed,
    #[error("malformed backend response: {0}")]
    MalformedResponse(HeadError),
    #[error("client I/O failed: {0}")]
    ClientIo(std::io::Error),
    #[error("client closed the connection early")]
    ClientClosed,
    #[error("malformed request body: {0}")]
    MalformedRequest(&'static str),
    #[error("request did not complete within {0:?}")]
    Timeout(Duration),
}

impl ForwardError {
    /// Outcome recorded for the cycle.
    ///
    /// A malformed request body is the client's fault and is answered like
    /// any other 400, so it is `Rejected` and never counts against the
    /// backend.
    pub fn outcome(&self) -> Outcome {
        let kind = match self {
            ForwardError::MalformedRequest(_) => return Outcome::Rejected,
            ForwardError::Connect { .. } => FailureKind::ConnectRefused,
            ForwardError::ConnectTimeout(_) => FailureKind::ConnectTimeout,
            ForwardError::BackendIo(_)
            | ForwardError::BackendClosed
            | ForwardError::MalformedResponse(_) => FailureKind::MidStreamReset,
            ForwardError::ClientIo(_) | ForwardError::ClientClosed => FailureKind::ClientDisconnect,
            ForwardError::Timeout(_) => FailureKind::Timeout,
        };
        Outcome::Failed(kind)
    }

    /// Status to send the client, if it can still receive one.
    pub fn client_status(&self) -> Option<u16> {
        match self {
            ForwardError::Connect { .. }
            | ForwardError::ConnectTimeout(_)
            | ForwardError::BackendIo(_)
            | ForwardError::BackendClosed
            | ForwardError::MalformedResponse(_) => Some(502),
            ForwardError::Timeout(_) => Some(504),
            ForwardError::MalformedRequest(_) => Some(400),
            ForwardError::ClientIo(_) | ForwardError::ClientClosed => None,
        }
    }
}

/// Relays request cycles to backends and reports their outcome.
#[derive(Debug, Clone)]
pub struct Forwarder {
    registry: Arc<Registry>,
    config: ForwarderConfig,
}

impl Forwarder {
    pub fn new(registry: Arc<Registry>, config: ForwarderConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &ForwarderConfig {
        &self.config
    }

    /// Forward one request to `backend` and relay the response.
    ///
    /// Sets `ctx.outcome`, records it in the registry, and returns whether
    /// the client connection may be used for another request.
    pub async fn forward<S>(
        &self,
        client: &mut HttpStream<S>,
        request: RequestHead,
        framing: BodyFraming,
        backend: &Backend,
        ctx: &mut ProxyRequestContext,
    ) -> bool
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let slot = self.registry.begin_connection(backend.id());

        let result = match timeout(
            self.config.request_timeout,
            self.exchange(client, request, framing, backend, ctx),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ForwardError::Timeout(self.config.request_timeout)),
        };

        drop(slot);

        let keep_alive = match result {
            Ok(reuse) => {
                ctx.outcome = Outcome::Success;
                reuse
            }
            Err(err) => {
                ctx.outcome = err.outcome();
                tracing::warn!(
                    request_id = %ctx.id,
                    backend = %backend.name(),
                    error = %err,
                    response_started = ctx.response_started,
                    "Forwarding failed"
                );
                if !ctx.response_started {
                    if let Some(status) = err.client_status() {
                        ctx.status = Some(status);
                        send_error(client, status, &err.to_string()).await;
                    }
                }
                false
            }
        };

        passive::record_outcome(&self.registry, backend.id(), ctx.outcome);
        keep_alive
    }

    async fn exchange<S>(
        &self,
        client: &mut HttpStream<S>,
        mut request: RequestHead,
        framing: BodyFraming,
        backend: &Backend,
        ctx: &mut ProxyRequestContext,
    ) -> Result<bool, ForwardError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let addr = backend.addr();
        let stream = match timeout(self.config.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(ForwardError::Connect { addr, source }),
            Err(_) => return Err(ForwardError::ConnectTimeout(addr)),
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(backend = %backend.name(), error = %e, "Failed to set TCP_NODELAY");
        }
        let mut upstream = HttpStream::new(stream);

        let client_keep_alive = request.keep_alive();
        let client_version = request.version;
        let is_head = request.is_head();
        let expects_continue = request.expects_continue();

        prepare_request(&mut request, ctx.client_addr.ip(), ctx.id);
        upstream
            .write_all(&request.encode())
            .await
            .map_err(ForwardError::BackendIo)?;

        if expects_continue && framing != BodyFraming::Empty {
            client
                .write_all(b"HTTP/1.1 100 Continue\r\n\r\n")
                .await
                .map_err(ForwardError::ClientIo)?;
            client.flush().await.map_err(ForwardError::ClientIo)?;
        }

        let mut buf = vec![0u8; self.config.buffer_bytes];
        relay_body(client, upstream.get_mut(), framing, &mut buf, &mut ctx.request_bytes)
            .await
            .map_err(request_relay_error)?;
        upstream.flush().await.map_err(ForwardError::BackendIo)?;

        let mut response = loop {
            let raw = match upstream.read_head(self.config.max_header_bytes).await {
                Ok(Some(raw)) => raw,
                Ok(None) | Err(HeadError::Closed) => return Err(ForwardError::BackendClosed),
                Err(HeadError::Io(e)) => return Err(ForwardError::BackendIo(e)),
                Err(e) => return Err(ForwardError::MalformedResponse(e)),
            };
            let head = ResponseHead::parse(&raw).map_err(ForwardError::MalformedResponse)?;
            if head.is_interim() {
                tracing::trace!(request_id = %ctx.id, status = head.status, "Skipping interim response");
                continue;
            }
            break head;
        };

        let response_framing = response
            .framing(is_head)
            .map_err(ForwardError::MalformedResponse)?;
        let reuse = client_keep_alive
            && response.keep_alive()
            && response.status != 101
            && response_framing.is_delimited();
        ctx.status = Some(response.status);

        prepare_response(&mut response, reuse, client_version);
        ctx.response_started = true;
        client
            .write_all(&response.encode())
            .await
            .map_err(ForwardError::ClientIo)?;

        relay_body(&mut upstream, client.get_mut(), response_framing, &mut buf, &mut ctx.response_bytes)
            .await
            .map_err(response_relay_error)?;

        Ok(reuse)
    }
}

fn request_relay_error(err: RelayError) -> ForwardError {
    match err {
        RelayError::Read(e) => ForwardError::ClientIo(e),
        RelayError::UnexpectedEof => ForwardError::ClientClosed,
        RelayError::InvalidChunk(msg) => ForwardError::MalformedRequest(msg),
        RelayError::Write(e) => ForwardError::BackendIo(e),
    }
}

fn response_relay_error(err: RelayError) -> ForwardError {
    match err {
        RelayError::Read(e) => ForwardError::BackendIo(e),
        RelayError::UnexpectedEof => ForwardError::BackendClosed,
        RelayError::InvalidChunk(msg) => ForwardError::MalformedResponse(HeadError::Malformed(msg)),
        RelayError::Write(e) => ForwardError::ClientIo(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthThresholds;
    use crate::load_balancer::BackendId;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    struct Run {
        keep_alive: bool,
        ctx: ProxyRequestContext,
        client_saw: Vec<u8>,
    }

    fn setup(addr: SocketAddr, request_timeout: Duration) -> (Forwarder, Arc<Registry>, Backend) {
        let backend = Backend::new(BackendId(0), addr);
        let registry = Arc::new(Registry::new(vec![backend.clone()], HealthThresholds::default()));
        let config = ForwarderConfig {
            connect_timeout: Duration::from_secs(1),
            request_timeout,
            ..ForwarderConfig::default()
        };
        (Forwarder::new(Arc::clone(&registry), config), registry, backend)
    }

    async fn run(forwarder: &Forwarder, backend: &Backend, raw: &[u8]) -> Run {
        let (mut client, proxy_side) = tokio::io::duplex(1024 * 1024);
        client.write_all(raw).await.unwrap();

        let mut stream = HttpStream::new(proxy_side);
        let head = stream.read_head(64 * 1024).await.unwrap().unwrap();
        let request = RequestHead::parse(&head).unwrap();
        let framing = request.framing().unwrap();
        let mut ctx = ProxyRequestContext::new("192.0.2.10:5555".parse().unwrap(), &request);
        ctx.backend = Some(backend.clone());

        let keep_alive = forwarder.forward(&mut stream, request, framing, backend, &mut ctx).await;
        drop(stream);

        let mut client_saw = Vec::new();
        client.read_to_end(&mut client_saw).await.unwrap();
        Run { keep_alive, ctx, client_saw }
    }

    /// Backend that reads one head and answers with `response`.
    async fn one_shot_backend(response: &'static [u8]) -> (SocketAddr, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut stream = HttpStream::new(socket);
            let head = stream.read_head(64 * 1024).await.unwrap().unwrap();
            stream.write_all(response).await.unwrap();
            stream.flush().await.unwrap();
            head.to_vec()
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn successful_cycle_is_recorded_once() {
        let (addr, backend_task) = one_shot_backend(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello").await;
        let (forwarder, registry, backend) = setup(addr, Duration::from_secs(5));

        let run = run(&forwarder, &backend, b"GET /x HTTP/1.1\r\nHost: t\r\n\r\n").await;
        assert!(run.keep_alive);
        assert_eq!(run.ctx.outcome, Outcome::Success);
        assert_eq!(run.ctx.status, Some(200));
        assert_eq!(run.ctx.response_bytes, 5);
        assert!(run.client_saw.ends_with(b"\r\n\r\nhello"));

        let seen = String::from_utf8(backend_task.await.unwrap()).unwrap();
        assert!(seen.starts_with("GET /x HTTP/1.1\r\n"));
        assert!(seen.contains("X-Forwarded-For: 192.0.2.10\r\n"));
        assert!(seen.contains("X-Request-Id: "));

        let summary = &registry.health_summary()[0];
        assert_eq!(summary.total_successes, 1);
        assert_eq!(summary.total_failures, 0);
        assert_eq!(summary.active_connections, 0);
    }

    #[tokio::test]
    async fn connect_refused_sends_502() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let (forwarder, registry, backend) = setup(addr, Duration::from_secs(5));

        let run = run(&forwarder, &backend, b"GET / HTTP/1.1\r\n\r\n").await;
        assert!(!run.keep_alive);
        assert_eq!(run.ctx.outcome, Outcome::Failed(FailureKind::ConnectRefused));
        assert!(run.client_saw.starts_with(b"HTTP/1.1 502 Bad Gateway\r\n"));

        let summary = &registry.health_summary()[0];
        assert_eq!(summary.total_failures, 1);
        assert_eq!(summary.last_failure, Some(FailureKind::ConnectRefused));
        assert_eq!(summary.active_connections, 0);
    }

    #[tokio::test]
    async fn deadline_sends_504_and_releases_slot() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _silent = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });
        let (forwarder, registry, backend) = setup(addr, Duration::from_millis(200));

        let run = run(&forwarder, &backend, b"GET / HTTP/1.1\r\n\r\n").await;
        assert_eq!(run.ctx.outcome, Outcome::Failed(FailureKind::Timeout));
        assert!(run.client_saw.starts_with(b"HTTP/1.1 504 Gateway Timeout\r\n"));

        let summary = &registry.health_summary()[0];
        assert_eq!(summary.total_failures + summary.total_successes, 1);
        assert_eq!(summary.active_connections, 0);
    }

    #[tokio::test]
    async fn truncated_response_is_a_backend_failure() {
        let (addr, _backend) = one_shot_backend(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nonly-this").await;
        let (forwarder, registry, backend) = setup(addr, Duration::from_secs(5));

        let run = run(&forwarder, &backend, b"GET / HTTP/1.1\r\n\r\n").await;
        assert!(!run.keep_alive);
        assert!(run.ctx.response_started);
        assert_eq!(run.ctx.outcome, Outcome::Failed(FailureKind::MidStreamReset));
        // Head already sent, so no error response follows the partial body.
        assert!(run.client_saw.ends_with(b"only-this"));
        assert_eq!(registry.health_summary()[0].total_failures, 1);
    }

    #[tokio::test]
    async fn interim_responses_are_skipped() {
        let (addr, _backend) = one_shot_backend(
            b"HTTP/1.1 103 Early Hints\r\nLink: </a>\r\n\r\nHTTP/1.1 204 No Content\r\n\r\n",
        )
        .await;
        let (forwarder, _registry, backend) = setup(addr, Duration::from_secs(5));

        let run = run(&forwarder, &backend, b"GET / HTTP/1.1\r\n\r\n").await;
        assert_eq!(run.ctx.status, Some(204));
        assert!(run.client_saw.starts_with(b"HTTP/1.1 204 No Content\r\n"));
        assert!(run.keep_alive);
    }

    #[tokio::test]
    async fn close_delimited_response_closes_client() {
        let (addr, _backend) = one_shot_backend(b"HTTP/1.1 200 OK\r\n\r\nstreamed until close").await;
        let (forwarder, _registry, backend) = setup(addr, Duration::from_secs(5));

        let run = run(&forwarder, &backend, b"GET / HTTP/1.1\r\n\r\n").await;
        assert_eq!(run.ctx.outcome, Outcome::Success);
        assert!(!run.keep_alive);
        let text = String::from_utf8(run.client_saw).unwrap();
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with("streamed until close"));
    }

    #[test]
    fn error_classification() {
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        assert_eq!(ForwardError::ConnectTimeout(addr).client_status(), Some(502));
        assert_eq!(ForwardError::Timeout(Duration::from_secs(1)).client_status(), Some(504));
        assert_eq!(ForwardError::ClientClosed.client_status(), None);
        assert_eq!(
            ForwardError::ClientClosed.outcome(),
            Outcome::Failed(FailureKind::ClientDisconnect)
        );
        assert_eq!(
            ForwardError::BackendClosed.outcome(),
            Outcome::Failed(FailureKind::MidStreamReset)
        );
        assert_eq!(ForwardError::MalformedRequest("bad").outcome(), Outcome::Rejected);
        assert_eq!(ForwardError::MalformedRequest("bad").client_status(), Some(400));
    }

    #[tokio::test]
    async fn malformed_request_body_is_not_held_against_backend() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _backend = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut socket = socket;
                    let mut sink = Vec::new();
                    let _ = socket.read_to_end(&mut sink).await;
                });
            }
        });
        let (forwarder, registry, backend) = setup(addr, Duration::from_secs(5));

        for _ in 0..3 {
            let run = run(
                &forwarder,
                &backend,
                b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\nZZZ\r\n",
            )
            .await;
            assert_eq!(run.ctx.outcome, Outcome::Rejected);
            assert!(run.client_saw.starts_with(b"HTTP/1.1 400 Bad Request\r\n"));
        }

        let summary = &registry.health_summary()[0];
        assert!(summary.healthy);
        assert_eq!(summary.total_failures, 0);
        assert_eq!(summary.active_connections, 0);
    }
}
