//! Proxy server: accept loop and per-connection request loop.
//!
//! # Responsibilities
//! - Accept client connections under admission control
//! - Serve each connection in its own task
//! - Read request heads, select a backend, hand off to the forwarder
//! - Loop on keep-alive connections until idle, closed, or draining
//!
//! # Design Decisions
//! - The accept loop never awaits forwarding work
//! - Requests rejected before selection record nothing in the registry
//! - 503 for no backend, 400 for malformed requests, 431 for oversized heads

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::Instrument;

use crate::config::ProxyConfig;
use crate::http::context::{Outcome, ProxyRequestContext};
use crate::http::forwarder::Forwarder;
use crate::http::head::{BodyFraming, HeadError};
use crate::http::request::RequestHead;
use crate::http::response::send_error;
use crate::http::stream::HttpStream;
use crate::load_balancer::Selector;
use crate::net::{ConnectionGuard, ConnectionPermit, ConnectionTracker, Listener, ListenerError};
use crate::observability::events;

/// Pause after a transient accept error.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// How long unread client input is drained after a rejection.
const LINGER_TIMEOUT: Duration = Duration::from_secs(1);
/// Most bytes drained after a rejection.
const LINGER_MAX_BYTES: usize = 256 * 1024;

/// The client-facing half of the proxy.
#[derive(Debug, Clone)]
pub struct ProxyServer {
    selector: Arc<Selector>,
    forwarder: Forwarder,
    tracker: ConnectionTracker,
    idle_timeout: Duration,
    max_header_bytes: usize,
}

impl ProxyServer {
    pub fn new(selector: Arc<Selector>, forwarder: Forwarder, idle_timeout: Duration) -> Self {
        let max_header_bytes = forwarder.config().max_header_bytes;
        Self {
            selector,
            forwarder,
            tracker: ConnectionTracker::new(),
            idle_timeout,
            max_header_bytes,
        }
    }

    pub fn from_config(selector: Arc<Selector>, forwarder: Forwarder, config: &ProxyConfig) -> Self {
        Self::new(selector, forwarder, Duration::from_secs(config.timeouts.idle_secs))
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Accept connections until `shutdown` fires, then signal draining.
    ///
    /// Returns an error only for unrecoverable accept failures.
    pub async fn run(
        &self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(
                address = %addr,
                policy = self.selector.policy_name(),
                backends = self.selector.registry().len(),
                "Proxy server starting"
            );
        }

        let result = loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let guard = self.tracker.track();
                        let span = tracing::debug_span!("connection", id = %guard.id(), peer = %peer);
                        let server = self.clone();
                        tokio::spawn(
                            async move { server.serve_connection(stream, peer, permit, guard).await }
                                .instrument(span),
                        );
                    }
                    Err(e) if e.is_transient() => {
                        tracing::warn!(error = %e, "Transient accept error, retrying");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Accept loop failed");
                        break Err(e);
                    }
                },
                _ = shutdown.recv() => {
                    tracing::info!("Proxy server received shutdown signal, stopping accept loop");
                    break Ok(());
                }
            }
        };

        self.tracker.begin_drain();
        result
    }

    async fn serve_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        _permit: ConnectionPermit,
        _guard: ConnectionGuard,
    ) {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
        }
        let mut client = HttpStream::new(stream);
        let mut drain = self.tracker.drain_receiver();

        loop {
            if *drain.borrow() {
                break;
            }

            let read = tokio::select! {
                read = timeout(self.idle_timeout, client.read_head(self.max_header_bytes)) => read,
                _ = drain.changed() => break,
            };

            let raw = match read {
                Err(_) => {
                    tracing::debug!("Idle connection timed out");
                    break;
                }
                Ok(Ok(Some(raw))) => raw,
                Ok(Ok(None)) => break,
                Ok(Err(HeadError::TooLarge(max))) => {
                    tracing::debug!(max, "Request head too large");
                    reject(&mut client, 431, "Request header fields too large").await;
                    break;
                }
                Ok(Err(HeadError::Malformed(reason))) => {
                    tracing::debug!(reason, "Malformed request head");
                    reject(&mut client, 400, reason).await;
                    break;
                }
                Ok(Err(e)) => {
                    tracing::debug!(error = %e, "Client connection ended mid-head");
                    break;
                }
            };

            let request = match RequestHead::parse(&raw) {
                Ok(request) => request,
                Err(e) => {
                    tracing::debug!(error = %e, "Malformed request head");
                    reject(&mut client, 400, "Malformed request").await;
                    break;
                }
            };
            let framing = match request.framing() {
                Ok(framing) => framing,
                Err(e) => {
                    tracing::debug!(error = %e, "Unsupported request framing");
                    let mut ctx = ProxyRequestContext::new(peer, &request);
                    ctx.outcome = Outcome::Rejected;
                    ctx.status = Some(400);
                    events::request_finished(&ctx);
                    reject(&mut client, 400, "Unsupported request body framing").await;
                    break;
                }
            };

            if !self.handle_request(&mut client, peer, request, framing).await {
                break;
            }
        }
    }

    /// Serve one request. Returns whether the connection stays open.
    async fn handle_request(
        &self,
        client: &mut HttpStream<TcpStream>,
        peer: SocketAddr,
        request: RequestHead,
        framing: BodyFraming,
    ) -> bool {
        let mut ctx = ProxyRequestContext::new(peer, &request);

        let backend = match self.selector.select() {
            Ok(backend) => backend,
            Err(err) => {
                ctx.outcome = Outcome::NoBackend;
                ctx.status = Some(503);
                events::request_finished(&ctx);
                reject(client, 503, &err.to_string()).await;
                return false;
            }
        };

        ctx.backend = Some(backend.clone());
        events::request_routed(&ctx);
        let keep_alive = self
            .forwarder
            .forward(client, request, framing, &backend, &mut ctx)
            .await;
        events::request_finished(&ctx);
        keep_alive
    }
}

/// Send an error response and close without resetting the connection.
///
/// Unread request bytes would make the close a TCP reset, which can
/// destroy the response before the client reads it, so the write side is
/// shut down first and remaining input is discarded for a bounded time.
async fn reject(client: &mut HttpStream<TcpStream>, status: u16, message: &str) {
    send_error(client, status, message).await;
    if client.get_mut().shutdown().await.is_err() {
        return;
    }

    let drain = async {
        let mut scratch = [0u8; 4096];
        let mut drained = 0;
        while drained < LINGER_MAX_BYTES {
            match client.read_some(&mut scratch).await {
                Ok(0) | Err(_) => break,
                Ok(n) => drained += n,
            }
        }
    };
    let _ = timeout(LINGER_TIMEOUT, drain).await;
}
