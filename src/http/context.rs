//! Per-request bookkeeping.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::http::request::{RequestHead, RequestId};
use crate::load_balancer::{Backend, FailureKind};

/// How a request cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Pending,
    Success,
    Failed(FailureKind),
    /// No backend could be selected.
    NoBackend,
    /// The client sent a request the proxy refused to relay.
    Rejected,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Pending => "pending",
            Outcome::Success => "success",
            Outcome::Failed(kind) => kind.as_str(),
            Outcome::NoBackend => "no_backend",
            Outcome::Rejected => "rejected",
        }
    }
}

/// State of one request/response cycle on a client connection.
#[derive(Debug)]
pub struct ProxyRequestContext {
    pub id: RequestId,
    pub client_addr: SocketAddr,
    pub method: String,
    pub target: String,
    pub backend: Option<Backend>,
    pub started: Instant,
    /// Request body bytes written to the backend.
    pub request_bytes: u64,
    /// Response body bytes written to the client.
    pub response_bytes: u64,
    pub status: Option<u16>,
    /// Set once the response head reached the client. After that no
    /// error response can be sent.
    pub response_started: bool,
    pub outcome: Outcome,
}

impl ProxyRequestContext {
    pub fn new(client_addr: SocketAddr, request: &RequestHead) -> Self {
        Self {
            id: RequestId::new(),
            client_addr,
            method: request.method.clone(),
            target: request.target.clone(),
            backend: None,
            started: Instant::now(),
            request_bytes: 0,
            response_bytes: 0,
            status: None,
            response_started: false,
            outcome: Outcome::Pending,
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.as_ref().map_or("none", |b| b.name())
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}
