//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single backend server (immutable identity)
//! - Carry a point-in-time copy of its health for selection
//! - Classify failures for observability

use std::fmt;
use std::net::SocketAddr;

use serde::Serialize;
use thiserror::Error;

use crate::config::BackendConfig;
use crate::health::state::HealthState;

/// Index of a backend in configuration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BackendId(pub usize);

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "backend-{}", self.0)
    }
}

/// A single backend server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    id: BackendId,
    name: String,
    addr: SocketAddr,
    weight: u32,
    max_connections: Option<usize>,
}

impl Backend {
    /// Create a backend with weight 1 and no capacity hint.
    pub fn new(id: BackendId, addr: SocketAddr) -> Self {
        Self {
            id,
            name: addr.to_string(),
            addr,
            weight: 1,
            max_connections: None,
        }
    }

    /// Build a backend from its configuration entry and resolved address.
    pub fn from_config(id: BackendId, config: &BackendConfig, addr: SocketAddr) -> Self {
        Self {
            id,
            name: config.name.clone().unwrap_or_else(|| config.address.clone()),
            addr,
            weight: config.weight.max(1),
            max_connections: config.max_connections,
        }
    }

    /// Resolve the configured `host:port` once and build the backend.
    ///
    /// The first address returned by the resolver is used for the life of
    /// the process.
    pub async fn resolve(id: BackendId, config: &BackendConfig) -> Result<Self, ResolveError> {
        let addr = match config.address.parse::<SocketAddr>() {
            Ok(addr) => addr,
            Err(_) => tokio::net::lookup_host(config.address.as_str())
                .await
                .map_err(|source| ResolveError {
                    address: config.address.clone(),
                    source,
                })?
                .next()
                .ok_or_else(|| ResolveError {
                    address: config.address.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses found"),
                })?,
        };
        Ok(Self::from_config(id, config, addr))
    }

    pub(crate) fn with_id(mut self, id: BackendId) -> Self {
        self.id = id;
        self
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the weight (at least 1).
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight.max(1);
        self
    }

    /// Set the capacity hint.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = Some(max);
        self
    }

    pub fn id(&self) -> BackendId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn max_connections(&self) -> Option<usize> {
        self.max_connections
    }
}

/// A backend address that could not be resolved.
#[derive(Debug, Error)]
#[error("cannot resolve backend address {address:?}: {source}")]
pub struct ResolveError {
    pub address: String,
    pub source: std::io::Error,
}

/// Why a request or probe against a backend failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// TCP connect was refused or errored.
    ConnectRefused,
    /// TCP connect did not complete within the connect timeout.
    ConnectTimeout,
    /// The request deadline elapsed.
    Timeout,
    /// The backend connection broke or misbehaved mid-relay.
    MidStreamReset,
    /// The client went away or sent garbage mid-relay.
    ClientDisconnect,
    /// Health probe could not connect.
    ProbeRefused,
    /// Health probe did not answer in time.
    ProbeTimeout,
    /// Health probe answered with a non-2xx status.
    ProbeBadStatus,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ConnectRefused => "connect_refused",
            FailureKind::ConnectTimeout => "connect_timeout",
            FailureKind::Timeout => "timeout",
            FailureKind::MidStreamReset => "mid_stream_reset",
            FailureKind::ClientDisconnect => "client_disconnect",
            FailureKind::ProbeRefused => "probe_refused",
            FailureKind::ProbeTimeout => "probe_timeout",
            FailureKind::ProbeBadStatus => "probe_bad_status",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time copy of a backend and its state.
#[derive(Debug, Clone)]
pub struct BackendSnapshot {
    pub backend: Backend,
    pub health: HealthState,
    pub active_connections: usize,
}

impl BackendSnapshot {
    /// True when the capacity hint leaves room for another connection.
    pub fn has_capacity(&self) -> bool {
        self.backend
            .max_connections()
            .map_or(true, |max| self.active_connections < max)
    }
}
