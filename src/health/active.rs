//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every backend, independent of traffic
//! - Never run two probes against the same backend at once
//! - Feed probe results into the registry's state machine

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::config::HealthCheckConfig;
use crate::load_balancer::{Backend, FailureKind, Registry};
use crate::observability::metrics;

/// Probes backends on a fixed interval.
pub struct HealthMonitor {
    registry: Arc<Registry>,
    config: HealthCheckConfig,
    prober: Prober,
    in_flight: Arc<Vec<AtomicBool>>,
}

impl HealthMonitor {
    pub fn new(registry: Arc<Registry>, config: HealthCheckConfig) -> Self {
        let in_flight = (0..registry.len()).map(|_| AtomicBool::new(false)).collect();
        let prober = Prober::new(Duration::from_secs(config.timeout_secs), config.path.clone());
        Self {
            registry,
            config,
            prober,
            in_flight: Arc::new(in_flight),
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval_secs = self.config.interval_secs,
            timeout_secs = self.config.timeout_secs,
            path = self.config.path.as_deref().unwrap_or("<tcp connect>"),
            backends = self.registry.len(),
            "Health monitor starting"
        );

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Start one probe per backend, skipping backends whose previous
    /// probe has not finished. Returns the handles of the started probes.
    pub fn check_all(&self) -> Vec<JoinHandle<()>> {
        let mut started = Vec::with_capacity(self.registry.len());

        for backend in self.registry.backends() {
            let index = backend.id().0;
            if self.in_flight[index].swap(true, Ordering::AcqRel) {
                tracing::debug!(backend = %backend.name(), "Previous probe still in flight, skipping");
                continue;
            }

            let guard = InFlightGuard {
                flags: Arc::clone(&self.in_flight),
                index,
            };
            let registry = Arc::clone(&self.registry);
            let prober = self.prober.clone();
            let backend = backend.clone();

            started.push(tokio::spawn(async move {
                let _guard = guard;
                let outcome = prober.probe(backend.addr()).await;
                report(&registry, &backend, outcome);
            }));
        }

        started
    }
}

fn report(registry: &Registry, backend: &Backend, outcome: Result<(), FailureKind>) {
    match outcome {
        Ok(()) => {
            tracing::trace!(backend = %backend.name(), "Health probe succeeded");
            metrics::record_probe(backend.name(), "ok");
        }
        Err(kind) => {
            tracing::debug!(backend = %backend.name(), failure = %kind, "Health probe failed");
            metrics::record_probe(backend.name(), kind.as_str());
        }
    }
    registry.record_probe(backend.id(), outcome);
}

/// Clears a backend's in-flight flag when its probe task ends.
struct InFlightGuard {
    flags: Arc<Vec<AtomicBool>>,
    index: usize,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flags[self.index].store(false, Ordering::Release);
    }
}

/// Runs a single probe: TCP connect, or `GET path` when a path is set.
#[derive(Clone)]
struct Prober {
    timeout: Duration,
    path: Option<String>,
    client: Client<HttpConnector, Body>,
}

impl Prober {
    fn new(timeout: Duration, path: Option<String>) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(timeout));
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(0)
            .build(connector);
        Self { timeout, path, client }
    }

    async fn probe(&self, addr: SocketAddr) -> Result<(), FailureKind> {
        match &self.path {
            None => self.tcp_probe(addr).await,
            Some(path) => self.http_probe(addr, path).await,
        }
    }

    async fn tcp_probe(&self, addr: SocketAddr) -> Result<(), FailureKind> {
        match time::timeout(self.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(FailureKind::ProbeRefused),
            Err(_) => Err(FailureKind::ProbeTimeout),
        }
    }

    async fn http_probe(&self, addr: SocketAddr, path: &str) -> Result<(), FailureKind> {
        let request = Request::builder()
            .method("GET")
            .uri(format!("http://{}{}", addr, path))
            .header("user-agent", "rr-proxy-health-check")
            .body(Body::empty())
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to build health check request");
                FailureKind::ProbeBadStatus
            })?;

        match time::timeout(self.timeout, self.client.request(request)).await {
            Ok(Ok(response)) if response.status().is_success() => Ok(()),
            Ok(Ok(response)) => {
                tracing::debug!(addr = %addr, status = %response.status(), "Health check returned non-success status");
                Err(FailureKind::ProbeBadStatus)
            }
            Ok(Err(_)) => Err(FailureKind::ProbeRefused),
            Err(_) => Err(FailureKind::ProbeTimeout),
        }
    }
}
