//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the registry, selector and forwarder from configuration
//! - Bind the proxy and admin listeners
//! - Start background tasks (health checks, admin API, metrics)
//! - Run until shutdown, then drain

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::admin::{self, AdminState};
use crate::config::ProxyConfig;
use crate::health::HealthMonitor;
use crate::http::{Forwarder, ForwarderConfig, ProxyServer};
use crate::lifecycle::Shutdown;
use crate::load_balancer::{Registry, ResolveError, Selector};
use crate::net::{Listener, ListenerError};
use crate::observability::metrics;

/// Fatal error while starting or running the proxy.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Backend(#[from] ResolveError),
    #[error("invalid {field} {value:?}")]
    InvalidAddress { field: &'static str, value: String },
    #[error("listener error: {0}")]
    Listener(#[from] ListenerError),
    #[error("failed to bind admin API on {addr}: {source}")]
    AdminBind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("failed to install metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

/// A fully wired proxy whose listeners are bound but not yet serving.
pub struct Proxy {
    registry: Arc<Registry>,
    server: ProxyServer,
    listener: Listener,
    monitor: HealthMonitor,
    admin: Option<(TcpListener, AdminState)>,
    drain_timeout: Duration,
}

impl Proxy {
    /// Wire every subsystem and bind the listeners.
    pub async fn build(config: &ProxyConfig) -> Result<Self, StartupError> {
        let registry = Arc::new(Registry::from_config(&config.backends, &config.health_check).await?);
        for backend in registry.backends() {
            tracing::info!(
                backend = %backend.name(),
                address = %backend.addr(),
                weight = backend.weight(),
                max_connections = ?backend.max_connections(),
                "Backend registered"
            );
            metrics::record_backend_health(backend.name(), true);
        }

        let selector = Arc::new(Selector::from_config(Arc::clone(&registry), &config.load_balancing));
        let forwarder = Forwarder::new(Arc::clone(&registry), ForwarderConfig::from_config(config));
        let server = ProxyServer::from_config(Arc::clone(&selector), forwarder, config);
        let monitor = HealthMonitor::new(Arc::clone(&registry), config.health_check.clone());

        let listener = Listener::bind(&config.listener).await?;

        let admin = if config.admin.enabled {
            let addr = parse_addr("admin.bind_address", &config.admin.bind_address)?;
            let tcp = TcpListener::bind(addr)
                .await
                .map_err(|source| StartupError::AdminBind { addr, source })?;
            let state = AdminState::new(
                Arc::clone(&registry),
                server.tracker().clone(),
                selector.policy_name(),
                config.admin.api_key.as_str(),
            );
            Some((tcp, state))
        } else {
            None
        };

        if config.observability.metrics_enabled {
            let addr = parse_addr("observability.metrics_address", &config.observability.metrics_address)?;
            metrics::init_metrics(addr)?;
        }

        Ok(Self {
            registry,
            server,
            listener,
            monitor,
            admin,
            drain_timeout: Duration::from_secs(config.timeouts.request_secs),
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn admin_addr(&self) -> Option<SocketAddr> {
        self.admin.as_ref().and_then(|(tcp, _)| tcp.local_addr().ok())
    }

    /// Serve until `shutdown` is triggered, then drain open connections.
    pub async fn run(self, shutdown: Shutdown) -> Result<(), StartupError> {
        let Proxy {
            server,
            listener,
            monitor,
            admin,
            drain_timeout,
            ..
        } = self;

        tokio::spawn(monitor.run(shutdown.subscribe()));

        if let Some((tcp, state)) = admin {
            let admin_shutdown = shutdown.subscribe();
            tokio::spawn(async move {
                if let Err(e) = admin::serve(tcp, state, admin_shutdown).await {
                    tracing::error!(error = %e, "Admin API failed");
                }
            });
        }

        let result = server.run(listener, shutdown.subscribe()).await;
        // Stop the background tasks too if the accept loop failed.
        shutdown.trigger();

        let open = server.tracker().active_count();
        if open > 0 {
            tracing::info!(open_connections = open, "Draining connections");
        }
        let remaining = server.tracker().wait_for_shutdown(drain_timeout).await;
        if remaining > 0 {
            tracing::warn!(open_connections = remaining, "Drain deadline passed, closing anyway");
        }

        result.map_err(StartupError::from)
    }
}

fn parse_addr(field: &'static str, value: &str) -> Result<SocketAddr, StartupError> {
    value.parse().map_err(|_| StartupError::InvalidAddress {
        field,
        value: value.to_string(),
    })
}
