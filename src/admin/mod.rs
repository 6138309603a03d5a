//! Admin API: read-only status and backend health over HTTP.
//!
//! Every route requires `Authorization: Bearer <api_key>`.

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use crate::load_balancer::Registry;
use crate::net::ConnectionTracker;

use self::auth::admin_auth_middleware;
use self::handlers::{get_backends, get_status};

/// Shared state for admin handlers.
#[derive(Debug, Clone)]
pub struct AdminState {
    pub registry: Arc<Registry>,
    pub tracker: ConnectionTracker,
    pub policy: &'static str,
    pub api_key: Arc<str>,
    pub started: Instant,
}

impl AdminState {
    pub fn new(
        registry: Arc<Registry>,
        tracker: ConnectionTracker,
        policy: &'static str,
        api_key: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            registry,
            tracker,
            policy,
            api_key: api_key.into(),
            started: Instant::now(),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/backends", get(get_backends))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    state: AdminState,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(address = %addr, "Admin API listening");
    }
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}
