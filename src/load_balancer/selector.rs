//! Backend selection.
//!
//! # Responsibilities
//! - Snapshot the registry and filter to eligible backends
//! - Apply the fail-open fallback when configured
//! - Delegate the choice to the configured algorithm

use std::sync::Arc;

use thiserror::Error;

use crate::config::LoadBalancingConfig;
use crate::load_balancer::{balancer_for, Backend, BackendSnapshot, LoadBalancer, Registry};

/// No backend can take the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no backend available ({healthy} of {total} healthy)")]
pub struct NoBackendAvailable {
    pub total: usize,
    pub healthy: usize,
}

/// Picks one backend per request.
#[derive(Debug)]
pub struct Selector {
    registry: Arc<Registry>,
    balancer: Box<dyn LoadBalancer>,
    fail_open: bool,
}

impl Selector {
    pub fn new(registry: Arc<Registry>, balancer: Box<dyn LoadBalancer>, fail_open: bool) -> Self {
        Self {
            registry,
            balancer,
            fail_open,
        }
    }

    pub fn from_config(registry: Arc<Registry>, config: &LoadBalancingConfig) -> Self {
        Self::new(registry, balancer_for(config.policy), config.fail_open)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn policy_name(&self) -> &'static str {
        self.balancer.name()
    }

    /// Choose a backend for one request.
    pub fn select(&self) -> Result<Backend, NoBackendAvailable> {
        let snapshot = self.registry.snapshot();
        let total = snapshot.len();

        let (healthy, unhealthy): (Vec<BackendSnapshot>, Vec<BackendSnapshot>) =
            snapshot.into_iter().partition(|b| b.health.is_healthy);
        let healthy_count = healthy.len();

        let mut candidates: Vec<BackendSnapshot> =
            healthy.into_iter().filter(BackendSnapshot::has_capacity).collect();

        if candidates.is_empty() && healthy_count == 0 && self.fail_open {
            candidates = unhealthy
                .into_iter()
                .filter(BackendSnapshot::has_capacity)
                .collect();
            if !candidates.is_empty() {
                tracing::warn!(
                    total,
                    policy = self.balancer.name(),
                    "No healthy backends, failing open"
                );
            }
        }

        let unavailable = NoBackendAvailable {
            total,
            healthy: healthy_count,
        };

        let id = self
            .balancer
            .next_server(&candidates, &self.registry)
            .ok_or(unavailable)?;

        Ok(self.registry.backend(id).clone())
    }
}
