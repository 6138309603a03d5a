//! Least Connections load balancing strategy.

use crate::load_balancer::{BackendId, BackendSnapshot, LoadBalancer, Registry};

/// Least connections selector.
/// Selects the backend with the minimum number of active connections.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for LeastConnections {
    fn next_server(&self, candidates: &[BackendSnapshot], registry: &Registry) -> Option<BackendId> {
        let min = candidates.iter().map(|c| c.active_connections).min()?;

        // Rotate among equally loaded backends so none starves.
        let tied: Vec<BackendId> = candidates
            .iter()
            .filter(|c| c.active_connections == min)
            .map(|c| c.backend.id())
            .collect();
        let index = registry.next_round_robin_index(tied.len());
        tied.get(index).copied()
    }

    fn name(&self) -> &'static str {
        "least_connections"
    }
}
