//! Round-robin load balancing strategy.

use crate::load_balancer::{BackendId, BackendSnapshot, LoadBalancer, Registry};

/// Round-robin selector.
/// Rotates through candidates using the registry's shared cursor.
#[derive(Debug, Default)]
pub struct RoundRobin;

impl RoundRobin {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for RoundRobin {
    fn next_server(&self, candidates: &[BackendSnapshot], registry: &Registry) -> Option<BackendId> {
        if candidates.is_empty() {
            return None;
        }
        let index = registry.next_round_robin_index(candidates.len());
        Some(candidates[index].backend.id())
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}
