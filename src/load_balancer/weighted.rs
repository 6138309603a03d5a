//! Weighted round-robin load balancing strategy.
//!
//! The shared cursor is wrapped into `0..sum(weights)` and mapped onto the
//! candidate whose cumulative weight range contains it. Over any window of
//! `sum(weights)` consecutive picks each candidate appears exactly `weight`
//! times.

use crate::load_balancer::{BackendId, BackendSnapshot, LoadBalancer, Registry};

#[derive(Debug, Default)]
pub struct WeightedRoundRobin;

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for WeightedRoundRobin {
    fn next_server(&self, candidates: &[BackendSnapshot], registry: &Registry) -> Option<BackendId> {
        if candidates.is_empty() {
            return None;
        }

        let total: usize = candidates
            .iter()
            .map(|c| c.backend.weight() as usize)
            .sum();
        let ticket = registry.next_round_robin_index(total);

        let mut accumulated = 0usize;
        for candidate in candidates {
            accumulated += candidate.backend.weight() as usize;
            if ticket < accumulated {
                return Some(candidate.backend.id());
            }
        }

        // Unreachable while weights are >= 1.
        candidates.first().map(|c| c.backend.id())
    }

    fn name(&self) -> &'static str {
        "weighted_round_robin"
    }
}
