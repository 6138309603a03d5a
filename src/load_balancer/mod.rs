//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Request accepted
//!     → selector.rs (snapshot registry, filter healthy + below capacity)
//!     → Apply load balancing algorithm:
//!         - round_robin.rs (rotate through backends)
//!         - weighted.rs (rotate proportionally to weight)
//!         - least_conn.rs (pick backend with fewest connections)
//!     → Return chosen backend or NoBackendAvailable
//! ```
//!
//! # Design Decisions
//! - Algorithms are stateless; the registry owns the cursor and connection gauges
//! - Policy chosen once at startup from configuration
//! - Unhealthy backends excluded unless fail-open is configured
//! - Selection never touches the connection gauge; the forwarder does that once it dials

pub mod backend;
pub mod least_conn;
pub mod registry;
pub mod round_robin;
pub mod selector;
pub mod weighted;

use std::fmt;

use crate::config::LoadBalancingPolicy;

pub use backend::{Backend, BackendId, BackendSnapshot, FailureKind, ResolveError};
pub use crate::health::state::HealthThresholds;
pub use registry::{BackendHealthSummary, ConnectionSlot, Registry};
pub use selector::{NoBackendAvailable, Selector};

/// A backend selection algorithm.
pub trait LoadBalancer: fmt::Debug + Send + Sync {
    /// Pick one of `candidates`, which are eligible backends in configuration order.
    fn next_server(&self, candidates: &[BackendSnapshot], registry: &Registry) -> Option<BackendId>;

    /// Short policy name for logs.
    fn name(&self) -> &'static str;
}

/// Build the algorithm for a configured policy.
pub fn balancer_for(policy: LoadBalancingPolicy) -> Box<dyn LoadBalancer> {
    match policy {
        LoadBalancingPolicy::RoundRobin => Box::new(round_robin::RoundRobin::new()),
        LoadBalancingPolicy::WeightedRoundRobin => Box::new(weighted::WeightedRoundRobin::new()),
        LoadBalancingPolicy::LeastConnections => Box::new(least_conn::LeastConnections::new()),
    }
}
