//! Passive health checking from live traffic.
//!
//! # Responsibilities
//! - Turn the outcome of a forwarded request into one registry update
//! - Leave requests that never reached a backend unrecorded
//!
//! # Design Decisions
//! - HTTP status codes are not failures; any complete response is success
//! - Timeouts and mid-stream resets are failures

use crate::http::context::Outcome;
use crate::load_balancer::{BackendId, Registry};

use super::HealthTransition;

/// Feed a finished request cycle into the backend's health state.
///
/// Returns the transition it caused, if any. Outcomes that involve no
/// backend (`NoBackend`, `Rejected`) and `Pending` are ignored.
pub fn record_outcome(registry: &Registry, backend: BackendId, outcome: Outcome) -> Option<HealthTransition> {
    match outcome {
        Outcome::Success => registry.record_success(backend),
        Outcome::Failed(kind) => registry.record_failure(backend, kind),
        Outcome::Pending | Outcome::NoBackend | Outcome::Rejected => {
            tracing::debug!(backend = %backend, outcome = outcome.as_str(), "Outcome not recorded");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::test_support::registry_with_weights;
    use crate::load_balancer::FailureKind;

    #[test]
    fn failures_and_successes_reach_the_registry() {
        let registry = registry_with_weights(&[1, 1]);
        let id = BackendId(1);

        for _ in 0..2 {
            assert_eq!(record_outcome(&registry, id, Outcome::Failed(FailureKind::Timeout)), None);
        }
        assert_eq!(
            record_outcome(&registry, id, Outcome::Failed(FailureKind::MidStreamReset)),
            Some(HealthTransition::BecameUnhealthy)
        );
        assert!(!registry.is_healthy(id));

        record_outcome(&registry, id, Outcome::Success);
        assert_eq!(
            record_outcome(&registry, id, Outcome::Success),
            Some(HealthTransition::BecameHealthy)
        );
    }

    #[test]
    fn non_backend_outcomes_are_ignored() {
        let registry = registry_with_weights(&[1]);
        for outcome in [Outcome::Pending, Outcome::NoBackend, Outcome::Rejected] {
            assert_eq!(record_outcome(&registry, BackendId(0), outcome), None);
        }
        let summary = &registry.health_summary()[0];
        assert_eq!(summary.total_failures + summary.total_successes, 0);
    }
}
