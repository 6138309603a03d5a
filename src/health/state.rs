//! Backend health state machine.
//!
//! # States
//! - Healthy: backend receives traffic
//! - Unhealthy: backend excluded from load balancing
//!
//! # State Transitions
//! ```text
//! Healthy → Unhealthy: consecutive failures >= unhealthy_threshold
//! Unhealthy → Healthy: consecutive successes >= healthy_threshold
//! ```
//!
//! # Design Decisions
//! - Hysteresis prevents flapping
//! - A success resets the failure streak and vice versa
//! - Lifetime totals are kept alongside the streaks for observability

use std::time::SystemTime;

use crate::load_balancer::backend::FailureKind;

/// Consecutive-signal thresholds for the health state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthThresholds {
    /// Consecutive failures needed to go unhealthy.
    pub unhealthy: u32,
    /// Consecutive successes needed to recover.
    pub healthy: u32,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            unhealthy: 3,
            healthy: 2,
        }
    }
}

/// A health flip produced by a recorded outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    BecameHealthy,
    BecameUnhealthy,
}

/// Result of the most recent active probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeRecord {
    pub at: SystemTime,
    pub outcome: Result<(), FailureKind>,
}

/// Mutable health state of one backend. Guarded by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthState {
    pub is_healthy: bool,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    pub last_failure: Option<FailureKind>,
    pub last_probe: Option<ProbeRecord>,
    pub last_state_change: SystemTime,
}

impl HealthState {
    /// Backends start healthy so traffic flows before the first probe.
    pub fn new() -> Self {
        Self {
            is_healthy: true,
            consecutive_failures: 0,
            consecutive_successes: 0,
            total_successes: 0,
            total_failures: 0,
            last_failure: None,
            last_probe: None,
            last_state_change: SystemTime::now(),
        }
    }

    /// Apply a success signal.
    pub fn on_success(&mut self, thresholds: HealthThresholds) -> Option<HealthTransition> {
        self.consecutive_failures = 0;
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.total_successes += 1;

        if !self.is_healthy && self.consecutive_successes >= thresholds.healthy {
            self.is_healthy = true;
            self.last_state_change = SystemTime::now();
            return Some(HealthTransition::BecameHealthy);
        }
        None
    }

    /// Apply a failure signal.
    pub fn on_failure(
        &mut self,
        kind: FailureKind,
        thresholds: HealthThresholds,
    ) -> Option<HealthTransition> {
        self.consecutive_successes = 0;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.total_failures += 1;
        self.last_failure = Some(kind);

        if self.is_healthy && self.consecutive_failures >= thresholds.unhealthy {
            self.is_healthy = false;
            self.last_state_change = SystemTime::now();
            return Some(HealthTransition::BecameUnhealthy);
        }
        None
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: HealthThresholds = HealthThresholds {
        unhealthy: 3,
        healthy: 2,
    };

    #[test]
    fn flips_unhealthy_on_third_failure() {
        let mut state = HealthState::new();
        assert_eq!(state.on_failure(FailureKind::ConnectRefused, T), None);
        assert_eq!(state.on_failure(FailureKind::ConnectRefused, T), None);
        assert!(state.is_healthy);
        assert_eq!(
            state.on_failure(FailureKind::Timeout, T),
            Some(HealthTransition::BecameUnhealthy)
        );
        assert!(!state.is_healthy);
        assert_eq!(state.last_failure, Some(FailureKind::Timeout));
    }

    #[test]
    fn interleaved_success_resets_failures() {
        let mut state = HealthState::new();
        state.on_failure(FailureKind::ConnectRefused, T);
        state.on_failure(FailureKind::ConnectRefused, T);
        state.on_success(T);
        assert_eq!(state.consecutive_failures, 0);
        state.on_failure(FailureKind::ConnectRefused, T);
        state.on_failure(FailureKind::ConnectRefused, T);
        assert!(state.is_healthy);
    }

    #[test]
    fn recovers_after_two_successes() {
        let mut state = HealthState::new();
        for _ in 0..3 {
            state.on_failure(FailureKind::ProbeTimeout, T);
        }
        assert!(!state.is_healthy);
        assert_eq!(state.on_success(T), None);
        assert!(!state.is_healthy);
        assert_eq!(state.on_success(T), Some(HealthTransition::BecameHealthy));
        assert!(state.is_healthy);
    }

    #[test]
    fn further_failures_do_not_retransition() {
        let mut state = HealthState::new();
        for _ in 0..3 {
            state.on_failure(FailureKind::ProbeRefused, T);
        }
        assert_eq!(state.on_failure(FailureKind::ProbeRefused, T), None);
        assert_eq!(state.consecutive_failures, 4);
        assert_eq!(state.total_failures, 4);
        assert_eq!(state.total_successes, 0);
    }

}
