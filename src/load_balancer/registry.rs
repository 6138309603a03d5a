//! Backend registry.
//!
//! # Responsibilities
//! - Own the fixed set of backends and their health/load state
//! - Serialize health updates so readers never observe a half-updated state
//! - Provide the shared round-robin cursor
//! - Hand out connection slots that release themselves on drop
//!
//! # Design Decisions
//! - Health state sits behind a per-backend `Mutex` held for a single update only
//! - Active connection gauges and the cursor are plain atomics
//! - Active probes and passive traffic observations share `record_success`/`record_failure`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::config::{BackendConfig, HealthCheckConfig};
use crate::health::state::{HealthState, HealthThresholds, HealthTransition, ProbeRecord};
use crate::load_balancer::backend::{Backend, BackendId, BackendSnapshot, FailureKind, ResolveError};
use crate::observability::metrics;

#[derive(Debug)]
struct Entry {
    backend: Backend,
    health: Mutex<HealthState>,
    active_connections: AtomicUsize,
}

/// Shared, concurrently accessed backend registry.
#[derive(Debug)]
pub struct Registry {
    entries: Vec<Entry>,
    thresholds: HealthThresholds,
    cursor: AtomicUsize,
}

impl Registry {
    /// Create a registry. Backend ids are reassigned to match their position.
    pub fn new(backends: Vec<Backend>, thresholds: HealthThresholds) -> Self {
        let entries = backends
            .into_iter()
            .enumerate()
            .map(|(index, backend)| Entry {
                backend: backend.with_id(BackendId(index)),
                health: Mutex::new(HealthState::new()),
                active_connections: AtomicUsize::new(0),
            })
            .collect();
        Self {
            entries,
            thresholds,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Build a registry from validated configuration, resolving each
    /// backend address.
    pub async fn from_config(
        configs: &[BackendConfig],
        health: &HealthCheckConfig,
    ) -> Result<Self, ResolveError> {
        let mut backends = Vec::with_capacity(configs.len());
        for (index, config) in configs.iter().enumerate() {
            backends.push(Backend::resolve(BackendId(index), config).await?);
        }
        let thresholds = HealthThresholds {
            unhealthy: health.unhealthy_threshold.max(1),
            healthy: health.healthy_threshold.max(1),
        };
        Ok(Self::new(backends, thresholds))
    }

    /// Number of configured backends.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn thresholds(&self) -> HealthThresholds {
        self.thresholds
    }

    /// The immutable backend record.
    pub fn backend(&self, id: BackendId) -> &Backend {
        &self.entry(id).backend
    }

    /// All backends in configuration order.
    pub fn backends(&self) -> impl Iterator<Item = &Backend> {
        self.entries.iter().map(|e| &e.backend)
    }

    /// Consistent per-backend copies, in configuration order.
    pub fn snapshot(&self) -> Vec<BackendSnapshot> {
        self.entries
            .iter()
            .map(|entry| BackendSnapshot {
                backend: entry.backend.clone(),
                health: lock(&entry.health).clone(),
                active_connections: entry.active_connections.load(Ordering::Acquire),
            })
            .collect()
    }

    /// Current health of one backend.
    pub fn is_healthy(&self, id: BackendId) -> bool {
        lock(&self.entry(id).health).is_healthy
    }

    /// Current active connection gauge of one backend.
    pub fn active_connections(&self, id: BackendId) -> usize {
        self.entry(id).active_connections.load(Ordering::Acquire)
    }

    /// Record a successful request or probe.
    pub fn record_success(&self, id: BackendId) -> Option<HealthTransition> {
        let entry = self.entry(id);
        let transition = lock(&entry.health).on_success(self.thresholds);
        self.report_transition(entry, transition, None);
        transition
    }

    /// Record a failed request or probe.
    pub fn record_failure(&self, id: BackendId, kind: FailureKind) -> Option<HealthTransition> {
        let entry = self.entry(id);
        let transition = lock(&entry.health).on_failure(kind, self.thresholds);
        self.report_transition(entry, transition, Some(kind));
        transition
    }

    /// Stamp the probe result and feed it into the health state machine.
    pub fn record_probe(
        &self,
        id: BackendId,
        outcome: Result<(), FailureKind>,
    ) -> Option<HealthTransition> {
        let entry = self.entry(id);
        let transition = {
            let mut health = lock(&entry.health);
            health.last_probe = Some(ProbeRecord {
                at: SystemTime::now(),
                outcome,
            });
            match outcome {
                Ok(()) => health.on_success(self.thresholds),
                Err(kind) => health.on_failure(kind, self.thresholds),
            }
        };
        self.report_transition(entry, transition, outcome.err());
        transition
    }

    /// Increment the active connection gauge and return a slot that
    /// decrements it exactly once when dropped.
    pub fn begin_connection(self: &Arc<Self>, id: BackendId) -> ConnectionSlot {
        let entry = self.entry(id);
        let active = entry.active_connections.fetch_add(1, Ordering::AcqRel) + 1;
        metrics::record_active_connections(entry.backend.name(), active);
        ConnectionSlot {
            registry: Arc::clone(self),
            backend: id,
        }
    }

    /// Decrement the active connection gauge. Saturates at zero.
    pub fn end_connection(&self, id: BackendId) {
        let entry = self.entry(id);
        let previous = entry
            .active_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match previous {
            Ok(n) => metrics::record_active_connections(entry.backend.name(), n - 1),
            Err(_) => tracing::error!(
                backend = %entry.backend.name(),
                "end_connection without matching begin_connection"
            ),
        }
    }

    /// Advance the shared cursor and wrap it into `0..candidate_count`.
    ///
    /// Returns 0 when `candidate_count` is 0.
    pub fn next_round_robin_index(&self, candidate_count: usize) -> usize {
        let ticket = self.cursor.fetch_add(1, Ordering::Relaxed);
        if candidate_count == 0 {
            return 0;
        }
        ticket % candidate_count
    }

    /// Serializable point-in-time view for logs and the admin API.
    pub fn health_summary(&self) -> Vec<BackendHealthSummary> {
        self.snapshot()
            .into_iter()
            .map(BackendHealthSummary::from)
            .collect()
    }

    fn entry(&self, id: BackendId) -> &Entry {
        match self.entries.get(id.0) {
            Some(entry) => entry,
            None => panic!(
                "unknown backend id {} (registry has {} backends)",
                id.0,
                self.entries.len()
            ),
        }
    }

    fn report_transition(
        &self,
        entry: &Entry,
        transition: Option<HealthTransition>,
        kind: Option<FailureKind>,
    ) {
        match transition {
            Some(HealthTransition::BecameUnhealthy) => {
                tracing::warn!(
                    backend = %entry.backend.name(),
                    addr = %entry.backend.addr(),
                    failure = ?kind,
                    threshold = self.thresholds.unhealthy,
                    "Backend marked unhealthy"
                );
                metrics::record_backend_health(entry.backend.name(), false);
            }
            Some(HealthTransition::BecameHealthy) => {
                tracing::info!(
                    backend = %entry.backend.name(),
                    addr = %entry.backend.addr(),
                    threshold = self.thresholds.healthy,
                    "Backend recovered"
                );
                metrics::record_backend_health(entry.backend.name(), true);
            }
            None => {}
        }
    }
}

fn lock(health: &Mutex<HealthState>) -> MutexGuard<'_, HealthState> {
    // The guarded state is plain counters; a poisoned lock still holds a usable value.
    health.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// RAII guard for one in-flight backend connection.
#[derive(Debug)]
pub struct ConnectionSlot {
    registry: Arc<Registry>,
    backend: BackendId,
}

impl ConnectionSlot {
    pub fn backend(&self) -> BackendId {
        self.backend
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.registry.end_connection(self.backend);
    }
}

/// Health summary of one backend.
#[derive(Debug, Clone, Serialize)]
pub struct BackendHealthSummary {
    pub id: BackendId,
    pub name: String,
    pub address: String,
    pub weight: u32,
    pub healthy: bool,
    pub active_connections: usize,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    pub last_failure: Option<FailureKind>,
    /// Unix seconds of the last health flip (or of registration).
    pub last_state_change: u64,
    /// Unix seconds of the last active probe.
    pub last_probe_at: Option<u64>,
    pub last_probe_ok: Option<bool>,
}

impl From<BackendSnapshot> for BackendHealthSummary {
    fn from(snapshot: BackendSnapshot) -> Self {
        let BackendSnapshot {
            backend,
            health,
            active_connections,
        } = snapshot;
        Self {
            id: backend.id(),
            name: backend.name().to_string(),
            address: backend.addr().to_string(),
            weight: backend.weight(),
            healthy: health.is_healthy,
            active_connections,
            consecutive_failures: health.consecutive_failures,
            consecutive_successes: health.consecutive_successes,
            total_successes: health.total_successes,
            total_failures: health.total_failures,
            last_failure: health.last_failure,
            last_state_change: unix_secs(health.last_state_change),
            last_probe_at: health.last_probe.map(|p| unix_secs(p.at)),
            last_probe_ok: health.last_probe.map(|p| p.outcome.is_ok()),
        }
    }
}

fn unix_secs(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}
