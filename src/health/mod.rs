//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe each backend (skip if previous probe still in flight)
//!     → Registry::record_probe
//!
//! Passive health checks (passive.rs):
//!     Request outcome observed by the forwarder
//!     → Registry::record_success / record_failure
//!
//! State machine (state.rs):
//!     Healthy ←→ Unhealthy
//!     With thresholds to prevent flapping
//! ```
//!
//! # Design Decisions
//! - Active and passive checks are complementary
//! - Both converge on the same registry entry points, so there is one state machine
//! - Health state is per-backend

pub mod active;
pub mod passive;
pub mod state;

pub use active::HealthMonitor;
pub use state::{HealthState, HealthThresholds, HealthTransition};
