//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (admission permit, accept)
//!     → connection.rs (lifecycle tracking, drain signal)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - Permit acquired before accept, so excess clients queue in the kernel backlog
//! - Each connection tracked for graceful shutdown

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{ConnectionPermit, Listener, ListenerError};
