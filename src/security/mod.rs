//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Client request:
//!     → headers.rs (strip hop-by-hop, X-Forwarded-For, request ID)
//!     → backend
//! Backend response:
//!     → headers.rs (strip hop-by-hop, Connection)
//!     → client
//! ```
//!
//! Head size limits are enforced while reading (`limits.max_header_bytes`).

pub mod headers;
