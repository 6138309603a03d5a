//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → handed to subsystems at construction
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; the backend list is fixed for the process lifetime
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, read_config, ConfigError};
pub use validation::{validate_config, ValidationError};
pub use schema::{
    AdminConfig, BackendConfig, HealthCheckConfig, LimitsConfig, ListenerConfig,
    LoadBalancingConfig, LoadBalancingPolicy, LogFormat, ObservabilityConfig, ProxyConfig,
    TimeoutConfig,
};
