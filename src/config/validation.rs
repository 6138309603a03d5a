//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, weights >= 1, thresholds >= 1)
//! - Check that every address parses and names are unique
//! - Backend addresses may name a host; resolution happens at startup
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no backends configured")]
    NoBackends,
    #[error("invalid address for {field}: {value}")]
    InvalidAddress { field: String, value: String },
    #[error("backend {0} has weight 0 (must be >= 1)")]
    ZeroWeight(String),
    #[error("backend {0} has max_connections 0")]
    ZeroCapacity(String),
    #[error("duplicate backend name: {0}")]
    DuplicateName(String),
    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),
    #[error("health_check.path must start with '/': {0}")]
    InvalidPath(String),
    #[error("admin.api_key must not be empty when the admin API is enabled")]
    EmptyApiKey,
}

/// Check the configuration for semantic errors.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address".to_string(),
            value: config.listener.bind_address.clone(),
        });
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::NotPositive("listener.max_connections"));
    }

    if config.backends.is_empty() {
        errors.push(ValidationError::NoBackends);
    }

    let mut names = HashSet::new();
    for backend in &config.backends {
        let name = backend
            .name
            .clone()
            .unwrap_or_else(|| backend.address.clone());
        if !is_host_port(&backend.address) {
            errors.push(ValidationError::InvalidAddress {
                field: format!("backends[{}].address", name),
                value: backend.address.clone(),
            });
        }
        if backend.weight == 0 {
            errors.push(ValidationError::ZeroWeight(name.clone()));
        }
        if backend.max_connections == Some(0) {
            errors.push(ValidationError::ZeroCapacity(name.clone()));
        }
        if !names.insert(name.clone()) {
            errors.push(ValidationError::DuplicateName(name));
        }
    }

    let hc = &config.health_check;
    if hc.interval_secs == 0 {
        errors.push(ValidationError::NotPositive("health_check.interval_secs"));
    }
    if hc.timeout_secs == 0 {
        errors.push(ValidationError::NotPositive("health_check.timeout_secs"));
    }
    if hc.unhealthy_threshold == 0 {
        errors.push(ValidationError::NotPositive("health_check.unhealthy_threshold"));
    }
    if hc.healthy_threshold == 0 {
        errors.push(ValidationError::NotPositive("health_check.healthy_threshold"));
    }
    if let Some(path) = &hc.path {
        if !path.starts_with('/') {
            errors.push(ValidationError::InvalidPath(path.clone()));
        }
    }

    let t = &config.timeouts;
    if t.connect_secs == 0 {
        errors.push(ValidationError::NotPositive("timeouts.connect_secs"));
    }
    if t.request_secs == 0 {
        errors.push(ValidationError::NotPositive("timeouts.request_secs"));
    }
    if t.idle_secs == 0 {
        errors.push(ValidationError::NotPositive("timeouts.idle_secs"));
    }

    if config.limits.max_header_bytes == 0 {
        errors.push(ValidationError::NotPositive("limits.max_header_bytes"));
    }
    if config.limits.buffer_bytes == 0 {
        errors.push(ValidationError::NotPositive("limits.buffer_bytes"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address".to_string(),
            value: config.observability.metrics_address.clone(),
        });
    }
    if config.admin.enabled {
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidAddress {
                field: "admin.bind_address".to_string(),
                value: config.admin.bind_address.clone(),
            });
        }
        if config.admin.api_key.trim().is_empty() {
            errors.push(ValidationError::EmptyApiKey);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// `ip:port`, `[v6]:port` or `hostname:port`.
fn is_host_port(value: &str) -> bool {
    if value.parse::<SocketAddr>().is_ok() {
        return true;
    }
    match value.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && !host.contains(':') && port.parse::<u16>().is_ok(),
        None => false,
    }
}
