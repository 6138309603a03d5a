//! rr-proxy library: an asynchronous HTTP/1.1 reverse proxy with
//! round-robin, weighted and least-connections balancing, active and
//! passive health checking, and streamed body relay.

pub mod admin;
pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod net;
pub mod observability;
pub mod security;

pub use config::schema::ProxyConfig;
pub use http::ProxyServer;
pub use lifecycle::{Proxy, Shutdown};
pub use load_balancer::{Registry, Selector};
