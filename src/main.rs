//! rr-proxy: HTTP/1.1 reverse proxy with health-aware load balancing.
//!
//! ```text
//!     Client ──▶ net::listener ──▶ http::server ──▶ load_balancer::Selector
//!                                                        │
//!                                                        ▼
//!     Client ◀── http::forwarder (streamed relay) ◀──▶ Backend
//!                        │
//!                        ▼
//!                 load_balancer::Registry ◀── health::active (probes)
//! ```

use std::path::PathBuf;

use clap::Parser;

use rr_proxy::config::{self, BackendConfig, ProxyConfig};
use rr_proxy::lifecycle::{signals, Proxy, Shutdown};
use rr_proxy::observability::logging;

#[derive(Parser)]
#[command(name = "rr-proxy", version)]
#[command(about = "HTTP/1.1 reverse proxy with round-robin load balancing and health checks")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,

    /// Add a backend address (repeatable). Appended to configured backends.
    #[arg(long = "backend", value_name = "ADDR")]
    backends: Vec<String>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => config::read_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }
    config
        .backends
        .extend(cli.backends.into_iter().map(BackendConfig::new));
    config::validate_config(&config).map_err(config::ConfigError::Validation)?;

    if cli.check {
        println!(
            "configuration ok: {} backend(s), policy {:?}",
            config.backends.len(),
            config.load_balancing.policy
        );
        return Ok(());
    }

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rr-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        backends = config.backends.len(),
        policy = ?config.load_balancing.policy,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    let proxy = Proxy::build(&config).await?;

    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        signals::wait_for_signal().await;
        trigger.trigger();
    });

    proxy.run(shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
