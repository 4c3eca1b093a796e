//! Process startup: logging, backend probe, listener binding.

use std::io::ErrorKind;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use webai_core::ProxyConfig;
use webai_proxy::BackendHealth;

/// Install the `tracing` subscriber. `RUST_LOG` overrides the `info` default.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Log the outcome of the startup probe. An unhealthy backend never stops
/// the proxy from starting.
pub fn report_backend_health(config: &ProxyConfig, health: &BackendHealth) {
    let target = config.target_base_url();
    match health {
        BackendHealth::Reachable { status } => {
            info!(backend = %target, status, "Backend is reachable");
        }
        BackendHealth::ServerError { status } => {
            warn!("============================================================");
            warn!("Backend at {target} answered the health check with {status}.");
            warn!("The proxy will start, but chat requests may fail.");
            warn!("============================================================");
        }
        BackendHealth::Unreachable { reason } => {
            warn!("============================================================");
            warn!("Backend at {target} is not reachable: {reason}");
            warn!("Check TARGET_DOMAIN and TARGET_PORT in your .env file.");
            warn!("The proxy will start, but chat requests will fail with 502");
            warn!("until the backend comes up.");
            warn!("============================================================");
        }
    }
}

/// Bind the proxy listener, reporting a busy port in plain words.
pub async fn bind_listener(config: &ProxyConfig) -> anyhow::Result<TcpListener> {
    let addr = config.proxy_bind_addr();
    match TcpListener::bind(&addr).await {
        Ok(listener) => Ok(listener),
        Err(e) if e.kind() == ErrorKind::AddrInUse => Err(anyhow::anyhow!(
            "Port {} is already in use. Set PROXY_PORT to a free port.",
            config.proxy_port
        )),
        Err(e) => Err(e).with_context(|| format!("Failed to bind proxy listener on {addr}")),
    }
}
