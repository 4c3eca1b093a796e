//! One-shot backend reachability probe run before the proxy starts serving.

use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use webai_core::ProxyConfig;

/// How long the startup probe waits for the backend.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of [`probe_backend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendHealth {
    /// The backend answered with a status below 500.
    Reachable { status: u16 },
    /// The backend answered with a server error status.
    ServerError { status: u16 },
    /// No response arrived.
    Unreachable { reason: String },
}

impl BackendHealth {
    pub const fn is_reachable(&self) -> bool {
        matches!(self, Self::Reachable { .. })
    }
}

/// Send `GET /` to the backend and report whether it answered.
///
/// Never fails: every problem is folded into [`BackendHealth`].
pub async fn probe_backend(config: &ProxyConfig, timeout: Duration) -> BackendHealth {
    let url = format!("{}/", config.target_base_url());
    debug!(url = %url, "Probing backend");

    let client = match Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(e) => {
            return BackendHealth::Unreachable {
                reason: e.to_string(),
            };
        }
    };

    match client.get(&url).send().await {
        Ok(response) if response.status().is_server_error() => BackendHealth::ServerError {
            status: response.status().as_u16(),
        },
        Ok(response) => BackendHealth::Reachable {
            status: response.status().as_u16(),
        },
        Err(e) if e.is_timeout() => BackendHealth::Unreachable {
            reason: format!("no response within {}s", timeout.as_secs_f32()),
        },
        Err(e) => BackendHealth::Unreachable {
            reason: e.to_string(),
        },
    }
}
