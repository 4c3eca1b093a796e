//! Proxy configuration.
//!
//! The configuration is built once at startup by the binary and then shared
//! read-only with every component. Nothing in the proxy reads the process
//! environment directly; the composition root is the only place that does.

use std::fmt;
use std::time::Duration;

/// Default host of the backend inference service.
pub const DEFAULT_TARGET_HOST: &str = "localhost";

/// Default port of the backend inference service.
pub const DEFAULT_TARGET_PORT: u16 = 10501;

/// Default host the proxy listens on.
pub const DEFAULT_PROXY_HOST: &str = "localhost";

/// Default port the proxy listens on.
pub const DEFAULT_PROXY_PORT: u16 = 8080;

/// Default backend response timeout (2 minutes).
pub const DEFAULT_TARGET_TIMEOUT_MS: u64 = 120_000;

/// Port on which the backend is addressed over HTTPS instead of HTTP.
const HTTPS_PORT: u16 = 443;

/// Immutable proxy configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Host of the backend inference service.
    pub target_host: String,
    /// Port of the backend inference service.
    pub target_port: u16,
    /// Host the proxy listens on.
    pub proxy_host: String,
    /// Port the proxy listens on.
    pub proxy_port: u16,
    /// Backend API key used when the caller sends no bearer token.
    pub target_api_key: Option<String>,
    /// How long to wait for the backend before answering 504.
    pub target_timeout: Duration,
}

impl ProxyConfig {
    /// Create a configuration with the default endpoints and no API key.
    pub fn with_defaults() -> Self {
        Self {
            target_host: DEFAULT_TARGET_HOST.to_string(),
            target_port: DEFAULT_TARGET_PORT,
            proxy_host: DEFAULT_PROXY_HOST.to_string(),
            proxy_port: DEFAULT_PROXY_PORT,
            target_api_key: None,
            target_timeout: Duration::from_millis(DEFAULT_TARGET_TIMEOUT_MS),
        }
    }

    /// Base URL of the backend, e.g. `http://localhost:10501`.
    ///
    /// The backend is reached over HTTPS only when it listens on port 443.
    pub fn target_base_url(&self) -> String {
        let scheme = if self.target_port == HTTPS_PORT {
            "https"
        } else {
            "http"
        };
        format!("{scheme}://{}:{}", self.target_host, self.target_port)
    }

    /// `host:port` the proxy should bind to.
    pub fn proxy_bind_addr(&self) -> String {
        format!("{}:{}", self.proxy_host, self.proxy_port)
    }

    /// Backend API key, ignoring a blank value.
    pub fn api_key(&self) -> Option<&str> {
        self.target_api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target_host.trim().is_empty() {
            return Err(ConfigError::EmptyHost("target"));
        }
        if self.proxy_host.trim().is_empty() {
            return Err(ConfigError::EmptyHost("proxy"));
        }
        if self.target_port == 0 {
            return Err(ConfigError::InvalidTargetPort);
        }
        if self.target_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// The API key never ends up in logs.
impl fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("target_host", &self.target_host)
            .field("target_port", &self.target_port)
            .field("proxy_host", &self.proxy_host)
            .field("proxy_port", &self.proxy_port)
            .field(
                "target_api_key",
                &self.target_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("target_timeout", &self.target_timeout)
            .finish()
    }
}

/// Configuration validation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("The {0} host cannot be empty")]
    EmptyHost(&'static str),

    #[error("Target port must be non-zero")]
    InvalidTargetPort,

    #[error("Target timeout must be greater than zero milliseconds")]
    ZeroTimeout,
}
