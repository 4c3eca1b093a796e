//! Command-line and environment configuration.
//!
//! Every option can be given as a flag or through its environment variable;
//! `.env` is loaded into the environment before parsing.

use std::time::Duration;

use clap::Parser;

use webai_core::{
    ConfigError, DEFAULT_PROXY_HOST, DEFAULT_PROXY_PORT, DEFAULT_TARGET_HOST, DEFAULT_TARGET_PORT,
    DEFAULT_TARGET_TIMEOUT_MS, ProxyConfig,
};

/// Ollama/OpenAI-compatible proxy in front of a `/prompt` inference backend.
#[derive(Debug, Parser)]
#[command(name = "webai-proxy")]
#[command(about = "Serve Ollama and OpenAI chat APIs on top of a /prompt backend")]
#[command(version)]
pub struct Cli {
    /// Host of the backend inference service
    #[arg(long, env = "TARGET_DOMAIN", default_value = DEFAULT_TARGET_HOST)]
    pub target_domain: String,

    /// Port of the backend inference service (443 selects HTTPS)
    #[arg(long, env = "TARGET_PORT", default_value_t = DEFAULT_TARGET_PORT)]
    pub target_port: u16,

    /// Host the proxy listens on
    #[arg(long, env = "PROXY_DOMAIN", default_value = DEFAULT_PROXY_HOST)]
    pub proxy_domain: String,

    /// Port the proxy listens on
    #[arg(long, env = "PROXY_PORT", default_value_t = DEFAULT_PROXY_PORT)]
    pub proxy_port: u16,

    /// API key sent to the backend when the caller has no bearer token
    #[arg(long, env = "TARGET_API_KEY", hide_env_values = true)]
    pub target_api_key: Option<String>,

    /// Backend response timeout in milliseconds
    #[arg(long, env = "TARGET_TIMEOUT_MS", default_value_t = DEFAULT_TARGET_TIMEOUT_MS)]
    pub target_timeout_ms: u64,
}

impl Cli {
    /// Convert the parsed options into a validated configuration.
    pub fn into_config(self) -> Result<ProxyConfig, ConfigError> {
        let config = ProxyConfig {
            target_host: self.target_domain,
            target_port: self.target_port,
            proxy_host: self.proxy_domain,
            proxy_port: self.proxy_port,
            target_api_key: self.target_api_key,
            target_timeout: Duration::from_millis(self.target_timeout_ms),
        };
        config.validate()?;
        Ok(config)
    }
}
