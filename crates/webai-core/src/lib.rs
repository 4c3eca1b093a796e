//! Core types shared by the webai proxy crates.
//!
//! This crate holds the immutable proxy configuration, the fixed model
//! identity advertised to clients, and the port traits the proxy uses for
//! side effects such as traffic logging. It has no runtime or HTTP
//! dependencies.

pub mod config;
pub mod model;
pub mod ports;

pub use config::{
    ConfigError, DEFAULT_PROXY_HOST, DEFAULT_PROXY_PORT, DEFAULT_TARGET_HOST, DEFAULT_TARGET_PORT,
    DEFAULT_TARGET_TIMEOUT_MS, ProxyConfig,
};
pub use model::{DEFAULT_MODEL_ID, MODEL_OWNER};
pub use ports::{NoopTrafficLog, RequestRecord, ResponseRecord, TrafficLogPort};
