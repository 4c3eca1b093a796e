//! Port definitions (trait abstractions) for side effects of the proxy.
//!
//! Ports contain no implementation details. Adapters in `webai-proxy`
//! provide the production implementations; tests use the no-op ones.

pub mod traffic_log;

pub use traffic_log::{NoopTrafficLog, RequestRecord, ResponseRecord, TrafficLogPort};
