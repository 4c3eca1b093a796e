//! Tracing-backed traffic log adapter.

use axum::http::HeaderMap;
use tracing::info;

use webai_core::{RequestRecord, ResponseRecord, TrafficLogPort};

/// Header values never written to the log.
const REDACTED_HEADERS: &[&str] = &["authorization", "x-api-key", "proxy-authorization"];

/// Logs every request and response as `tracing` events under the
/// `webai_proxy::traffic` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTrafficLog;

impl TracingTrafficLog {
    pub const fn new() -> Self {
        Self
    }
}

impl TrafficLogPort for TracingTrafficLog {
    fn request(&self, record: &RequestRecord) {
        info!(
            target: "webai_proxy::traffic",
            method = %record.method,
            uri = %record.uri,
            headers = ?record.headers,
            body = record.body.as_deref().unwrap_or(""),
            "Inbound request"
        );
    }

    fn response(&self, record: &ResponseRecord) {
        info!(
            target: "webai_proxy::traffic",
            method = %record.method,
            uri = %record.uri,
            status = record.status,
            headers = ?record.headers,
            "Outbound response"
        );
    }
}

/// Flatten headers into loggable pairs, hiding credential values.
pub fn loggable_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let name = name.as_str().to_string();
            let value = if REDACTED_HEADERS.contains(&name.as_str()) {
                "<redacted>".to_string()
            } else {
                String::from_utf8_lossy(value.as_bytes()).into_owned()
            };
            (name, value)
        })
        .collect()
}
