//! Traffic log port for recording inbound requests and outbound responses.

/// An inbound request as seen by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    pub method: String,
    /// Path including the query string, if any.
    pub uri: String,
    pub headers: Vec<(String, String)>,
    /// Collected body. `None` for methods whose body is never read.
    pub body: Option<String>,
}

/// An outbound response, recorded when its headers are produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseRecord {
    pub method: String,
    pub uri: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

/// Port for logging proxy traffic.
///
/// Implementations must be thread-safe and must not block: they are called
/// inline on the response path.
pub trait TrafficLogPort: Send + Sync {
    /// Record an inbound request before it is processed.
    fn request(&self, record: &RequestRecord);

    /// Record an outbound response before it is sent.
    fn response(&self, record: &ResponseRecord);
}

/// A traffic log that discards everything, for tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTrafficLog;

impl NoopTrafficLog {
    /// Create a new no-op traffic log.
    pub const fn new() -> Self {
        Self
    }
}

impl TrafficLogPort for NoopTrafficLog {
    fn request(&self, _record: &RequestRecord) {}

    fn response(&self, _record: &ResponseRecord) {}
}
