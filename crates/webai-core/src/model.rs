//! Identity of the single model exposed by the proxy.

/// Model name used when a request does not name one, and the only entry
/// in both model catalogs.
pub const DEFAULT_MODEL_ID: &str = "webai-llm";

/// Owner / digest label reported in the model catalogs.
pub const MODEL_OWNER: &str = "webai-proxy";
