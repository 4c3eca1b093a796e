//! Ollama- and OpenAI-compatible front proxy for a single `/prompt` backend.
//!
//! Callers speak either the Ollama chat API (`/api/chat`, NDJSON streaming)
//! or the OpenAI chat completions API (`/v1/chat/completions`, SSE
//! streaming). Both are rewritten to the backend's `{"message": [...]}`
//! request, and the backend's answer (one JSON object, several objects
//! glued together, or a chunked stream of objects) is translated back into
//! the caller's dialect. Any other path is passed through unchanged.
//!
//! The binary in `webai-cli` wires this crate up; tests drive
//! [`create_router`] directly.

#![deny(unsafe_code)]

pub mod backend;
pub mod error;
pub mod formatters;
pub mod forward;
pub mod health;
pub mod json_scan;
pub mod models;
pub mod request;
pub mod server;
pub mod stream;
pub mod traffic_log;

pub use error::ProxyError;
pub use health::{BackendHealth, PROBE_TIMEOUT, probe_backend};
pub use server::{ProxyState, create_router, serve};
pub use traffic_log::TracingTrafficLog;
