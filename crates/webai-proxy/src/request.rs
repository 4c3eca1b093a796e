//! Inbound request normalization and credential resolution.
//!
//! Both chat dialects are funnelled into the backend's single request shape,
//! `{"message": [...]}` posted to `/prompt`. Any other path is forwarded
//! with its body untouched.

use std::time::Instant;

use axum::http::{HeaderMap, Method, header};
use bytes::Bytes;
use serde_json::{Map, Value};
use tracing::debug;

use webai_core::{DEFAULT_MODEL_ID, ProxyConfig};

use crate::error::ProxyError;

/// Backend path that serves chat completions for both dialects.
pub const BACKEND_PROMPT_PATH: &str = "/prompt";

/// Header carrying the credential to the backend.
pub const BACKEND_API_KEY_HEADER: &str = "x-api-key";

/// Which front API an inbound path belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    /// `/api/chat`
    OllamaChat,
    /// `/v1/chat/completions`
    OpenAiChat,
    /// Anything else, proxied as-is.
    Other,
}

impl PathKind {
    pub fn from_path(path: &str) -> Self {
        match path {
            "/api/chat" => Self::OllamaChat,
            "/v1/chat/completions" => Self::OpenAiChat,
            _ => Self::Other,
        }
    }

    pub const fn is_chat(self) -> bool {
        matches!(self, Self::OllamaChat | Self::OpenAiChat)
    }

    /// Response dialect for chat paths.
    pub const fn dialect(self) -> Option<Dialect> {
        match self {
            Self::OllamaChat => Some(Dialect::Ollama),
            Self::OpenAiChat => Some(Dialect::OpenAi),
            Self::Other => None,
        }
    }
}

/// Framing used to answer a chat request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Newline-delimited JSON.
    Ollama,
    /// Server-sent events.
    OpenAi,
}

/// Per-request state, owned by the handler serving the request.
#[derive(Debug, Clone)]
pub struct ProxyRequestContext {
    pub path_kind: PathKind,
    /// Model the caller asked for; echoed back in every response.
    pub model: String,
    pub stream: bool,
    pub started: Instant,
    /// Credential forwarded to the backend, if any.
    pub credential: Option<String>,
    /// The caller's `messages`, kept for token approximation.
    pub prompt_messages: Vec<Value>,
}

/// Request to issue against the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendRequest {
    pub method: Method,
    /// Path and query on the backend.
    pub path_and_query: String,
    pub body: Bytes,
}

/// Whether the method carries a body the proxy must read.
pub fn method_takes_body(method: &Method) -> bool {
    *method == Method::POST || *method == Method::PUT
}

/// Map an inbound request to its context and backend request.
///
/// `body` is the collected body; an empty body counts as absent.
pub fn normalize(
    method: &Method,
    path_and_query: &str,
    headers: &HeaderMap,
    body: &[u8],
    config: &ProxyConfig,
    started: Instant,
) -> Result<(ProxyRequestContext, BackendRequest), ProxyError> {
    let path = path_and_query
        .split_once('?')
        .map_or(path_and_query, |(path, _)| path);
    let path_kind = PathKind::from_path(path);

    let parsed: Option<Value> = if body.is_empty() {
        if method_takes_body(method) {
            return Err(ProxyError::MissingBody);
        }
        None
    } else {
        Some(
            serde_json::from_slice(body)
                .map_err(|e| ProxyError::InvalidBody(e.to_string()))?,
        )
    };

    let model = parsed
        .as_ref()
        .and_then(|v| v.get("model"))
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .unwrap_or(DEFAULT_MODEL_ID)
        .to_string();
    let stream = parsed
        .as_ref()
        .and_then(|v| v.get("stream"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let messages = parsed.as_ref().and_then(|v| v.get("messages")).cloned();

    let backend = if path_kind.is_chat() {
        let mut payload = Map::new();
        if let Some(messages) = &messages {
            payload.insert("message".to_string(), messages.clone());
        }
        BackendRequest {
            method: method.clone(),
            path_and_query: BACKEND_PROMPT_PATH.to_string(),
            body: Bytes::from(Value::Object(payload).to_string()),
        }
    } else {
        BackendRequest {
            method: method.clone(),
            path_and_query: path_and_query.to_string(),
            body: Bytes::copy_from_slice(body),
        }
    };

    let ctx = ProxyRequestContext {
        path_kind,
        model,
        stream,
        started,
        credential: resolve_credential(headers, config),
        prompt_messages: match messages {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
    };

    debug!(
        path = %path,
        kind = ?ctx.path_kind,
        model = %ctx.model,
        stream = ctx.stream,
        backend_path = %backend.path_and_query,
        has_credential = ctx.credential.is_some(),
        "Normalized request"
    );

    Ok((ctx, backend))
}

/// Pick the credential to forward to the backend.
///
/// An inbound `Authorization: Bearer <token>` wins; otherwise the configured
/// API key is used; otherwise nothing is sent.
pub fn resolve_credential(headers: &HeaderMap, config: &ProxyConfig) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_string)
        .or_else(|| config.api_key().map(str::to_string))
}

fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_at_checked(7)?;
    if !scheme.eq_ignore_ascii_case("bearer ") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
