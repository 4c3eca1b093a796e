//! Axum HTTP server for the Ollama/OpenAI front proxy.
//!
//! This module provides the router and the `serve()` function that runs it
//! on a pre-bound `TcpListener` until the cancellation token fires.

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    body::{Body, to_bytes},
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::any,
};
use bytes::Bytes;
use chrono::Utc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{debug, error, info, warn};

use webai_core::{
    DEFAULT_MODEL_ID, MODEL_OWNER, ProxyConfig, RequestRecord, ResponseRecord, TrafficLogPort,
};

use crate::backend::{aggregate, iso_timestamp};
use crate::error::ProxyError;
use crate::formatters::{ollama_response, openai_response};
use crate::forward::BackendClient;
use crate::models::{
    ModelInfo, ModelsResponse, OllamaModelDetails, OllamaModelEntry, OllamaTagsResponse,
};
use crate::request::{PathKind, method_takes_body, normalize};
use crate::stream::{chat_stream_response, relay_stream_response};
use crate::traffic_log::loggable_headers;

/// Body of `GET /`, checked by Ollama clients.
pub const ROOT_BANNER: &str = "Ollama is running";

/// Shared application state for the proxy server.
#[derive(Clone)]
pub struct ProxyState {
    /// Immutable configuration, loaded once at startup.
    config: Arc<ProxyConfig>,
    /// Client for the single backend.
    backend: BackendClient,
    /// Port receiving every request and response.
    traffic: Arc<dyn TrafficLogPort>,
}

impl ProxyState {
    pub fn new(config: Arc<ProxyConfig>, traffic: Arc<dyn TrafficLogPort>) -> anyhow::Result<Self> {
        let backend = BackendClient::new(&config)?;
        Ok(Self {
            config,
            backend,
            traffic,
        })
    }
}

/// Start the proxy server with a pre-bound listener.
///
/// Runs until the cancellation token is triggered, then shuts down
/// gracefully.
pub async fn serve(
    listener: TcpListener,
    config: Arc<ProxyConfig>,
    traffic: Arc<dyn TrafficLogPort>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!("Proxy server starting on {addr}");

    let state = ProxyState::new(config, traffic)?;
    info!(
        backend = %state.backend.base_url(),
        timeout_ms = state.config.target_timeout.as_millis(),
        api_key_configured = state.config.api_key().is_some(),
        "Forwarding chat requests to backend"
    );

    let app = create_router(state);

    info!("Ollama clients: http://{addr}/api/chat");
    info!("OpenAI clients: http://{addr}/v1");

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;

    info!("Proxy server shut down");
    Ok(())
}

/// Build the proxy router.
///
/// Layers run outermost first: traffic logging, CORS preflight, panic
/// recovery, then the routes.
pub fn create_router(state: ProxyState) -> Router {
    Router::new()
        .route("/", any(ollama_root))
        .route("/api/tags", any(ollama_tags))
        .route("/v1/models", any(openai_models))
        .fallback(proxy_request)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(middleware::from_fn(cors_preflight))
        .layer(middleware::from_fn_with_state(state.clone(), log_traffic))
        .with_state(state)
}

// =============================================================================
// Middleware
// =============================================================================

/// Record the request (with its body for POST/PUT) and the response headers.
async fn log_traffic(State(state): State<ProxyState>, request: Request, next: Next) -> Response {
    let (parts, body) = request.into_parts();
    let method = parts.method.to_string();
    let uri = parts.uri.to_string();

    let (body, logged_body) = if method_takes_body(&parts.method) {
        match to_bytes(body, usize::MAX).await {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                (Body::from(bytes), Some(text))
            }
            Err(e) => {
                error!(method = %method, uri = %uri, "Failed to read request body: {e}");
                return ProxyError::Internal(format!("Failed to read request body: {e}"))
                    .into_response();
            }
        }
    } else {
        (body, None)
    };

    state.traffic.request(&RequestRecord {
        method: method.clone(),
        uri: uri.clone(),
        headers: loggable_headers(&parts.headers),
        body: logged_body,
    });

    let response = next.run(Request::from_parts(parts, body)).await;

    state.traffic.response(&ResponseRecord {
        method,
        uri,
        status: response.status().as_u16(),
        headers: loggable_headers(response.headers()),
    });
    response
}

/// Answer `OPTIONS` on any path without touching the backend.
async fn cors_preflight(request: Request, next: Next) -> Response {
    if *request.method() == Method::OPTIONS {
        return (
            StatusCode::NO_CONTENT,
            [
                (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
                (header::ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, OPTIONS"),
                (
                    header::ACCESS_CONTROL_ALLOW_HEADERS,
                    "authorization, content-type",
                ),
                (header::ACCESS_CONTROL_MAX_AGE, "86400"),
            ],
        )
            .into_response();
    }
    next.run(request).await
}

/// Convert a handler panic into a JSON 500.
fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let details = err
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| err.downcast_ref::<&str>().map(|s| (*s).to_string()))
        .unwrap_or_else(|| "Unknown panic".to_string());
    error!("Handler panicked: {details}");
    ProxyError::Internal(details).into_response()
}

// =============================================================================
// Direct endpoints
// =============================================================================

fn model_list_cors() -> [(HeaderName, &'static str); 3] {
    [
        (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        (header::ACCESS_CONTROL_ALLOW_METHODS, "GET, OPTIONS"),
        (
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            "authorization, content-type",
        ),
    ]
}

/// `GET /` health banner.
async fn ollama_root() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain")], ROOT_BANNER)
}

/// `GET /api/tags`: the single advertised model, Ollama format.
async fn ollama_tags() -> impl IntoResponse {
    debug!("GET /api/tags");
    let response = OllamaTagsResponse {
        models: vec![OllamaModelEntry {
            name: DEFAULT_MODEL_ID.to_string(),
            modified_at: iso_timestamp(Utc::now()),
            size: 0,
            digest: MODEL_OWNER.to_string(),
            details: OllamaModelDetails {
                format: "gguf".to_string(),
                family: "webai".to_string(),
                families: None,
                parameter_size: "N/A".to_string(),
                quantization_level: "N/A".to_string(),
            },
        }],
    };
    (model_list_cors(), Json(response))
}

/// `GET /v1/models`: the single advertised model, OpenAI format.
async fn openai_models() -> impl IntoResponse {
    debug!("GET /v1/models");
    let response = ModelsResponse {
        object: "list".to_string(),
        data: vec![ModelInfo {
            id: DEFAULT_MODEL_ID.to_string(),
            object: "model".to_string(),
            created: Utc::now().timestamp(),
            owned_by: MODEL_OWNER.to_string(),
        }],
    };
    (model_list_cors(), Json(response))
}

// =============================================================================
// Proxied endpoints
// =============================================================================

/// Chat paths and pass-through paths.
async fn proxy_request(State(state): State<ProxyState>, request: Request) -> Response {
    let started = Instant::now();
    let (parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path().to_string(), ToString::to_string);

    let body = if method_takes_body(&parts.method) {
        match to_bytes(body, usize::MAX).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return ProxyError::Internal(format!("Failed to read request body: {e}"))
                    .into_response();
            }
        }
    } else {
        Bytes::new()
    };

    match dispatch(
        &state,
        &parts.method,
        &path_and_query,
        &parts.headers,
        &body,
        started,
    )
    .await
    {
        Ok(response) => {
            info!(
                method = %parts.method,
                path = %path_and_query,
                status = response.status().as_u16(),
                elapsed_ms = started.elapsed().as_millis(),
                "Request handled"
            );
            response
        }
        Err(e) => {
            if e.status().is_server_error() {
                error!(method = %parts.method, path = %path_and_query, "{e}");
            } else {
                warn!(method = %parts.method, path = %path_and_query, "{e}");
            }
            e.into_response()
        }
    }
}

/// Normalize, call the backend once, and format the answer.
async fn dispatch(
    state: &ProxyState,
    method: &Method,
    path_and_query: &str,
    headers: &HeaderMap,
    body: &[u8],
    started: Instant,
) -> Result<Response, ProxyError> {
    let (ctx, backend_request) = normalize(
        method,
        path_and_query,
        headers,
        body,
        &state.config,
        started,
    )?;
    info!(
        kind = ?ctx.path_kind,
        model = %ctx.model,
        stream = ctx.stream,
        "Proxying request"
    );

    let credential = ctx.credential.as_deref();

    if ctx.stream {
        let upstream = state.backend.open(&backend_request, credential).await?;
        let idle_timeout = state.backend.timeout();
        return Ok(match ctx.path_kind.dialect() {
            Some(dialect) => {
                chat_stream_response(upstream, dialect, ctx.model, ctx.started, idle_timeout)
            }
            None => relay_stream_response(upstream, idle_timeout),
        });
    }

    let raw = state.backend.fetch(&backend_request, credential).await?;
    let result = aggregate(&String::from_utf8_lossy(&raw), &ctx.model);
    debug!(
        content_len = result.content.len(),
        stats = ?result.stats,
        "Aggregated backend response"
    );

    let mut response = match ctx.path_kind {
        PathKind::OllamaChat => Json(ollama_response(
            result.content,
            &ctx.model,
            &result.stats,
            Some(ctx.started.elapsed()),
        ))
        .into_response(),
        PathKind::OpenAiChat => Json(openai_response(
            result.content,
            &ctx.model,
            &ctx.prompt_messages,
            &result.stats,
        ))
        .into_response(),
        PathKind::Other => Json(result).into_response(),
    };
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    Ok(response)
}
