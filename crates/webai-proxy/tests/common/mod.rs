//! Common test utilities.
//!
//! Starts a scripted stub backend and a proxy instance pointed at it, both
//! on ephemeral localhost ports.

#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Router,
    body::{Body, to_bytes},
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use webai_core::{NoopTrafficLog, ProxyConfig, RequestRecord, ResponseRecord, TrafficLogPort};

/// What the stub backend answers to every request.
#[derive(Debug, Clone)]
pub enum Reply {
    /// One buffered body with a content type of `application/json`.
    Json { status: StatusCode, body: String },
    /// One buffered body with a content type of `text/plain`.
    Text { status: StatusCode, body: String },
    /// A chunked body, sleeping `delay` before each chunk.
    Chunks { chunks: Vec<String>, delay: Duration },
    /// Never answers within the test's lifetime.
    Silent,
}

impl Reply {
    pub fn ok_json(body: impl Into<String>) -> Self {
        Self::Json {
            status: StatusCode::OK,
            body: body.into(),
        }
    }
}

/// A request as received by the stub backend.
#[derive(Debug, Clone)]
pub struct Captured {
    pub method: String,
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Captured {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("backend body is JSON")
    }
}

#[derive(Clone)]
struct StubState {
    reply: Reply,
    captured: Arc<Mutex<Vec<Captured>>>,
}

/// Scripted backend listening on `127.0.0.1:<ephemeral>`.
pub struct StubBackend {
    pub addr: SocketAddr,
    captured: Arc<Mutex<Vec<Captured>>>,
    cancel: CancellationToken,
}

impl StubBackend {
    pub async fn start(reply: Reply) -> Self {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let state = StubState {
            reply,
            captured: Arc::clone(&captured),
        };
        let app = Router::new().fallback(stub_handler).with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind stub backend");
        let addr = listener.local_addr().expect("stub address");
        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
                .ok();
        });

        Self {
            addr,
            captured,
            cancel,
        }
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<Captured> {
        self.captured.lock().expect("capture lock").clone()
    }

    /// The only request received; panics if there was not exactly one.
    pub fn single_request(&self) -> Captured {
        let requests = self.requests();
        assert_eq!(requests.len(), 1, "expected exactly one backend call");
        requests.into_iter().next().expect("one request")
    }
}

impl Drop for StubBackend {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn stub_handler(State(state): State<StubState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = to_bytes(body, usize::MAX).await.unwrap_or_default();
    state
        .captured
        .lock()
        .expect("capture lock")
        .push(Captured {
            method: parts.method.to_string(),
            path_and_query: parts
                .uri
                .path_and_query()
                .map_or_else(|| parts.uri.path().to_string(), ToString::to_string),
            headers: parts.headers,
            body,
        });

    match state.reply {
        Reply::Json { status, body } => {
            (status, [("content-type", "application/json")], body).into_response()
        }
        Reply::Text { status, body } => {
            (status, [("content-type", "text/plain")], body).into_response()
        }
        Reply::Chunks { chunks, delay } => {
            let stream = futures_util::stream::iter(chunks).then(move |chunk| async move {
                tokio::time::sleep(delay).await;
                Ok::<_, Infallible>(Bytes::from(chunk))
            });
            Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "application/json")
                .body(Body::from_stream(stream))
                .expect("stub stream response")
        }
        Reply::Silent => {
            tokio::time::sleep(Duration::from_secs(30)).await;
            StatusCode::OK.into_response()
        }
    }
}

/// Traffic log that keeps every record for inspection.
#[derive(Default)]
pub struct RecordingTrafficLog {
    pub requests: Mutex<Vec<RequestRecord>>,
    pub responses: Mutex<Vec<ResponseRecord>>,
}

impl TrafficLogPort for RecordingTrafficLog {
    fn request(&self, record: &RequestRecord) {
        self.requests
            .lock()
            .expect("log lock")
            .push(record.clone());
    }

    fn response(&self, record: &ResponseRecord) {
        self.responses
            .lock()
            .expect("log lock")
            .push(record.clone());
    }
}

/// A running proxy instance.
pub struct TestProxy {
    pub base_url: String,
    pub client: reqwest::Client,
    cancel: CancellationToken,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Config pointing at `backend_port` on localhost.
pub fn config_for(backend_port: u16) -> ProxyConfig {
    ProxyConfig {
        target_host: "127.0.0.1".to_string(),
        target_port: backend_port,
        proxy_host: "127.0.0.1".to_string(),
        proxy_port: 0,
        target_timeout: Duration::from_secs(5),
        ..ProxyConfig::with_defaults()
    }
}

/// Start a proxy with the given config and a no-op traffic log.
pub async fn start_proxy(config: ProxyConfig) -> TestProxy {
    start_proxy_with_log(config, Arc::new(NoopTrafficLog::new())).await
}

/// Start a proxy with the given config and traffic log.
pub async fn start_proxy_with_log(
    config: ProxyConfig,
    traffic: Arc<dyn TrafficLogPort>,
) -> TestProxy {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind proxy");
    let addr = listener.local_addr().expect("proxy address");
    let cancel = CancellationToken::new();

    tokio::spawn(webai_proxy::serve(
        listener,
        Arc::new(config),
        traffic,
        cancel.clone(),
    ));

    TestProxy {
        base_url: format!("http://{addr}"),
        client: reqwest::Client::new(),
        cancel,
    }
}

/// Start a stub backend with `reply` and a proxy in front of it.
pub async fn start_pair(reply: Reply) -> (StubBackend, TestProxy) {
    let backend = StubBackend::start(reply).await;
    let proxy = start_proxy(config_for(backend.addr.port())).await;
    (backend, proxy)
}

/// Backend object carrying one piece of assistant text.
pub fn content_object(text: &str) -> String {
    serde_json::json!({"choices": [{"message": {"content": text}}]}).to_string()
}
