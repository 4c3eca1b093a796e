//! Request forwarding to the backend inference service.
//!
//! Exactly one backend call is issued per inbound request. The configured
//! timeout is enforced with `tokio::time::timeout`, so an expired call is
//! dropped and its connection released.

use std::error::Error as StdError;
use std::time::Duration;

use axum::http::{HeaderValue, StatusCode, header};
use bytes::Bytes;
use reqwest::Client;
use tracing::{debug, error, warn};

use webai_core::ProxyConfig;

use crate::error::ProxyError;
use crate::request::{BACKEND_API_KEY_HEADER, BackendRequest};

/// HTTP client bound to the single configured backend.
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl BackendClient {
    /// Build a client for the backend named by `config`.
    pub fn new(config: &ProxyConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().pool_max_idle_per_host(10).build()?;
        Ok(Self {
            client,
            base_url: config.target_base_url(),
            timeout: config.target_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Backend response timeout.
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Issue a request and read the whole successful body.
    ///
    /// The timeout covers both the response head and the body.
    pub async fn fetch(
        &self,
        request: &BackendRequest,
        credential: Option<&str>,
    ) -> Result<Bytes, ProxyError> {
        tokio::time::timeout(self.timeout, async {
            let response = self.send(request, credential).await?;
            response.bytes().await.map_err(|e| classify_reqwest_error(&e))
        })
        .await
        .map_err(|_| timed_out(&request.path_and_query))?
    }

    /// Issue a request and hand back the response once its head arrived.
    ///
    /// The caller streams the body and applies its own idle timeout.
    pub async fn open(
        &self,
        request: &BackendRequest,
        credential: Option<&str>,
    ) -> Result<reqwest::Response, ProxyError> {
        tokio::time::timeout(self.timeout, self.send(request, credential))
            .await
            .map_err(|_| timed_out(&request.path_and_query))?
    }

    /// Send the request and turn error statuses into [`ProxyError`]s.
    async fn send(
        &self,
        request: &BackendRequest,
        credential: Option<&str>,
    ) -> Result<reqwest::Response, ProxyError> {
        let url = format!("{}{}", self.base_url, request.path_and_query);
        debug!(
            method = %request.method,
            url = %url,
            body_len = request.body.len(),
            has_credential = credential.is_some(),
            "Forwarding to backend"
        );

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_LENGTH, request.body.len())
            .header(header::CONNECTION, "keep-alive");

        if let Some(credential) = credential {
            match HeaderValue::from_str(credential) {
                Ok(value) => builder = builder.header(BACKEND_API_KEY_HEADER, value),
                Err(_) => warn!("Credential contains invalid header characters, not forwarding it"),
            }
        }

        let response = builder
            .body(request.body.clone())
            .send()
            .await
            .map_err(|e| {
                error!("Failed to reach backend at {url}: {}", error_chain(&e));
                classify_reqwest_error(&e)
            })?;

        check_status(response).await
    }
}

/// Map a backend error status to the matching [`ProxyError`].
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProxyError> {
    let status = response.status();
    if status.as_u16() < 400 {
        return Ok(response);
    }

    if status == StatusCode::UNAUTHORIZED {
        warn!("Backend rejected the credential (401)");
        return Err(ProxyError::Unauthorized);
    }

    let headers = response.headers().clone();
    let body = response
        .bytes()
        .await
        .map_err(|e| classify_reqwest_error(&e))?;
    warn!(status = %status, body_len = body.len(), "Backend returned an error status");
    Err(ProxyError::Upstream {
        status,
        headers,
        body,
    })
}

fn classify_reqwest_error(err: &reqwest::Error) -> ProxyError {
    if err.is_timeout() {
        ProxyError::Timeout
    } else {
        ProxyError::Transport(error_chain(err))
    }
}

fn timed_out(path: &str) -> ProxyError {
    warn!(path = %path, "Backend response timed out, aborting request");
    ProxyError::Timeout
}

/// Error message followed by its sources, e.g.
/// `error sending request: client error (Connect): Connection refused`.
fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
