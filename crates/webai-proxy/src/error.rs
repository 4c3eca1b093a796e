//! Proxy error taxonomy and its mapping to HTTP responses.
//!
//! Every failure is turned into a response at the boundary that detects it.
//! Bodies are always JSON `{"error": ..., "details": ...}` except for
//! backend errors whose own body is valid JSON, which is forwarded as-is.

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde_json::Value;

use crate::models::ErrorResponse;

/// Message returned when the backend rejects the forwarded credential.
pub const UNAUTHORIZED_MESSAGE: &str = "Authentication error: Unauthorized access to the target server. \
Ensure the correct authentication token is provided. This can be done via: \
1) Setting the TARGET_API_KEY environment variable in the proxy's .env file, OR \
2) Sending an 'Authorization: Bearer <your-token>' header with your request.";

/// Message returned when the backend misses its deadline.
pub const TIMEOUT_MESSAGE: &str = "Backend server response timed out.";

/// Headers that are never copied from a backend error response.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    // The body is re-sent as a single JSON document.
    "content-length",
    "content-type",
];

/// Check if a backend response header may be copied to the caller.
fn should_forward_header(name: &str) -> bool {
    let lower = name.to_lowercase();
    !HOP_BY_HOP_HEADERS.contains(&lower.as_str())
}

/// Everything that can go wrong while proxying one request.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The request body is not valid JSON.
    #[error("Invalid JSON in Request Body: {0}")]
    InvalidBody(String),

    /// A POST/PUT arrived without a body.
    #[error("Missing Request Body")]
    MissingBody,

    /// The backend answered 401.
    #[error("Backend rejected the credential")]
    Unauthorized,

    /// The backend answered with another 4xx/5xx status.
    #[error("Backend error {status}")]
    Upstream {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    },

    /// The backend could not be reached or the connection broke.
    #[error("Proxy Error: {0}")]
    Transport(String),

    /// The backend did not answer within the configured timeout.
    #[error("Backend server response timed out.")]
    Timeout,

    /// A fault in the proxy itself.
    #[error("Proxy Internal Error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// HTTP status this error is reported with.
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidBody(_) | Self::MissingBody => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Upstream { status, .. } => *status,
            Self::Transport(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            Self::InvalidBody(details) => (
                status,
                Json(ErrorResponse::with_details(
                    "Invalid JSON in Request Body",
                    details,
                )),
            )
                .into_response(),
            Self::MissingBody => (
                status,
                Json(ErrorResponse::with_details(
                    "Missing Request Body",
                    "This endpoint requires a JSON request body, but none was provided.",
                )),
            )
                .into_response(),
            Self::Unauthorized => {
                (status, Json(ErrorResponse::new(UNAUTHORIZED_MESSAGE))).into_response()
            }
            Self::Upstream {
                status,
                headers,
                body,
            } => upstream_error_response(status, &headers, &body),
            Self::Transport(details) => (
                status,
                Json(ErrorResponse::with_details("Proxy Error", details)),
            )
                .into_response(),
            Self::Timeout => (status, Json(ErrorResponse::new(TIMEOUT_MESSAGE))).into_response(),
            Self::Internal(details) => (
                status,
                Json(ErrorResponse::with_details("Proxy Internal Error", details)),
            )
                .into_response(),
        }
    }
}

/// Re-send a backend error with its status.
///
/// A JSON body is forwarded unchanged; anything else is wrapped as
/// `{"error":"Backend Error","statusCode":...,"details":...}`.
fn upstream_error_response(status: StatusCode, headers: &HeaderMap, body: &[u8]) -> Response {
    let text = String::from_utf8_lossy(body);
    let payload = serde_json::from_str::<Value>(text.trim()).unwrap_or_else(|_| {
        serde_json::json!({
            "error": "Backend Error",
            "statusCode": status.as_u16(),
            "details": text.trim(),
        })
    });

    let mut response = (status, Json(payload)).into_response();
    let out = response.headers_mut();
    for (name, value) in headers {
        if should_forward_header(name.as_str()) {
            out.append(name.clone(), value.clone());
        }
    }
    out.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}
