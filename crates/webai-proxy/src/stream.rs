//! Live re-framing of the backend's chunked response.
//!
//! The backend streams bare JSON objects. Each received chunk is parsed on
//! its own and its text is re-emitted as an Ollama NDJSON line or an OpenAI
//! SSE event. The converter is an `unfold` state machine over the backend
//! byte stream, so the client response advances exactly as fast as the
//! backend produces data and dropping it drops the backend connection.

use std::fmt::Display;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures_util::{Stream, StreamExt, stream::BoxStream};
use tracing::{debug, warn};

use crate::backend::BackendChunk;
use crate::formatters::{
    OPENAI_STREAM_DONE, completion_id, ollama_final_chunk, ollama_stream_chunk,
    openai_stream_chunk,
};
use crate::request::Dialect;

/// Build the streaming response for a chat request.
pub fn chat_stream_response(
    upstream: reqwest::Response,
    dialect: Dialect,
    model: String,
    started: Instant,
    idle_timeout: Duration,
) -> Response {
    let frames = reframe(upstream.bytes_stream(), dialect, model, started, idle_timeout);

    let builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*");
    let builder = match dialect {
        Dialect::OpenAi => builder
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache"),
        Dialect::Ollama => builder
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::TRANSFER_ENCODING, "chunked"),
    };

    builder
        .body(Body::from_stream(frames))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Relay a streamed backend response on a pass-through path byte for byte.
pub fn relay_stream_response(upstream: reqwest::Response, idle_timeout: Duration) -> Response {
    let status = upstream.status();
    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("application/json"));

    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .body(Body::from_stream(relay(upstream.bytes_stream(), idle_timeout)))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// State threaded through the `unfold` stream.
struct ReframeState<E> {
    stream: BoxStream<'static, Result<Bytes, E>>,
    dialect: Dialect,
    model: String,
    /// One id for every event of an OpenAI stream.
    completion_id: String,
    started: Instant,
    idle_timeout: Duration,
    deltas: usize,
    done: bool,
}

/// Next item pulled from the backend, with the idle timeout applied.
enum Pulled<E> {
    Chunk(Bytes),
    End,
    Failed(E),
    Idle,
}

async fn pull<E>(
    stream: &mut BoxStream<'static, Result<Bytes, E>>,
    idle_timeout: Duration,
) -> Pulled<E> {
    match tokio::time::timeout(idle_timeout, stream.next()).await {
        Ok(Some(Ok(bytes))) => Pulled::Chunk(bytes),
        Ok(Some(Err(e))) => Pulled::Failed(e),
        Ok(None) => Pulled::End,
        Err(_) => Pulled::Idle,
    }
}

/// Convert a backend byte stream into the caller's framing.
///
/// Chunks that are empty, unparseable or carry no text are skipped. When the
/// backend finishes, the dialect's terminator is emitted. On a backend error
/// or idle timeout the stream just ends.
pub fn reframe<S, E>(
    byte_stream: S,
    dialect: Dialect,
    model: String,
    started: Instant,
    idle_timeout: Duration,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = ReframeState {
        stream: byte_stream.boxed(),
        dialect,
        model,
        completion_id: completion_id(),
        started,
        idle_timeout,
        deltas: 0,
        done: false,
    };

    futures_util::stream::unfold(state, |mut st| async move {
        if st.done {
            return None;
        }

        loop {
            match pull(&mut st.stream, st.idle_timeout).await {
                Pulled::Chunk(bytes) => {
                    if let Some(frame) = st.frame(&bytes) {
                        st.deltas += 1;
                        return Some((Ok(Bytes::from(frame)), st));
                    }
                }
                Pulled::End => {
                    st.done = true;
                    debug!(deltas = st.deltas, "Backend stream finished");
                    let tail = st.terminator();
                    return Some((Ok(Bytes::from(tail)), st));
                }
                Pulled::Failed(e) => {
                    warn!(deltas = st.deltas, "Backend stream failed, ending response: {e}");
                    return None;
                }
                Pulled::Idle => {
                    warn!(
                        deltas = st.deltas,
                        timeout_ms = st.idle_timeout.as_millis(),
                        "Backend stream went idle, ending response"
                    );
                    return None;
                }
            }
        }
    })
}

impl<E> ReframeState<E> {
    /// Frame for one backend chunk, or `None` when it carries no text.
    fn frame(&self, bytes: &[u8]) -> Option<String> {
        let raw = String::from_utf8_lossy(bytes);
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        let chunk = match BackendChunk::parse(raw) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(chunk = %raw, "Skipping unparseable stream chunk: {e}");
                return None;
            }
        };
        let delta = chunk.content().filter(|text| !text.is_empty())?;

        Some(match self.dialect {
            Dialect::Ollama => ollama_stream_chunk(delta, &self.model),
            Dialect::OpenAi => openai_stream_chunk(delta, &self.model, &self.completion_id),
        })
    }

    fn terminator(&self) -> String {
        match self.dialect {
            Dialect::Ollama => ollama_final_chunk(&self.model, self.started.elapsed()),
            Dialect::OpenAi => OPENAI_STREAM_DONE.to_string(),
        }
    }
}

/// Pass backend bytes through unchanged, ending on error or idle timeout.
pub fn relay<S, E>(
    byte_stream: S,
    idle_timeout: Duration,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    futures_util::stream::unfold(byte_stream.boxed(), move |mut stream| async move {
        match pull(&mut stream, idle_timeout).await {
            Pulled::Chunk(bytes) => Some((Ok(bytes), stream)),
            Pulled::End => None,
            Pulled::Failed(e) => {
                warn!("Backend stream failed, ending relay: {e}");
                None
            }
            Pulled::Idle => {
                warn!("Backend stream went idle, ending relay");
                None
            }
        }
    })
}
