//! Builders for the caller-facing response shapes.
//!
//! Every function here is pure apart from reading the clock and, for
//! completion ids, generating a UUID.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::backend::{GenerationStats, iso_timestamp};
use crate::models::{
    AssistantMessage, ChatChoice, ChatChunkChoice, ChatCompletionChunk, ChatCompletionResponse,
    ChatDelta, OllamaChatResponse, OllamaChatStreamChunk, Usage,
};

/// Terminal event of an OpenAI SSE stream.
pub const OPENAI_STREAM_DONE: &str = "data: [DONE]\n\n";

const DEFAULT_DONE_REASON: &str = "stop";

/// Fresh OpenAI-style completion id (`chatcmpl-<uuid>`).
pub fn completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4())
}

/// Approximate token count of a text: `ceil(words * 1.3)`.
///
/// Words are whitespace-separated runs. Integer arithmetic keeps the result
/// exact (`10` words is `13` tokens, not `14`).
pub fn approximate_tokens(text: Option<&str>) -> u32 {
    let words = text.map_or(0, |t| t.split_whitespace().count());
    let words = u32::try_from(words).unwrap_or(u32::MAX / 13);
    (words.saturating_mul(13)).div_ceil(10)
}

/// Sum of approximate token counts over prompt messages.
///
/// Messages whose `content` is not a string count as zero.
pub fn approximate_prompt_tokens(messages: &[Value]) -> u32 {
    messages
        .iter()
        .map(|m| approximate_tokens(m.get("content").and_then(Value::as_str)))
        .fold(0u32, u32::saturating_add)
}

fn elapsed_nanos(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
}

// =============================================================================
// Ollama
// =============================================================================

/// Build a full Ollama `/api/chat` response.
///
/// `model` is always the caller's requested model, never the backend's.
/// `total_duration` uses the proxy's own measured `elapsed` when given.
pub fn ollama_response(
    content: String,
    model: &str,
    stats: &GenerationStats,
    elapsed: Option<Duration>,
) -> OllamaChatResponse {
    OllamaChatResponse {
        model: model.to_string(),
        created_at: stats
            .created_at
            .clone()
            .unwrap_or_else(|| iso_timestamp(Utc::now())),
        message: AssistantMessage::new(content),
        done_reason: stats
            .done_reason
            .clone()
            .unwrap_or_else(|| DEFAULT_DONE_REASON.to_string()),
        done: true,
        total_duration: elapsed.map(elapsed_nanos).or(stats.total_duration),
        load_duration: stats.load_duration,
        prompt_eval_count: stats.prompt_eval_count,
        prompt_eval_duration: stats.prompt_eval_duration,
        eval_count: stats.eval_count,
        eval_duration: stats.eval_duration,
    }
}

/// One in-progress NDJSON line (`done: false`), newline-terminated.
pub fn ollama_stream_chunk(delta: &str, model: &str) -> String {
    ndjson_line(&OllamaChatStreamChunk {
        model: model.to_string(),
        created_at: iso_timestamp(Utc::now()),
        message: AssistantMessage::new(delta),
        done_reason: None,
        done: false,
        total_duration: None,
    })
}

/// Final NDJSON line (`done: true`, empty content).
///
/// Only the duration is known mid-stream, so no other stats are reported.
pub fn ollama_final_chunk(model: &str, elapsed: Duration) -> String {
    ndjson_line(&OllamaChatStreamChunk {
        model: model.to_string(),
        created_at: iso_timestamp(Utc::now()),
        message: AssistantMessage::new(""),
        done_reason: Some(DEFAULT_DONE_REASON.to_string()),
        done: true,
        total_duration: Some(elapsed_nanos(elapsed)),
    })
}

fn ndjson_line(chunk: &OllamaChatStreamChunk) -> String {
    let mut out = serde_json::to_string(chunk).unwrap_or_default();
    out.push('\n');
    out
}

// =============================================================================
// OpenAI
// =============================================================================

/// Build a full OpenAI chat completion with approximated usage.
pub fn openai_response(
    content: String,
    model: &str,
    prompt_messages: &[Value],
    stats: &GenerationStats,
) -> ChatCompletionResponse {
    let prompt_tokens = approximate_prompt_tokens(prompt_messages);
    let completion_tokens = approximate_tokens(Some(&content));

    let created = stats
        .created_at
        .as_deref()
        .and_then(|at| DateTime::parse_from_rfc3339(at).ok())
        .map_or_else(|| Utc::now().timestamp(), |at| at.timestamp());

    ChatCompletionResponse {
        id: completion_id(),
        object: "chat.completion".to_string(),
        created,
        model: model.to_string(),
        choices: vec![ChatChoice {
            index: 0,
            message: AssistantMessage::new(content),
            finish_reason: stats
                .done_reason
                .clone()
                .unwrap_or_else(|| DEFAULT_DONE_REASON.to_string()),
        }],
        usage: Usage::new(prompt_tokens, completion_tokens),
    }
}

/// One SSE event carrying a content delta.
pub fn openai_stream_chunk(delta: &str, model: &str, id: &str) -> String {
    let chunk = ChatCompletionChunk {
        id: id.to_string(),
        object: "chat.completion.chunk".to_string(),
        created: Utc::now().timestamp(),
        model: model.to_string(),
        choices: vec![ChatChunkChoice {
            index: 0,
            delta: ChatDelta {
                content: delta.to_string(),
            },
            finish_reason: None,
        }],
    };
    format!(
        "data: {}\n\n",
        serde_json::to_string(&chunk).unwrap_or_default()
    )
}
