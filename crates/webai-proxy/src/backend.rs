//! Backend payload classification and buffered-response aggregation.
//!
//! The backend answers with OpenAI-like objects
//! (`{"choices":[{"message":{"content":...}}], "usage":{...}}`) or with an
//! Ollama-like terminal object (`{"done":true, ...stats}`). It carries no type
//! tag, so every parsed object is classified by which fields it has.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::json_scan::{ConcatenatedJson, Segment};

/// A parsed backend object, classified by field presence.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendChunk {
    /// Carries assistant text and nothing else of interest.
    ContentDelta { content: String },
    /// Carries an OpenAI `usage` block (and possibly text).
    UsageStats {
        content: Option<String>,
        report: UsageReport,
    },
    /// An Ollama-style final object with `done: true`.
    OllamaTerminal {
        content: Option<String>,
        fields: Map<String, Value>,
    },
    /// Valid JSON with none of the fields above.
    Unrecognized,
}

/// Fields pulled from an object carrying a `usage` block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageReport {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub finish_reason: Option<String>,
    pub model: Option<String>,
    /// Unix seconds.
    pub created: Option<i64>,
}

impl BackendChunk {
    /// Classify a parsed backend object.
    ///
    /// `usage` wins over `done: true`, which wins over bare content.
    pub fn classify(value: &Value) -> Self {
        let content = choice_content(value).map(str::to_string);

        if let Some(usage) = value.get("usage").filter(|u| u.is_object()) {
            let report = UsageReport {
                prompt_tokens: usage.get("prompt_tokens").and_then(Value::as_u64),
                completion_tokens: usage.get("completion_tokens").and_then(Value::as_u64),
                finish_reason: value
                    .pointer("/choices/0/finish_reason")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                model: value
                    .get("model")
                    .and_then(Value::as_str)
                    .filter(|m| !m.is_empty())
                    .map(str::to_string),
                created: value.get("created").and_then(Value::as_i64),
            };
            return Self::UsageStats { content, report };
        }

        if value.get("done").and_then(Value::as_bool) == Some(true) {
            let fields = value.as_object().cloned().unwrap_or_default();
            return Self::OllamaTerminal { content, fields };
        }

        match content {
            Some(content) => Self::ContentDelta { content },
            None => Self::Unrecognized,
        }
    }

    /// Parse and classify a raw backend object.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(raw)?;
        Ok(Self::classify(&value))
    }

    /// Assistant text carried by this chunk, if any.
    pub fn content(&self) -> Option<&str> {
        match self {
            Self::ContentDelta { content } => Some(content),
            Self::UsageStats { content, .. } | Self::OllamaTerminal { content, .. } => {
                content.as_deref()
            }
            Self::Unrecognized => None,
        }
    }
}

/// `choices[0].message.content` when it is a non-empty string.
fn choice_content(value: &Value) -> Option<&str> {
    value
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Generation statistics in Ollama field names. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GenerationStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub done_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_eval_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_eval_duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eval_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eval_duration: Option<u64>,
}

impl GenerationStats {
    /// Merge a `usage` report. Fields already set are kept.
    fn merge_usage(&mut self, report: &UsageReport, requested_model: &str) {
        keep_or(&mut self.prompt_eval_count, report.prompt_tokens);
        keep_or(&mut self.eval_count, report.completion_tokens);
        keep_or(
            &mut self.done_reason,
            Some(report.finish_reason.clone().unwrap_or_else(|| "stop".to_string())),
        );
        keep_or(
            &mut self.model,
            Some(
                report
                    .model
                    .clone()
                    .unwrap_or_else(|| requested_model.to_string()),
            ),
        );
        keep_or(
            &mut self.created_at,
            report.created.and_then(unix_seconds_to_iso),
        );
    }

    /// Merge an Ollama terminal object. Fields already set are kept.
    fn merge_terminal(&mut self, fields: &Map<String, Value>, requested_model: &str) {
        let string = |key: &str| {
            fields
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let number = |key: &str| fields.get(key).and_then(Value::as_u64);

        keep_or(&mut self.model, string("model"));
        keep_or(&mut self.created_at, string("created_at"));
        keep_or(&mut self.done_reason, string("done_reason"));
        keep_or(&mut self.total_duration, number("total_duration"));
        keep_or(&mut self.load_duration, number("load_duration"));
        keep_or(&mut self.prompt_eval_count, number("prompt_eval_count"));
        keep_or(&mut self.prompt_eval_duration, number("prompt_eval_duration"));
        keep_or(&mut self.eval_count, number("eval_count"));
        keep_or(&mut self.eval_duration, number("eval_duration"));
        keep_or(&mut self.model, Some(requested_model.to_string()));
    }
}

fn keep_or<T>(slot: &mut Option<T>, incoming: Option<T>) {
    if slot.is_none() {
        *slot = incoming;
    }
}

/// ISO-8601 UTC timestamp with millisecond precision, e.g.
/// `2024-05-01T12:00:00.000Z`.
pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn unix_seconds_to_iso(secs: i64) -> Option<String> {
    DateTime::from_timestamp(secs, 0).map(iso_timestamp)
}

/// Text and statistics reconstructed from one buffered backend body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregatedResult {
    pub content: String,
    pub stats: GenerationStats,
}

/// Aggregate a buffered backend body that may hold several JSON objects.
///
/// Text from every object is concatenated in order; statistics are merged
/// with the first value seen for a field winning. Input that is not JSON is
/// returned verbatim as content. If content was found but no object named a
/// model, default statistics are filled in for `requested_model`.
pub fn aggregate(body: &str, requested_model: &str) -> AggregatedResult {
    let trimmed = body.trim();
    let mut content = String::new();
    let mut stats = GenerationStats::default();
    let mut objects_seen = 0usize;

    for segment in ConcatenatedJson::new(trimmed) {
        match segment {
            Segment::Trailing(text) => {
                if objects_seen == 0 {
                    warn!("Backend response is not JSON, treating it as raw text");
                    content = text.to_string();
                }
                break;
            }
            Segment::Unbalanced(text) => {
                warn!(tail = %text, "Unbalanced braces in backend response, stopping scan");
                if objects_seen == 0 {
                    content = trimmed.to_string();
                }
                break;
            }
            Segment::Object(raw) => {
                objects_seen += 1;
                let chunk = match BackendChunk::parse(raw) {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!(segment = %raw, "Could not parse backend JSON segment: {e}");
                        if objects_seen == 1 {
                            content = trimmed.to_string();
                        }
                        break;
                    }
                };

                if let Some(text) = chunk.content() {
                    content.push_str(text);
                }
                match &chunk {
                    BackendChunk::UsageStats { report, .. } => {
                        stats.merge_usage(report, requested_model);
                    }
                    BackendChunk::OllamaTerminal { fields, .. } => {
                        stats.merge_terminal(fields, requested_model);
                    }
                    BackendChunk::ContentDelta { .. } | BackendChunk::Unrecognized => {}
                }
            }
        }
    }

    if stats.model.is_none() && !content.is_empty() {
        stats.model = Some(requested_model.to_string());
        keep_or(&mut stats.done_reason, Some("stop".to_string()));
        keep_or(&mut stats.created_at, Some(iso_timestamp(Utc::now())));
    }

    AggregatedResult { content, stats }
}
