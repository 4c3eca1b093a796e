//! End-to-end tests: a real proxy in front of a scripted stub backend.
//!
//! Each test starts its own backend and proxy on ephemeral ports and talks
//! to the proxy over HTTP with `reqwest`.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use serde_json::{Value, json};

use common::{
    RecordingTrafficLog, Reply, StubBackend, config_for, content_object, start_pair, start_proxy,
    start_proxy_with_log,
};

fn chat_body(stream: bool) -> Value {
    json!({
        "model": "x",
        "messages": [{"role": "user", "content": "Say hello please"}],
        "stream": stream
    })
}

/// Scenario A: buffered Ollama chat.
#[tokio::test]
async fn test_ollama_buffered_chat() {
    let (backend, proxy) = start_pair(Reply::ok_json(content_object("Hi there"))).await;

    let response = proxy
        .client
        .post(proxy.url("/api/chat"))
        .json(&chat_body(false))
        .send()
        .await
        .expect("proxy request");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    let json: Value = response.json().await.expect("JSON body");
    assert_eq!(json["message"]["content"], "Hi there");
    assert_eq!(json["message"]["role"], "assistant");
    assert_eq!(json["done"], true);
    assert_eq!(json["done_reason"], "stop");
    assert_eq!(json["model"], "x");
    assert!(json["total_duration"].as_u64().unwrap() > 0);

    let sent = backend.single_request();
    assert_eq!(sent.method, "POST");
    assert_eq!(sent.path_and_query, "/prompt");
    assert_eq!(sent.headers["content-type"], "application/json");
    assert_eq!(
        sent.headers["content-length"],
        sent.body.len().to_string().as_str()
    );
    assert!(sent.headers.get("x-api-key").is_none());
    assert!(sent.headers.get("authorization").is_none());
    assert_eq!(
        sent.json(),
        json!({"message": [{"role": "user", "content": "Say hello please"}]})
    );
}

/// Scenario B: streamed Ollama chat.
#[tokio::test]
async fn test_ollama_streaming_chat() {
    let (_backend, proxy) = start_pair(Reply::Chunks {
        chunks: vec![content_object("Hel"), content_object("lo")],
        delay: Duration::from_millis(30),
    })
    .await;

    let response = proxy
        .client
        .post(proxy.url("/api/chat"))
        .json(&chat_body(true))
        .send()
        .await
        .expect("proxy request");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "application/json");
    assert_eq!(response.headers()["access-control-allow-origin"], "*");

    let text = response.text().await.expect("stream body");
    let lines: Vec<Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).expect("NDJSON line"))
        .collect();

    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["message"]["content"], "Hel");
    assert_eq!(lines[0]["done"], false);
    assert_eq!(lines[1]["message"]["content"], "lo");
    assert_eq!(lines[1]["done"], false);
    assert_eq!(lines[2]["done"], true);
    assert_eq!(lines[2]["message"]["content"], "");
    assert!(lines.iter().all(|line| line["model"] == "x"));
}

#[tokio::test]
async fn test_openai_streaming_chat() {
    let (_backend, proxy) = start_pair(Reply::Chunks {
        chunks: vec![content_object("Gen"), content_object("eral")],
        delay: Duration::from_millis(30),
    })
    .await;

    let response = proxy
        .client
        .post(proxy.url("/v1/chat/completions"))
        .json(&chat_body(true))
        .send()
        .await
        .expect("proxy request");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");
    assert_eq!(response.headers()["cache-control"], "no-cache");

    let text = response.text().await.expect("stream body");
    let events: Vec<&str> = text
        .split("\n\n")
        .filter(|event| !event.is_empty())
        .collect();
    assert_eq!(events.len(), 3);
    assert_eq!(events[2], "data: [DONE]");

    let chunks: Vec<Value> = events[..2]
        .iter()
        .map(|event| serde_json::from_str(event.strip_prefix("data: ").unwrap()).unwrap())
        .collect();
    assert_eq!(chunks[0]["id"], chunks[1]["id"]);
    assert!(chunks[0]["id"].as_str().unwrap().starts_with("chatcmpl-"));
    assert_eq!(chunks[0]["object"], "chat.completion.chunk");
    assert_eq!(chunks[0]["model"], "x");
    assert_eq!(chunks[0]["choices"][0]["delta"]["content"], "Gen");
    assert_eq!(chunks[1]["choices"][0]["delta"]["content"], "eral");
    assert!(chunks[1]["choices"][0]["finish_reason"].is_null());
}

#[tokio::test]
async fn test_openai_buffered_chat() {
    let (_backend, proxy) = start_pair(Reply::ok_json(content_object("General Kenobi"))).await;

    let response = proxy
        .client
        .post(proxy.url("/v1/chat/completions"))
        .json(&chat_body(false))
        .send()
        .await
        .expect("proxy request");

    assert_eq!(response.status(), StatusCode::OK);
    let json: Value = response.json().await.expect("JSON body");
    assert_eq!(json["object"], "chat.completion");
    assert_eq!(json["model"], "x");
    assert_eq!(json["choices"][0]["message"]["content"], "General Kenobi");
    assert_eq!(json["choices"][0]["finish_reason"], "stop");

    let usage = &json["usage"];
    assert_eq!(usage["prompt_tokens"], 4);
    assert_eq!(usage["completion_tokens"], 3);
    assert_eq!(
        usage["total_tokens"].as_u64(),
        Some(usage["prompt_tokens"].as_u64().unwrap() + usage["completion_tokens"].as_u64().unwrap())
    );
}

/// Scenario C: two objects back to back in one buffered body.
#[tokio::test]
async fn test_concatenated_backend_body() {
    let body = format!(
        "{}{}",
        content_object("A"),
        json!({"usage": {"prompt_tokens": 5, "completion_tokens": 3}, "model": "x", "choices": [{"finish_reason": "stop"}]})
    );
    let (_backend, proxy) = start_pair(Reply::ok_json(body)).await;

    let json: Value = proxy
        .client
        .post(proxy.url("/api/chat"))
        .json(&chat_body(false))
        .send()
        .await
        .expect("proxy request")
        .json()
        .await
        .expect("JSON body");

    assert_eq!(json["message"]["content"], "A");
    assert_eq!(json["prompt_eval_count"], 5);
    assert_eq!(json["eval_count"], 3);
    assert_eq!(json["done_reason"], "stop");
}

/// Scenario D: backend rejects the credential.
#[tokio::test]
async fn test_backend_401_is_explained() {
    let (_backend, proxy) = start_pair(Reply::Json {
        status: StatusCode::UNAUTHORIZED,
        body: r#"{"detail":"bad key"}"#.to_string(),
    })
    .await;

    let response = proxy
        .client
        .post(proxy.url("/api/chat"))
        .json(&chat_body(false))
        .send()
        .await
        .expect("proxy request");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json: Value = response.json().await.expect("JSON body");
    let message = json["error"].as_str().unwrap();
    assert!(message.contains("TARGET_API_KEY"));
    assert!(message.contains("Authorization: Bearer"));
}

/// Scenario E: backend silent past the timeout.
#[tokio::test]
async fn test_backend_timeout() {
    let backend = StubBackend::start(Reply::Silent).await;
    let mut config = config_for(backend.addr.port());
    config.target_timeout = Duration::from_millis(10);
    let proxy = start_proxy(config).await;

    let response = proxy
        .client
        .post(proxy.url("/api/chat"))
        .json(&chat_body(false))
        .send()
        .await
        .expect("proxy request");

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    let json: Value = response.json().await.expect("JSON body");
    assert_eq!(json, json!({"error": "Backend server response timed out."}));
}

/// Scenario F: malformed JSON never reaches the backend.
#[tokio::test]
async fn test_malformed_json_is_rejected() {
    let (backend, proxy) = start_pair(Reply::ok_json(content_object("unused"))).await;

    let response = proxy
        .client
        .post(proxy.url("/v1/chat/completions"))
        .header("content-type", "application/json")
        .body("{\"model\": \"x\", \"messages\": [")
        .send()
        .await
        .expect("proxy request");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json: Value = response.json().await.expect("JSON body");
    assert_eq!(json["error"], "Invalid JSON in Request Body");
    assert!(!json["details"].as_str().unwrap().is_empty());
    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn test_backend_json_error_is_forwarded() {
    let (_backend, proxy) = start_pair(Reply::Json {
        status: StatusCode::SERVICE_UNAVAILABLE,
        body: r#"{"error":"model loading"}"#.to_string(),
    })
    .await;

    let response = proxy
        .client
        .post(proxy.url("/api/chat"))
        .json(&chat_body(false))
        .send()
        .await
        .expect("proxy request");

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers()["content-type"], "application/json");
    let json: Value = response.json().await.expect("JSON body");
    assert_eq!(json, json!({"error": "model loading"}));
}

#[tokio::test]
async fn test_backend_text_error_is_wrapped() {
    let (_backend, proxy) = start_pair(Reply::Text {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: "kaboom".to_string(),
    })
    .await;

    let response = proxy
        .client
        .post(proxy.url("/v1/chat/completions"))
        .json(&chat_body(false))
        .send()
        .await
        .expect("proxy request");

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json: Value = response.json().await.expect("JSON body");
    assert_eq!(
        json,
        json!({"error": "Backend Error", "statusCode": 500, "details": "kaboom"})
    );
}

#[tokio::test]
async fn test_unreachable_backend_is_502() {
    // Bind and drop to get a port nothing listens on.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let proxy = start_proxy(config_for(port)).await;

    let response = proxy
        .client
        .post(proxy.url("/api/chat"))
        .json(&chat_body(false))
        .send()
        .await
        .expect("proxy request");

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let json: Value = response.json().await.expect("JSON body");
    assert_eq!(json["error"], "Proxy Error");
    assert!(!json["details"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_bearer_token_is_forwarded_as_api_key() {
    let backend = StubBackend::start(Reply::ok_json(content_object("ok"))).await;
    let mut config = config_for(backend.addr.port());
    config.target_api_key = Some("configured-key".to_string());
    let proxy = start_proxy(config).await;

    proxy
        .client
        .post(proxy.url("/api/chat"))
        .bearer_auth("caller-token")
        .json(&chat_body(false))
        .send()
        .await
        .expect("proxy request");
    proxy
        .client
        .post(proxy.url("/api/chat"))
        .json(&chat_body(false))
        .send()
        .await
        .expect("proxy request");

    let requests = backend.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].headers["x-api-key"], "caller-token");
    assert!(requests[0].headers.get("authorization").is_none());
    assert_eq!(requests[1].headers["x-api-key"], "configured-key");
}

#[tokio::test]
async fn test_other_path_is_passed_through() {
    let (backend, proxy) = start_pair(Reply::ok_json(
        json!({"choices": [{"message": {"content": "generated"}}], "usage": {"prompt_tokens": 1, "completion_tokens": 1}, "model": "gen"}).to_string(),
    ))
    .await;

    let body = r#"{"model":"gen",  "prompt":"hi"}"#;
    let response = proxy
        .client
        .post(proxy.url("/api/generate?verbose=1"))
        .header("content-type", "application/json")
        .body(body)
        .send()
        .await
        .expect("proxy request");

    assert_eq!(response.status(), StatusCode::OK);
    let json: Value = response.json().await.expect("JSON body");
    assert_eq!(json["content"], "generated");
    assert_eq!(json["stats"]["model"], "gen");
    assert_eq!(json["stats"]["prompt_eval_count"], 1);

    let sent = backend.single_request();
    assert_eq!(sent.path_and_query, "/api/generate?verbose=1");
    assert_eq!(&sent.body[..], body.as_bytes());
}

#[tokio::test]
async fn test_other_path_get_without_body() {
    let (backend, proxy) = start_pair(Reply::ok_json(r#"{"models":[]}"#)).await;

    let response = proxy
        .client
        .get(proxy.url("/api/ps"))
        .send()
        .await
        .expect("proxy request");

    assert_eq!(response.status(), StatusCode::OK);
    let sent = backend.single_request();
    assert_eq!(sent.method, "GET");
    assert_eq!(sent.path_and_query, "/api/ps");
    assert!(sent.body.is_empty());
}

#[tokio::test]
async fn test_other_path_stream_is_relayed_verbatim() {
    let (_backend, proxy) = start_pair(Reply::Chunks {
        chunks: vec!["{\"a\":1}\n".to_string(), "{\"b\":2}\n".to_string()],
        delay: Duration::from_millis(10),
    })
    .await;

    let response = proxy
        .client
        .post(proxy.url("/api/generate"))
        .json(&json!({"model": "gen", "stream": true}))
        .send()
        .await
        .expect("proxy request");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.text().await.expect("body"),
        "{\"a\":1}\n{\"b\":2}\n"
    );
}

#[tokio::test]
async fn test_direct_endpoints_skip_backend() {
    let (backend, proxy) = start_pair(Reply::ok_json("{}")).await;

    let root = proxy
        .client
        .get(proxy.url("/"))
        .send()
        .await
        .expect("proxy request");
    assert_eq!(root.text().await.unwrap(), "Ollama is running");

    let tags: Value = proxy
        .client
        .get(proxy.url("/api/tags"))
        .send()
        .await
        .expect("proxy request")
        .json()
        .await
        .unwrap();
    assert_eq!(tags["models"][0]["name"], "webai-llm");

    let preflight = proxy
        .client
        .request(reqwest::Method::OPTIONS, proxy.url("/api/chat"))
        .send()
        .await
        .expect("proxy request");
    assert_eq!(preflight.status(), StatusCode::NO_CONTENT);

    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn test_traffic_is_logged() {
    let backend = StubBackend::start(Reply::ok_json(content_object("ok"))).await;
    let log = Arc::new(RecordingTrafficLog::default());
    let proxy = start_proxy_with_log(config_for(backend.addr.port()), log.clone()).await;

    proxy
        .client
        .post(proxy.url("/api/chat"))
        .bearer_auth("secret-token")
        .json(&chat_body(false))
        .send()
        .await
        .expect("proxy request");

    let requests = log.requests.lock().unwrap().clone();
    let responses = log.responses.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].uri, "/api/chat");
    assert!(requests[0].body.as_deref().unwrap().contains("Say hello please"));
    assert!(
        requests[0]
            .headers
            .iter()
            .all(|(_, value)| !value.contains("secret-token"))
    );
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status, 200);
}
