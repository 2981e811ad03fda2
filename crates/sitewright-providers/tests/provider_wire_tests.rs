//! Wire-level tests for the upstream clients against a local mock server

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use mockito::Matcher;
use sitewright_providers::{
    collect_stream, create_provider, CredentialResolver, ErrorKind, FinishReason, GenerateOptions,
    Message, Provider, ProviderContext, ProviderKind, ProvidersConfig, RetryCallback,
    StaticCredentialSource,
};
use tokio_util::sync::CancellationToken;

fn config_for(kind: ProviderKind, base_url: &str) -> ProvidersConfig {
    let yaml = format!(
        r#"
providers:
  {kind}:
    base_url: "{base_url}"
    timeout_secs: 5
proxy:
  url: "{base_url}"
retry:
  max_attempts: 3
  base_delay_ms: 1
  max_delay_ms: 5
  jitter: 0.0
"#,
        kind = kind.id(),
        base_url = base_url
    );
    ProvidersConfig::from_yaml(&yaml).unwrap()
}

fn client(kind: ProviderKind, base_url: &str) -> Arc<dyn Provider> {
    let credentials = CredentialResolver::new()
        .with_source(StaticCredentialSource::new("test").with_key(kind, "test-key"));
    let context = ProviderContext::new(config_for(kind, base_url), credentials);
    create_provider(kind, &context).unwrap()
}

fn hello() -> Vec<Message> {
    vec![Message::user("Say hello")]
}

fn sse(events: &[&str]) -> String {
    events
        .iter()
        .map(|data| format!("data: {}\n\n", data))
        .collect()
}

#[tokio::test]
async fn test_openai_generate_parses_choice_and_usage() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer test-key")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "model": "gpt-4o-mini",
            "messages": [{"role": "user", "content": "Say hello"}]
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"model":"gpt-4o-mini","choices":[{"message":{"content":"Hello!"},"finish_reason":"stop"}],
                "usage":{"prompt_tokens":3,"completion_tokens":2,"total_tokens":5}}"#,
        )
        .create_async()
        .await;

    let provider = client(ProviderKind::OpenAi, &server.url());
    let result = provider.generate(&hello(), &GenerateOptions::new()).await.unwrap();

    assert_eq!(result.text, "Hello!");
    assert_eq!(result.finish_reason, FinishReason::Stop);
    assert_eq!(result.usage.total_tokens, 5);
    assert_eq!(result.provider, Some(ProviderKind::OpenAi));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_openai_stream_concatenates_deltas() {
    let mut server = mockito::Server::new_async().await;
    let body = sse(&[
        r#"{"choices":[{"delta":{"content":"Hel"}}]}"#,
        r#"{"choices":[{"delta":{"content":"lo"},"finish_reason":"stop"}]}"#,
        r#"{"choices":[],"usage":{"prompt_tokens":3,"completion_tokens":2,"total_tokens":5}}"#,
        "[DONE]",
    ]);
    let _mock = server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::PartialJson(serde_json::json!({"stream": true})))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(body)
        .create_async()
        .await;

    let provider = client(ProviderKind::OpenAi, &server.url());
    let stream = provider
        .generate_stream(&hello(), &GenerateOptions::new())
        .await
        .unwrap();
    let chunks: Vec<_> = stream.collect().await;

    let texts: Vec<String> = chunks
        .iter()
        .map(|c| c.as_ref().unwrap().text.clone())
        .filter(|t| !t.is_empty())
        .collect();
    assert_eq!(texts, vec!["Hel", "lo"]);

    let last = chunks.last().unwrap().as_ref().unwrap();
    assert!(last.done);
    assert_eq!(last.usage.map(|u| u.total_tokens), Some(5));
}

#[tokio::test]
async fn test_google_generate_and_stream_agree() {
    let mut server = mockito::Server::new_async().await;
    let _generate = server
        .mock("POST", "/models/gemini-2.0-flash:generateContent")
        .match_header("x-goog-api-key", "test-key")
        .with_status(200)
        .with_body(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hello"}]},"finishReason":"STOP"}],
                "usageMetadata":{"promptTokenCount":2,"candidatesTokenCount":1,"totalTokenCount":3}}"#,
        )
        .create_async()
        .await;
    let _stream = server
        .mock(
            "POST",
            Matcher::Regex(r"^/models/gemini-2\.0-flash:streamGenerateContent".to_string()),
        )
        .match_header("x-goog-api-key", "test-key")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(sse(&[
            r#"{"candidates":[{"content":{"parts":[{"text":"Hel"}]}}]}"#,
            r#"{"candidates":[{"content":{"parts":[{"text":"lo"}]},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":2,"candidatesTokenCount":1,"totalTokenCount":3}}"#,
        ]))
        .create_async()
        .await;

    let provider = client(ProviderKind::Google, &server.url());
    let whole = provider.generate(&hello(), &GenerateOptions::new()).await.unwrap();
    let streamed = collect_stream(
        provider
            .generate_stream(&hello(), &GenerateOptions::new())
            .await
            .unwrap(),
    )
    .await
    .unwrap();

    assert_eq!(whole.text, "Hello");
    assert_eq!(streamed.text, whole.text);
    assert_eq!(streamed.usage.total_tokens, 3);
}

#[tokio::test]
async fn test_google_safety_block_is_content_policy() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/models/gemini-2.0-flash:generateContent")
        .with_status(200)
        .with_body(r#"{"candidates":[],"promptFeedback":{"blockReason":"SAFETY"}}"#)
        .expect(1)
        .create_async()
        .await;

    let provider = client(ProviderKind::Google, &server.url());
    let err = provider
        .generate(&hello(), &GenerateOptions::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::ContentPolicyViolation);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_anthropic_generate_sends_version_header() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/messages")
        .match_header("x-api-key", "test-key")
        .match_header("anthropic-version", "2023-06-01")
        .match_body(Matcher::PartialJson(serde_json::json!({"max_tokens": 4096})))
        .with_status(200)
        .with_body(
            r#"{"model":"claude-3-5-sonnet-latest","content":[{"type":"text","text":"Hi there"}],
                "stop_reason":"end_turn","usage":{"input_tokens":4,"output_tokens":3}}"#,
        )
        .create_async()
        .await;

    let provider = client(ProviderKind::Anthropic, &server.url());
    let result = provider.generate(&hello(), &GenerateOptions::new()).await.unwrap();

    assert_eq!(result.text, "Hi there");
    assert_eq!(result.usage.total_tokens, 7);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_anthropic_stream_events() {
    let mut server = mockito::Server::new_async().await;
    let body = [
        ("message_start", r#"{"type":"message_start","message":{"usage":{"input_tokens":4,"output_tokens":0}}}"#),
        ("ping", r#"{"type":"ping"}"#),
        ("content_block_delta", r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}"#),
        ("content_block_delta", r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"lo"}}"#),
        ("message_delta", r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":2}}"#),
        ("message_stop", r#"{"type":"message_stop"}"#),
    ]
    .iter()
    .map(|(event, data)| format!("event: {}\ndata: {}\n\n", event, data))
    .collect::<String>();

    let _mock = server
        .mock("POST", "/messages")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(body)
        .create_async()
        .await;

    let provider = client(ProviderKind::Anthropic, &server.url());
    let result = collect_stream(
        provider
            .generate_stream(&hello(), &GenerateOptions::new())
            .await
            .unwrap(),
    )
    .await
    .unwrap();

    assert_eq!(result.text, "Hello");
    assert_eq!(result.usage.prompt_tokens, 4);
    assert_eq!(result.usage.completion_tokens, 2);
}

#[tokio::test]
async fn test_cohere_generate() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/chat")
        .match_header("authorization", "Bearer test-key")
        .with_status(200)
        .with_body(
            r#"{"finish_reason":"COMPLETE","message":{"role":"assistant","content":[{"type":"text","text":"Bonjour"}]},
                "usage":{"tokens":{"input_tokens":2,"output_tokens":1}}}"#,
        )
        .create_async()
        .await;

    let provider = client(ProviderKind::Cohere, &server.url());
    let result = provider.generate(&hello(), &GenerateOptions::new()).await.unwrap();

    assert_eq!(result.text, "Bonjour");
    assert_eq!(result.usage.total_tokens, 3);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_proxy_generate_and_ndjson_stream() {
    let mut server = mockito::Server::new_async().await;
    let _generate = server
        .mock("POST", "/generate")
        .match_header("authorization", "Bearer test-key")
        .with_status(200)
        .with_body(r#"{"text":"Relayed","finish_reason":"stop","model":"local"}"#)
        .create_async()
        .await;
    let _stream = server
        .mock("POST", "/stream")
        .with_status(200)
        .with_header("content-type", "application/x-ndjson")
        .with_body("{\"text\":\"Rel\"}\n{\"text\":\"ayed\"}\n")
        .create_async()
        .await;

    let provider = client(ProviderKind::Proxy, &server.url());
    let whole = provider.generate(&hello(), &GenerateOptions::new()).await.unwrap();
    assert_eq!(whole.text, "Relayed");
    assert_eq!(whole.provider, Some(ProviderKind::Proxy));

    let chunks: Vec<_> = provider
        .generate_stream(&hello(), &GenerateOptions::new())
        .await
        .unwrap()
        .collect()
        .await;
    let text: String = chunks.iter().map(|c| c.as_ref().unwrap().text.as_str()).collect();
    assert_eq!(text, "Relayed");
    // The relay omitted a terminal chunk; the client supplies one
    assert!(chunks.last().unwrap().as_ref().unwrap().done);
}

#[tokio::test]
async fn test_rate_limit_is_retried_then_succeeds() {
    let mut server = mockito::Server::new_async().await;
    // Served first until its single expected hit is used up
    let limited = server
        .mock("POST", "/chat/completions")
        .with_status(429)
        .with_header("retry-after-ms", "1")
        .with_body(r#"{"error":{"message":"Rate limit reached"}}"#)
        .expect(1)
        .create_async()
        .await;
    let ok = server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_body(r#"{"choices":[{"message":{"content":"ok"},"finish_reason":"stop"}]}"#)
        .expect(1)
        .create_async()
        .await;

    let retries = Arc::new(AtomicU32::new(0));
    let counter = retries.clone();
    let options = GenerateOptions::new().with_on_retry(RetryCallback::new(move |event| {
        assert_eq!(event.attempt, 1);
        assert_eq!(event.error.kind, ErrorKind::RateLimitExceeded);
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let provider = client(ProviderKind::OpenAi, &server.url());
    let result = provider.generate(&hello(), &options).await.unwrap();

    assert_eq!(result.text, "ok");
    assert_eq!(retries.load(Ordering::SeqCst), 1);
    limited.assert_async().await;
    ok.assert_async().await;
}

#[tokio::test]
async fn test_server_errors_exhaust_attempt_budget() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .with_status(503)
        .with_body(r#"{"error":{"message":"overloaded"}}"#)
        .expect(3)
        .create_async()
        .await;

    let provider = client(ProviderKind::OpenAi, &server.url());
    let err = provider
        .generate(&hello(), &GenerateOptions::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::ServiceUnavailable);
    assert_eq!(err.status, Some(503));
    assert_eq!(err.provider, Some(ProviderKind::OpenAi));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_authentication_failure_is_not_retried() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/messages")
        .with_status(401)
        .with_body(r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#)
        .expect(1)
        .create_async()
        .await;

    let provider = client(ProviderKind::Anthropic, &server.url());
    let err = provider
        .generate(&hello(), &GenerateOptions::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Authentication);
    assert_eq!(err.provider, Some(ProviderKind::Anthropic));
    assert!(err.message.contains("invalid x-api-key"));
    assert!(err.hint.is_some());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_quota_exhaustion_is_not_retried() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/models/gemini-2.0-flash:generateContent")
        .with_status(429)
        .with_body(r#"{"error":{"code":429,"message":"You exceeded your current quota","status":"RESOURCE_EXHAUSTED"}}"#)
        .expect(1)
        .create_async()
        .await;

    let provider = client(ProviderKind::Google, &server.url());
    let err = provider
        .generate(&hello(), &GenerateOptions::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::QuotaExceeded);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_gemini_per_minute_limit_is_retried_after_hint() {
    let mut server = mockito::Server::new_async().await;
    let limited = server
        .mock("POST", "/models/gemini-2.0-flash:generateContent")
        .with_status(429)
        .with_body(
            r#"{"error":{"code":429,"message":"Resource has been exhausted (e.g. check quota).","status":"RESOURCE_EXHAUSTED",
                "details":[{"@type":"type.googleapis.com/google.rpc.RetryInfo","retryDelay":"0.01s"}]}}"#,
        )
        .expect(1)
        .create_async()
        .await;
    let ok = server
        .mock("POST", "/models/gemini-2.0-flash:generateContent")
        .with_status(200)
        .with_body(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Back"}]},"finishReason":"STOP"}]}"#,
        )
        .expect(1)
        .create_async()
        .await;

    let delays = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let seen = delays.clone();
    let options = GenerateOptions::new().with_on_retry(RetryCallback::new(move |event| {
        assert_eq!(event.error.kind, ErrorKind::RateLimitExceeded);
        seen.lock().push(event.delay);
    }));

    let provider = client(ProviderKind::Google, &server.url());
    let result = provider.generate(&hello(), &options).await.unwrap();

    assert_eq!(result.text, "Back");
    assert_eq!(*delays.lock(), vec![std::time::Duration::from_millis(5)]);
    limited.assert_async().await;
    ok.assert_async().await;
}

#[tokio::test]
async fn test_cancelled_request_makes_no_call() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/chat")
        .with_status(200)
        .expect(0)
        .create_async()
        .await;

    let token = CancellationToken::new();
    token.cancel();

    let provider = client(ProviderKind::Cohere, &server.url());
    let err = provider
        .generate(&hello(), &GenerateOptions::new().with_signal(token))
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Aborted);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_missing_key_fails_before_any_request() {
    let credentials = CredentialResolver::new();
    let context = ProviderContext::new(ProvidersConfig::default(), credentials);

    let err = create_provider(ProviderKind::OpenAi, &context).err().unwrap();
    assert_eq!(err.kind, ErrorKind::NotConfigured);
    assert_eq!(err.provider, Some(ProviderKind::OpenAi));
    assert!(err.hint.is_some());
}

#[tokio::test]
async fn test_proxy_requires_url() {
    let context = ProviderContext::new(ProvidersConfig::default(), CredentialResolver::new());
    let err = create_provider(ProviderKind::Proxy, &context).err().unwrap();
    assert_eq!(err.kind, ErrorKind::NotConfigured);
}
