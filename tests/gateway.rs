//! End-to-end tests of the public gateway surface against mock providers.

use futures::StreamExt;
use llmgate::config::ConfigLoader;
use llmgate::router::RandomSource;
use llmgate::{ChatMode, ChatState, ChatTurn, ErrorClass, Gateway, GatewayError, Provider, RefineJob};
use mockito::{Matcher, Server, ServerGuard};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;

#[derive(Debug, Deserialize, PartialEq)]
struct ExamRecord {
    subject: String,
    questions: Vec<String>,
}

/// Gateway whose providers point at the given mock servers
///
/// Environment key variables are renamed to ones that are never set, so
/// only explicit overrides provide keys.
fn gateway(servers: &[(Provider, &ServerGuard)]) -> Gateway {
    let urls: HashMap<Provider, String> = servers.iter().map(|(p, s)| (*p, s.url())).collect();

    let mut config = ConfigLoader::builtin_defaults().unwrap();
    for (provider, entry) in config.providers.iter_mut() {
        entry.base_url = urls
            .get(provider)
            .cloned()
            .unwrap_or_else(|| "http://127.0.0.1:9".to_string());
        entry.api_base_env = None;
        entry.api_key_env = Some(format!("LLMGATE_IT_{}_KEYS_UNSET", provider.as_str().to_uppercase()));
    }
    config.retry.quota_delay_ms = 1;
    config.retry.backoff_base_ms = 1;

    llmgate::logging::init_for_tests();
    Gateway::from_config(config)
        .unwrap()
        .with_random_source(RandomSource::seeded(7))
}

fn completion_body(content: &str) -> String {
    json!({
        "id": "chatcmpl-1",
        "model": "mock",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": content}, "finish_reason": "stop"}]
    })
    .to_string()
}

fn gemini_body(text: &str) -> String {
    json!({
        "candidates": [{"content": {"role": "model", "parts": [{"text": text}]}, "finishReason": "STOP"}]
    })
    .to_string()
}

#[tokio::test]
async fn test_no_keys_fails_before_any_request() {
    let mut gemini = Server::new_async().await;
    let never = gemini
        .mock("POST", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let gateway = gateway(&[(Provider::Gemini, &gemini)]);

    let err = gateway
        .analyze::<ExamRecord>("extract", vec![], None)
        .await
        .unwrap_err();
    assert!(matches!(
        &err,
        GatewayError::NoKeysAvailable { provider: Provider::Gemini, env_var }
            if env_var == "LLMGATE_IT_GEMINI_KEYS_UNSET"
    ));
    assert_eq!(err.class(), ErrorClass::Configuration);

    let err = gateway.generate_image("a cell diagram").await.unwrap_err();
    assert!(err.is_configuration());

    let err = gateway
        .generate_title(&[ChatTurn::user("What is osmosis?")])
        .await
        .unwrap_err();
    assert!(err.is_configuration());

    never.assert_async().await;
}

#[tokio::test]
async fn test_analyze_falls_back_to_alternate_vendor() {
    let mut gemini = Server::new_async().await;
    let mut groq = Server::new_async().await;

    let newest = gemini
        .mock("POST", "/models/gemini-2.5-flash:generateContent")
        .with_status(429)
        .with_body(r#"{"error":{"code":429,"message":"Resource has been exhausted","status":"RESOURCE_EXHAUSTED"}}"#)
        .expect(1)
        .create_async()
        .await;
    let older = gemini
        .mock("POST", "/models/gemini-2.0-flash:generateContent")
        .with_status(500)
        .with_body("internal error")
        .expect(1)
        .create_async()
        .await;
    let vision = groq
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer gsk_1")
        .match_body(Matcher::PartialJsonString(
            r#"{"model":"meta-llama/llama-4-scout-17b-16e-instruct","response_format":{"type":"json_object"}}"#
                .to_string(),
        ))
        .with_status(200)
        .with_body(completion_body(
            "```json\n{\"subject\":\"Biology\",\"questions\":[\"Define osmosis\"]}\n```",
        ))
        .create_async()
        .await;

    let gateway = gateway(&[(Provider::Gemini, &gemini), (Provider::Groq, &groq)]);
    gateway.set_key_override(Provider::Gemini, "g_1");
    gateway.set_key_override(Provider::Groq, "gsk_1");

    let outcome = gateway
        .analyze::<ExamRecord>(
            "Extract the exam",
            vec![llmgate::Attachment::new("image/png", "iVBORw0K")],
            None,
        )
        .await
        .unwrap();

    assert_eq!(outcome.value.subject, "Biology");
    assert_eq!(outcome.layer, 2);
    assert_eq!(outcome.served_by.provider, Provider::Groq);
    assert_eq!(outcome.failures.len(), 2);
    assert_eq!(outcome.failures[0].class, ErrorClass::Quota);
    assert_eq!(outcome.failures[1].class, ErrorClass::Other);

    newest.assert_async().await;
    older.assert_async().await;
    vision.assert_async().await;
}

#[tokio::test]
async fn test_exhausted_chain_wraps_last_error() {
    let mut gemini = Server::new_async().await;
    let mut groq = Server::new_async().await;
    let mut openrouter = Server::new_async().await;

    gemini
        .mock("POST", Matcher::Any)
        .with_status(503)
        .with_body("overloaded")
        .create_async()
        .await;
    groq.mock("POST", "/chat/completions")
        .with_status(500)
        .with_body(r#"{"error":{"message":"upstream failure","type":"server_error"}}"#)
        .create_async()
        .await;
    let missing = openrouter
        .mock("POST", "/chat/completions")
        .with_status(404)
        .with_body(r#"{"error":{"message":"No endpoints found","code":404}}"#)
        .expect(1)
        .create_async()
        .await;

    let gateway = gateway(&[
        (Provider::Gemini, &gemini),
        (Provider::Groq, &groq),
        (Provider::OpenRouter, &openrouter),
    ]);
    gateway.set_key_override(Provider::Gemini, "g_1");
    gateway.set_key_override(Provider::Groq, "gsk_1");
    gateway.set_key_override(Provider::OpenRouter, "sk-or-1,sk-or-2");

    let err = gateway
        .analyze::<ExamRecord>("Extract the exam", vec![], None)
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::ChainExhausted { layers: 4, .. }));
    assert!(matches!(
        err.root(),
        GatewayError::ModelNotFound { provider: Provider::OpenRouter, model } if model == "meta-llama/llama-4-maverick:free"
    ));
    missing.assert_async().await;
}

#[tokio::test]
async fn test_analyze_skips_provider_without_keys() {
    let mut gemini = Server::new_async().await;
    let mut groq = Server::new_async().await;
    let mut openrouter = Server::new_async().await;

    gemini
        .mock("POST", Matcher::Any)
        .with_status(503)
        .with_body("overloaded")
        .create_async()
        .await;
    let groq_calls = groq.mock("POST", Matcher::Any).expect(0).create_async().await;
    let served = openrouter
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer sk-or-1")
        .with_status(200)
        .with_body(completion_body(r#"{"subject":"Chemistry","questions":["Balance H2 + O2"]}"#))
        .expect(1)
        .create_async()
        .await;

    let gateway = gateway(&[
        (Provider::Gemini, &gemini),
        (Provider::Groq, &groq),
        (Provider::OpenRouter, &openrouter),
    ]);
    gateway.set_key_override(Provider::Gemini, "g_1");
    gateway.set_key_override(Provider::OpenRouter, "sk-or-1");

    let outcome = gateway
        .analyze::<ExamRecord>("Extract the exam", vec![], None)
        .await
        .unwrap();

    assert_eq!(outcome.value.subject, "Chemistry");
    assert_eq!(outcome.served_by.provider, Provider::OpenRouter);
    assert_eq!(outcome.layer, 3);
    assert_eq!(
        outcome.failures.iter().map(|f| f.class).collect::<Vec<_>>(),
        vec![ErrorClass::Other, ErrorClass::Other, ErrorClass::Configuration]
    );
    groq_calls.assert_async().await;
    served.assert_async().await;
}

#[tokio::test]
async fn test_quota_fails_over_between_keys() {
    let mut gemini = Server::new_async().await;
    let mut limited = Vec::new();
    for key in ["k1", "k2"] {
        limited.push(
            gemini
                .mock("POST", "/models/gemini-2.5-flash:generateContent")
                .match_header("x-goog-api-key", key)
                .with_status(429)
                .with_body(r#"{"error":{"code":429,"message":"quota","status":"RESOURCE_EXHAUSTED"}}"#)
                .expect_at_most(1)
                .create_async()
                .await,
        );
    }
    let healthy = gemini
        .mock("POST", "/models/gemini-2.5-flash:generateContent")
        .match_header("x-goog-api-key", "k3")
        .with_status(200)
        .with_body(gemini_body("  A refined answer.  "))
        .expect(1)
        .create_async()
        .await;

    let gateway = gateway(&[(Provider::Gemini, &gemini)]);
    gateway.set_key_override(Provider::Gemini, "k1, k2,\nk3");

    let outcome = gateway
        .refine("Explain osmosis", "gemini-2.5-flash", Provider::Gemini)
        .await
        .unwrap();

    assert_eq!(outcome.value, "A refined answer.");
    assert_eq!(outcome.layer, 0);
    assert!(outcome.failures.is_empty());

    for mock in &limited {
        mock.assert_async().await;
    }
    healthy.assert_async().await;
}

#[tokio::test]
async fn test_identical_requests_give_identical_results() {
    let mut groq = Server::new_async().await;
    groq.mock("POST", "/chat/completions")
        .with_status(200)
        .with_body(completion_body("stable"))
        .expect(2)
        .create_async()
        .await;

    let gateway = gateway(&[(Provider::Groq, &groq)]);
    gateway.set_key_override(Provider::Groq, "a,b,c");

    let first = gateway.refine("q", "llama-3.3-70b-versatile", Provider::Groq).await.unwrap();
    let second = gateway.refine("q", "llama-3.3-70b-versatile", Provider::Groq).await.unwrap();
    assert_eq!(first.value, second.value);
    assert_eq!(first.served_by, second.served_by);
}

#[tokio::test]
async fn test_stream_chat_rotates_rejected_key() {
    let mut gemini = Server::new_async().await;
    let rejected = gemini
        .mock("POST", "/models/gemini-2.5-flash:streamGenerateContent")
        .match_query(Matcher::UrlEncoded("alt".into(), "sse".into()))
        .match_header("x-goog-api-key", "revoked")
        .with_status(401)
        .with_body(r#"{"error":{"code":401,"message":"API key expired","status":"UNAUTHENTICATED"}}"#)
        .expect(1)
        .create_async()
        .await;
    let accepted = gemini
        .mock("POST", "/models/gemini-2.5-flash:streamGenerateContent")
        .match_query(Matcher::UrlEncoded("alt".into(), "sse".into()))
        .match_header("x-goog-api-key", "valid")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(concat!(
            "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"Hel\"}]}}]}\r\n\r\n",
            "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"lo\"}]},\"finishReason\":\"STOP\"}]}\r\n\r\n",
        ))
        .expect(1)
        .create_async()
        .await;

    let gateway = std::sync::Arc::new(gateway(&[(Provider::Gemini, &gemini)]));
    gateway.set_key_override(Provider::Gemini, "revoked,valid");
    let session = gateway.session().with_cursor(Provider::Gemini, 0);

    let turns = [ChatTurn::user("Hi"), ChatTurn::assistant("Hello!"), ChatTurn::user("Greet me again")];
    let mut stream = session.stream_chat(&turns, ChatMode::Standard).await.unwrap();

    let mut deltas = Vec::new();
    while let Some(delta) = stream.next().await {
        deltas.push(delta.unwrap());
    }

    assert_eq!(deltas, vec!["Hel", "lo"]);
    assert_eq!(stream.text(), "Hello");
    assert_eq!(session.state(), ChatState::Completed);
    rejected.assert_async().await;
    accepted.assert_async().await;
}

#[tokio::test]
async fn test_stream_chat_model_not_found_does_not_rotate() {
    let mut gemini = Server::new_async().await;
    let missing = gemini
        .mock("POST", "/models/gemini-2.5-pro:streamGenerateContent")
        .match_query(Matcher::Any)
        .with_status(404)
        .with_body(r#"{"error":{"code":404,"message":"model not found","status":"NOT_FOUND"}}"#)
        .expect(1)
        .create_async()
        .await;

    let gateway = std::sync::Arc::new(gateway(&[(Provider::Gemini, &gemini)]));
    gateway.set_key_override(Provider::Gemini, "a,b,c");
    let session = gateway.session();

    let err = session
        .stream_chat(&[ChatTurn::user("think hard")], ChatMode::Thinking)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::ModelNotFound { .. }));
    assert_eq!(session.state(), ChatState::Failed);
    missing.assert_async().await;
}

#[tokio::test]
async fn test_batch_failure_becomes_placeholder() {
    let mut groq = Server::new_async().await;
    let mut gemini = Server::new_async().await;

    let ok = groq
        .mock("POST", "/chat/completions")
        .match_body(Matcher::Regex("question-ok".to_string()))
        .with_status(200)
        .with_body(completion_body("refined"))
        .expect(4)
        .create_async()
        .await;
    groq.mock("POST", "/chat/completions")
        .match_body(Matcher::Regex("question-broken".to_string()))
        .with_status(400)
        .with_body(r#"{"error":{"message":"context too long","type":"invalid_request_error"}}"#)
        .create_async()
        .await;
    let fallback = gemini
        .mock("POST", Matcher::Any)
        .with_status(500)
        .with_body("internal error")
        .expect(1)
        .create_async()
        .await;

    let gateway = gateway(&[(Provider::Groq, &groq), (Provider::Gemini, &gemini)]);
    gateway.set_key_override(Provider::Groq, "gsk_1,gsk_2");
    gateway.set_key_override(Provider::Gemini, "g_1");

    let jobs = (1..=5)
        .map(|n| {
            let question = if n == 3 {
                format!("question-broken #{}", n)
            } else {
                format!("question-ok #{}", n)
            };
            RefineJob::new(question, Provider::Groq, "llama-3.3-70b-versatile")
        })
        .collect();

    let results = gateway.refine_batch(jobs).await;

    assert_eq!(results.len(), 5);
    assert_eq!(results.iter().filter(|r| r.is_failed()).count(), 1);
    assert!(results[2].placeholder().unwrap().contains("Item 3"));
    for index in [0, 1, 3, 4] {
        assert_eq!(results[index].value().map(String::as_str), Some("refined"));
    }

    ok.assert_async().await;
    fallback.assert_async().await;
}

#[tokio::test]
async fn test_generate_image_returns_data_uri() {
    let mut gemini = Server::new_async().await;
    let image = gemini
        .mock("POST", "/models/gemini-2.0-flash-preview-image-generation:generateContent")
        .match_body(Matcher::PartialJsonString(
            r#"{"generationConfig":{"responseModalities":["TEXT","IMAGE"]}}"#.to_string(),
        ))
        .with_status(200)
        .with_body(
            json!({"candidates": [{"content": {"parts": [
                {"text": "Here is the diagram"},
                {"inlineData": {"mimeType": "image/png", "data": "iVBORw0KGgo="}}
            ]}}]})
            .to_string(),
        )
        .create_async()
        .await;

    let gateway = gateway(&[(Provider::Gemini, &gemini)]);
    gateway.set_key_override(Provider::Gemini, "only-key");

    let uri = gateway.generate_image("Label the parts of a plant cell").await.unwrap();
    assert_eq!(uri, "data:image/png;base64,iVBORw0KGgo=");
    image.assert_async().await;
}

#[tokio::test]
async fn test_generate_image_backs_off_then_gives_up() {
    let mut gemini = Server::new_async().await;
    let limited = gemini
        .mock("POST", "/models/gemini-2.0-flash-preview-image-generation:generateContent")
        .with_status(429)
        .with_body(r#"{"error":{"code":429,"message":"quota","status":"RESOURCE_EXHAUSTED"}}"#)
        .expect(3)
        .create_async()
        .await;

    let gateway = gateway(&[(Provider::Gemini, &gemini)]);
    gateway.set_key_override(Provider::Gemini, "only-key");

    let err = gateway.generate_image("diagram").await.unwrap_err();
    assert!(err.is_quota());
    limited.assert_async().await;
}

#[tokio::test]
async fn test_generate_title() {
    let mut gemini = Server::new_async().await;
    let title = gemini
        .mock("POST", "/models/gemini-2.0-flash-lite:generateContent")
        .match_body(Matcher::Regex("User: How do plants make food".to_string()))
        .with_status(200)
        .with_body(gemini_body("\"Photosynthesis Basics\"\n"))
        .expect(1)
        .create_async()
        .await;

    let gateway = gateway(&[(Provider::Gemini, &gemini)]);
    gateway.set_key_override(Provider::Gemini, "k1,k2");

    let turns = [
        ChatTurn::user("How do plants make food?"),
        ChatTurn::assistant("Through photosynthesis."),
    ];
    assert_eq!(gateway.generate_title(&turns).await.unwrap(), "Photosynthesis Basics");
    title.assert_async().await;
}
