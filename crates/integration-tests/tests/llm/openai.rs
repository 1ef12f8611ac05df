use indoc::indoc;
use integration_tests::{TestGateway, TestUpstream};
use serde_json::json;

fn gateway_config(upstream: &TestUpstream) -> String {
    format!(
        indoc! {r#"
            [routes]
            "gpt-5" = "openai"

            [providers.openai]
            api_base_url = "{url}"
            api_key = "test-key"
            models = ["gpt-5"]

            [providers.openai.transformer]
            use = ["openai"]
        "#},
        url = upstream.url()
    )
}

fn upstream_text_response(text: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "created": 1700000000,
        "model": "gpt-5",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": text },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4 }
    })
}

/// Anthropic ingress, OpenAI upstream, text response.
#[tokio::test]
async fn anthropic_ingress_openai_upstream_text() {
    let upstream = TestUpstream::json(upstream_text_response("hello")).await;
    let gateway = TestGateway::start(&gateway_config(&upstream)).await;

    let body = gateway
        .client
        .post_json(
            "/v1/messages",
            &json!({
                "model": "openai,gpt-5",
                "max_tokens": 100,
                "messages": [{
                    "role": "user",
                    "content": [{ "type": "text", "text": "hi" }]
                }]
            }),
        )
        .await;

    assert_eq!(body["type"], "message");
    assert_eq!(body["role"], "assistant");
    assert_eq!(body["content"], json!([{ "type": "text", "text": "hello" }]));
    assert_eq!(body["model"], "openai,gpt-5");
    assert_eq!(body["stop_reason"], "end_turn");
    assert_eq!(body["usage"]["input_tokens"], 3);
    assert_eq!(body["usage"]["output_tokens"], 1);

    // The GPT-5 adapter renamed max_tokens on the way out.
    let sent = upstream.last_request();
    assert_eq!(sent.body["max_completion_tokens"], 100);
    assert!(sent.body.get("max_tokens").is_none());
    assert_eq!(sent.body["model"], "gpt-5");
}

#[tokio::test]
async fn openai_dialect_round_trip() {
    let upstream = TestUpstream::json(upstream_text_response("pong")).await;
    let gateway = TestGateway::start(&gateway_config(&upstream)).await;

    let body = gateway
        .client
        .post_json(
            "/v1/chat/completions",
            &json!({
                "model": "gpt-5",
                "messages": [{ "role": "user", "content": "ping" }]
            }),
        )
        .await;

    assert_eq!(body["choices"][0]["message"]["content"], "pong");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    // The response advertises the model name the client asked for.
    assert_eq!(body["model"], "gpt-5");
}

#[tokio::test]
async fn unknown_model_is_rejected_before_dispatch() {
    let upstream = TestUpstream::json(upstream_text_response("unused")).await;
    let gateway = TestGateway::start(&gateway_config(&upstream)).await;

    let response = gateway
        .client
        .post(
            "/v1/chat/completions",
            &json!({
                "model": "unrouted-model",
                "messages": [{ "role": "user", "content": "hi" }]
            }),
        )
        .await;

    assert_eq!(response.status(), 400);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "unknown_model");
    assert!(upstream.received().is_empty());
}

#[tokio::test]
async fn upstream_failure_maps_to_provider_error() {
    let upstream = TestUpstream::status(503, "overloaded").await;
    let gateway = TestGateway::start(&gateway_config(&upstream)).await;

    let response = gateway
        .client
        .post(
            "/v1/chat/completions",
            &json!({
                "model": "gpt-5",
                "messages": [{ "role": "user", "content": "hi" }]
            }),
        )
        .await;

    assert_eq!(response.status(), 503);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "provider_error");
    assert_eq!(body["error"]["message"], "overloaded");
}

/// No blocklisted inbound header reaches the upstream; allowlisted ones do.
#[tokio::test]
async fn header_hygiene_on_dispatch() {
    let upstream = TestUpstream::json(upstream_text_response("ok")).await;
    let mut gateway = TestGateway::start(&gateway_config(&upstream)).await;

    gateway.client.push_header("authorization", "Bearer client-secret");
    gateway.client.push_header("x-api-key", "client-key");
    gateway.client.push_header("x-request-id", "req-42");
    gateway.client.push_header("x-custom", "nope");

    gateway
        .client
        .post_json(
            "/v1/chat/completions",
            &json!({
                "model": "gpt-5",
                "messages": [{ "role": "user", "content": "hi" }]
            }),
        )
        .await;

    let sent = upstream.last_request();

    // The provider credential replaced the client's authorization header.
    assert_eq!(
        sent.headers.get("authorization").unwrap().to_str().unwrap(),
        "Bearer test-key"
    );
    assert!(sent.headers.get("x-api-key").is_none());
    assert_eq!(sent.headers.get("x-request-id").unwrap(), "req-42");
    assert!(sent.headers.get("x-custom").is_none());
}

#[tokio::test]
async fn models_listing_includes_synonyms() {
    let upstream = TestUpstream::json(upstream_text_response("unused")).await;
    let gateway = TestGateway::start(&gateway_config(&upstream)).await;

    let response = gateway.client.get("/models").await;
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();

    assert_eq!(body["object"], "list");

    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|model| model["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["gpt-5", "openai,gpt-5"]);

    for model in body["data"].as_array().unwrap() {
        assert_eq!(model["object"], "model");
        assert_eq!(model["owned_by"], "openai");
        assert_eq!(model["provider"], "openai");
    }
}

/// Reasoning-token strip reaches the upstream body.
#[tokio::test]
async fn reasoning_token_strip_applies() {
    let upstream = TestUpstream::json(upstream_text_response("tcp explained")).await;
    let config = format!(
        indoc! {r#"
            [providers.openai]
            api_base_url = "{url}"
            api_key = "test-key"
            models = ["gpt-5"]

            [providers.openai.transformer]
            use = ["reasoning"]
        "#},
        url = upstream.url()
    );
    let gateway = TestGateway::start(&config).await;

    gateway
        .client
        .post_json(
            "/v1/chat/completions",
            &json!({
                "model": "gpt-5",
                "messages": [{ "role": "user", "content": "Deep: explain TCP" }]
            }),
        )
        .await;

    let sent = upstream.last_request();
    assert_eq!(sent.body["messages"][0]["content"], "explain TCP");
    assert_eq!(sent.body["reasoning_effort"], "high");
    assert_eq!(sent.body["verbosity"], "medium");
}
