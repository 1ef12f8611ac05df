use indoc::indoc;
use integration_tests::{TestGateway, TestUpstream, parse_sse_events};
use serde_json::json;

fn gateway_config(upstream: &TestUpstream) -> String {
    format!(
        indoc! {r#"
            [routes]
            "kimi-k2-0905-preview" = "kimi"

            [providers.kimi]
            api_base_url = "{url}"
            api_key = "test-key"
            models = ["kimi-k2-0905-preview"]

            [providers.kimi.transformer]
            use = [["kimi", {{ manualToolParsing = true, assembleToolDeltas = true }}]]
        "#},
        url = upstream.url()
    )
}

fn chunk(body: serde_json::Value) -> String {
    format!("data: {body}\n\n")
}

/// Streamed fragments are forwarded unchanged and assembled into one
/// synthesised final chunk before the terminator.
#[tokio::test]
async fn streaming_tool_call_assembly() {
    let mut body = String::new();
    body.push_str(&chunk(json!({
        "id": "cmpl-1", "model": "kimi-k2-0905-preview",
        "choices": [{"index": 0, "delta": {"tool_calls": [{
            "index": 0, "id": "c",
            "function": {"name": "get_weather", "arguments": ""}
        }]}}]
    })));
    body.push_str(&chunk(json!({
        "id": "cmpl-1", "model": "kimi-k2-0905-preview",
        "choices": [{"index": 0, "delta": {"tool_calls": [{
            "index": 0, "function": {"arguments": "{\"location\":\"Beijing\"}"}
        }]}}]
    })));
    body.push_str(&chunk(json!({
        "id": "cmpl-1", "model": "kimi-k2-0905-preview",
        "choices": [{"index": 0, "delta": {"tool_calls": [{
            "index": 0, "id": "functions.get_weather:0"
        }]}}]
    })));
    body.push_str(&chunk(json!({
        "id": "cmpl-1", "model": "kimi-k2-0905-preview",
        "choices": [{"index": 0, "delta": {}, "finish_reason": "tool_calls"}]
    })));
    body.push_str("data: [DONE]\n\n");

    let upstream = TestUpstream::sse(body).await;
    let gateway = TestGateway::start(&gateway_config(&upstream)).await;

    let sse = gateway
        .client
        .post_sse(
            "/v1/chat/completions",
            &json!({
                "model": "kimi-k2-0905-preview",
                "stream": true,
                "messages": [{ "role": "user", "content": "weather in Beijing" }]
            }),
        )
        .await;

    let events = parse_sse_events(&sse);

    // Four upstream fragments + synthesised chunk + [DONE].
    assert_eq!(events.len(), 6);
    assert_eq!(events.last().unwrap().1, "[DONE]");

    let synthesised: serde_json::Value = serde_json::from_str(&events[4].1).unwrap();
    let choice = &synthesised["choices"][0];

    assert_eq!(choice["finish_reason"], "tool_calls");
    assert_eq!(
        choice["delta"]["tool_calls"][0],
        json!({
            "index": 0,
            "id": "functions.get_weather:0",
            "type": "function",
            "function": {
                "name": "get_weather",
                "arguments": "{\"location\":\"Beijing\"}"
            }
        })
    );
}

/// Marker-embedded tool calls in the assistant text are parsed out and the
/// ids normalised against the (empty) conversation.
#[tokio::test]
async fn manual_marker_parse_with_id_normalisation() {
    let text = "Hello.\n\n<|tool_calls_section_begin|>\n<|tool_call_begin|>functions.get_weather<|tool_call_argument_begin|>{\"location\":\"Beijing\"}<|tool_call_end|>\n<|tool_calls_section_end|>\n\nDone.";

    let upstream = TestUpstream::json(json!({
        "id": "cmpl-2",
        "object": "chat.completion",
        "created": 1700000000,
        "model": "kimi-k2-0905-preview",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": text },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 20, "completion_tokens": 30, "total_tokens": 50 }
    }))
    .await;
    let gateway = TestGateway::start(&gateway_config(&upstream)).await;

    let body = gateway
        .client
        .post_json(
            "/v1/chat/completions",
            &json!({
                "model": "kimi-k2-0905-preview",
                "messages": [{ "role": "user", "content": "weather in Beijing" }]
            }),
        )
        .await;

    let message = &body["choices"][0]["message"];

    assert_eq!(message["content"], "Hello.\n\nDone.");
    assert_eq!(message["tool_calls"][0]["id"], "functions.get_weather:0");
    assert_eq!(message["tool_calls"][0]["function"]["name"], "get_weather");
    assert_eq!(
        message["tool_calls"][0]["function"]["arguments"],
        "{\"location\":\"Beijing\"}"
    );
    assert_eq!(body["choices"][0]["finish_reason"], "tool_calls");
}

/// Tool messages without a tool_call_id are rejected before dispatch.
#[tokio::test]
async fn tool_message_validation() {
    let upstream = TestUpstream::json(json!({})).await;
    let gateway = TestGateway::start(&gateway_config(&upstream)).await;

    let response = gateway
        .client
        .post(
            "/v1/chat/completions",
            &json!({
                "model": "kimi-k2-0905-preview",
                "messages": [
                    { "role": "user", "content": "hi" },
                    { "role": "tool", "content": "result" }
                ]
            }),
        )
        .await;

    assert_eq!(response.status(), 400);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "bad_request");
    assert!(upstream.received().is_empty());
}
