use indoc::indoc;
use integration_tests::{TestGateway, TestUpstream, parse_sse_events};
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
        "#},
        url = upstream.url()
    )
}

fn chunk(body: serde_json::Value) -> String {
    format!("data: {body}\n\n")
}

#[tokio::test]
async fn streaming_text_produces_anthropic_event_sequence() {
    let mut body = String::new();
    body.push_str(&chunk(json!({
        "id": "chatcmpl-1", "model": "gpt-5",
        "choices": [{"index": 0, "delta": {"role": "assistant", "content": "Hel"}}]
    })));
    body.push_str(&chunk(json!({
        "id": "chatcmpl-1", "model": "gpt-5",
        "choices": [{"index": 0, "delta": {"content": "lo"}}]
    })));
    body.push_str(&chunk(json!({
        "id": "chatcmpl-1", "model": "gpt-5",
        "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
    })));
    body.push_str("data: [DONE]\n\n");

    let upstream = TestUpstream::sse(body).await;
    let gateway = TestGateway::start(&gateway_config(&upstream)).await;

    let sse = gateway
        .client
        .post_sse(
            "/v1/messages",
            &json!({
                "model": "gpt-5",
                "max_tokens": 50,
                "stream": true,
                "messages": [{ "role": "user", "content": "hi" }]
            }),
        )
        .await;

    let events = parse_sse_events(&sse);
    let names: Vec<Option<String>> = events.iter().map(|(name, _)| name.clone()).collect();

    assert_eq!(
        names,
        vec![
            Some("message_start".to_string()),
            Some("content_block_start".to_string()),
            Some("content_block_delta".to_string()),
            Some("content_block_delta".to_string()),
            Some("content_block_stop".to_string()),
            Some("message_delta".to_string()),
            Some("message_stop".to_string()),
        ]
    );

    // The deltas reassemble the text.
    let text: String = events
        .iter()
        .filter(|(name, _)| name.as_deref() == Some("content_block_delta"))
        .map(|(_, data)| {
            let value: serde_json::Value = serde_json::from_str(data).unwrap();
            value["delta"]["text"].as_str().unwrap_or_default().to_string()
        })
        .collect();
    assert_eq!(text, "Hello");

    // The final message_delta carries the mapped stop reason and usage.
    let (_, message_delta) = events
        .iter()
        .find(|(name, _)| name.as_deref() == Some("message_delta"))
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(message_delta).unwrap();
    assert_eq!(value["delta"]["stop_reason"], "end_turn");
    assert_eq!(value["usage"]["input_tokens"], 3);
    assert_eq!(value["usage"]["output_tokens"], 2);
}

#[tokio::test]
async fn streaming_tool_calls_open_tool_use_blocks() {
    let mut body = String::new();
    body.push_str(&chunk(json!({
        "id": "chatcmpl-1", "model": "gpt-5",
        "choices": [{"index": 0, "delta": {"tool_calls": [{
            "index": 0, "id": "call_1", "type": "function",
            "function": {"name": "get_weather", "arguments": ""}
        }]}}]
    })));
    body.push_str(&chunk(json!({
        "id": "chatcmpl-1", "model": "gpt-5",
        "choices": [{"index": 0, "delta": {"tool_calls": [{
            "index": 0, "function": {"arguments": "{\"location\":\"Paris\"}"}
        }]}}]
    })));
    body.push_str(&chunk(json!({
        "id": "chatcmpl-1", "model": "gpt-5",
        "choices": [{"index": 0, "delta": {}, "finish_reason": "tool_calls"}]
    })));
    body.push_str("data: [DONE]\n\n");

    let upstream = TestUpstream::sse(body).await;
    let gateway = TestGateway::start(&gateway_config(&upstream)).await;

    let sse = gateway
        .client
        .post_sse(
            "/v1/messages",
            &json!({
                "model": "gpt-5",
                "max_tokens": 50,
                "stream": true,
                "messages": [{ "role": "user", "content": "weather in Paris?" }]
            }),
        )
        .await;

    let events = parse_sse_events(&sse);

    let (_, start) = events
        .iter()
        .find(|(name, _)| name.as_deref() == Some("content_block_start"))
        .unwrap();
    let start: serde_json::Value = serde_json::from_str(start).unwrap();
    assert_eq!(start["content_block"]["type"], "tool_use");
    assert_eq!(start["content_block"]["id"], "call_1");
    assert_eq!(start["content_block"]["name"], "get_weather");

    let (_, delta) = events
        .iter()
        .find(|(name, _)| name.as_deref() == Some("content_block_delta"))
        .unwrap();
    let delta: serde_json::Value = serde_json::from_str(delta).unwrap();
    assert_eq!(delta["delta"]["type"], "input_json_delta");
    assert_eq!(delta["delta"]["partial_json"], "{\"location\":\"Paris\"}");

    let (_, message_delta) = events
        .iter()
        .find(|(name, _)| name.as_deref() == Some("message_delta"))
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(message_delta).unwrap();
    assert_eq!(value["delta"]["stop_reason"], "tool_use");
}

#[tokio::test]
async fn upstream_error_chunk_becomes_error_event() {
    let mut body = String::new();
    body.push_str(&chunk(json!({
        "id": "chatcmpl-1", "model": "gpt-5",
        "choices": [{"index": 0, "delta": {"content": "partial"}}]
    })));
    body.push_str(&chunk(json!({
        "error": {"type": "overloaded_error", "message": "overloaded"}
    })));
    body.push_str("data: [DONE]\n\n");

    let upstream = TestUpstream::sse(body).await;
    let gateway = TestGateway::start(&gateway_config(&upstream)).await;

    let sse = gateway
        .client
        .post_sse(
            "/v1/messages",
            &json!({
                "model": "gpt-5",
                "max_tokens": 50,
                "stream": true,
                "messages": [{ "role": "user", "content": "hi" }]
            }),
        )
        .await;

    let events = parse_sse_events(&sse);

    assert!(events.iter().any(|(name, _)| name.as_deref() == Some("error")));
    // The stream still terminates in order.
    assert_eq!(events.last().unwrap().0.as_deref(), Some("message_stop"));
}

/// Tool results split out of user messages on the way in.
#[tokio::test]
async fn tool_results_become_tool_messages_upstream() {
    let upstream = TestUpstream::json(json!({
        "id": "chatcmpl-2",
        "object": "chat.completion",
        "created": 1700000000,
        "model": "gpt-5",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": "It is sunny." },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 10, "completion_tokens": 4, "total_tokens": 14 }
    }))
    .await;
    let gateway = TestGateway::start(&gateway_config(&upstream)).await;

    gateway
        .client
        .post_json(
            "/v1/messages",
            &json!({
                "model": "gpt-5",
                "max_tokens": 50,
                "messages": [
                    { "role": "user", "content": "weather?" },
                    { "role": "assistant", "content": [
                        { "type": "tool_use", "id": "call_1", "name": "get_weather",
                          "input": {"location": "Paris"} }
                    ]},
                    { "role": "user", "content": [
                        { "type": "tool_result", "tool_use_id": "call_1", "content": "sunny" }
                    ]}
                ]
            }),
        )
        .await;

    let sent = upstream.last_request();
    let messages = sent.body["messages"].as_array().unwrap();

    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[1]["role"], "assistant");
    assert_eq!(messages[1]["tool_calls"][0]["id"], "call_1");
    assert_eq!(messages[2]["role"], "tool");
    assert_eq!(messages[2]["tool_call_id"], "call_1");
    assert_eq!(messages[2]["content"], "sunny");
}
