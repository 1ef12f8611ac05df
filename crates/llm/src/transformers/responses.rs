//! Bridge between the chat-completions shape and the OpenAI Responses API.

use std::collections::HashMap;

use futures::StreamExt;
use serde_json::{Map, Value, json};

use crate::{
    error::{LlmError, LlmResult},
    messages::unified::{
        UnifiedChoiceDelta, UnifiedChunk, UnifiedDelta, UnifiedFinishReason,
        UnifiedFunctionCallDelta, UnifiedRequest, UnifiedToolCallDelta, UnifiedUsage,
    },
    streaming::{ChunkStream, StreamItem},
    transformer::Transformer,
};

pub struct ResponsesTransformer;

impl Transformer for ResponsesTransformer {
    fn name(&self) -> &str {
        "openai-responses"
    }

    fn endpoint(&self) -> Option<&str> {
        Some("/responses")
    }

    fn body_out(&self, mut body: Value) -> LlmResult<Value> {
        let Some(map) = body.as_object_mut() else {
            return Ok(body);
        };

        map.remove("temperature");
        map.remove("max_tokens");

        let messages = match map.remove("messages") {
            Some(Value::Array(messages)) => messages,
            _ => Vec::new(),
        };

        let mut input = Vec::with_capacity(messages.len());

        for message in messages {
            convert_message_out(message, map, &mut input);
        }

        map.insert("input".to_string(), Value::Array(input));

        if let Some(Value::Array(tools)) = map.remove("tools") {
            let mut flattened = Vec::with_capacity(tools.len());
            let mut wants_web_search = false;

            for tool in tools {
                let function = tool.get("function").cloned().unwrap_or(tool.clone());
                let name = function.get("name").and_then(Value::as_str).unwrap_or_default();

                if name == "web_search" {
                    wants_web_search = true;
                    continue;
                }

                flattened.push(json!({
                    "type": "function",
                    "name": name,
                    "description": function.get("description").cloned().unwrap_or(Value::Null),
                    "parameters": function.get("parameters").cloned().unwrap_or(Value::Null),
                }));
            }

            if wants_web_search {
                flattened.push(json!({ "type": "web_search_preview" }));
            }

            map.insert("tools".to_string(), Value::Array(flattened));
        }

        Ok(body)
    }

    fn body_in(&self, body: Value) -> LlmResult<Value> {
        let output = body
            .get("output")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut text = String::new();
        let mut image_parts = Vec::new();
        let mut tool_calls = Vec::new();

        for item in output {
            match item.get("type").and_then(Value::as_str) {
                Some("message") => {
                    let parts = item.get("content").and_then(Value::as_array).cloned().unwrap_or_default();

                    for part in parts {
                        match part.get("type").and_then(Value::as_str) {
                            Some("output_text") => {
                                if let Some(t) = part.get("text").and_then(Value::as_str) {
                                    text.push_str(t);
                                }
                            }
                            Some("output_image") => {
                                if let Some(url) = part.get("image_url").and_then(Value::as_str) {
                                    image_parts.push(json!({
                                        "type": "image_url",
                                        "image_url": { "url": url },
                                    }));
                                }
                            }
                            _ => {}
                        }
                    }
                }
                Some("function_call") => {
                    tool_calls.push(json!({
                        "id": item.get("call_id").cloned().unwrap_or(Value::Null),
                        "type": "function",
                        "function": {
                            "name": item.get("name").cloned().unwrap_or(Value::Null),
                            "arguments": item.get("arguments").cloned().unwrap_or(Value::Null),
                        },
                    }));
                }
                _ => {}
            }
        }

        let content = if image_parts.is_empty() {
            Value::String(text)
        } else {
            // Mixed output becomes array content.
            let mut parts = Vec::with_capacity(image_parts.len() + 1);
            if !text.is_empty() {
                parts.push(json!({ "type": "text", "text": text }));
            }
            parts.extend(image_parts);
            Value::Array(parts)
        };

        let finish_reason = if tool_calls.is_empty() { "stop" } else { "tool_calls" };

        let mut message = Map::new();
        message.insert("role".to_string(), json!("assistant"));
        message.insert("content".to_string(), content);
        if !tool_calls.is_empty() {
            message.insert("tool_calls".to_string(), Value::Array(tool_calls));
        }

        let usage = body.get("usage").cloned().unwrap_or(Value::Null);

        Ok(json!({
            "id": body.get("id").cloned().unwrap_or(Value::Null),
            "object": "chat.completion",
            "created": body.get("created_at").cloned().unwrap_or(json!(0)),
            "model": body.get("model").cloned().unwrap_or(Value::Null),
            "choices": [{
                "index": 0,
                "message": Value::Object(message),
                "finish_reason": finish_reason,
            }],
            "usage": {
                "prompt_tokens": usage.get("input_tokens").cloned().unwrap_or(json!(0)),
                "completion_tokens": usage.get("output_tokens").cloned().unwrap_or(json!(0)),
                "total_tokens": usage.get("total_tokens").cloned().unwrap_or(json!(0)),
            },
        }))
    }

    fn response_stream(&self, stream: ChunkStream, _request: &UnifiedRequest) -> ChunkStream {
        #[derive(Default)]
        struct ResponsesState {
            /// Responses output_index to chat tool-call index.
            tool_indices: HashMap<u64, u32>,
            next_tool_index: u32,
            saw_function_call: bool,
            finished: bool,
        }

        let stream = stream
            .scan(ResponsesState::default(), |state, item| {
                let out: Vec<Result<StreamItem, LlmError>> = match item {
                    Ok(StreamItem::Raw(line)) => match serde_json::from_str::<Value>(&line) {
                        Ok(event) => convert_event(state, event, line),
                        Err(_) => vec![Ok(StreamItem::Raw(line))],
                    },
                    Ok(StreamItem::Done) if state.finished => Vec::new(),
                    other => vec![other],
                };

                futures::future::ready(Some(out))
            })
            .flat_map(futures::stream::iter);

        return Box::pin(stream);

        fn chunk(delta: UnifiedDelta, finish_reason: Option<UnifiedFinishReason>) -> UnifiedChunk {
            UnifiedChunk {
                object: Some("chat.completion.chunk".to_string()),
                choices: vec![UnifiedChoiceDelta {
                    index: 0,
                    delta,
                    finish_reason,
                }],
                ..Default::default()
            }
        }

        fn convert_event(
            state: &mut ResponsesState,
            event: Value,
            raw: String,
        ) -> Vec<Result<StreamItem, LlmError>> {
            let kind = event.get("type").and_then(Value::as_str).unwrap_or_default();

            match kind {
                "response.output_text.delta" => {
                    let text = event.get("delta").and_then(Value::as_str).unwrap_or_default();

                    vec![Ok(StreamItem::Chunk(chunk(
                        UnifiedDelta {
                            content: Some(text.to_string()),
                            ..Default::default()
                        },
                        None,
                    )))]
                }
                "response.output_image.delta" => {
                    let partial = event.get("delta").and_then(Value::as_str).unwrap_or_default();

                    let mut delta = UnifiedDelta::default();
                    delta.extra.insert(
                        "content".to_string(),
                        json!([{ "type": "image_url", "image_url": { "url": partial } }]),
                    );

                    vec![Ok(StreamItem::Chunk(chunk(delta, None)))]
                }
                "response.output_item.added" => {
                    let item = event.get("item").cloned().unwrap_or(Value::Null);

                    if item.get("type").and_then(Value::as_str) != Some("function_call") {
                        return Vec::new();
                    }

                    state.saw_function_call = true;

                    let output_index = event.get("output_index").and_then(Value::as_u64).unwrap_or_default();
                    let tool_index = state.next_tool_index;
                    state.next_tool_index += 1;
                    state.tool_indices.insert(output_index, tool_index);

                    vec![Ok(StreamItem::Chunk(chunk(
                        UnifiedDelta {
                            tool_calls: Some(vec![UnifiedToolCallDelta {
                                index: tool_index,
                                id: item.get("call_id").and_then(Value::as_str).map(str::to_string),
                                kind: Some("function".to_string()),
                                function: Some(UnifiedFunctionCallDelta {
                                    name: item.get("name").and_then(Value::as_str).map(str::to_string),
                                    arguments: Some(String::new()),
                                }),
                            }]),
                            ..Default::default()
                        },
                        None,
                    )))]
                }
                "response.function_call_arguments.delta" => {
                    let output_index = event.get("output_index").and_then(Value::as_u64).unwrap_or_default();
                    let arguments = event.get("delta").and_then(Value::as_str).unwrap_or_default();

                    vec![Ok(StreamItem::Chunk(chunk(
                        UnifiedDelta {
                            tool_calls: Some(vec![UnifiedToolCallDelta {
                                index: state.tool_indices.get(&output_index).copied().unwrap_or_default(),
                                function: Some(UnifiedFunctionCallDelta {
                                    name: None,
                                    arguments: Some(arguments.to_string()),
                                }),
                                ..Default::default()
                            }]),
                            ..Default::default()
                        },
                        None,
                    )))]
                }
                "response.completed" => {
                    state.finished = true;

                    let finish_reason = if state.saw_function_call {
                        UnifiedFinishReason::ToolCalls
                    } else {
                        UnifiedFinishReason::Stop
                    };

                    let usage = event
                        .get("response")
                        .and_then(|response| response.get("usage"))
                        .map(|usage| UnifiedUsage {
                            prompt_tokens: usage.get("input_tokens").and_then(Value::as_u64).unwrap_or_default()
                                as u32,
                            completion_tokens: usage
                                .get("output_tokens")
                                .and_then(Value::as_u64)
                                .unwrap_or_default() as u32,
                            total_tokens: usage.get("total_tokens").and_then(Value::as_u64).unwrap_or_default()
                                as u32,
                            ..Default::default()
                        });

                    let mut final_chunk = chunk(UnifiedDelta::default(), Some(finish_reason));
                    final_chunk.usage = usage;

                    vec![Ok(StreamItem::Chunk(final_chunk)), Ok(StreamItem::Done)]
                }
                // Lifecycle events with no chat-completions counterpart are
                // forwarded unchanged for downstream visibility.
                _ => vec![Ok(StreamItem::Raw(raw))],
            }
        }
    }
}

fn convert_message_out(message: Value, request: &mut Map<String, Value>, input: &mut Vec<Value>) {
    let role = message.get("role").and_then(Value::as_str).unwrap_or_default();

    match role {
        "system" => {
            // The first system message collapses into top-level instructions.
            if !request.contains_key("instructions") {
                let instructions = match message.get("content") {
                    Some(Value::String(text)) => text.clone(),
                    Some(Value::Array(parts)) => parts
                        .iter()
                        .filter_map(|part| part.get("text").and_then(Value::as_str))
                        .collect::<Vec<_>>()
                        .join("\n"),
                    _ => String::new(),
                };
                request.insert("instructions".to_string(), Value::String(instructions));
            }
        }
        "tool" => {
            input.push(json!({
                "type": "function_call_output",
                "call_id": message.get("tool_call_id").cloned().unwrap_or(Value::Null),
                "output": message.get("content").cloned().unwrap_or(Value::Null),
            }));
        }
        _ => {
            let text_type = if role == "assistant" { "output_text" } else { "input_text" };

            let content = match message.get("content") {
                Some(Value::String(text)) => {
                    json!([{ "type": text_type, "text": text }])
                }
                Some(Value::Array(parts)) => Value::Array(
                    parts
                        .iter()
                        .map(|part| match part.get("type").and_then(Value::as_str) {
                            Some("text") => {
                                json!({
                                    "type": text_type,
                                    "text": part.get("text").cloned().unwrap_or(Value::Null),
                                })
                            }
                            Some("image_url") => {
                                json!({
                                    "type": "input_image",
                                    "image_url": part
                                        .get("image_url")
                                        .and_then(|image| image.get("url"))
                                        .cloned()
                                        .unwrap_or(Value::Null),
                                })
                            }
                            _ => part.clone(),
                        })
                        .collect(),
                ),
                _ => json!([]),
            };

            if content.as_array().is_some_and(|parts| !parts.is_empty()) {
                input.push(json!({ "role": role, "content": content }));
            }

            // Assistant tool calls become standalone function_call items.
            if let Some(Value::Array(calls)) = message.get("tool_calls").cloned() {
                for call in calls {
                    let function = call.get("function").cloned().unwrap_or(Value::Null);
                    input.push(json!({
                        "type": "function_call",
                        "name": function.get("name").cloned().unwrap_or(Value::Null),
                        "arguments": function.get("arguments").cloned().unwrap_or(Value::Null),
                        "call_id": call.get("id").cloned().unwrap_or(Value::Null),
                    }));
                }
            }
        }
    }
}
