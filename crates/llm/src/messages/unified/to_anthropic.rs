//! Conversions from unified types to Anthropic protocol types.

use serde_json::Value;

use crate::{
    messages::{anthropic, unified},
    streaming::parse_loose_json,
};

impl From<unified::UnifiedResponse> for anthropic::AnthropicChatResponse {
    fn from(resp: unified::UnifiedResponse) -> Self {
        let mut content = Vec::new();
        let mut stop_reason = None;

        if let Some(choice) = resp.choices.into_iter().next() {
            let message = choice.message;

            // Web-search annotations become a server_tool_use /
            // web_search_tool_result pair ahead of the text.
            if let Some(annotations) = &message.annotations {
                let citations: Vec<Value> = annotations
                    .iter()
                    .filter_map(|annotation| annotation.url_citation.as_ref())
                    .map(|citation| {
                        serde_json::json!({
                            "type": "web_search_result",
                            "url": citation.url,
                            "title": citation.title,
                        })
                    })
                    .collect();

                if !citations.is_empty() {
                    let tool_use_id = format!("srvtoolu_{}", uuid::Uuid::new_v4());
                    content.push(anthropic::AnthropicContent::ServerToolUse {
                        id: tool_use_id.clone(),
                        name: "web_search".to_string(),
                        input: Value::Object(serde_json::Map::new()),
                    });
                    content.push(anthropic::AnthropicContent::WebSearchToolResult {
                        tool_use_id,
                        content: Value::Array(citations),
                    });
                }
            }

            let text = message.text();
            if !text.is_empty() {
                content.push(anthropic::AnthropicContent::Text { text });
            }

            if let Some(tool_calls) = message.tool_calls {
                for call in tool_calls {
                    content.push(anthropic::AnthropicContent::ToolUse {
                        id: call.id,
                        name: call.function.name,
                        input: parse_arguments(&call.function.arguments),
                    });
                }
            }

            if let Some(thinking) = message.thinking {
                content.push(anthropic::AnthropicContent::Thinking {
                    thinking: thinking.content,
                    signature: thinking.signature,
                });
            }

            stop_reason = choice
                .finish_reason
                .as_ref()
                .map(|reason| stop_reason_from(unified::UnifiedStopReason::from(reason)));
        }

        Self {
            id: resp.id,
            r#type: "message".to_string(),
            role: anthropic::AnthropicRole::Assistant,
            content,
            model: resp.model,
            stop_reason,
            stop_sequence: None,
            usage: anthropic::AnthropicUsage {
                input_tokens: resp.usage.prompt_tokens,
                output_tokens: resp.usage.completion_tokens,
                cache_read_input_tokens: resp
                    .usage
                    .prompt_tokens_details
                    .and_then(|details| details.cached_tokens),
            },
        }
    }
}

/// Tool-call arguments parse leniently; an unparsable document is wrapped
/// as `{"text": <raw>}` rather than dropped.
fn parse_arguments(arguments: &str) -> Value {
    if arguments.is_empty() {
        return Value::Object(serde_json::Map::new());
    }

    parse_loose_json(arguments).unwrap_or_else(|| serde_json::json!({ "text": arguments }))
}

fn stop_reason_from(reason: unified::UnifiedStopReason) -> anthropic::AnthropicStopReason {
    match reason {
        unified::UnifiedStopReason::EndTurn => anthropic::AnthropicStopReason::EndTurn,
        unified::UnifiedStopReason::MaxTokens => anthropic::AnthropicStopReason::MaxTokens,
        unified::UnifiedStopReason::StopSequence => anthropic::AnthropicStopReason::StopSequence,
        unified::UnifiedStopReason::ToolUse => anthropic::AnthropicStopReason::ToolUse,
    }
}

/// Request conversion used when the upstream itself speaks the Anthropic
/// dialect (Vertex Claude).
impl From<unified::UnifiedRequest> for anthropic::AnthropicChatRequest {
    fn from(req: unified::UnifiedRequest) -> Self {
        let mut system = None;
        let mut messages: Vec<anthropic::AnthropicMessage> = Vec::with_capacity(req.messages.len());

        for message in req.messages {
            match message.role {
                unified::UnifiedRole::System => {
                    system = Some(anthropic::AnthropicSystem::Text(message.text()));
                }
                unified::UnifiedRole::User => {
                    messages.push(anthropic::AnthropicMessage {
                        role: anthropic::AnthropicRole::User,
                        content: user_content(message),
                    });
                }
                unified::UnifiedRole::Tool => {
                    let block = anthropic::AnthropicContent::ToolResult {
                        tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                        content: Value::String(message.text()),
                        is_error: None,
                    };

                    // Tool results ride in a user message; consecutive ones merge.
                    match messages.last_mut() {
                        Some(anthropic::AnthropicMessage {
                            role: anthropic::AnthropicRole::User,
                            content: anthropic::AnthropicMessageContent::Blocks(blocks),
                        }) => blocks.push(block),
                        _ => messages.push(anthropic::AnthropicMessage {
                            role: anthropic::AnthropicRole::User,
                            content: anthropic::AnthropicMessageContent::Blocks(vec![block]),
                        }),
                    }
                }
                unified::UnifiedRole::Assistant => {
                    messages.push(anthropic::AnthropicMessage {
                        role: anthropic::AnthropicRole::Assistant,
                        content: assistant_content(message),
                    });
                }
            }
        }

        Self {
            model: req.model,
            messages,
            max_tokens: req.max_tokens.unwrap_or(4096),
            system,
            temperature: req.temperature,
            top_p: req.top_p,
            top_k: req
                .extra
                .get("top_k")
                .and_then(Value::as_u64)
                .map(|v| v as u32),
            stop_sequences: req.stop.and_then(stop_sequences),
            stream: req.stream,
            thinking: None,
            metadata: None,
            tools: req.tools.map(|tools| {
                tools
                    .into_iter()
                    .filter_map(|tool| match tool {
                        unified::UnifiedTool::Function { function } => Some(anthropic::AnthropicTool {
                            name: function.name,
                            description: function.description,
                            input_schema: function.parameters,
                        }),
                        unified::UnifiedTool::Custom { .. } => None,
                    })
                    .collect()
            }),
            tool_choice: req.tool_choice.map(Into::into),
        }
    }
}

fn stop_sequences(stop: Value) -> Option<Vec<String>> {
    match stop {
        Value::String(s) => Some(vec![s]),
        Value::Array(items) => Some(
            items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect(),
        ),
        _ => None,
    }
}

fn user_content(message: unified::UnifiedMessage) -> anthropic::AnthropicMessageContent {
    match message.content {
        Some(unified::UnifiedContent::Text(text)) => anthropic::AnthropicMessageContent::Text(text),
        Some(unified::UnifiedContent::Parts(parts)) => {
            let blocks = parts
                .into_iter()
                .filter_map(|part| match part {
                    unified::UnifiedPart::Text { text } => {
                        Some(anthropic::AnthropicContent::Text { text })
                    }
                    unified::UnifiedPart::ImageUrl { image_url, .. } => {
                        let source = match unified::parse_data_url(&image_url.url) {
                            Some((media, data)) => anthropic::AnthropicImageSource::Base64 {
                                media_type: media.to_string(),
                                data: data.to_string(),
                            },
                            None => anthropic::AnthropicImageSource::Url { url: image_url.url },
                        };
                        Some(anthropic::AnthropicContent::Image { source })
                    }
                    _ => None,
                })
                .collect();

            anthropic::AnthropicMessageContent::Blocks(blocks)
        }
        None => anthropic::AnthropicMessageContent::Text(String::new()),
    }
}

fn assistant_content(message: unified::UnifiedMessage) -> anthropic::AnthropicMessageContent {
    let mut blocks = Vec::new();

    if let Some(ref thinking) = message.thinking {
        blocks.push(anthropic::AnthropicContent::Thinking {
            thinking: thinking.content.clone(),
            signature: thinking.signature.clone(),
        });
    }

    let text = message.text();
    if !text.is_empty() {
        blocks.push(anthropic::AnthropicContent::Text { text });
    }

    if let Some(tool_calls) = message.tool_calls {
        for call in tool_calls {
            blocks.push(anthropic::AnthropicContent::ToolUse {
                id: call.id,
                name: call.function.name,
                input: parse_arguments(&call.function.arguments),
            });
        }
    }

    anthropic::AnthropicMessageContent::Blocks(blocks)
}

impl From<unified::UnifiedToolChoice> for anthropic::AnthropicToolChoice {
    fn from(choice: unified::UnifiedToolChoice) -> Self {
        match choice {
            unified::UnifiedToolChoice::Mode(mode) => match mode {
                unified::UnifiedToolChoiceMode::None => anthropic::AnthropicToolChoice::None,
                unified::UnifiedToolChoiceMode::Auto => anthropic::AnthropicToolChoice::Auto,
                unified::UnifiedToolChoiceMode::Required => anthropic::AnthropicToolChoice::Any,
            },
            unified::UnifiedToolChoice::Specific { function, .. } => {
                anthropic::AnthropicToolChoice::Tool { name: function.name }
            }
        }
    }
}
