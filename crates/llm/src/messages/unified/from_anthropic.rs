//! Conversions from Anthropic protocol types to the unified representation.

use serde_json::Value;

use crate::messages::{anthropic, unified};

impl From<anthropic::AnthropicChatRequest> for unified::UnifiedRequest {
    fn from(req: anthropic::AnthropicChatRequest) -> Self {
        let mut messages = Vec::with_capacity(req.messages.len() + 1);

        if let Some(system) = req.system {
            messages.push(system_message(system));
        }

        for message in req.messages {
            convert_message(message, &mut messages);
        }

        let reasoning = req.thinking.as_ref().map(|thinking| unified::ReasoningConfig {
            effort: thinking.budget_tokens.map(effort_from_budget),
            max_tokens: thinking.budget_tokens,
            enabled: Some(thinking.kind == "enabled"),
            extra: Default::default(),
        });

        let mut extra = serde_json::Map::new();
        if let Some(top_k) = req.top_k {
            extra.insert("top_k".to_string(), top_k.into());
        }
        if let Some(metadata) = req.metadata {
            extra.insert("metadata".to_string(), metadata);
        }

        Self {
            model: req.model,
            messages,
            tools: req.tools.map(|tools| {
                tools
                    .into_iter()
                    .map(|tool| unified::UnifiedTool::Function {
                        function: unified::UnifiedFunction {
                            name: tool.name,
                            description: tool.description,
                            parameters: tool.input_schema,
                        },
                    })
                    .collect()
            }),
            tool_choice: req.tool_choice.map(Into::into),
            stream: req.stream,
            temperature: req.temperature,
            top_p: req.top_p,
            max_tokens: Some(req.max_tokens),
            stop: req.stop_sequences.map(|sequences| {
                Value::Array(sequences.into_iter().map(Value::String).collect())
            }),
            reasoning,
            extra,
            ..Default::default()
        }
    }
}

/// Mirror the system prompt shape: a string stays a string, an array of
/// text blocks stays an array.
fn system_message(system: anthropic::AnthropicSystem) -> unified::UnifiedMessage {
    let content = match system {
        anthropic::AnthropicSystem::Text(text) => unified::UnifiedContent::Text(text),
        anthropic::AnthropicSystem::Blocks(blocks) => unified::UnifiedContent::Parts(
            blocks
                .into_iter()
                .map(|block| unified::UnifiedPart::Text { text: block.text })
                .collect(),
        ),
    };

    unified::UnifiedMessage {
        role: unified::UnifiedRole::System,
        content: Some(content),
        ..Default::default()
    }
}

fn convert_message(message: anthropic::AnthropicMessage, out: &mut Vec<unified::UnifiedMessage>) {
    match message.role {
        anthropic::AnthropicRole::User => convert_user_message(message.content, out),
        anthropic::AnthropicRole::Assistant => out.push(convert_assistant_message(message.content)),
    }
}

/// User messages split into tool messages (one per tool_result part) plus a
/// residual user message carrying the text and image parts.
fn convert_user_message(content: anthropic::AnthropicMessageContent, out: &mut Vec<unified::UnifiedMessage>) {
    let blocks = match content {
        anthropic::AnthropicMessageContent::Text(text) => {
            out.push(unified::UnifiedMessage {
                role: unified::UnifiedRole::User,
                content: Some(unified::UnifiedContent::Text(text)),
                ..Default::default()
            });
            return;
        }
        anthropic::AnthropicMessageContent::Blocks(blocks) => blocks,
    };

    let mut parts = Vec::new();

    for block in blocks {
        match block {
            anthropic::AnthropicContent::ToolResult {
                tool_use_id, content, ..
            } => {
                out.push(unified::UnifiedMessage {
                    role: unified::UnifiedRole::Tool,
                    content: Some(unified::UnifiedContent::Text(tool_result_text(content))),
                    tool_call_id: Some(tool_use_id),
                    ..Default::default()
                });
            }
            anthropic::AnthropicContent::Text { text } => {
                parts.push(unified::UnifiedPart::Text { text });
            }
            anthropic::AnthropicContent::Image { source } => {
                let (url, media_type) = match source {
                    anthropic::AnthropicImageSource::Base64 { media_type, data } => {
                        (unified::data_url(&media_type, &data), Some(media_type))
                    }
                    anthropic::AnthropicImageSource::Url { url } => (url, None),
                };

                parts.push(unified::UnifiedPart::ImageUrl {
                    image_url: unified::UnifiedImageUrl { url },
                    media_type,
                });
            }
            other => {
                log::debug!("Dropping unsupported user content block: {other:?}");
            }
        }
    }

    if !parts.is_empty() {
        out.push(unified::UnifiedMessage {
            role: unified::UnifiedRole::User,
            content: Some(unified::UnifiedContent::Parts(parts)),
            ..Default::default()
        });
    }
}

/// Assistant text parts concatenate to one text content; tool_use parts
/// become tool_calls; a thinking part is carried on the message.
fn convert_assistant_message(content: anthropic::AnthropicMessageContent) -> unified::UnifiedMessage {
    let blocks = match content {
        anthropic::AnthropicMessageContent::Text(text) => {
            return unified::UnifiedMessage {
                role: unified::UnifiedRole::Assistant,
                content: Some(unified::UnifiedContent::Text(text)),
                ..Default::default()
            };
        }
        anthropic::AnthropicMessageContent::Blocks(blocks) => blocks,
    };

    let mut texts = Vec::new();
    let mut tool_calls = Vec::new();
    let mut thinking = None;

    for block in blocks {
        match block {
            anthropic::AnthropicContent::Text { text } => texts.push(text),
            anthropic::AnthropicContent::ToolUse { id, name, input } => {
                tool_calls.push(unified::UnifiedToolCall {
                    id,
                    kind: "function".to_string(),
                    function: unified::UnifiedFunctionCall {
                        name,
                        arguments: serde_json::to_string(&input).unwrap_or_else(|_| "{}".to_string()),
                    },
                });
            }
            anthropic::AnthropicContent::Thinking {
                thinking: text,
                signature,
            } => {
                thinking = Some(unified::UnifiedThinking {
                    content: text,
                    signature,
                });
            }
            other => {
                log::debug!("Dropping unsupported assistant content block: {other:?}");
            }
        }
    }

    unified::UnifiedMessage {
        role: unified::UnifiedRole::Assistant,
        content: (!texts.is_empty()).then(|| unified::UnifiedContent::Text(texts.join("\n"))),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        thinking,
        ..Default::default()
    }
}

/// Flatten a tool_result content value into plain text.
fn tool_result_text(content: Value) -> String {
    match content {
        Value::String(text) => text,
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

impl From<anthropic::AnthropicToolChoice> for unified::UnifiedToolChoice {
    fn from(choice: anthropic::AnthropicToolChoice) -> Self {
        match choice {
            anthropic::AnthropicToolChoice::Auto => {
                Self::Mode(unified::UnifiedToolChoiceMode::Auto)
            }
            anthropic::AnthropicToolChoice::Any => {
                Self::Mode(unified::UnifiedToolChoiceMode::Required)
            }
            anthropic::AnthropicToolChoice::None => {
                Self::Mode(unified::UnifiedToolChoiceMode::None)
            }
            anthropic::AnthropicToolChoice::Tool { name } => Self::function(name),
        }
    }
}

/// Response conversion for upstreams that speak the Anthropic dialect
/// (Vertex Claude).
impl From<anthropic::AnthropicChatResponse> for unified::UnifiedResponse {
    fn from(resp: anthropic::AnthropicChatResponse) -> Self {
        let mut texts = Vec::new();
        let mut tool_calls = Vec::new();
        let mut thinking = None;

        for block in resp.content {
            match block {
                anthropic::AnthropicContent::Text { text } => texts.push(text),
                anthropic::AnthropicContent::ToolUse { id, name, input } => {
                    tool_calls.push(unified::UnifiedToolCall {
                        id,
                        kind: "function".to_string(),
                        function: unified::UnifiedFunctionCall {
                            name,
                            arguments: serde_json::to_string(&input)
                                .unwrap_or_else(|_| "{}".to_string()),
                        },
                    });
                }
                anthropic::AnthropicContent::Thinking {
                    thinking: text,
                    signature,
                } => {
                    thinking = Some(unified::UnifiedThinking {
                        content: text,
                        signature,
                    });
                }
                other => {
                    log::debug!("Dropping upstream response block: {other:?}");
                }
            }
        }

        let finish_reason = resp.stop_reason.map(|reason| {
            unified::UnifiedFinishReason::from(match reason {
                anthropic::AnthropicStopReason::EndTurn => unified::UnifiedStopReason::EndTurn,
                anthropic::AnthropicStopReason::MaxTokens => unified::UnifiedStopReason::MaxTokens,
                anthropic::AnthropicStopReason::StopSequence => {
                    unified::UnifiedStopReason::StopSequence
                }
                anthropic::AnthropicStopReason::ToolUse => unified::UnifiedStopReason::ToolUse,
            })
        });

        Self {
            id: resp.id,
            object: Some("chat.completion".to_string()),
            created: 0,
            model: resp.model,
            choices: vec![unified::UnifiedChoice {
                index: 0,
                message: unified::UnifiedMessage {
                    role: unified::UnifiedRole::Assistant,
                    content: (!texts.is_empty())
                        .then(|| unified::UnifiedContent::Text(texts.join("\n"))),
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                    thinking,
                    ..Default::default()
                },
                finish_reason,
            }],
            usage: unified::UnifiedUsage {
                prompt_tokens: resp.usage.input_tokens,
                completion_tokens: resp.usage.output_tokens,
                total_tokens: resp.usage.input_tokens + resp.usage.output_tokens,
                prompt_tokens_details: resp.usage.cache_read_input_tokens.map(|cached| {
                    unified::PromptTokensDetails {
                        cached_tokens: Some(cached),
                    }
                }),
                completion_tokens_details: None,
            },
        }
    }
}

/// Budget-token to effort mapping: >1000 high, >500 medium, else minimal.
pub(crate) fn effort_from_budget(budget: u32) -> unified::ReasoningEffort {
    if budget > 1000 {
        unified::ReasoningEffort::High
    } else if budget > 500 {
        unified::ReasoningEffort::Medium
    } else {
        unified::ReasoningEffort::Minimal
    }
}
