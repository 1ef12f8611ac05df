//! Vertex AI adapters.
//!
//! `vertex` attaches the short-lived bearer obtained from a [`TokenSource`];
//! the service-account exchange itself is an external collaborator plugged
//! in behind that trait. `gemini` cleans tool schemas the Gemini endpoints
//! reject, and `vertex-claude` bridges to the Anthropic-shaped rawPredict
//! wire format.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, header::AUTHORIZATION};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;

use crate::{
    error::{LlmError, LlmResult},
    messages::{
        anthropic::{
            AnthropicChatRequest, AnthropicChatResponse, AnthropicContent, AnthropicContentDelta,
            AnthropicStopReason, AnthropicStreamEvent,
        },
        unified::{
            UnifiedChoiceDelta, UnifiedChunk, UnifiedDelta, UnifiedFinishReason,
            UnifiedFunctionCallDelta, UnifiedRequest, UnifiedResponse, UnifiedRole, UnifiedStopReason,
            UnifiedThinking, UnifiedToolCallDelta, UnifiedTool, UnifiedUsage,
        },
    },
    streaming::{ChunkStream, StreamItem},
    transformer::Transformer,
};

/// Source of short-lived bearer tokens for Vertex endpoints
/// (cloud-platform scope).
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> LlmResult<String>;
}

/// Reads a pre-exchanged token from the environment. The service-account
/// flow that refreshes it lives outside the gateway.
pub struct EnvTokenSource {
    var: String,
}

#[async_trait]
impl TokenSource for EnvTokenSource {
    async fn token(&self) -> LlmResult<String> {
        std::env::var(&self.var)
            .map_err(|_| LlmError::Auth(format!("vertex token variable '{}' is not set", self.var)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
struct VertexOptions {
    token_env: String,
}

impl Default for VertexOptions {
    fn default() -> Self {
        Self {
            token_env: "VERTEX_ACCESS_TOKEN".to_string(),
        }
    }
}

/// Attaches `Authorization: Bearer <token>` from the configured source.
pub struct VertexTransformer {
    source: Arc<dyn TokenSource>,
}

impl VertexTransformer {
    pub fn new(options: Option<&Value>) -> anyhow::Result<Self> {
        let options: VertexOptions = match options {
            Some(options) => serde_json::from_value(options.clone())?,
            None => VertexOptions::default(),
        };

        Ok(Self {
            source: Arc::new(EnvTokenSource { var: options.token_env }),
        })
    }

    pub fn with_source(source: Arc<dyn TokenSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Transformer for VertexTransformer {
    fn name(&self) -> &str {
        "vertex"
    }

    async fn auth(&self, mut headers: HeaderMap, _provider: &config::ProviderConfig) -> LlmResult<HeaderMap> {
        let token = self.source.token().await?;

        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| LlmError::Auth("vertex token is not a valid header value".to_string()))?;
        headers.insert(AUTHORIZATION, value);

        Ok(headers)
    }
}

/// Gemini content-shape adapter: the endpoint rejects JSON-schema
/// bookkeeping keys inside tool parameters.
pub struct GeminiTransformer;

impl Transformer for GeminiTransformer {
    fn name(&self) -> &str {
        "gemini"
    }

    fn request_out(&self, mut request: UnifiedRequest) -> LlmResult<UnifiedRequest> {
        if let Some(tools) = request.tools.as_mut() {
            for tool in tools.iter_mut() {
                if let UnifiedTool::Function { function } = tool {
                    strip_schema_keys(&mut function.parameters);
                }
            }
        }

        // Gemini has no frequency/presence penalties.
        request.frequency_penalty = None;
        request.presence_penalty = None;

        Ok(request)
    }
}

fn strip_schema_keys(schema: &mut Value) {
    match schema {
        Value::Object(map) => {
            map.remove("$schema");
            map.remove("additionalProperties");
            for value in map.values_mut() {
                strip_schema_keys(value);
            }
        }
        Value::Array(items) => {
            for item in items {
                strip_schema_keys(item);
            }
        }
        _ => {}
    }
}

/// Claude-on-Vertex bridge: the upstream speaks the Anthropic dialect.
pub struct VertexClaudeTransformer;

const VERTEX_ANTHROPIC_VERSION: &str = "vertex-2023-10-16";

impl Transformer for VertexClaudeTransformer {
    fn name(&self) -> &str {
        "vertex-claude"
    }

    fn body_out(&self, body: Value) -> LlmResult<Value> {
        let request: UnifiedRequest = serde_json::from_value(body)
            .map_err(|e| LlmError::Internal(Some(format!("request body round-trip failed: {e}"))))?;

        let anthropic_request = AnthropicChatRequest::from(request);

        let mut body = serde_json::to_value(anthropic_request)
            .map_err(|e| LlmError::Internal(Some(e.to_string())))?;

        if let Some(map) = body.as_object_mut() {
            // The model rides in the URL on Vertex.
            map.remove("model");
            map.insert(
                "anthropic_version".to_string(),
                Value::String(VERTEX_ANTHROPIC_VERSION.to_string()),
            );
        }

        Ok(body)
    }

    fn body_in(&self, body: Value) -> LlmResult<Value> {
        let response: AnthropicChatResponse = serde_json::from_value(body)
            .map_err(|e| LlmError::Internal(Some(format!("unexpected upstream response shape: {e}"))))?;

        serde_json::to_value(UnifiedResponse::from(response))
            .map_err(|e| LlmError::Internal(Some(e.to_string())))
    }

    fn response_stream(&self, stream: ChunkStream, _request: &UnifiedRequest) -> ChunkStream {
        #[derive(Default)]
        struct StreamState {
            message_id: String,
            model: String,
            /// Anthropic block index to tool-call index.
            tool_indices: HashMap<u32, u32>,
            next_tool_index: u32,
        }

        let stream = stream
            .scan(StreamState::default(), |state, item| {
                let out: Vec<Result<StreamItem, LlmError>> = match item {
                    // Anthropic events arrive as raw frames because they are
                    // not chat-completion chunks.
                    Ok(StreamItem::Raw(line)) => match serde_json::from_str::<AnthropicStreamEvent>(&line) {
                        Ok(event) => convert_event(state, event),
                        Err(_) => vec![Ok(StreamItem::Raw(line))],
                    },
                    other => vec![other],
                };

                futures::future::ready(Some(out))
            })
            .flat_map(futures::stream::iter);

        return Box::pin(stream);

        fn chunk(state: &StreamState, delta: UnifiedDelta, finish_reason: Option<UnifiedFinishReason>) -> UnifiedChunk {
            UnifiedChunk {
                id: state.message_id.clone(),
                object: Some("chat.completion.chunk".to_string()),
                model: state.model.clone(),
                choices: vec![UnifiedChoiceDelta {
                    index: 0,
                    delta,
                    finish_reason,
                }],
                ..Default::default()
            }
        }

        fn convert_event(
            state: &mut StreamState,
            event: AnthropicStreamEvent,
        ) -> Vec<Result<StreamItem, LlmError>> {
            match event {
                AnthropicStreamEvent::MessageStart { message } => {
                    state.message_id = message.id;
                    state.model = message.model;

                    vec![Ok(StreamItem::Chunk(chunk(
                        state,
                        UnifiedDelta {
                            role: Some(UnifiedRole::Assistant),
                            ..Default::default()
                        },
                        None,
                    )))]
                }
                AnthropicStreamEvent::ContentBlockStart {
                    index,
                    content_block: AnthropicContent::ToolUse { id, name, .. },
                } => {
                    let tool_index = state.next_tool_index;
                    state.next_tool_index += 1;
                    state.tool_indices.insert(index, tool_index);

                    vec![Ok(StreamItem::Chunk(chunk(
                        state,
                        UnifiedDelta {
                            tool_calls: Some(vec![UnifiedToolCallDelta {
                                index: tool_index,
                                id: Some(id),
                                kind: Some("function".to_string()),
                                function: Some(UnifiedFunctionCallDelta {
                                    name: Some(name),
                                    arguments: Some(String::new()),
                                }),
                            }]),
                            ..Default::default()
                        },
                        None,
                    )))]
                }
                AnthropicStreamEvent::ContentBlockDelta { index, delta } => {
                    let delta = match delta {
                        AnthropicContentDelta::TextDelta { text } => UnifiedDelta {
                            content: Some(text),
                            ..Default::default()
                        },
                        AnthropicContentDelta::InputJsonDelta { partial_json } => UnifiedDelta {
                            tool_calls: Some(vec![UnifiedToolCallDelta {
                                index: state.tool_indices.get(&index).copied().unwrap_or_default(),
                                function: Some(UnifiedFunctionCallDelta {
                                    name: None,
                                    arguments: Some(partial_json),
                                }),
                                ..Default::default()
                            }]),
                            ..Default::default()
                        },
                        AnthropicContentDelta::ThinkingDelta { thinking } => UnifiedDelta {
                            thinking: Some(UnifiedThinking {
                                content: thinking,
                                signature: None,
                            }),
                            ..Default::default()
                        },
                        AnthropicContentDelta::SignatureDelta { signature } => UnifiedDelta {
                            thinking: Some(UnifiedThinking {
                                content: String::new(),
                                signature: Some(signature),
                            }),
                            ..Default::default()
                        },
                    };

                    vec![Ok(StreamItem::Chunk(chunk(state, delta, None)))]
                }
                AnthropicStreamEvent::MessageDelta { delta, usage } => {
                    let finish_reason = delta.stop_reason.map(|reason| {
                        UnifiedFinishReason::from(match reason {
                            AnthropicStopReason::EndTurn => UnifiedStopReason::EndTurn,
                            AnthropicStopReason::MaxTokens => UnifiedStopReason::MaxTokens,
                            AnthropicStopReason::StopSequence => UnifiedStopReason::StopSequence,
                            AnthropicStopReason::ToolUse => UnifiedStopReason::ToolUse,
                        })
                    });

                    let mut final_chunk = chunk(state, UnifiedDelta::default(), finish_reason);
                    final_chunk.usage = Some(UnifiedUsage {
                        prompt_tokens: usage.input_tokens,
                        completion_tokens: usage.output_tokens,
                        total_tokens: usage.input_tokens + usage.output_tokens,
                        ..Default::default()
                    });

                    vec![Ok(StreamItem::Chunk(final_chunk))]
                }
                AnthropicStreamEvent::Error { error } => {
                    vec![Err(LlmError::UpstreamStreamError(error.message))]
                }
                // content_block_stop, message_stop and pings carry nothing
                // the chat-completions shape needs.
                _ => Vec::new(),
            }
        }
    }
}
