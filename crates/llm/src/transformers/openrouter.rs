//! OpenRouter provider adapter.

use std::collections::HashMap;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;

use crate::{
    error::{LlmError, LlmResult},
    messages::unified::{
        UnifiedContent, UnifiedFinishReason, UnifiedPart, UnifiedRequest, UnifiedThinking,
    },
    streaming::{ChunkStream, StreamItem},
    transformer::Transformer,
};

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
struct OpenRouterOptions {
    http_referer: String,
    x_title: String,
    provider_order: Option<Vec<String>>,
}

impl Default for OpenRouterOptions {
    fn default() -> Self {
        Self {
            http_referer: "https://github.com/switchboard-gw/switchboard".to_string(),
            x_title: "Switchboard".to_string(),
            provider_order: None,
        }
    }
}

pub struct OpenRouterTransformer {
    options: OpenRouterOptions,
}

impl OpenRouterTransformer {
    pub fn new(options: Option<&Value>) -> anyhow::Result<Self> {
        let options = match options {
            Some(options) => serde_json::from_value(options.clone())?,
            None => OpenRouterOptions::default(),
        };

        Ok(Self { options })
    }
}

#[async_trait::async_trait]
impl Transformer for OpenRouterTransformer {
    fn name(&self) -> &str {
        "openrouter"
    }

    async fn auth(&self, mut headers: HeaderMap, _provider: &config::ProviderConfig) -> LlmResult<HeaderMap> {
        if let Ok(value) = HeaderValue::from_str(&self.options.http_referer) {
            headers.insert(HeaderName::from_static("http-referer"), value);
        }
        if let Ok(value) = HeaderValue::from_str(&self.options.x_title) {
            headers.insert(HeaderName::from_static("x-title"), value);
        }

        Ok(headers)
    }

    fn request_out(&self, mut request: UnifiedRequest) -> LlmResult<UnifiedRequest> {
        if let Some(order) = &self.options.provider_order {
            request.extra.insert(
                "provider".to_string(),
                serde_json::json!({ "order": order }),
            );
        }

        let claude_upstream = request.model.contains("claude");

        for message in &mut request.messages {
            if !claude_upstream {
                message.extra.remove("cache_control");
            }

            let Some(UnifiedContent::Parts(parts)) = &mut message.content else {
                continue;
            };

            for part in parts {
                let UnifiedPart::ImageUrl { image_url, media_type } = part else {
                    continue;
                };

                // Raw base64 payloads need the data-URL wrapper.
                if !image_url.url.starts_with("http") && !image_url.url.starts_with("data:") {
                    let media = media_type.as_deref().unwrap_or("image/jpeg");
                    image_url.url = crate::messages::unified::data_url(media, &image_url.url);
                }
            }
        }

        Ok(request)
    }

    fn response_stream(&self, stream: ChunkStream, _request: &UnifiedRequest) -> ChunkStream {
        #[derive(Default)]
        struct StreamState {
            reasoning_active: bool,
            saw_tool_calls: bool,
            saw_content: bool,
            remapped_ids: HashMap<u32, String>,
        }

        let stream = stream
            .scan(StreamState::default(), |state, item| {
                let out: Vec<Result<StreamItem, LlmError>> = match item {
                    Ok(StreamItem::Chunk(mut chunk)) => {
                        let mut out = Vec::with_capacity(2);

                        if let Some(choice) = chunk.choices.first_mut() {
                            let delta = &mut choice.delta;

                            if let Some(reasoning) = delta.reasoning.take() {
                                delta.thinking = Some(UnifiedThinking {
                                    content: reasoning,
                                    signature: None,
                                });
                                state.reasoning_active = true;
                            } else if state.reasoning_active
                                && (delta.content.is_some()
                                    || delta.tool_calls.is_some()
                                    || choice.finish_reason.is_some())
                            {
                                // Reasoning finished: seal the thinking block
                                // with a synthesised signature.
                                state.reasoning_active = false;

                                let mut signature_chunk = chunk.clone();
                                let sealed = &mut signature_chunk.choices[0];
                                sealed.finish_reason = None;
                                sealed.delta = Default::default();
                                sealed.delta.thinking = Some(UnifiedThinking {
                                    content: String::new(),
                                    signature: Some(unix_millis().to_string()),
                                });
                                out.push(Ok(StreamItem::Chunk(signature_chunk)));
                            }
                        }

                        if let Some(choice) = chunk.choices.first_mut() {
                            if choice.delta.content.as_deref().is_some_and(|c| !c.is_empty()) {
                                state.saw_content = true;
                            }

                            if let Some(tool_calls) = choice.delta.tool_calls.as_mut() {
                                state.saw_tool_calls = true;

                                for call in tool_calls.iter_mut() {
                                    let numeric = call
                                        .id
                                        .as_deref()
                                        .is_some_and(|id| !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()));

                                    if numeric {
                                        let id = state
                                            .remapped_ids
                                            .entry(call.index)
                                            .or_insert_with(|| format!("call_{}", uuid::Uuid::new_v4()));
                                        call.id = Some(id.clone());
                                    }
                                }

                                // Tool calls that begin after text content get
                                // their own choice slot.
                                if state.saw_content {
                                    choice.index += 1;
                                }
                            }

                            if state.saw_tool_calls
                                && matches!(choice.finish_reason, Some(UnifiedFinishReason::Stop))
                            {
                                choice.finish_reason = Some(UnifiedFinishReason::ToolCalls);
                            }
                        }

                        out.push(Ok(StreamItem::Chunk(chunk)));
                        out
                    }
                    other => vec![other],
                };

                futures::future::ready(Some(out))
            })
            .flat_map(futures::stream::iter);

        Box::pin(stream)
    }
}

fn unix_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}
