//! Reasoning control normalisation and thinking extraction.
//!
//! On requests: recognises the user-facing effort tokens, then collapses
//! the three reasoning representations (`thinking`, structured `reasoning`,
//! `enable_thinking`) into the single flat `reasoning_effort` field. On
//! responses: splits provider reasoning output into a thinking part ahead
//! of the text.

use futures::StreamExt;

use crate::{
    error::{LlmError, LlmResult},
    messages::unified::{
        ReasoningEffort, UnifiedContent, UnifiedPart, UnifiedRequest, UnifiedResponse,
        UnifiedThinking, Verbosity,
    },
    streaming::{ChunkStream, StreamItem},
    transformer::Transformer,
};

/// Effort/verbosity pair a token maps to.
#[derive(Debug, Clone, Copy)]
struct TokenMapping {
    effort: ReasoningEffort,
    verbosity: Verbosity,
}

const TOKENS: [(&str, &str, TokenMapping); 4] = [
    (
        "Quick:",
        "#quick",
        TokenMapping {
            effort: ReasoningEffort::Low,
            verbosity: Verbosity::Low,
        },
    ),
    (
        "Deep:",
        "#deep",
        TokenMapping {
            effort: ReasoningEffort::High,
            verbosity: Verbosity::Medium,
        },
    ),
    (
        "Explain:",
        "#explain",
        TokenMapping {
            effort: ReasoningEffort::Medium,
            verbosity: Verbosity::High,
        },
    ),
    (
        "Brief:",
        "#brief",
        TokenMapping {
            effort: ReasoningEffort::Medium,
            verbosity: Verbosity::Low,
        },
    ),
];

pub struct ReasoningTransformer;

impl Transformer for ReasoningTransformer {
    fn name(&self) -> &str {
        "reasoning"
    }

    fn request_in(&self, mut request: UnifiedRequest) -> LlmResult<UnifiedRequest> {
        extract_tokens(&mut request);
        normalise_controls(&mut request);
        Ok(request)
    }

    fn response_in(&self, mut response: UnifiedResponse, _request: &UnifiedRequest) -> LlmResult<UnifiedResponse> {
        for choice in &mut response.choices {
            let message = &mut choice.message;

            let reasoning = message.reasoning_content.take().or_else(|| {
                message
                    .extra
                    .remove("reasoning")
                    .and_then(|value| value.as_str().map(str::to_string))
            });

            let Some(reasoning) = reasoning.filter(|r| !r.is_empty()) else {
                continue;
            };

            let text = message.text();
            message.content = Some(UnifiedContent::Parts(vec![
                UnifiedPart::Thinking {
                    content: reasoning,
                    signature: None,
                },
                UnifiedPart::Text { text },
            ]));
        }

        Ok(response)
    }

    fn response_stream(&self, stream: ChunkStream, _request: &UnifiedRequest) -> ChunkStream {
        #[derive(Default)]
        struct ReasoningState {
            active: bool,
        }

        let stream = stream
            .scan(ReasoningState::default(), |state, item| {
                let out: Vec<Result<StreamItem, LlmError>> = match item {
                    Ok(StreamItem::Chunk(mut chunk)) => {
                        let mut out = Vec::with_capacity(2);

                        if let Some(choice) = chunk.choices.first_mut() {
                            if let Some(reasoning) = choice.delta.reasoning_content.take() {
                                choice.delta.thinking = Some(UnifiedThinking {
                                    content: reasoning,
                                    signature: None,
                                });
                                state.active = true;
                            } else if state.active {
                                // Reasoning just ended: seal the thinking
                                // block with a synthesised signature.
                                state.active = false;

                                let mut sealing = chunk.clone();
                                let sealed = &mut sealing.choices[0];
                                sealed.finish_reason = None;
                                sealed.delta = Default::default();
                                sealed.delta.thinking = Some(UnifiedThinking {
                                    content: String::new(),
                                    signature: Some(unix_millis().to_string()),
                                });
                                out.push(Ok(StreamItem::Chunk(sealing)));
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

/// Recognise at most one prefix token and one hashtag token in the final
/// user message, strip them, and fill unset effort/verbosity fields.
fn extract_tokens(request: &mut UnifiedRequest) {
    let Some(message) = request
        .messages
        .iter_mut()
        .rev()
        .find(|message| message.role == crate::messages::unified::UnifiedRole::User)
    else {
        return;
    };

    let mut text = message.text();
    let mut mappings: Vec<TokenMapping> = Vec::with_capacity(2);

    // One prefix token at the very start.
    for (prefix, _, mapping) in TOKENS {
        if let Some(rest) = text.strip_prefix(prefix) {
            text = rest.trim_start().to_string();
            mappings.push(mapping);
            break;
        }
    }

    // One hashtag token anywhere; the earliest occurrence wins. A longer
    // word that merely starts with the tag does not count.
    let hashtag = TOKENS
        .iter()
        .filter_map(|(_, tag, mapping)| {
            text.find(tag)
                .filter(|at| {
                    text[at + tag.len()..]
                        .chars()
                        .next()
                        .is_none_or(|c| !c.is_ascii_alphanumeric())
                })
                .map(|at| (at, *tag, *mapping))
        })
        .min_by_key(|(at, ..)| *at);

    if let Some((at, tag, mapping)) = hashtag {
        let mut stripped = String::with_capacity(text.len());
        let before = &text[..at];
        let after = &text[at + tag.len()..];

        // Take one adjacent space with the tag.
        if let Some(before) = before.strip_suffix(' ') {
            stripped.push_str(before);
            stripped.push_str(after);
        } else {
            stripped.push_str(before);
            stripped.push_str(after.strip_prefix(' ').unwrap_or(after));
        }

        text = stripped;
        mappings.push(mapping);
    }

    if mappings.is_empty() {
        return;
    }

    message.content = Some(UnifiedContent::Text(text));

    for mapping in mappings {
        if request.reasoning_effort.is_none() {
            request.reasoning_effort = Some(mapping.effort);
        }
        if request.verbosity.is_none() {
            request.verbosity = Some(mapping.verbosity);
        }
    }
}

/// Collapse `thinking` / `reasoning` / `enable_thinking` into
/// `reasoning_effort`; at most one representation survives.
fn normalise_controls(request: &mut UnifiedRequest) {
    let thinking_enabled = request
        .thinking
        .take()
        .is_some_and(|thinking| thinking.is_enabled())
        || request.enable_thinking.take() == Some(true);

    if thinking_enabled && request.reasoning_effort.is_none() {
        request.reasoning_effort = Some(ReasoningEffort::Medium);
    }

    let Some(reasoning) = request.reasoning.take() else {
        return;
    };

    if request.reasoning_effort.is_some() {
        return;
    }

    if let Some(effort) = reasoning.effort {
        request.reasoning_effort = Some(effort);
    } else if let Some(max_tokens) = reasoning.max_tokens {
        request.reasoning_effort = Some(if max_tokens > 1000 {
            ReasoningEffort::High
        } else if max_tokens > 500 {
            ReasoningEffort::Medium
        } else {
            ReasoningEffort::Minimal
        });
    }
    // Any other reasoning shape is dropped without effect.
}
