//! MiniMax-M2 adapter: extracts XML-style tool invocations and thinking
//! sections from assistant output.

use futures::StreamExt;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::LazyLock;

use crate::{
    error::{LlmError, LlmResult},
    messages::unified::{
        UnifiedChoiceDelta, UnifiedChunk, UnifiedContent, UnifiedDelta, UnifiedFinishReason,
        UnifiedFunctionCall, UnifiedFunctionCallDelta, UnifiedRequest, UnifiedResponse,
        UnifiedThinking, UnifiedToolCall, UnifiedToolCallDelta,
    },
    streaming::{ChunkStream, StreamItem},
    transformer::Transformer,
};

/// Ceiling for the per-stream XML buffer.
const MAX_XML_BUFFER: usize = 1024 * 1024;

static THINKING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<thinking>(.*?)</thinking>").expect("valid regex"));

static INVOKE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)<invoke name="([^"]+)">(.*?)</invoke>"#).expect("valid regex"));

static PARAMETER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<parameter name="([^"]+)">(.*?)</parameter>"#).expect("valid regex")
});

/// How generated tool-call ids are formed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdStrategy {
    #[default]
    Uuid,
    Counter,
    FunctionBased,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct MinimaxOptions {
    /// Capture `<thinking>` sections into the message thinking field.
    pub parse_thinking: bool,
    /// Buffer streamed content and parse it at end of stream.
    pub buffer_incomplete_xml: bool,
    pub id_strategy: IdStrategy,
    pub id_prefix: String,
}

impl Default for MinimaxOptions {
    fn default() -> Self {
        Self {
            parse_thinking: true,
            buffer_incomplete_xml: true,
            id_strategy: IdStrategy::Uuid,
            id_prefix: "call".to_string(),
        }
    }
}

pub struct MinimaxTransformer {
    options: MinimaxOptions,
}

impl MinimaxTransformer {
    pub fn new(options: Option<&Value>) -> anyhow::Result<Self> {
        let options = match options {
            Some(options) => serde_json::from_value(options.clone())?,
            None => MinimaxOptions::default(),
        };

        Ok(Self { options })
    }

    fn generate_id(&self, function: &str) -> String {
        match self.options.id_strategy {
            IdStrategy::Uuid => {
                format!("{}.{function}.{}", self.options.id_prefix, uuid::Uuid::new_v4())
            }
            IdStrategy::Counter => format!(
                "{}.{function}.{}",
                self.options.id_prefix,
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis()
            ),
            IdStrategy::FunctionBased => format!("{}.{function}", self.options.id_prefix),
        }
    }

    /// Run the grammar over complete assistant text.
    fn parse_text(&self, text: &str) -> ParsedOutput {
        let mut remaining = text.to_string();
        let mut thinking = None;

        if self.options.parse_thinking {
            if let Some(captures) = THINKING_RE.captures(&remaining) {
                thinking = Some(captures[1].to_string());
                remaining = THINKING_RE.replace(&remaining, "").into_owned();
            }
        }

        let mut calls = Vec::new();

        for captures in INVOKE_RE.captures_iter(&remaining) {
            let function = captures[1].to_string();
            let body = &captures[2];

            let mut params = serde_json::Map::new();

            for parameter in PARAMETER_RE.captures_iter(body) {
                let name = parameter[1].to_string();
                let value = parse_parameter_value(&parameter[2]);
                params.insert(name, value);
            }

            calls.push(UnifiedToolCall {
                id: self.generate_id(&function),
                kind: "function".to_string(),
                function: UnifiedFunctionCall {
                    name: function,
                    arguments: serde_json::to_string(&Value::Object(params))
                        .unwrap_or_else(|_| "{}".to_string()),
                },
            });
        }

        let cleaned = INVOKE_RE.replace_all(&remaining, "").into_owned();

        ParsedOutput {
            thinking,
            calls,
            content: cleaned.trim().to_string(),
        }
    }
}

struct ParsedOutput {
    thinking: Option<String>,
    calls: Vec<UnifiedToolCall>,
    content: String,
}

/// Parameter values lose one leading and one trailing newline and parse as
/// JSON, keeping the raw string on failure.
fn parse_parameter_value(raw: &str) -> Value {
    let trimmed = raw.strip_prefix('\n').unwrap_or(raw);
    let trimmed = trimmed.strip_suffix('\n').unwrap_or(trimmed);

    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

impl Transformer for MinimaxTransformer {
    fn name(&self) -> &str {
        "minimax"
    }

    fn response_in(&self, mut response: UnifiedResponse, _request: &UnifiedRequest) -> LlmResult<UnifiedResponse> {
        for choice in &mut response.choices {
            let text = choice.message.text();
            if text.is_empty() {
                continue;
            }

            let parsed = self.parse_text(&text);

            if parsed.calls.is_empty() && parsed.thinking.is_none() {
                continue;
            }

            choice.message.content = Some(UnifiedContent::Text(parsed.content));

            if let Some(thinking) = parsed.thinking {
                choice.message.thinking = Some(UnifiedThinking {
                    content: thinking,
                    signature: None,
                });
            }

            if !parsed.calls.is_empty() {
                choice.message.tool_calls = Some(parsed.calls);
                choice.finish_reason = Some(UnifiedFinishReason::ToolCalls);
            }
        }

        Ok(response)
    }

    fn response_stream(&self, stream: ChunkStream, _request: &UnifiedRequest) -> ChunkStream {
        if !self.options.buffer_incomplete_xml {
            return stream;
        }

        struct XmlBuffer {
            text: String,
            failed: bool,
        }

        let options = self.options.clone();
        let parser = MinimaxTransformer { options };

        let stream = stream
            .scan(
                XmlBuffer {
                    text: String::new(),
                    failed: false,
                },
                move |state, item| {
                    if state.failed {
                        return futures::future::ready(None);
                    }

                    let out: Vec<Result<StreamItem, LlmError>> = match item {
                        Ok(StreamItem::Chunk(chunk)) => {
                            if let Some(content) = chunk
                                .choices
                                .first()
                                .and_then(|choice| choice.delta.content.as_deref())
                            {
                                state.text.push_str(content);
                            }

                            if state.text.len() > MAX_XML_BUFFER {
                                state.failed = true;
                                return futures::future::ready(Some(vec![Err(
                                    LlmError::UpstreamStreamError(format!(
                                        "XML buffer exceeded {MAX_XML_BUFFER} bytes"
                                    )),
                                )]));
                            }

                            // Original chunks always pass through unchanged.
                            vec![Ok(StreamItem::Chunk(chunk))]
                        }
                        Ok(StreamItem::Done) => {
                            let mut out = Vec::with_capacity(2);
                            let parsed = parser.parse_text(&state.text);

                            if !parsed.calls.is_empty() {
                                let tool_calls = parsed
                                    .calls
                                    .into_iter()
                                    .enumerate()
                                    .map(|(i, call)| UnifiedToolCallDelta {
                                        index: i as u32,
                                        id: Some(call.id),
                                        kind: Some(call.kind),
                                        function: Some(UnifiedFunctionCallDelta {
                                            name: Some(call.function.name),
                                            arguments: Some(call.function.arguments),
                                        }),
                                    })
                                    .collect();

                                out.push(Ok(StreamItem::Chunk(UnifiedChunk {
                                    object: Some("chat.completion.chunk".to_string()),
                                    choices: vec![UnifiedChoiceDelta {
                                        index: 0,
                                        delta: UnifiedDelta {
                                            tool_calls: Some(tool_calls),
                                            ..Default::default()
                                        },
                                        finish_reason: Some(UnifiedFinishReason::ToolCalls),
                                    }],
                                    ..Default::default()
                                })));
                            }

                            out.push(Ok(StreamItem::Done));
                            out
                        }
                        other => vec![other],
                    };

                    futures::future::ready(Some(out))
                },
            )
            .flat_map(futures::stream::iter);

        Box::pin(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::unified::{UnifiedChoice, UnifiedMessage, UnifiedRole};

    fn transformer() -> MinimaxTransformer {
        MinimaxTransformer::new(None).unwrap()
    }

    fn assistant_response(text: &str) -> UnifiedResponse {
        UnifiedResponse {
            id: "chatcmpl-1".to_string(),
            model: "MiniMax-M2".to_string(),
            choices: vec![UnifiedChoice {
                index: 0,
                message: UnifiedMessage {
                    role: UnifiedRole::Assistant,
                    content: Some(UnifiedContent::Text(text.to_string())),
                    ..Default::default()
                },
                finish_reason: Some(UnifiedFinishReason::Stop),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn extracts_thinking_invoke_and_content() {
        let text = "<thinking>pick a tool</thinking>Let me search.<invoke name=\"search_web\"><parameter name=\"query\">\"events\"</parameter></invoke>";

        let response = transformer()
            .response_in(assistant_response(text), &UnifiedRequest::default())
            .unwrap();

        let choice = &response.choices[0];
        assert_eq!(choice.message.text(), "Let me search.");
        assert_eq!(
            choice.message.thinking.as_ref().unwrap().content,
            "pick a tool"
        );

        let calls = choice.message.tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "search_web");
        assert_eq!(calls[0].function.arguments, r#"{"query":"events"}"#);
        assert!(calls[0].id.starts_with("call.search_web."));
        assert_eq!(choice.finish_reason, Some(UnifiedFinishReason::ToolCalls));
    }

    #[test]
    fn parameter_values_parse_as_json_with_raw_fallback() {
        assert_eq!(parse_parameter_value("42"), serde_json::json!(42));
        assert_eq!(parse_parameter_value("\"quoted\""), serde_json::json!("quoted"));
        assert_eq!(
            parse_parameter_value("\n{\"a\": 1}\n"),
            serde_json::json!({"a": 1})
        );
        assert_eq!(
            parse_parameter_value("plain text"),
            serde_json::json!("plain text")
        );
    }

    #[test]
    fn multiple_invokes_each_become_calls() {
        let text = r#"<invoke name="a"><parameter name="x">1</parameter></invoke><invoke name="b"><parameter name="y">2</parameter></invoke>"#;

        let response = transformer()
            .response_in(assistant_response(text), &UnifiedRequest::default())
            .unwrap();

        let calls = response.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].function.name, "a");
        assert_eq!(calls[1].function.name, "b");
    }

    #[test]
    fn plain_text_is_untouched() {
        let response = transformer()
            .response_in(assistant_response("No tools here."), &UnifiedRequest::default())
            .unwrap();

        let choice = &response.choices[0];
        assert!(choice.message.tool_calls.is_none());
        assert_eq!(choice.message.text(), "No tools here.");
        assert_eq!(choice.finish_reason, Some(UnifiedFinishReason::Stop));
    }

    #[test]
    fn id_strategies_produce_expected_shapes() {
        let function_based = MinimaxTransformer::new(Some(&serde_json::json!({
            "idStrategy": "function-based"
        })))
        .unwrap();
        assert_eq!(function_based.generate_id("search"), "call.search");

        let counter = MinimaxTransformer::new(Some(&serde_json::json!({
            "idStrategy": "counter"
        })))
        .unwrap();
        assert!(counter.generate_id("search").starts_with("call.search."));
    }

    mod streaming {
        use super::*;
        use futures::stream;

        fn content_chunk(text: &str) -> Result<StreamItem, LlmError> {
            Ok(StreamItem::Chunk(UnifiedChunk {
                id: "chatcmpl-1".to_string(),
                model: "MiniMax-M2".to_string(),
                choices: vec![UnifiedChoiceDelta {
                    index: 0,
                    delta: UnifiedDelta {
                        content: Some(text.to_string()),
                        ..Default::default()
                    },
                    finish_reason: None,
                }],
                ..Default::default()
            }))
        }

        fn collect(stream: ChunkStream) -> Vec<StreamItem> {
            futures::executor::block_on(async {
                futures::StreamExt::collect::<Vec<_>>(stream)
                    .await
                    .into_iter()
                    .map(Result::unwrap)
                    .collect()
            })
        }

        #[test]
        fn buffered_xml_produces_synthesised_final_chunk() {
            let stage = transformer();

            let input = stream::iter(vec![
                content_chunk("Let me search."),
                content_chunk("<invoke name=\"search_web\"><parameter name=\"query\">"),
                content_chunk("\"events\"</parameter></invoke>"),
                Ok(StreamItem::Done),
            ]);

            let items = collect(stage.response_stream(Box::pin(input), &UnifiedRequest::default()));

            // Three originals pass through, then the synthesised chunk, then Done.
            assert_eq!(items.len(), 5);

            let StreamItem::Chunk(synthesised) = &items[3] else {
                panic!("expected synthesised chunk");
            };
            let choice = &synthesised.choices[0];
            assert_eq!(choice.finish_reason, Some(UnifiedFinishReason::ToolCalls));

            let calls = choice.delta.tool_calls.as_ref().unwrap();
            assert_eq!(
                calls[0].function.as_ref().unwrap().name.as_deref(),
                Some("search_web")
            );
            assert_eq!(
                calls[0].function.as_ref().unwrap().arguments.as_deref(),
                Some(r#"{"query":"events"}"#)
            );
        }

        #[test]
        fn stream_without_tool_calls_only_forwards() {
            let stage = transformer();

            let input = stream::iter(vec![content_chunk("plain answer"), Ok(StreamItem::Done)]);
            let items = collect(stage.response_stream(Box::pin(input), &UnifiedRequest::default()));

            assert_eq!(items.len(), 2);
            assert!(matches!(items[1], StreamItem::Done));
        }
    }
}
