//! Dialect-neutral message types.
//!
//! These types serve as the internal representation every transformer hook
//! operates on. Their serde form is the OpenAI chat-completions wire shape,
//! so serialising a [`UnifiedRequest`] yields the body an OpenAI-compatible
//! upstream accepts; provider-specific keys travel in the flattened `extra`
//! maps. Anthropic conversions live in the sibling submodules.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub(crate) mod from_anthropic;
pub(crate) mod to_anthropic;

/// Unified chat request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnifiedRequest {
    /// Model identifier (may include a `provider,` prefix until routing
    /// strips it).
    pub model: String,

    /// Ordered conversation messages.
    pub messages: Vec<UnifiedMessage>,

    /// Available tools/functions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<UnifiedTool>>,

    /// How the model should use tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<UnifiedToolChoice>,

    /// Whether to stream the response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling parameter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Maximum number of tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Stop sequences (string or array, forwarded as-is).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,

    /// Flat reasoning effort control. At most one of the reasoning
    /// representations survives normalisation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,

    /// Structured reasoning object (OpenRouter style).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningConfig>,

    /// Anthropic-style thinking control.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingConfig>,

    /// Qwen-style boolean thinking switch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_thinking: Option<bool>,

    /// Output verbosity hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbosity: Option<Verbosity>,

    /// Provider-specific keys, preserved untouched unless a stage owns them.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Unified message representation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnifiedMessage {
    /// Role of the message sender.
    pub role: UnifiedRole,

    /// Message content; `None` for assistant messages that only carry tool
    /// calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<UnifiedContent>,

    /// Tool calls made by the assistant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<UnifiedToolCall>>,

    /// ID referencing a tool call (tool messages only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Extracted thinking content (assistant messages).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<UnifiedThinking>,

    /// Raw provider reasoning field, preserved so reasoner models see their
    /// own output on the next turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,

    /// Web-search annotations attached to an assistant message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Vec<UnifiedAnnotation>>,

    /// Any other provider-specific message keys.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UnifiedMessage {
    /// The message text, concatenating text parts when the content is an array.
    pub fn text(&self) -> String {
        match &self.content {
            None => String::new(),
            Some(UnifiedContent::Text(text)) => text.clone(),
            Some(UnifiedContent::Parts(parts)) => parts
                .iter()
                .filter_map(|part| match part {
                    UnifiedPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Role of a message sender.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnifiedRole {
    /// System instructions.
    System,
    /// User input.
    #[default]
    User,
    /// Assistant/model response.
    Assistant,
    /// Tool response.
    Tool,
}

/// Content that is either a plain string or an ordered list of parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UnifiedContent {
    Text(String),
    Parts(Vec<UnifiedPart>),
}

/// A single content part.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnifiedPart {
    /// Plain text.
    Text { text: String },

    /// Image reference; `url` is either an http(s) URL or a `data:` URL.
    ImageUrl {
        image_url: UnifiedImageUrl,
        /// Original media type when the image arrived as base64 data.
        #[serde(skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },

    /// Extracted reasoning content.
    Thinking {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },

    /// Tool invocation (Anthropic-style part kept for round-trips).
    ToolUse { id: String, name: String, input: Value },

    /// Tool result (Anthropic-style part kept for round-trips).
    ToolResult { tool_use_id: String, content: Value },

    /// Web search result reference.
    WebSearchResult {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
}

/// Image URL wrapper matching the OpenAI wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedImageUrl {
    pub url: String,
}

/// Compose a `data:` URL from a media type and base64 payload.
pub fn data_url(media_type: &str, data: &str) -> String {
    format!("data:{media_type};base64,{data}")
}

/// Split a `data:<mime>;base64,<payload>` URL into media type and payload.
pub fn parse_data_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("data:")?;
    let (media_type, payload) = rest.split_once(";base64,")?;
    Some((media_type, payload))
}

/// Extracted thinking content with an optional signature.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnifiedThinking {
    #[serde(default)]
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Unified tool definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnifiedTool {
    /// A JSON-schema function tool.
    Function { function: UnifiedFunction },
    /// A tool with an opaque plaintext schema, forwarded untouched.
    Custom { custom: Value },
}

/// Function definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedFunction {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Value,
}

/// Tool choice configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UnifiedToolChoice {
    /// Mode-based choice.
    Mode(UnifiedToolChoiceMode),
    /// Specific function selection.
    Specific {
        #[serde(rename = "type")]
        kind: String,
        function: UnifiedFunctionChoice,
    },
}

impl UnifiedToolChoice {
    /// Force a specific function by name.
    pub fn function(name: impl Into<String>) -> Self {
        Self::Specific {
            kind: "function".to_string(),
            function: UnifiedFunctionChoice { name: name.into() },
        }
    }
}

/// Tool choice modes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnifiedToolChoiceMode {
    None,
    Auto,
    #[serde(alias = "any")]
    Required,
}

/// Specific function choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedFunctionChoice {
    pub name: String,
}

/// Tool call made by the assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_call_kind")]
    pub kind: String,
    pub function: UnifiedFunctionCall,
}

pub(crate) fn function_call_kind() -> String {
    "function".to_string()
}

/// Function call details; arguments are a JSON-encoded string.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnifiedFunctionCall {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

/// Coarse reasoning effort level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Minimal,
    Low,
    Medium,
    High,
}

/// Output verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Low,
    Medium,
    High,
}

/// Structured reasoning control (OpenRouter style).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasoningConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effort: Option<ReasoningEffort>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Anthropic-style thinking control.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThinkingConfig {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_tokens: Option<u32>,
}

impl ThinkingConfig {
    pub fn is_enabled(&self) -> bool {
        self.kind.as_deref() == Some("enabled")
    }
}

/// Web-search annotation attached to assistant output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedAnnotation {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_citation: Option<UrlCitation>,
}

/// URL citation payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlCitation {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Unified non-streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnifiedResponse {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    #[serde(default)]
    pub created: u64,
    pub model: String,
    pub choices: Vec<UnifiedChoice>,
    #[serde(default)]
    pub usage: UnifiedUsage,
}

/// Response choice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnifiedChoice {
    pub index: u32,
    pub message: UnifiedMessage,
    pub finish_reason: Option<UnifiedFinishReason>,
}

/// Token usage statistics, OpenAI-shaped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnifiedUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens_details: Option<PromptTokensDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens_details: Option<CompletionTokensDetails>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptTokensDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionTokensDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u32>,
}

/// OpenAI-style finish reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnifiedFinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    /// Forward-compatible catch-all.
    #[serde(untagged)]
    Other(String),
}

/// Anthropic-style stop reason.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnifiedStopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
}

impl From<&UnifiedFinishReason> for UnifiedStopReason {
    fn from(reason: &UnifiedFinishReason) -> Self {
        match reason {
            UnifiedFinishReason::Stop => Self::EndTurn,
            UnifiedFinishReason::Length => Self::MaxTokens,
            UnifiedFinishReason::ToolCalls => Self::ToolUse,
            UnifiedFinishReason::ContentFilter => Self::StopSequence,
            UnifiedFinishReason::Other(_) => Self::EndTurn,
        }
    }
}

impl From<UnifiedStopReason> for UnifiedFinishReason {
    fn from(reason: UnifiedStopReason) -> Self {
        match reason {
            UnifiedStopReason::EndTurn => Self::Stop,
            UnifiedStopReason::MaxTokens => Self::Length,
            UnifiedStopReason::StopSequence => Self::Stop,
            UnifiedStopReason::ToolUse => Self::ToolCalls,
        }
    }
}

/// Incremental streaming chunk, OpenAI-shaped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnifiedChunk {
    #[serde(default)]
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<u64>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<UnifiedChoiceDelta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UnifiedUsage>,
}

/// Incremental choice update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnifiedChoiceDelta {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: UnifiedDelta,
    #[serde(default)]
    pub finish_reason: Option<UnifiedFinishReason>,
}

/// Incremental message content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnifiedDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<UnifiedRole>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<UnifiedToolCallDelta>>,

    /// Deepseek-style reasoning delta.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,

    /// OpenRouter-style reasoning delta.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,

    /// Thinking delta produced by gateway stages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<UnifiedThinking>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Vec<UnifiedAnnotation>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Streaming tool-call fragment; any of id, name or arguments may be absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnifiedToolCallDelta {
    #[serde(default)]
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<UnifiedFunctionCallDelta>,
}

/// Fragment of a streamed function call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnifiedFunctionCallDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_json_snapshot;

    #[test]
    fn request_serialises_to_openai_wire_shape() {
        let request = UnifiedRequest {
            model: "gpt-5".to_string(),
            messages: vec![UnifiedMessage {
                role: UnifiedRole::User,
                content: Some(UnifiedContent::Text("hi".to_string())),
                ..Default::default()
            }],
            max_tokens: Some(100),
            ..Default::default()
        };

        assert_json_snapshot!(request, @r#"
        {
          "model": "gpt-5",
          "messages": [
            {
              "role": "user",
              "content": "hi"
            }
          ],
          "max_tokens": 100
        }
        "#);
    }

    #[test]
    fn finish_reason_maps_to_stop_reason() {
        let cases = [
            (UnifiedFinishReason::Stop, UnifiedStopReason::EndTurn),
            (UnifiedFinishReason::Length, UnifiedStopReason::MaxTokens),
            (UnifiedFinishReason::ToolCalls, UnifiedStopReason::ToolUse),
            (UnifiedFinishReason::ContentFilter, UnifiedStopReason::StopSequence),
            (
                UnifiedFinishReason::Other("weird".to_string()),
                UnifiedStopReason::EndTurn,
            ),
        ];

        for (finish, expected) in cases {
            assert_eq!(UnifiedStopReason::from(&finish), expected);
        }
    }

    #[test]
    fn data_url_round_trip() {
        let url = data_url("image/png", "aGVsbG8=");
        assert_eq!(url, "data:image/png;base64,aGVsbG8=");
        assert_eq!(parse_data_url(&url), Some(("image/png", "aGVsbG8=")));
        assert_eq!(parse_data_url("https://example.com/cat.png"), None);
    }

    #[test]
    fn unknown_request_keys_are_preserved() {
        let request: UnifiedRequest = serde_json::from_value(serde_json::json!({
            "model": "gpt-5",
            "messages": [],
            "max_completion_tokens": 512
        }))
        .unwrap();

        assert_eq!(
            request.extra.get("max_completion_tokens"),
            Some(&serde_json::json!(512))
        );
    }

    #[test]
    fn tool_call_delta_parses_partial_fragments() {
        let fragment: UnifiedToolCallDelta = serde_json::from_str(
            r#"{"index":0,"function":{"arguments":"{\"loc"}}"#,
        )
        .unwrap();

        assert_eq!(fragment.index, 0);
        assert!(fragment.id.is_none());
        assert_eq!(fragment.function.unwrap().arguments.as_deref(), Some("{\"loc"));
    }
}
