//! OpenAI provider adapter, covering the GPT-5 family quirks.

use serde::Deserialize;
use serde_json::Value;

use crate::{
    error::LlmResult,
    messages::unified::{ReasoningEffort, UnifiedContent, UnifiedRequest, UnifiedResponse, UnifiedTool},
    transformer::Transformer,
};

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
struct OpenAiOptions {
    /// Effort used when a structured `reasoning` object carries no effort.
    reasoning_effort_default: Option<ReasoningEffort>,
}

pub struct OpenAiTransformer {
    options: OpenAiOptions,
}

impl OpenAiTransformer {
    pub fn new(options: Option<&Value>) -> anyhow::Result<Self> {
        let options = match options {
            Some(options) => serde_json::from_value(options.clone())?,
            None => OpenAiOptions::default(),
        };

        Ok(Self { options })
    }
}

impl Transformer for OpenAiTransformer {
    fn name(&self) -> &str {
        "openai"
    }

    fn request_out(&self, mut request: UnifiedRequest) -> LlmResult<UnifiedRequest> {
        let gpt5 = request.model.starts_with("gpt-5");

        if gpt5 {
            // The GPT-5 family rejects max_tokens and non-default temperature.
            if let Some(max_tokens) = request.max_tokens.take() {
                request
                    .extra
                    .insert("max_completion_tokens".to_string(), max_tokens.into());
            }

            if request.temperature.is_some_and(|t| (t - 1.0).abs() > f32::EPSILON) {
                log::debug!("Dropping non-default temperature for {}", request.model);
                request.temperature = None;
            }
        }

        // Lift a structured reasoning object to the flat field.
        if let Some(reasoning) = request.reasoning.take() {
            if request.reasoning_effort.is_none() {
                request.reasoning_effort = Some(
                    reasoning
                        .effort
                        .or(self.options.reasoning_effort_default)
                        .unwrap_or(ReasoningEffort::Medium),
                );
            }
        }

        if let Some(tools) = request.tools.as_mut() {
            for tool in tools.iter_mut() {
                if let UnifiedTool::Function { function } = tool {
                    clean_schema(&mut function.parameters);
                }
            }
        }

        // An invalid verbosity that arrived as a raw key is dropped rather
        // than rejected upstream.
        if let Some(verbosity) = request.extra.get("verbosity") {
            let valid = verbosity
                .as_str()
                .is_some_and(|v| matches!(v, "low" | "medium" | "high"));
            if !valid {
                log::warn!("Dropping invalid verbosity value: {verbosity}");
                request.extra.remove("verbosity");
            }
        }

        Ok(request)
    }

    fn response_in(&self, mut response: UnifiedResponse, _request: &UnifiedRequest) -> LlmResult<UnifiedResponse> {
        for choice in &mut response.choices {
            let Some(reasoning) = choice.message.reasoning_content.take() else {
                continue;
            };

            if reasoning.is_empty() {
                continue;
            }

            let text = choice.message.text();
            choice.message.content = Some(UnifiedContent::Text(format!(
                "<reasoning>{reasoning}</reasoning>{text}"
            )));
            choice
                .message
                .extra
                .insert("_reasoning_content".to_string(), Value::String(reasoning));
        }

        Ok(response)
    }
}

/// Remove JSON-schema keys the API rejects, recursively.
fn clean_schema(schema: &mut Value) {
    match schema {
        Value::Object(map) => {
            map.remove("$schema");
            map.remove("additionalProperties");
            for value in map.values_mut() {
                clean_schema(value);
            }
        }
        Value::Array(items) => {
            for item in items {
                clean_schema(item);
            }
        }
        _ => {}
    }
}
