//! Groq adapter: strips parameters the API rejects.

use crate::{error::LlmResult, messages::unified::UnifiedRequest, transformer::Transformer};

pub struct GroqTransformer;

impl Transformer for GroqTransformer {
    fn name(&self) -> &str {
        "groq"
    }

    fn request_out(&self, mut request: UnifiedRequest) -> LlmResult<UnifiedRequest> {
        request.reasoning = None;
        request.verbosity = None;

        // Only the GPT-OSS models accept reasoning_effort.
        if !request.model.starts_with("openai/") {
            request.reasoning_effort = None;
        }

        if let Some(temperature) = request.temperature {
            request.temperature = Some(temperature.clamp(0.0, 2.0));
        }

        Ok(request)
    }
}
