//! Cerebras adapter: strips unsupported sampling parameters.

use crate::{error::LlmResult, messages::unified::UnifiedRequest, transformer::Transformer};

pub struct CerebrasTransformer;

impl Transformer for CerebrasTransformer {
    fn name(&self) -> &str {
        "cerebras"
    }

    fn request_out(&self, mut request: UnifiedRequest) -> LlmResult<UnifiedRequest> {
        request.presence_penalty = None;
        request.frequency_penalty = None;
        request.reasoning = None;
        request.verbosity = None;

        if let Some(max_tokens) = request.max_tokens.take() {
            request
                .extra
                .insert("max_completion_tokens".to_string(), max_tokens.into());
        }

        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_sampling_params_are_removed() {
        let request = UnifiedRequest {
            model: "qwen-3-coder-480b".to_string(),
            max_tokens: Some(2048),
            presence_penalty: Some(0.5),
            frequency_penalty: Some(0.5),
            ..Default::default()
        };

        let request = CerebrasTransformer.request_out(request).unwrap();

        assert!(request.presence_penalty.is_none());
        assert!(request.frequency_penalty.is_none());
        assert!(request.max_tokens.is_none());
        assert_eq!(
            request.extra.get("max_completion_tokens"),
            Some(&serde_json::json!(2048))
        );
    }
}
