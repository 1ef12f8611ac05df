//! Deepseek adapter: keeps `reasoning_content` alive across reasoner turns.

use crate::{
    error::LlmResult,
    messages::unified::{UnifiedRequest, UnifiedResponse, UnifiedRole},
    transformer::Transformer,
};

pub struct DeepseekTransformer;

fn is_reasoner(model: &str) -> bool {
    model.contains("reasoner")
}

impl Transformer for DeepseekTransformer {
    fn name(&self) -> &str {
        "deepseek"
    }

    fn request_out(&self, mut request: UnifiedRequest) -> LlmResult<UnifiedRequest> {
        if !is_reasoner(&request.model) {
            return Ok(request);
        }

        // The reasoner API rejects assistant turns without the field.
        for message in &mut request.messages {
            if message.role == UnifiedRole::Assistant && message.reasoning_content.is_none() {
                message.reasoning_content = Some(String::new());
            }
        }

        Ok(request)
    }

    fn response_in(&self, mut response: UnifiedResponse, _request: &UnifiedRequest) -> LlmResult<UnifiedResponse> {
        if !is_reasoner(&response.model) {
            return Ok(response);
        }

        for choice in &mut response.choices {
            if choice.message.reasoning_content.is_none() {
                choice.message.reasoning_content = Some(String::new());
            }
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::unified::{UnifiedChoice, UnifiedContent, UnifiedMessage};

    #[test]
    fn reasoner_assistant_messages_get_empty_reasoning_content() {
        let request = UnifiedRequest {
            model: "deepseek-reasoner".to_string(),
            messages: vec![
                UnifiedMessage {
                    role: UnifiedRole::User,
                    content: Some(UnifiedContent::Text("hi".to_string())),
                    ..Default::default()
                },
                UnifiedMessage {
                    role: UnifiedRole::Assistant,
                    content: Some(UnifiedContent::Text("hello".to_string())),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let request = DeepseekTransformer.request_out(request).unwrap();

        assert!(request.messages[0].reasoning_content.is_none());
        assert_eq!(request.messages[1].reasoning_content.as_deref(), Some(""));
    }

    #[test]
    fn chat_model_is_untouched() {
        let request = UnifiedRequest {
            model: "deepseek-chat".to_string(),
            messages: vec![UnifiedMessage {
                role: UnifiedRole::Assistant,
                ..Default::default()
            }],
            ..Default::default()
        };

        let request = DeepseekTransformer.request_out(request).unwrap();
        assert!(request.messages[0].reasoning_content.is_none());
    }

    #[test]
    fn response_choice_exposes_reasoning_content() {
        let response = UnifiedResponse {
            model: "deepseek-reasoner".to_string(),
            choices: vec![UnifiedChoice::default()],
            ..Default::default()
        };

        let response = DeepseekTransformer
            .response_in(response, &UnifiedRequest::default())
            .unwrap();
        assert_eq!(
            response.choices[0].message.reasoning_content.as_deref(),
            Some("")
        );
    }
}
