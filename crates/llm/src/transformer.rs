//! The transformer contract and chain composition.
//!
//! A transformer declares a name and any subset of four hooks, plus an
//! optional endpoint override and an auth hook. Instances are built once at
//! startup from configuration and shared read-only across requests; hooks
//! are pure functions of their inputs and constructor-time options, and any
//! per-stream state lives inside the stream returned by `response_stream`.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use config::ProviderConfig;

use crate::{
    error::LlmResult,
    messages::unified::{UnifiedRequest, UnifiedResponse},
    streaming::ChunkStream,
    transformers,
};

/// A single transformation stage.
#[async_trait]
pub trait Transformer: Send + Sync {
    /// Stage name as referenced from configuration.
    fn name(&self) -> &str;

    /// Path appended to the provider base URL instead of the default
    /// `/chat/completions`.
    fn endpoint(&self) -> Option<&str> {
        None
    }

    /// Augment outbound headers (e.g. short-lived bearer tokens).
    async fn auth(&self, headers: HeaderMap, provider: &ProviderConfig) -> LlmResult<HeaderMap> {
        let _ = provider;
        Ok(headers)
    }

    /// Normalise an inbound request towards the unified representation.
    fn request_in(&self, request: UnifiedRequest) -> LlmResult<UnifiedRequest> {
        Ok(request)
    }

    /// Shape the unified request for the upstream provider.
    fn request_out(&self, request: UnifiedRequest) -> LlmResult<UnifiedRequest> {
        Ok(request)
    }

    /// Normalise a non-streaming upstream response. The dispatched request
    /// is available for stages that reconcile against conversation history.
    fn response_in(&self, response: UnifiedResponse, request: &UnifiedRequest) -> LlmResult<UnifiedResponse> {
        let _ = request;
        Ok(response)
    }

    /// Shape the unified response for the client dialect.
    fn response_out(&self, response: UnifiedResponse) -> LlmResult<UnifiedResponse> {
        Ok(response)
    }

    /// Wrap the upstream chunk stream. All per-stream state must live in
    /// the returned stream, never on `self`; anything needed from the
    /// request is cloned into it up front.
    fn response_stream(&self, stream: ChunkStream, request: &UnifiedRequest) -> ChunkStream {
        let _ = request;
        stream
    }

    /// Rewrite the outbound body after serialisation. Only stages that need
    /// wire shapes other than chat-completions (the Responses API bridge,
    /// Vertex Claude) implement this.
    fn body_out(&self, body: serde_json::Value) -> LlmResult<serde_json::Value> {
        Ok(body)
    }

    /// Rewrite the raw non-streaming upstream body before the typed parse.
    /// The counterpart of [`Transformer::body_out`].
    fn body_in(&self, body: serde_json::Value) -> LlmResult<serde_json::Value> {
        Ok(body)
    }
}

impl std::fmt::Debug for dyn Transformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transformer").field("name", &self.name()).finish()
    }
}

/// The ordered list of transformers bound to a provider (plus any
/// model-scoped stages appended by the builder).
#[derive(Clone, Default, Debug)]
pub struct TransformerChain {
    stages: Vec<Arc<dyn Transformer>>,
}

impl TransformerChain {
    pub fn new(stages: Vec<Arc<dyn Transformer>>) -> Self {
        Self { stages }
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Concatenate two chains (provider chain + model-scoped chain).
    pub fn extend(&mut self, other: TransformerChain) {
        self.stages.extend(other.stages);
    }

    /// The endpoint override: the last stage that declares one wins.
    pub fn endpoint(&self) -> Option<&str> {
        self.stages.iter().rev().find_map(|stage| stage.endpoint())
    }

    pub fn request_in(&self, mut request: UnifiedRequest) -> LlmResult<UnifiedRequest> {
        for stage in &self.stages {
            log::debug!("requestIn: {}", stage.name());
            request = stage.request_in(request)?;
        }
        Ok(request)
    }

    pub fn request_out(&self, mut request: UnifiedRequest) -> LlmResult<UnifiedRequest> {
        for stage in &self.stages {
            log::debug!("requestOut: {}", stage.name());
            request = stage.request_out(request)?;
        }
        Ok(request)
    }

    pub fn body_out(&self, mut body: serde_json::Value) -> LlmResult<serde_json::Value> {
        for stage in &self.stages {
            body = stage.body_out(body)?;
        }
        Ok(body)
    }

    pub fn body_in(&self, mut body: serde_json::Value) -> LlmResult<serde_json::Value> {
        for stage in &self.stages {
            body = stage.body_in(body)?;
        }
        Ok(body)
    }

    pub fn response_in(&self, mut response: UnifiedResponse, request: &UnifiedRequest) -> LlmResult<UnifiedResponse> {
        for stage in &self.stages {
            log::debug!("responseIn: {}", stage.name());
            response = stage.response_in(response, request)?;
        }
        Ok(response)
    }

    pub fn response_out(&self, mut response: UnifiedResponse) -> LlmResult<UnifiedResponse> {
        for stage in &self.stages {
            log::debug!("responseOut: {}", stage.name());
            response = stage.response_out(response)?;
        }
        Ok(response)
    }

    pub fn response_stream(&self, mut stream: ChunkStream, request: &UnifiedRequest) -> ChunkStream {
        for stage in &self.stages {
            stream = stage.response_stream(stream, request);
        }
        stream
    }

    pub async fn auth(&self, mut headers: HeaderMap, provider: &ProviderConfig) -> LlmResult<HeaderMap> {
        for stage in &self.stages {
            headers = stage.auth(headers, provider).await?;
        }
        Ok(headers)
    }
}

/// Instantiate a transformer from its configured name and options.
///
/// Unknown names and invalid option tables fail startup.
pub fn build_transformer(
    name: &str,
    options: Option<&serde_json::Value>,
) -> anyhow::Result<Arc<dyn Transformer>> {
    let stage: Arc<dyn Transformer> = match name {
        "openai" => Arc::new(transformers::openai::OpenAiTransformer::new(options)?),
        "openai-responses" => Arc::new(transformers::responses::ResponsesTransformer),
        "openrouter" => Arc::new(transformers::openrouter::OpenRouterTransformer::new(options)?),
        "deepseek" => Arc::new(transformers::deepseek::DeepseekTransformer),
        "gemini" => Arc::new(transformers::vertex::GeminiTransformer),
        "vertex" => Arc::new(transformers::vertex::VertexTransformer::new(options)?),
        "vertex-claude" => Arc::new(transformers::vertex::VertexClaudeTransformer),
        "groq" => Arc::new(transformers::groq::GroqTransformer),
        "cerebras" => Arc::new(transformers::cerebras::CerebrasTransformer),
        "kimi" => Arc::new(transformers::kimi::KimiTransformer::new(options)?),
        "minimax" => Arc::new(transformers::minimax::MinimaxTransformer::new(options)?),
        "reasoning" => Arc::new(transformers::reasoning::ReasoningTransformer),
        other => anyhow::bail!("Unknown transformer '{other}'"),
    };

    Ok(stage)
}

/// Build a chain from configuration entries.
pub fn build_chain(entries: &[config::TransformerRef]) -> anyhow::Result<TransformerChain> {
    let mut stages = Vec::with_capacity(entries.len());

    for entry in entries {
        stages.push(build_transformer(entry.name(), entry.options())?);
    }

    Ok(TransformerChain::new(stages))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::unified::{UnifiedContent, UnifiedMessage, UnifiedRole};

    struct Tagger(&'static str);

    impl Transformer for Tagger {
        fn name(&self) -> &str {
            self.0
        }

        fn request_out(&self, mut request: UnifiedRequest) -> LlmResult<UnifiedRequest> {
            request.messages.push(UnifiedMessage {
                role: UnifiedRole::System,
                content: Some(UnifiedContent::Text(self.0.to_string())),
                ..Default::default()
            });
            Ok(request)
        }

        fn endpoint(&self) -> Option<&str> {
            (self.0 == "second").then_some("/special")
        }
    }

    #[test]
    fn stages_run_left_to_right() {
        let chain = TransformerChain::new(vec![Arc::new(Tagger("first")), Arc::new(Tagger("second"))]);

        let request = chain.request_out(UnifiedRequest::default()).unwrap();
        let tags: Vec<String> = request.messages.iter().map(|m| m.text()).collect();

        assert_eq!(tags, vec!["first", "second"]);
    }

    #[test]
    fn last_declared_endpoint_wins() {
        let chain = TransformerChain::new(vec![Arc::new(Tagger("second")), Arc::new(Tagger("first"))]);
        assert_eq!(chain.endpoint(), Some("/special"));
    }

    #[test]
    fn unknown_transformer_fails_startup() {
        let error = build_transformer("does-not-exist", None).unwrap_err();
        assert_eq!(error.to_string(), "Unknown transformer 'does-not-exist'");
    }

    #[test]
    fn chain_builds_from_config_entries() {
        let entries = vec![
            config::TransformerRef::Name("openai".to_string()),
            config::TransformerRef::WithOptions(
                "kimi".to_string(),
                serde_json::json!({ "manualToolParsing": true }),
            ),
        ];

        let chain = build_chain(&entries).unwrap();
        assert!(!chain.is_empty());
    }
}
