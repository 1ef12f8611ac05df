//! The pipeline engine: model routing, transformer chains, dispatch and the
//! streaming read loop.

mod builder;

pub(crate) use builder::LlmServerBuilder;

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue, header};
use futures::StreamExt;
use itertools::Itertools;
use secrecy::ExposeSecret;

use crate::{
    error::{LlmError, LlmResult},
    http_client::http_client,
    messages::unified::{UnifiedChunk, UnifiedRequest, UnifiedResponse},
    request::{RequestContext, forwarded_headers},
    sse::{SseDecoder, SseFrame},
    streaming::{ChunkStream, StreamItem},
    transformer::TransformerChain,
};

const DEFAULT_ENDPOINT: &str = "/chat/completions";

/// A configured provider with its transformer chains.
#[derive(Debug)]
pub(crate) struct ProviderHandle {
    pub name: String,
    pub config: config::ProviderConfig,
    pub chain: TransformerChain,
    /// Sub-chains scoped to a model name, appended after the provider chain.
    pub model_chains: BTreeMap<String, TransformerChain>,
}

#[derive(Debug)]
pub(crate) struct LlmServerInner {
    pub(crate) providers: Vec<ProviderHandle>,
    /// Bare model name to provider index.
    pub(crate) routes: BTreeMap<String, usize>,
}

#[derive(Clone, Debug)]
pub(crate) struct LlmServer {
    pub(crate) shared: Arc<LlmServerInner>,
}

#[derive(Debug)]
struct ResolvedRoute<'a> {
    provider: &'a ProviderHandle,
    /// Model name with any `provider,` prefix removed.
    bare_model: String,
}

impl LlmServer {
    /// Resolve `provider,model` or a routed bare model to a provider.
    fn resolve_route(&self, requested_model: &str) -> LlmResult<ResolvedRoute<'_>> {
        if let Some((provider_name, model_name)) = requested_model.split_once(',') {
            if model_name.is_empty() {
                return Err(LlmError::UnknownModel(requested_model.to_string()));
            }

            let Some(provider) = self
                .shared
                .providers
                .iter()
                .find(|provider| provider.name == provider_name)
            else {
                log::warn!(
                    "Provider '{provider_name}' not found. Configured providers: [{providers}]",
                    providers = self.shared.providers.iter().map(|p| p.name.as_str()).join(", ")
                );
                return Err(LlmError::UnknownModel(requested_model.to_string()));
            };

            return Ok(ResolvedRoute {
                provider,
                bare_model: model_name.to_string(),
            });
        }

        let Some(&index) = self.shared.routes.get(requested_model) else {
            log::warn!("Model '{requested_model}' has no configured route");
            return Err(LlmError::UnknownModel(requested_model.to_string()));
        };

        Ok(ResolvedRoute {
            provider: &self.shared.providers[index],
            bare_model: requested_model.to_string(),
        })
    }

    /// The provider chain, with the model-scoped sub-chain appended.
    fn chain_for<'a>(&self, route: &ResolvedRoute<'a>) -> TransformerChain {
        let mut chain = route.provider.chain.clone();

        if let Some(scoped) = route.provider.model_chains.get(&route.bare_model) {
            chain.extend(scoped.clone());
        }

        chain
    }

    /// Non-streaming completion.
    pub async fn completions(
        &self,
        request: UnifiedRequest,
        context: &RequestContext,
    ) -> LlmResult<UnifiedResponse> {
        let original_model = request.model.clone();
        let route = self.resolve_route(&original_model)?;
        let chain = self.chain_for(&route);

        let mut request = request;
        request.model = route.bare_model.clone();
        request.stream = None;

        let request = chain.request_in(request)?;
        let request = chain.request_out(request)?;

        let body = serde_json::to_value(&request)
            .map_err(|e| LlmError::Internal(Some(format!("request serialisation failed: {e}"))))?;
        let body = chain.body_out(body)?;

        let response = self.dispatch(&chain, route.provider, context, &body).await?;

        let status = response.status();
        let text = response.text().await.map_err(LlmError::from)?;

        if !status.is_success() {
            log::warn!("Upstream '{}' returned {status}", route.provider.name);
            return Err(LlmError::ProviderError {
                status: status.as_u16(),
                body: text,
            });
        }

        let body: serde_json::Value = sonic_rs::from_str(&text)
            .map_err(|e| LlmError::Internal(Some(format!("unparsable upstream response: {e}"))))?;
        let body = chain.body_in(body)?;

        let response: UnifiedResponse = serde_json::from_value(body)
            .map_err(|e| LlmError::Internal(Some(format!("unexpected upstream response shape: {e}"))))?;

        let response = chain.response_in(response, &request)?;
        let mut response = chain.response_out(response)?;
        response.model = original_model;

        Ok(response)
    }

    /// Streaming completion. The returned stream ends with exactly one
    /// `Done` item.
    pub async fn completions_stream(
        &self,
        request: UnifiedRequest,
        context: &RequestContext,
    ) -> LlmResult<ChunkStream> {
        let original_model = request.model.clone();
        let route = self.resolve_route(&original_model)?;
        let chain = self.chain_for(&route);

        let mut request = request;
        request.model = route.bare_model.clone();
        request.stream = Some(true);

        let request = chain.request_in(request)?;
        let request = chain.request_out(request)?;

        let body = serde_json::to_value(&request)
            .map_err(|e| LlmError::Internal(Some(format!("request serialisation failed: {e}"))))?;
        let body = chain.body_out(body)?;

        let response = self.dispatch(&chain, route.provider, context, &body).await?;

        let status = response.status();

        if !status.is_success() {
            let text = response.text().await.unwrap_or_else(|_| "<empty body>".to_string());
            log::warn!("Upstream '{}' returned {status}", route.provider.name);
            return Err(LlmError::ProviderError {
                status: status.as_u16(),
                body: text,
            });
        }

        let upstream = decode_stream(response.bytes_stream());
        let stream = chain.response_stream(upstream, &request);

        // Restore the model name the client asked for.
        let stream = stream.map(move |item| {
            item.map(|item| match item {
                StreamItem::Chunk(mut chunk) => {
                    chunk.model = original_model.clone();
                    StreamItem::Chunk(chunk)
                }
                other => other,
            })
        });

        Ok(Box::pin(stream))
    }

    /// Compose and send the outbound request.
    async fn dispatch(
        &self,
        chain: &TransformerChain,
        provider: &ProviderHandle,
        context: &RequestContext,
        body: &serde_json::Value,
    ) -> LlmResult<reqwest::Response> {
        let endpoint = chain.endpoint().unwrap_or(DEFAULT_ENDPOINT);
        let url = format!("{}{endpoint}", provider.config.api_base_url.trim_end_matches('/'));

        let mut headers = forwarded_headers(&context.headers);
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(api_key) = &provider.config.api_key {
            attach_api_key(&mut headers, provider.config.auth_scheme, api_key.expose_secret())?;
        }

        let headers = chain.auth(headers, &provider.config).await?;

        let bytes = serde_json::to_vec(body)
            .map_err(|e| LlmError::Internal(Some(format!("request serialisation failed: {e}"))))?;

        log::debug!("Dispatching to {url}");

        let response = http_client()
            .post(&url)
            .headers(headers)
            .timeout(Duration::from_secs(provider.config.timeout_secs))
            .body(bytes)
            .send()
            .await?;

        Ok(response)
    }
}

fn attach_api_key(
    headers: &mut HeaderMap,
    scheme: config::AuthScheme,
    key: &str,
) -> LlmResult<()> {
    match scheme {
        config::AuthScheme::Bearer => {
            let value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|_| LlmError::Auth("API key is not a valid header value".to_string()))?;
            headers.insert(header::AUTHORIZATION, value);
        }
        config::AuthScheme::XApiKey => {
            let value = HeaderValue::from_str(key)
                .map_err(|_| LlmError::Auth("API key is not a valid header value".to_string()))?;
            headers.insert("x-api-key", value);
        }
    }

    Ok(())
}

/// Turn the upstream byte stream into normalised stream items: one chunk is
/// read, zero or more items are produced, then the next chunk is read. The
/// stream always ends with exactly one `Done`.
fn decode_stream<S>(bytes: S) -> ChunkStream
where
    S: futures::Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
{
    struct DecodeState {
        bytes: futures::stream::BoxStream<'static, reqwest::Result<bytes::Bytes>>,
        decoder: SseDecoder,
        queue: VecDeque<Result<StreamItem, LlmError>>,
        eof: bool,
        done_sent: bool,
    }

    let state = DecodeState {
        bytes: bytes.boxed(),
        decoder: SseDecoder::new(),
        queue: VecDeque::new(),
        eof: false,
        done_sent: false,
    };

    let stream = futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.queue.pop_front() {
                return Some((item, state));
            }

            if state.eof {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => match state.decoder.feed(&chunk) {
                    Ok(frames) => enqueue_frames(frames, &mut state.queue, &mut state.done_sent),
                    Err(error) => {
                        state.eof = true;
                        state.queue.push_back(Err(error));
                    }
                },
                Some(Err(error)) => {
                    state.eof = true;
                    state
                        .queue
                        .push_back(Err(LlmError::UpstreamStreamError(error.to_string())));
                }
                None => {
                    state.eof = true;

                    match state.decoder.finish() {
                        Ok(frames) => enqueue_frames(frames, &mut state.queue, &mut state.done_sent),
                        Err(error) => state.queue.push_back(Err(error)),
                    }

                    if !state.done_sent {
                        state.done_sent = true;
                        state.queue.push_back(Ok(StreamItem::Done));
                    }
                }
            }
        }
    });

    Box::pin(stream)
}

fn enqueue_frames(
    frames: Vec<SseFrame>,
    queue: &mut VecDeque<Result<StreamItem, LlmError>>,
    done_sent: &mut bool,
) {
    for frame in frames {
        if *done_sent {
            break;
        }

        match frame {
            SseFrame::Done => {
                *done_sent = true;
                queue.push_back(Ok(StreamItem::Done));
            }
            SseFrame::Event { data, .. } => queue.push_back(classify_frame(data)),
        }
    }
}

/// Parse a data payload into a chunk, an in-stream error, or a raw
/// passthrough line. JSON that fails to parse is forwarded unchanged.
fn classify_frame(data: String) -> Result<StreamItem, LlmError> {
    let Ok(value) = sonic_rs::from_str::<serde_json::Value>(&data) else {
        return Ok(StreamItem::Raw(data));
    };

    if value.get("error").is_some() && value.get("choices").is_none() {
        return Err(LlmError::UpstreamStreamError(data));
    }

    if value.get("choices").is_some() || value.get("usage").is_some() {
        match serde_json::from_value::<UnifiedChunk>(value) {
            Ok(chunk) => return Ok(StreamItem::Chunk(chunk)),
            Err(error) => {
                log::debug!("Forwarding chunk that failed typed parse: {error}");
                return Ok(StreamItem::Raw(data));
            }
        }
    }

    // Well-formed JSON that is not a chat chunk (e.g. Responses API or
    // Anthropic events) stays raw for the chain to interpret.
    Ok(StreamItem::Raw(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformer::TransformerChain;

    fn test_server(providers: Vec<(&str, Vec<&str>)>) -> LlmServer {
        let mut handles = Vec::new();
        let mut routes = BTreeMap::new();

        for (index, (name, models)) in providers.into_iter().enumerate() {
            let config: config::ProviderConfig = toml::from_str(&format!(
                "api_base_url = \"https://{name}.example/v1\"\napi_key = \"test-key\"\n"
            ))
            .unwrap();

            for model in &models {
                routes.insert(model.to_string(), index);
            }

            handles.push(ProviderHandle {
                name: name.to_string(),
                config,
                chain: TransformerChain::default(),
                model_chains: BTreeMap::new(),
            });
        }

        LlmServer {
            shared: Arc::new(LlmServerInner {
                providers: handles,
                routes,
            }),
        }
    }

    #[test]
    fn comma_form_is_authoritative() {
        let server = test_server(vec![("openai", vec!["gpt-5"]), ("backup", vec![])]);

        let route = server.resolve_route("backup,gpt-5").unwrap();
        assert_eq!(route.provider.name, "backup");
        assert_eq!(route.bare_model, "gpt-5");
    }

    #[test]
    fn splits_on_first_comma_only() {
        let server = test_server(vec![("openrouter", vec![])]);

        let route = server.resolve_route("openrouter,deepseek,deepseek-r1").unwrap();
        assert_eq!(route.provider.name, "openrouter");
        assert_eq!(route.bare_model, "deepseek,deepseek-r1");
    }

    #[test]
    fn bare_model_uses_route_table() {
        let server = test_server(vec![("openai", vec!["gpt-5"])]);

        let route = server.resolve_route("gpt-5").unwrap();
        assert_eq!(route.provider.name, "openai");
        assert_eq!(route.bare_model, "gpt-5");
    }

    #[test]
    fn unknown_model_is_rejected() {
        let server = test_server(vec![("openai", vec!["gpt-5"])]);

        let error = server.resolve_route("claude-sonnet").unwrap_err();
        assert!(matches!(error, LlmError::UnknownModel(_)));

        let error = server.resolve_route("nonexistent,gpt-5").unwrap_err();
        assert!(matches!(error, LlmError::UnknownModel(_)));

        let error = server.resolve_route("openai,").unwrap_err();
        assert!(matches!(error, LlmError::UnknownModel(_)));
    }

    #[test]
    fn error_frames_surface_as_stream_errors() {
        let item = classify_frame(r#"{"error":{"type":"overloaded","message":"busy"}}"#.to_string());
        assert!(matches!(item, Err(LlmError::UpstreamStreamError(_))));
    }

    #[test]
    fn chunk_frames_parse_and_garbage_passes_through() {
        let item = classify_frame(
            r#"{"id":"c1","model":"m","choices":[{"index":0,"delta":{"content":"hi"}}]}"#.to_string(),
        )
        .unwrap();
        assert!(matches!(item, StreamItem::Chunk(_)));

        let item = classify_frame("not json {".to_string()).unwrap();
        assert!(matches!(item, StreamItem::Raw(_)));

        let item = classify_frame(r#"{"type":"response.created"}"#.to_string()).unwrap();
        assert!(matches!(item, StreamItem::Raw(_)));
    }
}
