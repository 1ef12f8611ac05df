//! The gateway core: dialect endpoints, transformer pipeline and streaming
//! response engine.

use std::{convert::Infallible, sync::Arc};

use axum::{
    Router,
    extract::{Json, State},
    http::HeaderMap,
    response::{IntoResponse, Sse, sse::Event},
    routing::{get, post},
};
use axum_serde::Sonic;
use futures::StreamExt;
use serde::Serialize;

mod error;
mod http_client;
mod messages;
mod request;
mod server;
mod sse;
mod streaming;
mod transformer;
mod transformers;

pub use error::{AnthropicResult, LlmError, LlmResult as Result};
pub use http_client::init as init_http_client;

use messages::{anthropic, unified};
use server::{LlmServer, LlmServerBuilder};
use streaming::StreamItem;

/// Creates an axum router for the gateway endpoints.
pub fn router(config: &config::Config) -> anyhow::Result<Router> {
    let server = Arc::new(LlmServerBuilder::new(config).build()?);

    Ok(Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/messages", post(anthropic_messages))
        .route("/models", get(list_models))
        .route("/v1/models", get(list_models))
        .with_state(server))
}

/// Handle OpenAI-dialect chat completion requests.
///
/// The unified representation is wire-compatible with this dialect, so the
/// body parses straight into it and responses serialise straight out.
async fn chat_completions(
    State(server): State<Arc<LlmServer>>,
    headers: HeaderMap,
    Sonic(request): Sonic<unified::UnifiedRequest>,
) -> Result<impl IntoResponse> {
    log::debug!("Chat completions handler called for model: {}", request.model);

    let context = request::extract_context(&headers);

    if request.stream.unwrap_or(false) {
        let stream = server.completions_stream(request, &context).await?;

        let event_stream = stream.map(|item| {
            let event = match item {
                Ok(StreamItem::Chunk(chunk)) => {
                    let json = sonic_rs::to_string(&chunk).unwrap_or_else(|e| {
                        log::error!("Failed to serialize chunk: {e}");
                        r#"{"error":{"type":"internal","message":"serialization failed"}}"#.to_string()
                    });
                    Event::default().data(json)
                }
                Ok(StreamItem::Raw(line)) => Event::default().data(line),
                Ok(StreamItem::Done) => Event::default().data("[DONE]"),
                Err(error) => {
                    log::error!("Stream error: {error}");
                    Event::default().data(error.stream_json())
                }
            };

            Ok::<_, Infallible>(event)
        });

        Ok(Sse::new(event_stream).into_response())
    } else {
        let response = server.completions(request, &context).await?;

        log::debug!("Chat completion successful for '{}'", response.model);
        Ok(Json(response).into_response())
    }
}

/// Handle Anthropic-dialect message requests.
async fn anthropic_messages(
    State(server): State<Arc<LlmServer>>,
    headers: HeaderMap,
    Sonic(request): Sonic<anthropic::AnthropicChatRequest>,
) -> AnthropicResult<impl IntoResponse> {
    log::debug!("Anthropic messages handler called for model: {}", request.model);

    let context = request::extract_context(&headers);
    let model = request.model.clone();
    let unified_request = unified::UnifiedRequest::from(request);

    if unified_request.stream.unwrap_or(false) {
        let stream = server
            .completions_stream(unified_request, &context)
            .await
            .map_err(error::AnthropicErrorResponse::from)?;

        let machine = streaming::anthropic::AnthropicEgress::new(model);

        let event_stream = stream
            .scan(machine, |machine, item| {
                let events = match item {
                    Ok(item) => machine.handle(item),
                    Err(error) => {
                        log::error!("Stream error: {error}");
                        vec![machine.error(error.client_message())]
                    }
                };

                let rendered: Vec<Event> = events
                    .into_iter()
                    .map(|event| {
                        let json = sonic_rs::to_string(&event).unwrap_or_else(|e| {
                            log::error!("Failed to serialize Anthropic event: {e}");
                            r#"{"type":"error","error":{"type":"internal","message":"serialization failed"}}"#
                                .to_string()
                        });

                        Event::default().event(event.name()).data(json)
                    })
                    .collect();

                futures::future::ready(Some(rendered))
            })
            .flat_map(futures::stream::iter)
            .map(Ok::<_, Infallible>);

        // The message_stop event ends the stream; there is no [DONE] in
        // this dialect.
        Ok(Sse::new(event_stream).into_response())
    } else {
        let response = server
            .completions(unified_request, &context)
            .await
            .map_err(error::AnthropicErrorResponse::from)?;

        let anthropic_response = anthropic::AnthropicChatResponse::from(response);

        log::debug!("Anthropic messages completion successful");
        Ok(Json(anthropic_response).into_response())
    }
}

#[derive(Serialize)]
struct ModelsResponse {
    object: &'static str,
    data: Vec<ModelEntry>,
}

#[derive(Serialize)]
struct ModelEntry {
    id: String,
    object: &'static str,
    owned_by: String,
    provider: String,
}

/// List configured models, advertising both the bare name and the
/// authoritative `provider,model` synonym.
async fn list_models(State(server): State<Arc<LlmServer>>) -> impl IntoResponse {
    let mut data = Vec::new();

    for provider in &server.shared.providers {
        for model in &provider.config.models {
            for id in [model.clone(), format!("{},{model}", provider.name)] {
                data.push(ModelEntry {
                    id,
                    object: "model",
                    owned_by: provider.name.clone(),
                    provider: provider.name.clone(),
                });
            }
        }
    }

    log::debug!("Returning {} models", data.len());

    Json(ModelsResponse { object: "list", data })
}
