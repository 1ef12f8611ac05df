//! Kimi-K2 adapter: marker-embedded tool-call parsing, canonical ID repair
//! and streaming delta assembly for OpenAI-compatible Kimi upstreams.

use std::collections::BTreeMap;

use futures::StreamExt;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::{
    error::{LlmError, LlmResult},
    messages::unified::{
        UnifiedChoiceDelta, UnifiedChunk, UnifiedContent, UnifiedDelta, UnifiedFinishReason,
        UnifiedFunctionCall, UnifiedFunctionCallDelta, UnifiedRequest, UnifiedResponse, UnifiedRole,
        UnifiedToolCall, UnifiedToolCallDelta, UnifiedToolChoice, UnifiedToolChoiceMode,
    },
    streaming::{ChunkStream, StreamItem},
    transformer::Transformer,
};

/// Ceiling for per-stream assembly buffers.
const MAX_ASSEMBLY_BYTES: usize = 1024 * 1024;

/// The K2 marker set.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct ToolTokens {
    pub section_begin: String,
    pub section_end: String,
    pub call_begin: String,
    pub argument_begin: String,
    pub call_end: String,
}

impl Default for ToolTokens {
    fn default() -> Self {
        Self {
            section_begin: "<|tool_calls_section_begin|>".to_string(),
            section_end: "<|tool_calls_section_end|>".to_string(),
            call_begin: "<|tool_call_begin|>".to_string(),
            argument_begin: "<|tool_call_argument_begin|>".to_string(),
            call_end: "<|tool_call_end|>".to_string(),
        }
    }
}

/// Counter scope for canonical indices. Only the conversation scope is
/// implemented; `request` is parsed for config compatibility and behaves
/// the same.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterScope {
    #[default]
    Conversation,
    Request,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct KimiOptions {
    pub tool_choice_default: Option<String>,
    pub accept_role_tool: bool,
    pub enforce_finish_reason_loop: bool,
    pub manual_tool_parsing: bool,
    /// Reserved; accepted but a no-op (the cleaned text is always used).
    pub emit_tool_calls_in_json: bool,
    pub assemble_tool_deltas: bool,
    pub id_normalization: bool,
    pub repair_on_mismatch: bool,
    pub id_prefix: String,
    pub counter_scope: CounterScope,
    pub tool_tokens: ToolTokens,
}

impl Default for KimiOptions {
    fn default() -> Self {
        Self {
            tool_choice_default: Some("auto".to_string()),
            accept_role_tool: true,
            enforce_finish_reason_loop: true,
            manual_tool_parsing: false,
            emit_tool_calls_in_json: false,
            assemble_tool_deltas: false,
            id_normalization: false,
            repair_on_mismatch: true,
            id_prefix: "functions".to_string(),
            counter_scope: CounterScope::Conversation,
            tool_tokens: ToolTokens::default(),
        }
    }
}

pub struct KimiTransformer {
    options: KimiOptions,
    canonical: Regex,
}

impl KimiTransformer {
    pub fn new(options: Option<&Value>) -> anyhow::Result<Self> {
        let options: KimiOptions = match options {
            Some(options) => serde_json::from_value(options.clone())?,
            None => KimiOptions::default(),
        };

        if options.counter_scope == CounterScope::Request {
            log::debug!("counterScope=request is accepted but indices are conversation-scoped");
        }

        if options.emit_tool_calls_in_json {
            log::debug!("emitToolCallsInJson is reserved and has no effect");
        }

        let canonical = canonical_regex(&options.id_prefix)?;

        Ok(Self { options, canonical })
    }
}

/// Canonical form is `{prefix}.{function}:{n}`.
fn canonical_regex(prefix: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!(r"^{}\.([A-Za-z0-9_-]+):(\d+)$", regex::escape(prefix)))
}

impl Transformer for KimiTransformer {
    fn name(&self) -> &str {
        "kimi"
    }

    fn request_out(&self, mut request: UnifiedRequest) -> LlmResult<UnifiedRequest> {
        if self.options.accept_role_tool {
            for message in &request.messages {
                if message.role != UnifiedRole::Tool {
                    continue;
                }

                if message.tool_call_id.as_deref().is_none_or(str::is_empty) {
                    return Err(LlmError::BadRequest(
                        "tool message is missing tool_call_id".to_string(),
                    ));
                }

                if message.text().is_empty() {
                    return Err(LlmError::BadRequest(
                        "tool message has empty content".to_string(),
                    ));
                }
            }
        }

        if let Some(default) = &self.options.tool_choice_default {
            if request.tools.as_ref().is_some_and(|tools| !tools.is_empty())
                && request.tool_choice.is_none()
            {
                request.tool_choice = Some(match default.as_str() {
                    "none" => UnifiedToolChoice::Mode(UnifiedToolChoiceMode::None),
                    "required" => UnifiedToolChoice::Mode(UnifiedToolChoiceMode::Required),
                    _ => UnifiedToolChoice::Mode(UnifiedToolChoiceMode::Auto),
                });
            }
        }

        Ok(request)
    }

    fn response_in(&self, mut response: UnifiedResponse, request: &UnifiedRequest) -> LlmResult<UnifiedResponse> {
        let next_index = next_canonical_index(&request.messages, &self.canonical);

        for choice in &mut response.choices {
            if self.options.manual_tool_parsing {
                let text = choice.message.text();

                if let Some(parsed) = parse_marker_section(&text, &self.options.tool_tokens) {
                    if !parsed.calls.is_empty() {
                        choice.message.content = Some(UnifiedContent::Text(parsed.cleaned));

                        let calls = choice.message.tool_calls.get_or_insert_with(Vec::new);
                        calls.extend(parsed.calls);

                        if self.options.enforce_finish_reason_loop {
                            choice.finish_reason = Some(UnifiedFinishReason::ToolCalls);
                        }
                    }
                }
            }

            if let Some(calls) = choice.message.tool_calls.as_mut() {
                repair_ids(
                    calls,
                    next_index,
                    &self.options.id_prefix,
                    &self.canonical,
                    self.options.id_normalization,
                    self.options.repair_on_mismatch,
                );
            }

            if self.options.enforce_finish_reason_loop
                && choice.message.tool_calls.as_ref().is_some_and(|c| !c.is_empty())
            {
                choice.finish_reason = Some(UnifiedFinishReason::ToolCalls);
            }
        }

        Ok(response)
    }

    fn response_stream(&self, stream: ChunkStream, request: &UnifiedRequest) -> ChunkStream {
        if !self.options.assemble_tool_deltas {
            return stream;
        }

        #[derive(Default)]
        struct Assembly {
            buffers: BTreeMap<u32, PartialCall>,
            buffered_bytes: usize,
            emitted: bool,
            failed: bool,
        }

        #[derive(Default)]
        struct PartialCall {
            id: String,
            name: String,
            arguments: String,
        }

        let next_index = next_canonical_index(&request.messages, &self.canonical);
        let id_prefix = self.options.id_prefix.clone();
        let canonical = self.canonical.clone();
        let id_normalization = self.options.id_normalization;
        let repair_on_mismatch = self.options.repair_on_mismatch;

        let stream = stream
            .scan(Assembly::default(), move |state, item| {
                if state.failed {
                    return futures::future::ready(None);
                }

                let out: Vec<Result<StreamItem, LlmError>> = match item {
                    Ok(StreamItem::Chunk(chunk)) => {
                        let mut out = Vec::with_capacity(2);
                        let mut finish_with_tools = false;

                        if let Some(choice) = chunk.choices.first() {
                            if let Some(tool_calls) = &choice.delta.tool_calls {
                                for call in tool_calls {
                                    let buffer = state.buffers.entry(call.index).or_default();

                                    if let Some(id) = call.id.as_deref().filter(|id| !id.is_empty()) {
                                        buffer.id = id.to_string();
                                    }

                                    if let Some(function) = &call.function {
                                        if let Some(name) =
                                            function.name.as_deref().filter(|name| !name.is_empty())
                                        {
                                            buffer.name = name.to_string();
                                        }

                                        if let Some(arguments) = &function.arguments {
                                            buffer.arguments.push_str(arguments);
                                            state.buffered_bytes += arguments.len();
                                        }
                                    }

                                    // A named call without an id gets one early
                                    // so mid-stream consumers see a stable pair.
                                    if buffer.id.is_empty() && !buffer.name.is_empty() {
                                        buffer.id = format!("{id_prefix}.{}:{}", buffer.name, call.index);
                                    }
                                }
                            }

                            finish_with_tools =
                                choice.finish_reason == Some(UnifiedFinishReason::ToolCalls);
                        }

                        if state.buffered_bytes > MAX_ASSEMBLY_BYTES {
                            state.failed = true;
                            out.push(Err(LlmError::UpstreamStreamError(format!(
                                "tool-call assembly buffer exceeded {MAX_ASSEMBLY_BYTES} bytes"
                            ))));
                            return futures::future::ready(Some(out));
                        }

                        // The original upstream chunk is always forwarded unchanged.
                        out.push(Ok(StreamItem::Chunk(chunk)));

                        if finish_with_tools && !state.emitted && !state.buffers.is_empty() {
                            state.emitted = true;
                            out.push(Ok(StreamItem::Chunk(assembled_chunk(
                                state.buffers.iter(),
                                next_index,
                                &id_prefix,
                                &canonical,
                                id_normalization,
                                repair_on_mismatch,
                            ))));
                        }

                        out
                    }
                    Ok(StreamItem::Done) => {
                        let mut out = Vec::with_capacity(2);

                        if !state.emitted && !state.buffers.is_empty() {
                            state.emitted = true;
                            out.push(Ok(StreamItem::Chunk(assembled_chunk(
                                state.buffers.iter(),
                                next_index,
                                &id_prefix,
                                &canonical,
                                id_normalization,
                                repair_on_mismatch,
                            ))));
                        }

                        out.push(Ok(StreamItem::Done));
                        out
                    }
                    other => vec![other],
                };

                futures::future::ready(Some(out))
            })
            .flat_map(futures::stream::iter);

        return Box::pin(stream);

        /// The synthesised final chunk carrying the assembled, repaired
        /// calls sorted by index.
        fn assembled_chunk<'a>(
            buffers: impl Iterator<Item = (&'a u32, &'a PartialCall)>,
            next_index: i64,
            id_prefix: &str,
            canonical: &Regex,
            id_normalization: bool,
            repair_on_mismatch: bool,
        ) -> UnifiedChunk {
            // BTreeMap iteration gives the calls sorted by index.
            let mut repaired: Vec<UnifiedToolCall> = buffers
                .map(|(_, partial)| UnifiedToolCall {
                    id: partial.id.clone(),
                    kind: "function".to_string(),
                    function: UnifiedFunctionCall {
                        name: partial.name.clone(),
                        arguments: partial.arguments.clone(),
                    },
                })
                .collect();

            repair_ids(
                &mut repaired,
                next_index,
                id_prefix,
                canonical,
                id_normalization,
                repair_on_mismatch,
            );

            let tool_calls = repaired
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

            UnifiedChunk {
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
            }
        }
    }
}

/// 1 + the maximum canonical index observed anywhere in the conversation;
/// 0 when nothing canonical was seen.
fn next_canonical_index(messages: &[crate::messages::unified::UnifiedMessage], canonical: &Regex) -> i64 {
    let mut max_seen: i64 = -1;

    for message in messages {
        if let Some(calls) = &message.tool_calls {
            for call in calls {
                if let Some(n) = canonical_index(&call.id, canonical) {
                    max_seen = max_seen.max(n);
                }
            }
        }

        if let Some(id) = &message.tool_call_id {
            if let Some(n) = canonical_index(id, canonical) {
                max_seen = max_seen.max(n);
            }
        }
    }

    max_seen + 1
}

fn canonical_index(id: &str, canonical: &Regex) -> Option<i64> {
    canonical
        .captures(id)
        .and_then(|captures| captures.get(2))
        .and_then(|index| index.as_str().parse().ok())
}

/// Rewrite non-conforming (or, under normalisation, all) ids into
/// `{prefix}.{name}:{n}`, advancing past the conversation maximum.
/// Idempotent on an already-canonical set.
fn repair_ids(
    calls: &mut [UnifiedToolCall],
    next_index: i64,
    prefix: &str,
    canonical: &Regex,
    id_normalization: bool,
    repair_on_mismatch: bool,
) {
    let mut offset: i64 = 0;

    for call in calls {
        let conforms = canonical.is_match(&call.id);

        if id_normalization || (repair_on_mismatch && !conforms) {
            call.id = format!("{prefix}.{}:{}", call.function.name, next_index + offset);
            offset += 1;
        }
    }
}

struct ParsedSection {
    calls: Vec<UnifiedToolCall>,
    cleaned: String,
}

/// Extract marker-framed tool calls from assistant text. Returns `None`
/// when no complete section is present; malformed sections leave the text
/// untouched.
fn parse_marker_section(text: &str, tokens: &ToolTokens) -> Option<ParsedSection> {
    let section_start = text.find(&tokens.section_begin)?;
    let section_body_start = section_start + tokens.section_begin.len();
    let section_end_rel = text[section_body_start..].find(&tokens.section_end)?;
    let section_body = &text[section_body_start..section_body_start + section_end_rel];
    let section_end = section_body_start + section_end_rel + tokens.section_end.len();

    let mut calls = Vec::new();
    let mut cursor = section_body;

    while let Some(call_start) = cursor.find(&tokens.call_begin) {
        let after_begin = &cursor[call_start + tokens.call_begin.len()..];
        let Some(arg_split) = after_begin.find(&tokens.argument_begin) else {
            return None;
        };
        let Some(call_end) = after_begin[arg_split..].find(&tokens.call_end) else {
            return None;
        };

        let func_id = after_begin[..arg_split].trim();
        let arguments = after_begin[arg_split + tokens.argument_begin.len()..arg_split + call_end].trim();

        let (name, _) = parse_func_id(func_id);

        calls.push(UnifiedToolCall {
            id: func_id.to_string(),
            kind: "function".to_string(),
            function: UnifiedFunctionCall {
                name,
                arguments: arguments.to_string(),
            },
        });

        cursor = &after_begin[arg_split + call_end + tokens.call_end.len()..];
    }

    let cleaned = strip_section(text, section_start, section_end);

    Some(ParsedSection { calls, cleaned })
}

/// `funcId` parses as `<prefix>.<name>:<idx>`; both prefix and index are
/// optional, and an unparsable id becomes the whole name.
fn parse_func_id(func_id: &str) -> (String, Option<u32>) {
    let (name_part, index) = match func_id.rsplit_once(':') {
        Some((head, idx)) if !idx.is_empty() && idx.bytes().all(|b| b.is_ascii_digit()) => {
            (head, idx.parse().ok())
        }
        _ => (func_id, None),
    };

    let name = match name_part.split_once('.') {
        Some((_, name)) if !name.is_empty() => name,
        _ => name_part,
    };

    (name.to_string(), index)
}

/// Remove the marker section, collapsing the surrounding whitespace.
fn strip_section(text: &str, start: usize, end: usize) -> String {
    let before = text[..start].trim_end();
    let after = text[end..].trim_start();

    match (before.is_empty(), after.is_empty()) {
        (true, true) => String::new(),
        (true, false) => after.to_string(),
        (false, true) => before.to_string(),
        (false, false) => format!("{before}\n\n{after}"),
    }
}
