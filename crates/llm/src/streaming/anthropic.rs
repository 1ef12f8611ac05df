//! Conversion of the internal chunk stream into Anthropic streaming events.
//!
//! One [`AnthropicEgress`] instance lives in the closure of a single
//! response stream. It opens and closes content blocks in the order the
//! upstream deltas arrive, guaranteeing that every `content_block_start`
//! is matched by exactly one `content_block_stop` before the next start of
//! the same index and before `message_stop`. Fresh blocks take indices in
//! open order; a tool call resumed after its block closed re-opens the
//! same index with a new start/stop pair.

use std::collections::HashMap;

use serde_json::Value;

use crate::{
    messages::{
        anthropic::{
            AnthropicContent, AnthropicContentDelta, AnthropicMessageDelta, AnthropicRole,
            AnthropicStopReason, AnthropicStreamEvent, AnthropicStreamMessageStart, AnthropicUsage,
        },
        unified::{
            UnifiedChunk, UnifiedFinishReason, UnifiedStopReason, UnifiedToolCallDelta, UnifiedUsage,
        },
    },
    streaming::StreamItem,
};

/// Which content block is currently open.
#[derive(Debug, Clone, Copy, PartialEq)]
enum BlockState {
    None,
    Text,
    Thinking,
    /// A tool-use block, keyed by the upstream tool-call index.
    Tool(u32),
}

/// Bookkeeping for one streamed tool call.
struct ToolBlock {
    /// Assigned content-block index.
    index: u32,
    id: String,
    name: String,
    /// The id/name were synthesised because the first fragment omitted
    /// them; a later fragment may still upgrade the pair in place.
    provisional_id: bool,
    provisional_name: bool,
    /// Whether any argument fragment was emitted on this block.
    args_emitted: bool,
    /// Whether the block's `content_block_stop` has been emitted. A
    /// resumed call re-opens the same index with a fresh start event so
    /// bracketing stays intact.
    closed: bool,
}

/// Per-stream state machine for Anthropic-dialect egress.
pub struct AnthropicEgress {
    model: String,
    started: bool,
    finished: bool,
    block: BlockState,
    /// Next content-block index to assign; fresh blocks never reuse one.
    next_index: u32,
    /// Index of the currently open block.
    current_index: u32,
    /// Upstream tool-call index to its block bookkeeping.
    tool_blocks: HashMap<u32, ToolBlock>,
    /// Stop reason and usage stashed until the stream ends.
    pending_delta: Option<AnthropicMessageDelta>,
    last_usage: Option<UnifiedUsage>,
}

impl AnthropicEgress {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            started: false,
            finished: false,
            block: BlockState::None,
            next_index: 0,
            current_index: 0,
            tool_blocks: HashMap::new(),
            pending_delta: None,
            last_usage: None,
        }
    }

    /// Feed one stream item, producing zero or more egress events.
    pub fn handle(&mut self, item: StreamItem) -> Vec<AnthropicStreamEvent> {
        match item {
            StreamItem::Chunk(chunk) => self.handle_chunk(chunk),
            StreamItem::Raw(line) => {
                log::debug!("Skipping unparsable upstream line on Anthropic egress: {line}");
                Vec::new()
            }
            StreamItem::Done => self.finish(),
        }
    }

    /// Flush the pending message delta and close the stream.
    pub fn finish(&mut self) -> Vec<AnthropicStreamEvent> {
        if self.finished || !self.started {
            self.finished = true;
            return Vec::new();
        }

        self.finished = true;
        let mut events = Vec::new();

        self.close_open_block(&mut events);

        let delta = self.pending_delta.take().unwrap_or(AnthropicMessageDelta {
            stop_reason: Some(AnthropicStopReason::EndTurn),
            stop_sequence: None,
        });

        events.push(AnthropicStreamEvent::MessageDelta {
            delta,
            usage: usage_from_unified(self.last_usage.take()),
        });
        events.push(AnthropicStreamEvent::MessageStop);

        events
    }

    /// An error event for mid-stream upstream failures.
    pub fn error(&self, message: String) -> AnthropicStreamEvent {
        AnthropicStreamEvent::Error {
            error: crate::messages::anthropic::ErrorDetails {
                r#type: "upstream_stream_error".to_string(),
                message,
            },
        }
    }

    fn handle_chunk(&mut self, chunk: UnifiedChunk) -> Vec<AnthropicStreamEvent> {
        if self.finished {
            return Vec::new();
        }

        let mut events = Vec::new();

        if !self.started {
            self.started = true;
            events.push(AnthropicStreamEvent::MessageStart {
                message: AnthropicStreamMessageStart {
                    id: if chunk.id.is_empty() {
                        format!("msg_{}", uuid::Uuid::new_v4())
                    } else {
                        chunk.id.clone()
                    },
                    r#type: "message".to_string(),
                    role: AnthropicRole::Assistant,
                    content: Vec::new(),
                    model: if chunk.model.is_empty() {
                        self.model.clone()
                    } else {
                        chunk.model.clone()
                    },
                    stop_reason: None,
                    stop_sequence: None,
                    usage: AnthropicUsage::default(),
                },
            });
        }

        if let Some(usage) = &chunk.usage {
            self.last_usage = Some(usage.clone());
        }

        let Some(choice) = chunk.choices.first() else {
            return events;
        };

        let delta = &choice.delta;

        if let Some(thinking) = &delta.thinking {
            if !thinking.content.is_empty() {
                if self.block != BlockState::Thinking {
                    self.close_open_block(&mut events);
                    self.open_block(
                        BlockState::Thinking,
                        AnthropicContent::Thinking {
                            thinking: String::new(),
                            signature: None,
                        },
                        &mut events,
                    );
                }

                events.push(AnthropicStreamEvent::ContentBlockDelta {
                    index: self.current_index,
                    delta: AnthropicContentDelta::ThinkingDelta {
                        thinking: thinking.content.clone(),
                    },
                });
            }

            if let Some(signature) = &thinking.signature {
                if self.block == BlockState::Thinking {
                    events.push(AnthropicStreamEvent::ContentBlockDelta {
                        index: self.current_index,
                        delta: AnthropicContentDelta::SignatureDelta {
                            signature: signature.clone(),
                        },
                    });
                    events.push(AnthropicStreamEvent::ContentBlockStop {
                        index: self.current_index,
                    });
                    self.block = BlockState::None;
                }
            }
        }

        if let Some(content) = &delta.content {
            if !content.is_empty() {
                if self.block != BlockState::Text {
                    self.close_open_block(&mut events);
                    self.open_block(
                        BlockState::Text,
                        AnthropicContent::Text { text: String::new() },
                        &mut events,
                    );
                }

                events.push(AnthropicStreamEvent::ContentBlockDelta {
                    index: self.current_index,
                    delta: AnthropicContentDelta::TextDelta {
                        text: content.clone(),
                    },
                });
            }
        }

        if let Some(annotations) = &delta.annotations {
            // Web-search blocks stand alone; whatever is open closes first.
            self.close_open_block(&mut events);

            for annotation in annotations {
                let Some(citation) = &annotation.url_citation else {
                    continue;
                };

                let index = self.next_index;
                self.next_index += 1;

                events.push(AnthropicStreamEvent::ContentBlockStart {
                    index,
                    content_block: AnthropicContent::WebSearchToolResult {
                        tool_use_id: format!("srvtoolu_{}", uuid::Uuid::new_v4()),
                        content: serde_json::json!([{
                            "type": "web_search_result",
                            "url": citation.url,
                            "title": citation.title,
                        }]),
                    },
                });
                events.push(AnthropicStreamEvent::ContentBlockStop { index });
            }
        }

        if let Some(tool_calls) = &delta.tool_calls {
            for call in tool_calls {
                self.handle_tool_call(call, chunk.created.unwrap_or_default(), &mut events);
            }
        }

        if let Some(finish_reason) = &choice.finish_reason {
            self.close_open_block(&mut events);

            let stop_reason = stop_reason_from_finish(finish_reason);
            self.pending_delta = Some(AnthropicMessageDelta {
                stop_reason: Some(stop_reason),
                stop_sequence: None,
            });
        }

        events
    }

    fn handle_tool_call(
        &mut self,
        call: &UnifiedToolCallDelta,
        created: u64,
        events: &mut Vec<AnthropicStreamEvent>,
    ) {
        let fragment_id = call.id.as_deref().filter(|id| !id.is_empty());
        let fragment_name = call
            .function
            .as_ref()
            .and_then(|f| f.name.as_deref())
            .filter(|name| !name.is_empty());

        if !self.tool_blocks.contains_key(&call.index) {
            self.close_open_block(&mut *events);

            let index = self.next_index;
            self.next_index += 1;

            // Provisional identity when the first fragment omits it,
            // upgraded in place once a later fragment carries the real pair.
            let block = ToolBlock {
                index,
                id: fragment_id
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("call_{created}_{}", call.index)),
                name: fragment_name
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("tool_{}", call.index)),
                provisional_id: fragment_id.is_none(),
                provisional_name: fragment_name.is_none(),
                args_emitted: false,
                closed: false,
            };

            events.push(tool_block_start(&block));
            self.current_index = index;
            self.block = BlockState::Tool(call.index);
            self.tool_blocks.insert(call.index, block);
        } else {
            let resuming = self.block != BlockState::Tool(call.index);
            if resuming {
                // The upstream interleaved back into an existing tool call.
                self.close_open_block(&mut *events);
            }

            let block = self.tool_blocks.get_mut(&call.index).expect("tracked tool call");

            let mut upgraded = false;
            if let Some(id) = fragment_id {
                if block.provisional_id {
                    upgraded |= block.id != id;
                    block.id = id.to_string();
                    block.provisional_id = false;
                }
            }
            if let Some(name) = fragment_name {
                if block.provisional_name {
                    upgraded |= block.name != name;
                    block.name = name.to_string();
                    block.provisional_name = false;
                }
            }

            if resuming && block.closed {
                // The block already received its stop; re-open the same
                // index so the coming deltas stay bracketed.
                block.closed = false;
                events.push(tool_block_start(block));
            } else if upgraded && !block.args_emitted {
                // Correct the provisional pair before any arguments flow:
                // the provisional block closes and restarts under the real
                // identity.
                events.push(AnthropicStreamEvent::ContentBlockStop { index: block.index });
                events.push(tool_block_start(block));
            } else if upgraded {
                log::debug!(
                    "Tool-call identity for index {} arrived after arguments; the emitted block keeps the provisional pair",
                    call.index
                );
            }

            self.current_index = block.index;
            self.block = BlockState::Tool(call.index);
        }

        let Some(arguments) = call.function.as_ref().and_then(|f| f.arguments.as_deref()) else {
            return;
        };

        if arguments.is_empty() {
            return;
        }

        let fragment = if arguments.chars().any(char::is_control) {
            let cleaned = crate::streaming::sanitize_json(arguments);
            log::warn!("Sanitised control characters in tool-call arguments fragment");
            cleaned
        } else {
            arguments.to_string()
        };

        let block = self.tool_blocks.get_mut(&call.index).expect("tracked tool call");
        block.args_emitted = true;

        events.push(AnthropicStreamEvent::ContentBlockDelta {
            index: block.index,
            delta: AnthropicContentDelta::InputJsonDelta { partial_json: fragment },
        });
    }

    fn open_block(
        &mut self,
        state: BlockState,
        content_block: AnthropicContent,
        events: &mut Vec<AnthropicStreamEvent>,
    ) {
        let index = self.next_index;
        self.next_index += 1;
        self.current_index = index;
        self.block = state;

        events.push(AnthropicStreamEvent::ContentBlockStart { index, content_block });
    }

    fn close_open_block(&mut self, events: &mut Vec<AnthropicStreamEvent>) {
        if self.block == BlockState::None {
            return;
        }

        if let BlockState::Tool(tool_index) = self.block {
            if let Some(block) = self.tool_blocks.get_mut(&tool_index) {
                block.closed = true;
            }
        }

        events.push(AnthropicStreamEvent::ContentBlockStop {
            index: self.current_index,
        });
        self.block = BlockState::None;
    }
}

/// A `content_block_start` for a tool block, carrying its current identity.
fn tool_block_start(block: &ToolBlock) -> AnthropicStreamEvent {
    AnthropicStreamEvent::ContentBlockStart {
        index: block.index,
        content_block: AnthropicContent::ToolUse {
            id: block.id.clone(),
            name: block.name.clone(),
            input: Value::Object(serde_json::Map::new()),
        },
    }
}

fn stop_reason_from_finish(reason: &UnifiedFinishReason) -> AnthropicStopReason {
    match UnifiedStopReason::from(reason) {
        UnifiedStopReason::EndTurn => AnthropicStopReason::EndTurn,
        UnifiedStopReason::MaxTokens => AnthropicStopReason::MaxTokens,
        UnifiedStopReason::StopSequence => AnthropicStopReason::StopSequence,
        UnifiedStopReason::ToolUse => AnthropicStopReason::ToolUse,
    }
}

fn usage_from_unified(usage: Option<UnifiedUsage>) -> AnthropicUsage {
    let Some(usage) = usage else {
        return AnthropicUsage::default();
    };

    AnthropicUsage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        cache_read_input_tokens: usage
            .prompt_tokens_details
            .and_then(|details| details.cached_tokens),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::unified::{
        UnifiedChoiceDelta, UnifiedDelta, UnifiedFunctionCallDelta, UnifiedThinking,
    };

    fn chunk_with_delta(delta: UnifiedDelta) -> StreamItem {
        StreamItem::Chunk(UnifiedChunk {
            id: "chatcmpl-1".to_string(),
            model: "test-model".to_string(),
            choices: vec![UnifiedChoiceDelta {
                index: 0,
                delta,
                finish_reason: None,
            }],
            ..Default::default()
        })
    }

    fn text_chunk(text: &str) -> StreamItem {
        chunk_with_delta(UnifiedDelta {
            content: Some(text.to_string()),
            ..Default::default()
        })
    }

    fn finish_chunk(reason: UnifiedFinishReason) -> StreamItem {
        StreamItem::Chunk(UnifiedChunk {
            id: "chatcmpl-1".to_string(),
            model: "test-model".to_string(),
            choices: vec![UnifiedChoiceDelta {
                index: 0,
                delta: UnifiedDelta::default(),
                finish_reason: Some(reason),
            }],
            ..Default::default()
        })
    }

    fn event_names(events: &[AnthropicStreamEvent]) -> Vec<&'static str> {
        events.iter().map(AnthropicStreamEvent::name).collect()
    }

    fn run(items: Vec<StreamItem>) -> Vec<AnthropicStreamEvent> {
        let mut machine = AnthropicEgress::new("test-model");
        let mut events = Vec::new();
        for item in items {
            events.extend(machine.handle(item));
        }
        events
    }

    #[test]
    fn text_stream_produces_bracketed_events() {
        let events = run(vec![
            text_chunk("Hel"),
            text_chunk("lo"),
            finish_chunk(UnifiedFinishReason::Stop),
            StreamItem::Done,
        ]);

        assert_eq!(
            event_names(&events),
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
    }

    #[test]
    fn thinking_then_text_uses_distinct_indices() {
        let events = run(vec![
            chunk_with_delta(UnifiedDelta {
                thinking: Some(UnifiedThinking {
                    content: "pondering".to_string(),
                    signature: None,
                }),
                ..Default::default()
            }),
            chunk_with_delta(UnifiedDelta {
                thinking: Some(UnifiedThinking {
                    content: String::new(),
                    signature: Some("sig".to_string()),
                }),
                ..Default::default()
            }),
            text_chunk("answer"),
            StreamItem::Done,
        ]);

        assert_eq!(
            event_names(&events),
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );

        // Thinking block took index 0, text block index 1.
        let text_start = events
            .iter()
            .find_map(|event| match event {
                AnthropicStreamEvent::ContentBlockStart {
                    index,
                    content_block: AnthropicContent::Text { .. },
                } => Some(*index),
                _ => None,
            })
            .unwrap();
        assert_eq!(text_start, 1);
    }

    #[test]
    fn tool_call_fragments_become_input_json_deltas() {
        let events = run(vec![
            text_chunk("Let me check."),
            chunk_with_delta(UnifiedDelta {
                tool_calls: Some(vec![UnifiedToolCallDelta {
                    index: 0,
                    id: Some("call_1".to_string()),
                    kind: Some("function".to_string()),
                    function: Some(UnifiedFunctionCallDelta {
                        name: Some("get_weather".to_string()),
                        arguments: Some(String::new()),
                    }),
                }]),
                ..Default::default()
            }),
            chunk_with_delta(UnifiedDelta {
                tool_calls: Some(vec![UnifiedToolCallDelta {
                    index: 0,
                    function: Some(UnifiedFunctionCallDelta {
                        name: None,
                        arguments: Some(r#"{"location":"Beijing"}"#.to_string()),
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            finish_chunk(UnifiedFinishReason::ToolCalls),
            StreamItem::Done,
        ]);

        assert_eq!(
            event_names(&events),
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );

        let (id, name) = events
            .iter()
            .find_map(|event| match event {
                AnthropicStreamEvent::ContentBlockStart {
                    content_block: AnthropicContent::ToolUse { id, name, .. },
                    ..
                } => Some((id.clone(), name.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(id, "call_1");
        assert_eq!(name, "get_weather");

        let partial = events
            .iter()
            .find_map(|event| match event {
                AnthropicStreamEvent::ContentBlockDelta {
                    delta: AnthropicContentDelta::InputJsonDelta { partial_json },
                    ..
                } => Some(partial_json.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(partial, r#"{"location":"Beijing"}"#);

        let stop_reason = events.iter().find_map(|event| match event {
            AnthropicStreamEvent::MessageDelta { delta, .. } => delta.stop_reason,
            _ => None,
        });
        assert_eq!(stop_reason, Some(AnthropicStopReason::ToolUse));
    }

    /// Every content_block_start(i) must be matched by exactly one
    /// content_block_stop(i) before either the next start of the same
    /// index or message_stop.
    fn assert_bracketing(events: &[AnthropicStreamEvent]) {
        let mut open = std::collections::HashSet::new();
        let mut stopped = false;

        for event in events {
            match event {
                AnthropicStreamEvent::ContentBlockStart { index, .. } => {
                    assert!(!stopped);
                    assert!(open.insert(*index), "index {index} opened twice without a stop");
                }
                AnthropicStreamEvent::ContentBlockDelta { index, .. } => {
                    assert!(open.contains(index), "delta on closed index {index}");
                }
                AnthropicStreamEvent::ContentBlockStop { index } => {
                    assert!(open.remove(index), "stop without start for {index}");
                }
                AnthropicStreamEvent::MessageStop => {
                    assert!(open.is_empty(), "blocks left open at message_stop");
                    stopped = true;
                }
                _ => {}
            }
        }

        assert!(stopped);
    }

    #[test]
    fn block_bracketing_invariant_under_interleaving() {
        let events = run(vec![
            chunk_with_delta(UnifiedDelta {
                thinking: Some(UnifiedThinking {
                    content: "t".to_string(),
                    signature: None,
                }),
                ..Default::default()
            }),
            // Text interrupts thinking without a signature first.
            text_chunk("a"),
            chunk_with_delta(UnifiedDelta {
                tool_calls: Some(vec![UnifiedToolCallDelta {
                    index: 0,
                    id: Some("call_x".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            text_chunk("b"),
            // The upstream resumes the first tool call after text closed it.
            chunk_with_delta(UnifiedDelta {
                tool_calls: Some(vec![UnifiedToolCallDelta {
                    index: 0,
                    function: Some(UnifiedFunctionCallDelta {
                        name: None,
                        arguments: Some(r#"{"q":1}"#.to_string()),
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            StreamItem::Done,
        ]);

        assert_bracketing(&events);
    }

    /// Resuming a tool call whose block was closed re-opens the same index
    /// with a fresh start event before any further deltas.
    #[test]
    fn resumed_tool_call_reopens_its_block() {
        let events = run(vec![
            chunk_with_delta(UnifiedDelta {
                tool_calls: Some(vec![UnifiedToolCallDelta {
                    index: 0,
                    id: Some("call_1".to_string()),
                    kind: Some("function".to_string()),
                    function: Some(UnifiedFunctionCallDelta {
                        name: Some("get_weather".to_string()),
                        arguments: Some(r#"{"loc"#.to_string()),
                    }),
                }]),
                ..Default::default()
            }),
            text_chunk("checking"),
            chunk_with_delta(UnifiedDelta {
                tool_calls: Some(vec![UnifiedToolCallDelta {
                    index: 0,
                    function: Some(UnifiedFunctionCallDelta {
                        name: None,
                        arguments: Some(r#"ation":"Paris"}"#.to_string()),
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            StreamItem::Done,
        ]);

        assert_bracketing(&events);

        // The tool block (index 0) starts twice, both times with the same
        // identity, and the second argument delta follows the re-open.
        let tool_starts: Vec<u32> = events
            .iter()
            .filter_map(|event| match event {
                AnthropicStreamEvent::ContentBlockStart {
                    index,
                    content_block: AnthropicContent::ToolUse { id, name, .. },
                } => {
                    assert_eq!(id, "call_1");
                    assert_eq!(name, "get_weather");
                    Some(*index)
                }
                _ => None,
            })
            .collect();
        assert_eq!(tool_starts, vec![0, 0]);

        let fragments: Vec<&str> = events
            .iter()
            .filter_map(|event| match event {
                AnthropicStreamEvent::ContentBlockDelta {
                    delta: AnthropicContentDelta::InputJsonDelta { partial_json },
                    ..
                } => Some(partial_json.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(fragments.concat(), r#"{"location":"Paris"}"#);
    }

    /// A provisional id/name pair is upgraded in place once the real pair
    /// arrives, as long as no arguments have flowed yet.
    #[test]
    fn provisional_pair_upgrades_in_place() {
        let events = run(vec![
            chunk_with_delta(UnifiedDelta {
                tool_calls: Some(vec![UnifiedToolCallDelta {
                    index: 0,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            chunk_with_delta(UnifiedDelta {
                tool_calls: Some(vec![UnifiedToolCallDelta {
                    index: 0,
                    id: Some("call_real".to_string()),
                    kind: Some("function".to_string()),
                    function: Some(UnifiedFunctionCallDelta {
                        name: Some("search".to_string()),
                        arguments: None,
                    }),
                }]),
                ..Default::default()
            }),
            chunk_with_delta(UnifiedDelta {
                tool_calls: Some(vec![UnifiedToolCallDelta {
                    index: 0,
                    function: Some(UnifiedFunctionCallDelta {
                        name: None,
                        arguments: Some(r#"{"q":"x"}"#.to_string()),
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            StreamItem::Done,
        ]);

        assert_bracketing(&events);

        let identities: Vec<(String, String)> = events
            .iter()
            .filter_map(|event| match event {
                AnthropicStreamEvent::ContentBlockStart {
                    content_block: AnthropicContent::ToolUse { id, name, .. },
                    ..
                } => Some((id.clone(), name.clone())),
                _ => None,
            })
            .collect();

        // The provisional start is corrected by a restart under the real pair.
        assert_eq!(identities.len(), 2);
        assert!(identities[0].0.starts_with("call_"));
        assert_eq!(identities[0].1, "tool_0");
        assert_eq!(identities[1], ("call_real".to_string(), "search".to_string()));

        // Arguments flow only after the corrected start.
        let corrected_at = events
            .iter()
            .position(|event| {
                matches!(
                    event,
                    AnthropicStreamEvent::ContentBlockStart {
                        content_block: AnthropicContent::ToolUse { id, .. },
                        ..
                    } if id == "call_real"
                )
            })
            .unwrap();
        let first_fragment_at = events
            .iter()
            .position(|event| {
                matches!(
                    event,
                    AnthropicStreamEvent::ContentBlockDelta {
                        delta: AnthropicContentDelta::InputJsonDelta { .. },
                        ..
                    }
                )
            })
            .unwrap();
        assert!(corrected_at < first_fragment_at);
    }

    #[test]
    fn missing_id_gets_provisional_pair() {
        let events = run(vec![
            chunk_with_delta(UnifiedDelta {
                tool_calls: Some(vec![UnifiedToolCallDelta {
                    index: 2,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            StreamItem::Done,
        ]);

        let (id, name) = events
            .iter()
            .find_map(|event| match event {
                AnthropicStreamEvent::ContentBlockStart {
                    content_block: AnthropicContent::ToolUse { id, name, .. },
                    ..
                } => Some((id.clone(), name.clone())),
                _ => None,
            })
            .unwrap();

        assert!(id.starts_with("call_"));
        assert_eq!(name, "tool_2");
    }

    #[test]
    fn stream_end_without_finish_reason_defaults_to_end_turn() {
        let events = run(vec![text_chunk("hi"), StreamItem::Done]);

        let stop_reason = events.iter().find_map(|event| match event {
            AnthropicStreamEvent::MessageDelta { delta, .. } => delta.stop_reason,
            _ => None,
        });
        assert_eq!(stop_reason, Some(AnthropicStopReason::EndTurn));
    }

    #[test]
    fn cancellation_mid_stream_emits_nothing_further() {
        let mut machine = AnthropicEgress::new("test-model");
        machine.handle(text_chunk("partial"));
        // The stream is simply dropped; a second finish stays silent.
        let first = machine.finish();
        assert!(!first.is_empty());
        assert!(machine.finish().is_empty());
    }
}
