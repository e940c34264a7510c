use std::collections::BTreeMap;
use std::time::Instant;

use crate::transformer::{ToolCallDelta, UpstreamTick};
use crate::uif::{ContentBlockStart, ContentDelta, StopReason, StreamChunk, Usage};

#[derive(Debug, Clone)]
struct ToolBlockInfo {
    block_index: u32,
}

/// Translates an arbitrary upstream SSE stream into well-formed
/// `StreamChunk`s while bytes are still arriving, synthesizing
/// `message_start`/block-start events on demand so a stream that never
/// produces content never emits start events nobody needed (spec §4.6).
///
/// Generalizes the teacher's per-pair stream-state struct into one
/// machine shared by every protocol pair; protocol-specific parsing lives
/// in `Transformer::upstream_event_to_tick`, protocol-specific rendering
/// in `Transformer::render_client_event`.
#[derive(Debug)]
pub struct StreamStateMachine {
    id: String,
    model: String,
    message_started: bool,
    ping_emitted: bool,
    finish_emitted: bool,
    pending_finish: Option<StopReason>,
    next_block_index: u32,
    thinking_block_index: Option<u32>,
    text_block_index: Option<u32>,
    tool_blocks: BTreeMap<i64, ToolBlockInfo>,
    accumulated_usage: Usage,
    first_token_at: Option<Instant>,
}

impl StreamStateMachine {
    pub fn new(id: String, model: String) -> Self {
        Self {
            id,
            model,
            message_started: false,
            ping_emitted: false,
            finish_emitted: false,
            pending_finish: None,
            next_block_index: 0,
            thinking_block_index: None,
            text_block_index: None,
            tool_blocks: BTreeMap::new(),
            accumulated_usage: Usage::default(),
            first_token_at: None,
        }
    }

    pub fn first_token_at(&self) -> Option<Instant> {
        self.first_token_at
    }

    pub fn accumulated_usage(&self) -> Usage {
        self.accumulated_usage
    }

    /// Feed one already-parsed upstream tick, returning the `StreamChunk`s
    /// it produces. Call `finish` once the upstream body ends.
    pub fn ingest(&mut self, tick: UpstreamTick) -> Vec<StreamChunk> {
        let mut events = Vec::new();

        let has_content = tick.text_delta.is_some()
            || tick.thinking_delta.is_some()
            || !tick.tool_call_deltas.is_empty();

        if has_content {
            self.ensure_started(&mut events);
            if self.first_token_at.is_none() {
                self.first_token_at = Some(Instant::now());
            }
        }

        if let Some(thinking) = tick.thinking_delta.filter(|t| !t.is_empty()) {
            events.extend(self.emit_thinking(&thinking));
        }

        if let Some(text) = tick.text_delta.filter(|t| !t.is_empty()) {
            events.extend(self.emit_text(&text));
        }

        for call in &tick.tool_call_deltas {
            events.extend(self.emit_tool_call(call));
        }

        if let Some(usage) = tick.usage {
            // Output-token accumulation is monotonic: a later, smaller
            // provider-reported count never retracts an earlier one.
            self.accumulated_usage.input_tokens =
                self.accumulated_usage.input_tokens.max(usage.input_tokens);
            self.accumulated_usage.output_tokens =
                self.accumulated_usage.output_tokens.max(usage.output_tokens);
            if usage.cache_read_tokens.is_some() {
                self.accumulated_usage.cache_read_tokens = usage.cache_read_tokens;
            }
        }

        if let Some(reason) = tick.finish_reason {
            self.pending_finish = Some(reason);
        }

        events
    }

    /// Account for locally-counted output tokens when the upstream never
    /// supplies a usage block mid-stream (spec §4.6 step 3: "otherwise
    /// count tokens on emitted text").
    pub fn add_local_output_tokens(&mut self, count: i64) {
        self.accumulated_usage.output_tokens =
            (self.accumulated_usage.output_tokens + count).max(self.accumulated_usage.output_tokens);
    }

    pub fn set_input_tokens_if_unset(&mut self, count: i64) {
        if self.accumulated_usage.input_tokens == 0 {
            self.accumulated_usage.input_tokens = count;
        }
    }

    fn ensure_started(&mut self, events: &mut Vec<StreamChunk>) {
        if !self.message_started {
            self.message_started = true;
            events.push(StreamChunk::MessageStart {
                id: self.id.clone(),
                model: self.model.clone(),
            });
        }
        if !self.ping_emitted {
            self.ping_emitted = true;
            events.push(StreamChunk::Ping);
        }
    }

    fn emit_thinking(&mut self, text: &str) -> Vec<StreamChunk> {
        let mut events = Vec::new();
        let index = match self.thinking_block_index {
            Some(index) => index,
            None => {
                let index = self.next_block_index;
                self.next_block_index += 1;
                self.thinking_block_index = Some(index);
                events.push(StreamChunk::ContentBlockStart {
                    index,
                    block: ContentBlockStart::Thinking,
                });
                index
            }
        };
        events.push(StreamChunk::ContentBlockDelta {
            index,
            delta: ContentDelta::ThinkingDelta {
                text: text.to_string(),
            },
        });
        events
    }

    fn emit_text(&mut self, text: &str) -> Vec<StreamChunk> {
        let mut events = Vec::new();
        let index = match self.text_block_index {
            Some(index) => index,
            None => {
                let index = self.next_block_index;
                self.next_block_index += 1;
                self.text_block_index = Some(index);
                events.push(StreamChunk::ContentBlockStart {
                    index,
                    block: ContentBlockStart::Text,
                });
                index
            }
        };
        events.push(StreamChunk::ContentBlockDelta {
            index,
            delta: ContentDelta::TextDelta {
                text: text.to_string(),
            },
        });
        events
    }

    fn emit_tool_call(&mut self, call: &ToolCallDelta) -> Vec<StreamChunk> {
        let mut events = Vec::new();
        let next_block_index = self.next_block_index;
        let mut allocated = false;
        let info = self.tool_blocks.entry(call.index).or_insert_with(|| {
            allocated = true;
            ToolBlockInfo {
                block_index: next_block_index,
            }
        });
        if allocated {
            self.next_block_index += 1;
            let id = call
                .id
                .clone()
                .unwrap_or_else(|| format!("toolcall-{}", call.index));
            let name = call.name.clone().unwrap_or_else(|| "tool".to_string());
            events.push(StreamChunk::ContentBlockStart {
                index: info.block_index,
                block: ContentBlockStart::ToolUse { id, name },
            });
        }

        if let Some(partial_json) = &call.arguments_delta {
            events.push(StreamChunk::ContentBlockDelta {
                index: info.block_index,
                delta: ContentDelta::InputJsonDelta {
                    partial_json: partial_json.clone(),
                },
            });
        }

        events
    }

    /// Upstream stream ended (DONE sentinel, empty chunk, or EOF). Emits
    /// the close-out sequence exactly once, and only if any content was
    /// ever started.
    pub fn finish(&mut self) -> Vec<StreamChunk> {
        if !self.message_started || self.finish_emitted {
            return Vec::new();
        }
        self.finish_emitted = true;

        let mut events = Vec::new();
        if let Some(index) = self.thinking_block_index.take() {
            events.push(StreamChunk::ContentBlockStop { index });
        }
        if let Some(index) = self.text_block_index.take() {
            events.push(StreamChunk::ContentBlockStop { index });
        }
        for (_, info) in std::mem::take(&mut self.tool_blocks) {
            events.push(StreamChunk::ContentBlockStop {
                index: info.block_index,
            });
        }

        events.push(StreamChunk::MessageDelta {
            stop_reason: self.pending_finish.or(Some(StopReason::EndTurn)),
            usage: self.accumulated_usage,
        });
        events.push(StreamChunk::MessageStop);
        events
    }

    /// Client disconnected mid-stream: abort without emitting the
    /// close-out sequence (spec §4.6, §5).
    pub fn abort(&mut self) {
        self.finish_emitted = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick_text(text: &str) -> UpstreamTick {
        UpstreamTick {
            text_delta: Some(text.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn emits_message_start_then_ping_once_then_text_block_once() {
        let mut machine = StreamStateMachine::new("msg_1".to_string(), "gpt-4".to_string());
        let first = machine.ingest(tick_text("Hel"));
        assert!(matches!(first[0], StreamChunk::MessageStart { .. }));
        assert!(matches!(first[1], StreamChunk::Ping));
        assert!(matches!(first[2], StreamChunk::ContentBlockStart { index: 0, .. }));
        assert!(matches!(first[3], StreamChunk::ContentBlockDelta { index: 0, .. }));

        let second = machine.ingest(tick_text("lo"));
        assert_eq!(second.len(), 1);
        assert!(matches!(second[0], StreamChunk::ContentBlockDelta { index: 0, .. }));
    }

    #[test]
    fn finish_closes_open_blocks_exactly_once() {
        let mut machine = StreamStateMachine::new("msg_1".to_string(), "gpt-4".to_string());
        machine.ingest(tick_text("hi"));
        machine.pending_finish = Some(StopReason::EndTurn);
        let closing = machine.finish();
        assert!(matches!(closing[0], StreamChunk::ContentBlockStop { index: 0 }));
        assert!(matches!(closing[1], StreamChunk::MessageDelta { .. }));
        assert!(matches!(closing[2], StreamChunk::MessageStop));
        assert!(machine.finish().is_empty());
    }

    #[test]
    fn never_started_stream_emits_nothing_on_finish() {
        let mut machine = StreamStateMachine::new("msg_1".to_string(), "gpt-4".to_string());
        assert!(machine.finish().is_empty());
    }

    #[test]
    fn usage_accumulation_is_monotonic() {
        let mut machine = StreamStateMachine::new("msg_1".to_string(), "gpt-4".to_string());
        machine.ingest(UpstreamTick {
            usage: Some(Usage {
                input_tokens: 10,
                output_tokens: 5,
                cache_read_tokens: None,
            }),
            ..Default::default()
        });
        machine.ingest(UpstreamTick {
            usage: Some(Usage {
                input_tokens: 10,
                output_tokens: 3,
                cache_read_tokens: None,
            }),
            ..Default::default()
        });
        assert_eq!(machine.accumulated_usage().output_tokens, 5);
    }

    #[test]
    fn tool_call_start_emitted_once_per_index() {
        let mut machine = StreamStateMachine::new("msg_1".to_string(), "gpt-4".to_string());
        let delta = ToolCallDelta {
            index: 0,
            id: Some("call_1".to_string()),
            name: Some("get_weather".to_string()),
            arguments_delta: Some("{\"city\":".to_string()),
        };
        let first = machine.ingest(UpstreamTick {
            tool_call_deltas: vec![delta.clone()],
            ..Default::default()
        });
        assert!(first
            .iter()
            .any(|e| matches!(e, StreamChunk::ContentBlockStart { .. })));

        let second = machine.ingest(UpstreamTick {
            tool_call_deltas: vec![ToolCallDelta {
                arguments_delta: Some("\"nyc\"}".to_string()),
                ..delta
            }],
            ..Default::default()
        });
        assert!(second
            .iter()
            .all(|e| !matches!(e, StreamChunk::ContentBlockStart { .. })));
    }
}
