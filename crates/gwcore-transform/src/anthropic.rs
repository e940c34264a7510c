use gwcore_protocol::anthropic::{
    ContentBlock as WireContentBlock, ContentBlockDelta, ContentBlockParam,
    CreateMessageRequestBody, Message, MessageContent, MessageParam, MessageRole, StreamEvent,
    SystemParam, SystemTextBlock, ToolDefinition, ToolResultContent, Usage as WireUsage,
};
use gwcore_protocol::Protocol;

use crate::content::{
    anthropic_stop_reason_to_stop_reason, join_system_blocks, stop_reason_to_anthropic_stop_reason,
};
use crate::error::TransformError;
use crate::transformer::{StreamRenderContext, ToolCallDelta, Transformer, UpstreamTick};
use crate::uif::{
    ContentBlock, ContentBlockStart, ContentDelta, Role, SamplingParams, StopReason, StreamChunk,
    ToolSpec, UnifiedMessage, UnifiedRequest, UnifiedResponse, Usage,
};

pub struct AnthropicTransformer;

impl Transformer for AnthropicTransformer {
    fn protocol(&self) -> Protocol {
        Protocol::Anthropic
    }

    fn request_to_unified(&self, raw: &[u8]) -> Result<UnifiedRequest, TransformError> {
        let body: CreateMessageRequestBody = serde_json::from_slice(raw)
            .map_err(|e| TransformError::InvalidRequest(e.to_string()))?;

        let system = body.system.map(|system| match system {
            SystemParam::Text(text) => text,
            SystemParam::Blocks(blocks) => {
                join_system_blocks(&blocks.into_iter().map(|b| b.text).collect::<Vec<_>>())
            }
        });

        let mut messages = Vec::new();
        for message in body.messages {
            messages.extend(message_param_to_unified(message));
        }

        Ok(UnifiedRequest {
            model: body.model,
            messages,
            system,
            tools: body.tools.map(|tools| {
                tools
                    .into_iter()
                    .map(|tool| ToolSpec {
                        name: tool.name,
                        description: tool.description,
                        parameters: tool.input_schema,
                    })
                    .collect()
            }),
            tool_choice: None,
            sampling: SamplingParams {
                max_tokens: Some(body.max_tokens),
                temperature: body.temperature,
                top_p: body.top_p,
                stop_sequences: body.stop_sequences,
            },
            stream: body.stream.unwrap_or(false),
        })
    }

    fn unified_to_request(&self, request: &UnifiedRequest) -> Result<Vec<u8>, TransformError> {
        let messages = unified_messages_to_params(&request.messages);
        let body = CreateMessageRequestBody {
            model: request.model.clone(),
            max_tokens: request.sampling.max_tokens.unwrap_or(4096),
            messages,
            system: request
                .system
                .clone()
                .map(|text| SystemParam::Blocks(vec![SystemTextBlock { text }])),
            temperature: request.sampling.temperature,
            top_p: request.sampling.top_p,
            stop_sequences: request.sampling.stop_sequences.clone(),
            stream: Some(request.stream),
            tools: request.tools.as_ref().map(|tools| {
                tools
                    .iter()
                    .map(|tool| ToolDefinition {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        input_schema: tool.parameters.clone(),
                    })
                    .collect()
            }),
            tool_choice: None,
        };
        serde_json::to_vec(&body).map_err(TransformError::from)
    }

    fn response_to_unified(&self, raw: &[u8]) -> Result<UnifiedResponse, TransformError> {
        let message: Message = serde_json::from_slice(raw)
            .map_err(|e| TransformError::InvalidResponse(e.to_string()))?;
        Ok(UnifiedResponse {
            id: message.id,
            model: message.model,
            role: Role::Assistant,
            content: message.content.into_iter().map(wire_block_to_unified).collect(),
            stop_reason: message
                .stop_reason
                .map(anthropic_stop_reason_to_stop_reason)
                .unwrap_or(StopReason::EndTurn),
            usage: Usage {
                input_tokens: message.usage.input_tokens,
                output_tokens: message.usage.output_tokens,
                cache_read_tokens: message.usage.cache_read_input_tokens,
            },
        })
    }

    fn unified_to_response(&self, response: &UnifiedResponse) -> Result<Vec<u8>, TransformError> {
        let message = Message {
            id: response.id.clone(),
            kind: "message",
            role: "assistant",
            content: response.content.iter().map(unified_block_to_wire).collect(),
            model: response.model.clone(),
            stop_reason: Some(stop_reason_to_anthropic_stop_reason(response.stop_reason)),
            stop_sequence: None,
            usage: WireUsage {
                input_tokens: response.usage.input_tokens,
                output_tokens: response.usage.output_tokens,
                cache_read_input_tokens: response.usage.cache_read_tokens,
                cache_creation_input_tokens: None,
            },
        };
        serde_json::to_vec(&message).map_err(TransformError::from)
    }

    fn upstream_event_to_tick(&self, _event_name: Option<&str>, data: &str) -> Option<UpstreamTick> {
        let event: StreamEvent = serde_json::from_str(data).ok()?;
        let mut tick = UpstreamTick::default();
        match event {
            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                ContentBlockDelta::TextDelta { text } => tick.text_delta = Some(text),
                ContentBlockDelta::ThinkingDelta { thinking } => tick.thinking_delta = Some(thinking),
                ContentBlockDelta::SignatureDelta { .. } => {}
                ContentBlockDelta::InputJsonDelta { partial_json } => {
                    tick.tool_call_deltas.push(ToolCallDelta {
                        index,
                        id: None,
                        name: None,
                        arguments_delta: Some(partial_json),
                    });
                }
            },
            StreamEvent::ContentBlockStart { index, content_block } => {
                if let WireContentBlock::ToolUse { id, name, .. } = content_block {
                    tick.tool_call_deltas.push(ToolCallDelta {
                        index,
                        id: Some(id),
                        name: Some(name),
                        arguments_delta: None,
                    });
                }
            }
            StreamEvent::MessageDelta { delta, usage } => {
                tick.finish_reason = delta.stop_reason.map(anthropic_stop_reason_to_stop_reason);
                tick.usage = Some(Usage {
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                    cache_read_tokens: usage.cache_read_input_tokens,
                });
            }
            StreamEvent::MessageStart { message } => {
                tick.usage = Some(Usage {
                    input_tokens: message.usage.input_tokens,
                    output_tokens: message.usage.output_tokens,
                    cache_read_tokens: message.usage.cache_read_input_tokens,
                });
            }
            StreamEvent::ContentBlockStop { .. }
            | StreamEvent::MessageStop
            | StreamEvent::Ping
            | StreamEvent::Error { .. } => {}
        }
        Some(tick)
    }

    fn render_client_event(&self, chunk: &StreamChunk, ctx: &StreamRenderContext) -> Option<String> {
        let event = match chunk {
            StreamChunk::MessageStart { id, model } => StreamEvent::MessageStart {
                message: Message {
                    id: id.clone(),
                    kind: "message",
                    role: "assistant",
                    content: Vec::new(),
                    model: model.clone(),
                    stop_reason: None,
                    stop_sequence: None,
                    usage: WireUsage {
                        input_tokens: 0,
                        output_tokens: 0,
                        cache_read_input_tokens: None,
                        cache_creation_input_tokens: None,
                    },
                },
            },
            StreamChunk::ContentBlockStart { index, block } => StreamEvent::ContentBlockStart {
                index: *index as i64,
                content_block: match block {
                    ContentBlockStart::Text => WireContentBlock::Text { text: String::new() },
                    ContentBlockStart::Thinking => WireContentBlock::Thinking {
                        thinking: String::new(),
                        signature: None,
                    },
                    ContentBlockStart::ToolUse { id, name } => WireContentBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        input: serde_json::json!({}),
                    },
                },
            },
            StreamChunk::ContentBlockDelta { index, delta } => StreamEvent::ContentBlockDelta {
                index: *index as i64,
                delta: match delta {
                    ContentDelta::TextDelta { text } => ContentBlockDelta::TextDelta { text: text.clone() },
                    ContentDelta::ThinkingDelta { text } => {
                        ContentBlockDelta::ThinkingDelta { thinking: text.clone() }
                    }
                    ContentDelta::InputJsonDelta { partial_json } => {
                        ContentBlockDelta::InputJsonDelta {
                            partial_json: partial_json.clone(),
                        }
                    }
                },
            },
            StreamChunk::ContentBlockStop { index } => {
                StreamEvent::ContentBlockStop { index: *index as i64 }
            }
            StreamChunk::MessageDelta { stop_reason, usage } => StreamEvent::MessageDelta {
                delta: gwcore_protocol::anthropic::MessageDeltaPayload {
                    stop_reason: stop_reason.map(stop_reason_to_anthropic_stop_reason),
                    stop_sequence: None,
                },
                usage: WireUsage {
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                    cache_read_input_tokens: usage.cache_read_tokens,
                    cache_creation_input_tokens: None,
                },
            },
            StreamChunk::Ping => StreamEvent::Ping,
            StreamChunk::MessageStop => StreamEvent::MessageStop,
            StreamChunk::Error { message } => StreamEvent::Error {
                error: gwcore_protocol::anthropic::StreamErrorDetail {
                    kind: "api_error".to_string(),
                    message: message.clone(),
                },
            },
        };
        let _ = ctx;
        let name = event.event_name();
        serde_json::to_string(&event)
            .ok()
            .map(|json| gwcore_protocol::sse::encode_event(Some(name), &json))
    }
}

fn wire_block_to_unified(block: WireContentBlock) -> ContentBlock {
    match block {
        WireContentBlock::Text { text } => ContentBlock::Text { text },
        WireContentBlock::ToolUse { id, name, input } => ContentBlock::ToolUse { id, name, arguments: input },
        WireContentBlock::Thinking { thinking, signature } => {
            ContentBlock::Thinking { text: thinking, signature }
        }
    }
}

fn unified_block_to_wire(block: &ContentBlock) -> WireContentBlock {
    match block {
        ContentBlock::Text { text } => WireContentBlock::Text { text: text.clone() },
        ContentBlock::ToolUse { id, name, arguments } => WireContentBlock::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: arguments.clone(),
        },
        ContentBlock::Thinking { text, signature } => WireContentBlock::Thinking {
            thinking: text.clone(),
            signature: signature.clone(),
        },
        ContentBlock::Image { .. } | ContentBlock::ToolResult { .. } => {
            WireContentBlock::Text { text: String::new() }
        }
    }
}

/// An Anthropic user message that mixes `tool_result` and `text` blocks is
/// split so the tool results are emitted as their own message(s) before
/// the text message (spec §4.5.1), preserving OpenAI-form adjacency.
fn message_param_to_unified(message: MessageParam) -> Vec<UnifiedMessage> {
    let role = match message.role {
        MessageRole::User => Role::User,
        MessageRole::Assistant => Role::Assistant,
    };
    let blocks = match message.content {
        MessageContent::Text(text) => vec![ContentBlockParam::Text { text }],
        MessageContent::Blocks(blocks) => blocks,
    };

    if role != Role::User {
        return vec![UnifiedMessage {
            role,
            content: blocks.into_iter().map(param_block_to_unified).collect(),
        }];
    }

    let (tool_results, rest): (Vec<_>, Vec<_>) = blocks
        .into_iter()
        .partition(|block| matches!(block, ContentBlockParam::ToolResult { .. }));

    let mut out = Vec::new();
    for block in tool_results {
        out.push(UnifiedMessage {
            role: Role::Tool,
            content: vec![param_block_to_unified(block)],
        });
    }
    if !rest.is_empty() {
        out.push(UnifiedMessage {
            role: Role::User,
            content: rest.into_iter().map(param_block_to_unified).collect(),
        });
    }
    out
}

fn param_block_to_unified(block: ContentBlockParam) -> ContentBlock {
    match block {
        ContentBlockParam::Text { text } => ContentBlock::Text { text },
        ContentBlockParam::Image { source } => ContentBlock::Image {
            media_type: source.media_type,
            base64_data: source.data,
        },
        ContentBlockParam::ToolUse { id, name, input } => ContentBlock::ToolUse {
            id,
            name,
            arguments: input,
        },
        ContentBlockParam::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => {
            let text = match content {
                Some(ToolResultContent::Text(text)) => text,
                Some(ToolResultContent::Blocks(blocks)) => blocks
                    .into_iter()
                    .filter_map(|b| match b {
                        ContentBlockParam::Text { text } => Some(text),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n"),
                None => String::new(),
            };
            ContentBlock::ToolResult {
                call_id: tool_use_id,
                content: text,
                is_error: is_error.unwrap_or(false),
            }
        }
        ContentBlockParam::Thinking { thinking, signature } => {
            ContentBlock::Thinking { text: thinking, signature }
        }
    }
}

fn unified_messages_to_params(messages: &[UnifiedMessage]) -> Vec<MessageParam> {
    let mut out = Vec::new();
    let mut pending_tool_results: Vec<ContentBlockParam> = Vec::new();

    for message in messages {
        match message.role {
            Role::Tool => {
                pending_tool_results.extend(message.content.iter().map(unified_block_to_param));
            }
            Role::User => {
                let mut blocks = std::mem::take(&mut pending_tool_results);
                blocks.extend(message.content.iter().map(unified_block_to_param));
                out.push(MessageParam {
                    role: MessageRole::User,
                    content: MessageContent::Blocks(blocks),
                });
            }
            Role::Assistant => {
                if !pending_tool_results.is_empty() {
                    out.push(MessageParam {
                        role: MessageRole::User,
                        content: MessageContent::Blocks(std::mem::take(&mut pending_tool_results)),
                    });
                }
                out.push(MessageParam {
                    role: MessageRole::Assistant,
                    content: MessageContent::Blocks(
                        message.content.iter().map(unified_block_to_param).collect(),
                    ),
                });
            }
            Role::System => {}
        }
    }
    if !pending_tool_results.is_empty() {
        out.push(MessageParam {
            role: MessageRole::User,
            content: MessageContent::Blocks(pending_tool_results),
        });
    }
    out
}

fn unified_block_to_param(block: &ContentBlock) -> ContentBlockParam {
    match block {
        ContentBlock::Text { text } => ContentBlockParam::Text { text: text.clone() },
        ContentBlock::Image { media_type, base64_data } => ContentBlockParam::Image {
            source: gwcore_protocol::anthropic::ImageSource {
                kind: gwcore_protocol::anthropic::ImageSourceType::Base64,
                media_type: media_type.clone(),
                data: base64_data.clone(),
            },
        },
        ContentBlock::ToolUse { id, name, arguments } => ContentBlockParam::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: arguments.clone(),
        },
        ContentBlock::ToolResult {
            call_id,
            content,
            is_error,
        } => ContentBlockParam::ToolResult {
            tool_use_id: call_id.clone(),
            content: Some(ToolResultContent::Text(content.clone())),
            is_error: Some(*is_error),
        },
        ContentBlock::Thinking { text, signature } => ContentBlockParam::Thinking {
            thinking: text.clone(),
            signature: signature.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_mixed_tool_result_and_text_into_separate_messages() {
        let raw = serde_json::json!({
            "model": "claude-3-5-sonnet-20241022",
            "max_tokens": 1024,
            "messages": [
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "call_1", "content": "72F"},
                    {"type": "text", "text": "what about tomorrow?"}
                ]}
            ]
        });
        let unified = AnthropicTransformer
            .request_to_unified(serde_json::to_vec(&raw).unwrap().as_slice())
            .unwrap();
        assert_eq!(unified.messages.len(), 2);
        assert_eq!(unified.messages[0].role, Role::Tool);
        assert_eq!(unified.messages[1].role, Role::User);
    }

    #[test]
    fn system_blocks_join_with_blank_line() {
        let raw = serde_json::json!({
            "model": "claude-3-5-sonnet-20241022",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": "hi"}],
            "system": [{"text": "a"}, {"text": "b"}]
        });
        let unified = AnthropicTransformer
            .request_to_unified(serde_json::to_vec(&raw).unwrap().as_slice())
            .unwrap();
        assert_eq!(unified.system.as_deref(), Some("a\n\nb"));
    }
}
