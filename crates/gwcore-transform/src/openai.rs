use gwcore_protocol::openai::{
    ChatCompletionChoice, ChatCompletionFinishReason, ChatCompletionImageUrl,
    ChatCompletionMessageToolCall, ChatCompletionMessageToolCallChunk,
    ChatCompletionMessageToolCallChunkFunction, ChatCompletionMessageToolCallFunction,
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessage, ChatCompletionRequestToolMessage,
    ChatCompletionRequestUserMessage, ChatCompletionResponseMessage, ChatCompletionStreamChoice,
    ChatCompletionStreamResponseDelta, ChatCompletionTextContent, ChatCompletionTextPart,
    ChatCompletionToolCallType, ChatCompletionUserContent, ChatCompletionUserContentPart,
    CompletionUsage, CreateChatCompletionRequestBody, CreateChatCompletionResponseBody,
    CreateChatCompletionStreamResponseChunk,
};
use gwcore_protocol::Protocol;

use crate::content::{
    data_url, encode_tool_arguments, openai_finish_reason_to_stop_reason, parse_data_url,
    parse_tool_arguments, stop_reason_to_openai_finish_reason,
};
use crate::error::TransformError;
use crate::transformer::{StreamRenderContext, ToolCallDelta, Transformer, UpstreamTick};
use crate::uif::{
    ContentBlock, ContentBlockStart, ContentDelta, Role, SamplingParams, StopReason, StreamChunk,
    ToolSpec, UnifiedMessage, UnifiedRequest, UnifiedResponse, Usage,
};

pub struct OpenAiTransformer;

impl Transformer for OpenAiTransformer {
    fn protocol(&self) -> Protocol {
        Protocol::OpenAi
    }

    fn request_to_unified(&self, raw: &[u8]) -> Result<UnifiedRequest, TransformError> {
        let body: CreateChatCompletionRequestBody = serde_json::from_slice(raw)
            .map_err(|e| TransformError::InvalidRequest(e.to_string()))?;

        let mut system = None;
        let mut messages = Vec::new();

        for message in body.messages {
            match message {
                ChatCompletionRequestMessage::System(system_message) => {
                    let text = text_content_to_string(&system_message.content);
                    system = Some(match system {
                        Some(existing) => format!("{existing}\n\n{text}"),
                        None => text,
                    });
                }
                ChatCompletionRequestMessage::User(user_message) => {
                    messages.push(UnifiedMessage {
                        role: Role::User,
                        content: user_content_to_blocks(&user_message.content),
                    });
                }
                ChatCompletionRequestMessage::Assistant(assistant_message) => {
                    messages.push(assistant_message_to_unified(&assistant_message));
                }
                ChatCompletionRequestMessage::Tool(tool_message) => {
                    // OpenAI's role:tool message becomes its own
                    // user-role tool_result message, preserving
                    // assistant(tool_calls) -> tool(result) adjacency.
                    messages.push(UnifiedMessage {
                        role: Role::Tool,
                        content: vec![ContentBlock::ToolResult {
                            call_id: tool_message.tool_call_id,
                            content: text_content_to_string(&tool_message.content),
                            is_error: false,
                        }],
                    });
                }
            }
        }

        let tools = body.tools.map(|tools| {
            tools
                .into_iter()
                .map(|tool| match tool {
                    gwcore_protocol::openai::ChatCompletionToolDefinition::Function { function } => {
                        ToolSpec {
                            name: function.name,
                            description: function.description,
                            parameters: function.parameters.unwrap_or(serde_json::json!({})),
                        }
                    }
                })
                .collect()
        });

        Ok(UnifiedRequest {
            model: body.model,
            messages,
            system,
            tools,
            tool_choice: None,
            sampling: SamplingParams {
                max_tokens: body
                    .max_completion_tokens
                    .or(body.max_tokens)
                    .map(|v| v.max(0) as u32),
                temperature: body.temperature,
                top_p: body.top_p,
                stop_sequences: None,
            },
            stream: body.stream.unwrap_or(false),
        })
    }

    fn unified_to_request(&self, request: &UnifiedRequest) -> Result<Vec<u8>, TransformError> {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessage {
                    content: ChatCompletionTextContent::Text(system.clone()),
                    name: None,
                },
            ));
        }
        for message in &request.messages {
            messages.push(unified_message_to_openai(message));
        }

        let body = CreateChatCompletionRequestBody {
            messages,
            model: request.model.clone(),
            max_tokens: None,
            max_completion_tokens: request.sampling.max_tokens.map(|v| v as i64),
            temperature: request.sampling.temperature,
            top_p: request.sampling.top_p,
            stream: Some(request.stream),
            stream_options: None,
            stop: request
                .sampling
                .stop_sequences
                .clone()
                .map(|seqs| serde_json::json!(seqs)),
            tools: request.tools.as_ref().map(|tools| {
                tools
                    .iter()
                    .map(|tool| gwcore_protocol::openai::ChatCompletionToolDefinition::Function {
                        function: gwcore_protocol::openai::FunctionObject {
                            name: tool.name.clone(),
                            description: tool.description.clone(),
                            parameters: Some(tool.parameters.clone()),
                        },
                    })
                    .collect()
            }),
            tool_choice: None,
            parallel_tool_calls: None,
            user: None,
        };
        serde_json::to_vec(&body).map_err(TransformError::from)
    }

    fn response_to_unified(&self, raw: &[u8]) -> Result<UnifiedResponse, TransformError> {
        let body: CreateChatCompletionResponseBody = serde_json::from_slice(raw)
            .map_err(|e| TransformError::InvalidResponse(e.to_string()))?;
        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| TransformError::InvalidResponse("no choices in response".to_string()))?;

        let mut content = Vec::new();
        if let Some(text) = choice.message.content {
            content.push(ContentBlock::Text { text });
        }
        if let Some(tool_calls) = choice.message.tool_calls {
            for call in tool_calls {
                content.push(ContentBlock::ToolUse {
                    id: call.id,
                    name: call.function.name,
                    arguments: parse_tool_arguments(&call.function.arguments),
                });
            }
        }

        let stop_reason = choice
            .finish_reason
            .map(|reason| openai_finish_reason_to_stop_reason(finish_reason_str(reason)))
            .unwrap_or(StopReason::EndTurn);

        Ok(UnifiedResponse {
            id: body.id,
            model: body.model,
            role: Role::Assistant,
            content,
            stop_reason,
            usage: body
                .usage
                .map(|u| Usage {
                    input_tokens: u.prompt_tokens,
                    output_tokens: u.completion_tokens,
                    cache_read_tokens: None,
                })
                .unwrap_or_default(),
        })
    }

    fn unified_to_response(&self, response: &UnifiedResponse) -> Result<Vec<u8>, TransformError> {
        let mut text = None;
        let mut tool_calls = Vec::new();
        for block in &response.content {
            match block {
                ContentBlock::Text { text: t } => {
                    text = Some(text.map_or_else(|| t.clone(), |existing: String| existing + t))
                }
                ContentBlock::ToolUse { id, name, arguments } => {
                    tool_calls.push(ChatCompletionMessageToolCall {
                        id: id.clone(),
                        kind: ChatCompletionToolCallType::Function,
                        function: ChatCompletionMessageToolCallFunction {
                            name: name.clone(),
                            arguments: encode_tool_arguments(arguments),
                        },
                    });
                }
                _ => {}
            }
        }

        let body = CreateChatCompletionResponseBody {
            id: response.id.clone(),
            object: "chat.completion",
            created: 0,
            model: response.model.clone(),
            choices: vec![ChatCompletionChoice {
                index: 0,
                message: ChatCompletionResponseMessage {
                    role: "assistant",
                    content: text,
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                },
                finish_reason: Some(stop_reason_to_finish_reason(response.stop_reason)),
            }],
            usage: Some(CompletionUsage {
                prompt_tokens: response.usage.input_tokens,
                completion_tokens: response.usage.output_tokens,
                total_tokens: response.usage.input_tokens + response.usage.output_tokens,
            }),
        };
        serde_json::to_vec(&body).map_err(TransformError::from)
    }

    fn upstream_event_to_tick(&self, _event_name: Option<&str>, data: &str) -> Option<UpstreamTick> {
        if data == "[DONE]" {
            return None;
        }
        let chunk: CreateChatCompletionStreamResponseChunk = serde_json::from_str(data).ok()?;
        let choice = chunk.choices.into_iter().next();

        let mut tick = UpstreamTick::default();
        if let Some(choice) = choice {
            tick.text_delta = choice.delta.content;
            if let Some(tool_calls) = choice.delta.tool_calls {
                tick.tool_call_deltas = tool_calls
                    .into_iter()
                    .map(|call| ToolCallDelta {
                        index: call.index,
                        id: call.id,
                        name: call.function.as_ref().and_then(|f| f.name.clone()),
                        arguments_delta: call.function.and_then(|f| f.arguments),
                    })
                    .collect();
            }
            tick.finish_reason = choice
                .finish_reason
                .map(|reason| openai_finish_reason_to_stop_reason(finish_reason_str(reason)));
        }
        tick.usage = chunk.usage.map(|u| Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            cache_read_tokens: None,
        });
        Some(tick)
    }

    fn render_client_event(&self, chunk: &StreamChunk, ctx: &StreamRenderContext) -> Option<String> {
        let (delta, finish_reason) = match chunk {
            StreamChunk::MessageStart { .. } => (
                ChatCompletionStreamResponseDelta {
                    role: Some("assistant"),
                    ..Default::default()
                },
                None,
            ),
            StreamChunk::ContentBlockDelta {
                delta: ContentDelta::TextDelta { text },
                ..
            } => (
                ChatCompletionStreamResponseDelta {
                    content: Some(text.clone()),
                    ..Default::default()
                },
                None,
            ),
            StreamChunk::ContentBlockStart {
                block: ContentBlockStart::ToolUse { id, name },
                index,
            } => (
                ChatCompletionStreamResponseDelta {
                    tool_calls: Some(vec![ChatCompletionMessageToolCallChunk {
                        index: *index as i64,
                        id: Some(id.clone()),
                        function: Some(ChatCompletionMessageToolCallChunkFunction {
                            name: Some(name.clone()),
                            arguments: None,
                        }),
                    }]),
                    ..Default::default()
                },
                None,
            ),
            StreamChunk::ContentBlockDelta {
                delta: ContentDelta::InputJsonDelta { partial_json },
                index,
            } => (
                ChatCompletionStreamResponseDelta {
                    tool_calls: Some(vec![ChatCompletionMessageToolCallChunk {
                        index: *index as i64,
                        id: None,
                        function: Some(ChatCompletionMessageToolCallChunkFunction {
                            name: None,
                            arguments: Some(partial_json.clone()),
                        }),
                    }]),
                    ..Default::default()
                },
                None,
            ),
            StreamChunk::MessageDelta { stop_reason, .. } => (
                ChatCompletionStreamResponseDelta::default(),
                Some(stop_reason_to_finish_reason(
                    stop_reason.unwrap_or(StopReason::EndTurn),
                )),
            ),
            _ => return None,
        };

        let response = CreateChatCompletionStreamResponseChunk {
            id: ctx.id.clone(),
            object: "chat.completion.chunk",
            created: ctx.created_unix,
            model: ctx.model.clone(),
            choices: vec![ChatCompletionStreamChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage: None,
        };
        serde_json::to_string(&response)
            .ok()
            .map(|json| format!("data: {json}\n\n"))
    }

    fn terminal_marker(&self) -> Option<&'static str> {
        Some("data: [DONE]\n\n")
    }
}

fn finish_reason_str(reason: ChatCompletionFinishReason) -> &'static str {
    match reason {
        ChatCompletionFinishReason::Stop => "stop",
        ChatCompletionFinishReason::Length => "length",
        ChatCompletionFinishReason::ToolCalls => "tool_calls",
        ChatCompletionFinishReason::ContentFilter => "content_filter",
    }
}

fn stop_reason_to_finish_reason(reason: StopReason) -> ChatCompletionFinishReason {
    match stop_reason_to_openai_finish_reason(reason) {
        "length" => ChatCompletionFinishReason::Length,
        "tool_calls" => ChatCompletionFinishReason::ToolCalls,
        "content_filter" => ChatCompletionFinishReason::ContentFilter,
        _ => ChatCompletionFinishReason::Stop,
    }
}

fn text_content_to_string(content: &ChatCompletionTextContent) -> String {
    match content {
        ChatCompletionTextContent::Text(text) => text.clone(),
        ChatCompletionTextContent::Parts(parts) => parts
            .iter()
            .map(|part| {
                let ChatCompletionTextPart::Text { text } = part;
                text.clone()
            })
            .collect::<Vec<_>>()
            .join("\n\n"),
    }
}

fn user_content_to_blocks(content: &ChatCompletionUserContent) -> Vec<ContentBlock> {
    match content {
        ChatCompletionUserContent::Text(text) => vec![ContentBlock::Text { text: text.clone() }],
        ChatCompletionUserContent::Parts(parts) => parts
            .iter()
            .map(|part| match part {
                ChatCompletionUserContentPart::Text { text } => {
                    ContentBlock::Text { text: text.clone() }
                }
                ChatCompletionUserContentPart::ImageUrl { image_url } => {
                    match parse_data_url(&image_url.url) {
                        Some((media_type, data)) => ContentBlock::Image {
                            media_type,
                            base64_data: data,
                        },
                        None => ContentBlock::Text {
                            text: image_url.url.clone(),
                        },
                    }
                }
            })
            .collect(),
    }
}

fn assistant_message_to_unified(message: &ChatCompletionRequestAssistantMessage) -> UnifiedMessage {
    let mut content = Vec::new();
    if let Some(text_content) = &message.content {
        let text = text_content_to_string(text_content);
        if !text.is_empty() {
            content.push(ContentBlock::Text { text });
        }
    }
    if let Some(tool_calls) = &message.tool_calls {
        for call in tool_calls {
            content.push(ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.function.name.clone(),
                arguments: parse_tool_arguments(&call.function.arguments),
            });
        }
    }
    UnifiedMessage {
        role: Role::Assistant,
        content,
    }
}

fn unified_message_to_openai(message: &UnifiedMessage) -> ChatCompletionRequestMessage {
    match message.role {
        Role::User => {
            let parts: Vec<ChatCompletionUserContentPart> = message
                .content
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => {
                        Some(ChatCompletionUserContentPart::Text { text: text.clone() })
                    }
                    ContentBlock::Image {
                        media_type,
                        base64_data,
                    } => Some(ChatCompletionUserContentPart::ImageUrl {
                        image_url: ChatCompletionImageUrl {
                            url: data_url(media_type, base64_data),
                            detail: None,
                        },
                    }),
                    _ => None,
                })
                .collect();
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: ChatCompletionUserContent::Parts(parts),
                name: None,
            })
        }
        Role::Tool => {
            let tool_result = message.content.iter().find_map(|block| match block {
                ContentBlock::ToolResult { call_id, content, .. } => {
                    Some((call_id.clone(), content.clone()))
                }
                _ => None,
            });
            let (tool_call_id, content) = tool_result.unwrap_or_default();
            ChatCompletionRequestMessage::Tool(ChatCompletionRequestToolMessage {
                content: ChatCompletionTextContent::Text(content),
                tool_call_id,
            })
        }
        Role::Assistant | Role::System => {
            let mut text = String::new();
            let mut tool_calls = Vec::new();
            for block in &message.content {
                match block {
                    ContentBlock::Text { text: t } => text.push_str(t),
                    ContentBlock::ToolUse { id, name, arguments } => {
                        tool_calls.push(ChatCompletionMessageToolCall {
                            id: id.clone(),
                            kind: ChatCompletionToolCallType::Function,
                            function: ChatCompletionMessageToolCallFunction {
                                name: name.clone(),
                                arguments: encode_tool_arguments(arguments),
                            },
                        });
                    }
                    _ => {}
                }
            }
            ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
                content: (!text.is_empty()).then(|| ChatCompletionTextContent::Text(text)),
                name: None,
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_to_unified_joins_system_and_splits_tool_messages() {
        let raw = serde_json::json!({
            "model": "gpt-4",
            "messages": [
                {"role": "system", "content": "be terse"},
                {"role": "user", "content": "hi"}
            ]
        });
        let unified = OpenAiTransformer
            .request_to_unified(serde_json::to_vec(&raw).unwrap().as_slice())
            .unwrap();
        assert_eq!(unified.system.as_deref(), Some("be terse"));
        assert_eq!(unified.messages.len(), 1);
        assert_eq!(unified.messages[0].role, Role::User);
    }

    #[test]
    fn response_to_unified_extracts_tool_calls_and_usage() {
        let raw = serde_json::json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 0,
            "model": "gpt-4",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": null, "tool_calls": [{
                    "id": "call_1", "type": "function",
                    "function": {"name": "get_weather", "arguments": "{\"city\":\"nyc\"}"}
                }]},
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        });
        let unified = OpenAiTransformer
            .response_to_unified(serde_json::to_vec(&raw).unwrap().as_slice())
            .unwrap();
        assert_eq!(unified.stop_reason, StopReason::ToolUse);
        assert_eq!(unified.usage.input_tokens, 10);
        assert!(matches!(unified.content[0], ContentBlock::ToolUse { .. }));
    }
}
