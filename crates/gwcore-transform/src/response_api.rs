use gwcore_protocol::openai::response_api::{
    CreateResponseRequestBody, Response, ResponseInputContent, ResponseInputContentPart,
    ResponseInputItem, ResponseInputParam, ResponseInputRole, ResponseOutputContent,
    ResponseOutputItem, ResponseOutputMessageRole, ResponseStreamEvent, ResponseToolDef,
    ResponseUsage,
};
use gwcore_protocol::Protocol;

use crate::content::{data_url, parse_data_url, stop_reason_to_openai_finish_reason};
use crate::error::TransformError;
use crate::transformer::{StreamRenderContext, Transformer, UpstreamTick};
use crate::uif::{
    ContentBlock, ContentBlockStart, ContentDelta, Role, SamplingParams, StopReason, StreamChunk,
    ToolSpec, UnifiedMessage, UnifiedRequest, UnifiedResponse, Usage,
};

/// Transformer for the OpenAI Responses API (`POST /v1/responses`): a
/// genuinely distinct wire shape from Chat Completions (`input` item list
/// in, `output` item list and named `response.*` events out), per spec
/// §1 (three client protocols) and §6's dedicated route.
pub struct ResponseApiTransformer;

impl Transformer for ResponseApiTransformer {
    fn protocol(&self) -> Protocol {
        Protocol::ResponseApi
    }

    fn request_to_unified(&self, raw: &[u8]) -> Result<UnifiedRequest, TransformError> {
        let body: CreateResponseRequestBody = serde_json::from_slice(raw)
            .map_err(|e| TransformError::InvalidRequest(e.to_string()))?;

        let mut system = body.instructions;
        let mut messages = Vec::new();

        match body.input {
            Some(ResponseInputParam::Text(text)) => messages.push(UnifiedMessage {
                role: Role::User,
                content: vec![ContentBlock::Text { text }],
            }),
            Some(ResponseInputParam::Items(items)) => {
                for item in items {
                    match item {
                        ResponseInputItem::Message { role, content } => {
                            let blocks = input_content_to_blocks(&content);
                            if role == ResponseInputRole::System || role == ResponseInputRole::Developer
                            {
                                let text = blocks
                                    .iter()
                                    .filter_map(|b| match b {
                                        ContentBlock::Text { text } => Some(text.clone()),
                                        _ => None,
                                    })
                                    .collect::<Vec<_>>()
                                    .join("\n\n");
                                system = Some(match system {
                                    Some(existing) => format!("{existing}\n\n{text}"),
                                    None => text,
                                });
                                continue;
                            }
                            messages.push(UnifiedMessage {
                                role: if role == ResponseInputRole::Assistant {
                                    Role::Assistant
                                } else {
                                    Role::User
                                },
                                content: blocks,
                            });
                        }
                        ResponseInputItem::FunctionCall {
                            call_id, name, arguments, ..
                        } => messages.push(UnifiedMessage {
                            role: Role::Assistant,
                            content: vec![ContentBlock::ToolUse {
                                id: call_id,
                                name,
                                arguments: crate::content::parse_tool_arguments(&arguments),
                            }],
                        }),
                        ResponseInputItem::FunctionCallOutput { call_id, output } => {
                            messages.push(UnifiedMessage {
                                role: Role::Tool,
                                content: vec![ContentBlock::ToolResult {
                                    call_id,
                                    content: output,
                                    is_error: false,
                                }],
                            })
                        }
                    }
                }
            }
            None => {}
        }

        let tools = body.tools.map(|tools| {
            tools
                .into_iter()
                .map(|tool| ToolSpec {
                    name: tool.name,
                    description: tool.description,
                    parameters: tool.parameters.unwrap_or(serde_json::json!({})),
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
                max_tokens: body.max_output_tokens.map(|v| v.max(0) as u32),
                temperature: body.temperature,
                top_p: body.top_p,
                stop_sequences: None,
            },
            stream: body.stream.unwrap_or(false),
        })
    }

    fn unified_to_request(&self, request: &UnifiedRequest) -> Result<Vec<u8>, TransformError> {
        let mut items = Vec::new();
        if let Some(system) = &request.system {
            items.push(ResponseInputItem::Message {
                role: ResponseInputRole::System,
                content: ResponseInputContent::Text(system.clone()),
            });
        }
        for message in &request.messages {
            items.extend(unified_message_to_input_items(message));
        }

        let body = CreateResponseRequestBody {
            model: request.model.clone(),
            input: Some(ResponseInputParam::Items(items)),
            instructions: None,
            stream: Some(request.stream),
            max_output_tokens: request.sampling.max_tokens.map(|v| v as i64),
            temperature: request.sampling.temperature,
            top_p: request.sampling.top_p,
            tools: request.tools.as_ref().map(|tools| {
                tools
                    .iter()
                    .map(|tool| ResponseToolDef {
                        kind: "function".to_string(),
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: Some(tool.parameters.clone()),
                    })
                    .collect()
            }),
            previous_response_id: None,
        };
        serde_json::to_vec(&body).map_err(TransformError::from)
    }

    fn response_to_unified(&self, raw: &[u8]) -> Result<UnifiedResponse, TransformError> {
        let body: Response =
            serde_json::from_slice(raw).map_err(|e| TransformError::InvalidResponse(e.to_string()))?;

        let mut content = Vec::new();
        let mut saw_function_call = false;
        for item in &body.output {
            match item {
                ResponseOutputItem::Message { content: parts, .. } => {
                    for part in parts {
                        let ResponseOutputContent::OutputText { text } = part;
                        content.push(ContentBlock::Text { text: text.clone() });
                    }
                }
                ResponseOutputItem::FunctionCall {
                    call_id, name, arguments, ..
                } => {
                    saw_function_call = true;
                    content.push(ContentBlock::ToolUse {
                        id: call_id.clone(),
                        name: name.clone(),
                        arguments: crate::content::parse_tool_arguments(arguments),
                    });
                }
            }
        }

        let stop_reason = if saw_function_call {
            StopReason::ToolUse
        } else {
            StopReason::EndTurn
        };

        Ok(UnifiedResponse {
            id: body.id,
            model: body.model,
            role: Role::Assistant,
            content,
            stop_reason,
            usage: body
                .usage
                .map(|u| Usage {
                    input_tokens: u.input_tokens,
                    output_tokens: u.output_tokens,
                    cache_read_tokens: None,
                })
                .unwrap_or_default(),
        })
    }

    fn unified_to_response(&self, response: &UnifiedResponse) -> Result<Vec<u8>, TransformError> {
        let mut output = Vec::new();
        let mut text_parts = Vec::new();
        for block in &response.content {
            match block {
                ContentBlock::Text { text } => text_parts.push(ResponseOutputContent::OutputText {
                    text: text.clone(),
                }),
                ContentBlock::ToolUse { id, name, arguments } => {
                    output.push(ResponseOutputItem::FunctionCall {
                        id: format!("fc_{id}"),
                        call_id: id.clone(),
                        name: name.clone(),
                        arguments: crate::content::encode_tool_arguments(arguments),
                    });
                }
                _ => {}
            }
        }
        let output_text = (!text_parts.is_empty()).then(|| {
            text_parts
                .iter()
                .map(|p| {
                    let ResponseOutputContent::OutputText { text } = p;
                    text.clone()
                })
                .collect::<Vec<_>>()
                .join("")
        });
        if !text_parts.is_empty() {
            output.insert(
                0,
                ResponseOutputItem::Message {
                    id: format!("msg_{}", response.id),
                    role: ResponseOutputMessageRole::Assistant,
                    content: text_parts,
                },
            );
        }

        let body = Response {
            id: response.id.clone(),
            object: "response",
            created_at: 0,
            model: response.model.clone(),
            output,
            output_text,
            usage: Some(ResponseUsage {
                input_tokens: response.usage.input_tokens,
                output_tokens: response.usage.output_tokens,
                total_tokens: Some(response.usage.input_tokens + response.usage.output_tokens),
            }),
            status: Some("completed".to_string()),
        };
        serde_json::to_vec(&body).map_err(TransformError::from)
    }

    fn upstream_event_to_tick(&self, _event_name: Option<&str>, data: &str) -> Option<UpstreamTick> {
        let event: ResponseStreamEvent = serde_json::from_str(data).ok()?;
        let mut tick = UpstreamTick::default();
        match event {
            ResponseStreamEvent::ResponseOutputTextDelta { delta, .. } => {
                tick.text_delta = Some(delta);
            }
            ResponseStreamEvent::ResponseFunctionCallArgumentsDelta {
                item_id, delta, ..
            } => {
                tick.tool_call_deltas.push(crate::transformer::ToolCallDelta {
                    index: 0,
                    id: Some(item_id),
                    name: None,
                    arguments_delta: Some(delta),
                });
            }
            ResponseStreamEvent::ResponseOutputItemAdded {
                item: ResponseOutputItem::FunctionCall { call_id, name, .. },
                ..
            } => {
                tick.tool_call_deltas.push(crate::transformer::ToolCallDelta {
                    index: 0,
                    id: Some(call_id),
                    name: Some(name),
                    arguments_delta: None,
                });
            }
            ResponseStreamEvent::ResponseCompleted { response } => {
                let has_tool_call = response
                    .output
                    .iter()
                    .any(|item| matches!(item, ResponseOutputItem::FunctionCall { .. }));
                tick.finish_reason = Some(if has_tool_call {
                    StopReason::ToolUse
                } else {
                    StopReason::EndTurn
                });
                tick.usage = response.usage.map(|u| Usage {
                    input_tokens: u.input_tokens,
                    output_tokens: u.output_tokens,
                    cache_read_tokens: None,
                });
            }
            ResponseStreamEvent::ResponseCreated { .. }
            | ResponseStreamEvent::ResponseOutputItemDone { .. }
            | ResponseStreamEvent::ResponseError { .. } => {}
        }
        Some(tick)
    }

    fn render_client_event(&self, chunk: &StreamChunk, ctx: &StreamRenderContext) -> Option<String> {
        let event = match chunk {
            StreamChunk::MessageStart { id, model } => ResponseStreamEvent::ResponseCreated {
                response: bare_response(id, model, ctx),
            },
            StreamChunk::ContentBlockDelta {
                delta: ContentDelta::TextDelta { text },
                ..
            } => ResponseStreamEvent::ResponseOutputTextDelta {
                item_id: ctx.id.clone(),
                output_index: 0,
                delta: text.clone(),
            },
            StreamChunk::ContentBlockStart {
                block: ContentBlockStart::ToolUse { id, name },
                index,
            } => ResponseStreamEvent::ResponseOutputItemAdded {
                output_index: *index as i64,
                item: ResponseOutputItem::FunctionCall {
                    id: format!("fc_{id}"),
                    call_id: id.clone(),
                    name: name.clone(),
                    arguments: String::new(),
                },
            },
            StreamChunk::ContentBlockDelta {
                delta: ContentDelta::InputJsonDelta { partial_json },
                index,
            } => ResponseStreamEvent::ResponseFunctionCallArgumentsDelta {
                item_id: ctx.id.clone(),
                output_index: *index as i64,
                delta: partial_json.clone(),
            },
            StreamChunk::MessageDelta { stop_reason, usage } => ResponseStreamEvent::ResponseCompleted {
                response: Response {
                    id: ctx.id.clone(),
                    object: "response",
                    created_at: ctx.created_unix,
                    model: ctx.model.clone(),
                    output: Vec::new(),
                    output_text: None,
                    usage: Some(ResponseUsage {
                        input_tokens: usage.input_tokens,
                        output_tokens: usage.output_tokens,
                        total_tokens: Some(usage.input_tokens + usage.output_tokens),
                    }),
                    status: Some(
                        stop_reason_to_openai_finish_reason(stop_reason.unwrap_or(StopReason::EndTurn))
                            .to_string(),
                    ),
                },
            },
            StreamChunk::Error { message } => ResponseStreamEvent::ResponseError {
                message: message.clone(),
            },
            StreamChunk::Ping | StreamChunk::ContentBlockStart { .. } | StreamChunk::ContentBlockStop { .. } => {
                return None
            }
            StreamChunk::MessageStop => return None,
        };
        let name = event.event_name();
        serde_json::to_string(&event)
            .ok()
            .map(|json| gwcore_protocol::sse::encode_event(Some(name), &json))
    }

    fn terminal_marker(&self) -> Option<&'static str> {
        None
    }
}

fn bare_response(id: &str, model: &str, ctx: &StreamRenderContext) -> Response {
    Response {
        id: id.to_string(),
        object: "response",
        created_at: ctx.created_unix,
        model: model.to_string(),
        output: Vec::new(),
        output_text: None,
        usage: None,
        status: Some("in_progress".to_string()),
    }
}

fn input_content_to_blocks(content: &ResponseInputContent) -> Vec<ContentBlock> {
    match content {
        ResponseInputContent::Text(text) => vec![ContentBlock::Text { text: text.clone() }],
        ResponseInputContent::Parts(parts) => parts
            .iter()
            .map(|part| match part {
                ResponseInputContentPart::InputText { text } => ContentBlock::Text { text: text.clone() },
                ResponseInputContentPart::OutputText { text } => ContentBlock::Text { text: text.clone() },
                ResponseInputContentPart::InputImage { image_url } => match parse_data_url(image_url) {
                    Some((media_type, data)) => ContentBlock::Image {
                        media_type,
                        base64_data: data,
                    },
                    None => ContentBlock::Text {
                        text: image_url.clone(),
                    },
                },
            })
            .collect(),
    }
}

fn unified_message_to_input_items(message: &UnifiedMessage) -> Vec<ResponseInputItem> {
    match message.role {
        Role::Tool => message
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolResult { call_id, content, .. } => {
                    Some(ResponseInputItem::FunctionCallOutput {
                        call_id: call_id.clone(),
                        output: content.clone(),
                    })
                }
                _ => None,
            })
            .collect(),
        Role::Assistant => {
            let mut items = Vec::new();
            let mut text_parts = Vec::new();
            for block in &message.content {
                match block {
                    ContentBlock::Text { text } => {
                        text_parts.push(ResponseInputContentPart::OutputText { text: text.clone() })
                    }
                    ContentBlock::ToolUse { id, name, arguments } => {
                        items.push(ResponseInputItem::FunctionCall {
                            id: None,
                            call_id: id.clone(),
                            name: name.clone(),
                            arguments: crate::content::encode_tool_arguments(arguments),
                        });
                    }
                    _ => {}
                }
            }
            if !text_parts.is_empty() {
                items.insert(
                    0,
                    ResponseInputItem::Message {
                        role: ResponseInputRole::Assistant,
                        content: ResponseInputContent::Parts(text_parts),
                    },
                );
            }
            items
        }
        Role::User | Role::System => {
            let parts: Vec<ResponseInputContentPart> = message
                .content
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => {
                        Some(ResponseInputContentPart::InputText { text: text.clone() })
                    }
                    ContentBlock::Image {
                        media_type,
                        base64_data,
                    } => Some(ResponseInputContentPart::InputImage {
                        image_url: data_url(media_type, base64_data),
                    }),
                    _ => None,
                })
                .collect();
            vec![ResponseInputItem::Message {
                role: if message.role == Role::System {
                    ResponseInputRole::System
                } else {
                    ResponseInputRole::User
                },
                content: ResponseInputContent::Parts(parts),
            }]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_to_unified_parses_input_items_and_splits_function_output() {
        let raw = serde_json::json!({
            "model": "gpt-4o",
            "input": [
                {"type": "message", "role": "user", "content": [{"type": "input_text", "text": "hi"}]},
                {"type": "function_call_output", "call_id": "call_1", "output": "42"}
            ]
        });
        let unified = ResponseApiTransformer
            .request_to_unified(serde_json::to_vec(&raw).unwrap().as_slice())
            .unwrap();
        assert_eq!(unified.messages.len(), 2);
        assert_eq!(unified.messages[0].role, Role::User);
        assert_eq!(unified.messages[1].role, Role::Tool);
        assert!(matches!(
            unified.messages[1].content[0],
            ContentBlock::ToolResult { .. }
        ));
    }

    #[test]
    fn request_to_unified_accepts_bare_text_input() {
        let raw = serde_json::json!({"model": "gpt-4o", "input": "hello there"});
        let unified = ResponseApiTransformer
            .request_to_unified(serde_json::to_vec(&raw).unwrap().as_slice())
            .unwrap();
        assert_eq!(unified.messages.len(), 1);
        assert!(matches!(unified.messages[0].content[0], ContentBlock::Text { .. }));
    }

    #[test]
    fn response_to_unified_extracts_output_text_and_function_calls() {
        let raw = serde_json::json!({
            "id": "resp_1",
            "object": "response",
            "created_at": 0,
            "model": "gpt-4o",
            "output": [
                {"type": "message", "id": "msg_1", "role": "assistant", "content": [
                    {"type": "output_text", "text": "hi there"}
                ]},
                {"type": "function_call", "id": "fc_1", "call_id": "call_1", "name": "get_weather", "arguments": "{}"}
            ],
            "usage": {"input_tokens": 10, "output_tokens": 5}
        });
        let unified = ResponseApiTransformer
            .response_to_unified(serde_json::to_vec(&raw).unwrap().as_slice())
            .unwrap();
        assert_eq!(unified.stop_reason, StopReason::ToolUse);
        assert_eq!(unified.usage.input_tokens, 10);
        assert!(matches!(unified.content[0], ContentBlock::Text { .. }));
        assert!(matches!(unified.content[1], ContentBlock::ToolUse { .. }));
    }

    #[test]
    fn unified_to_response_renders_output_text_item() {
        let response = UnifiedResponse {
            id: "resp_1".to_string(),
            model: "gpt-4o".to_string(),
            role: Role::Assistant,
            content: vec![ContentBlock::Text {
                text: "hello".to_string(),
            }],
            stop_reason: StopReason::EndTurn,
            usage: Usage {
                input_tokens: 3,
                output_tokens: 2,
                cache_read_tokens: None,
            },
        };
        let raw = ResponseApiTransformer.unified_to_response(&response).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(value["output_text"], "hello");
        assert_eq!(value["output"][0]["type"], "message");
    }

    #[test]
    fn upstream_text_delta_event_is_reduced_to_a_tick() {
        let data = serde_json::json!({
            "type": "response.output_text.delta",
            "item_id": "msg_1",
            "output_index": 0,
            "delta": "Hel"
        })
        .to_string();
        let tick = ResponseApiTransformer.upstream_event_to_tick(None, &data).unwrap();
        assert_eq!(tick.text_delta.as_deref(), Some("Hel"));
    }

    #[test]
    fn render_client_event_emits_named_response_events() {
        let ctx = StreamRenderContext {
            id: "resp_1".to_string(),
            model: "gpt-4o".to_string(),
            created_unix: 0,
        };
        let frame = ResponseApiTransformer
            .render_client_event(
                &StreamChunk::ContentBlockDelta {
                    index: 0,
                    delta: ContentDelta::TextDelta {
                        text: "hi".to_string(),
                    },
                },
                &ctx,
            )
            .unwrap();
        assert!(frame.starts_with("event: response.output_text.delta\n"));
        assert!(frame.contains("\"delta\":\"hi\""));
    }
}
