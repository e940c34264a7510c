//! Wire types for the OpenAI Responses API (`POST /v1/responses`), a
//! distinct protocol from Chat Completions: requests carry an `input`
//! item list rather than a `messages` array, and responses carry an
//! `output` item list plus named `response.*` streaming events rather
//! than `choices`/`delta`. Trimmed, like the Chat Completions and
//! Anthropic wire modules in this crate, to the fields the UIF actually
//! round-trips (message text/images, function calls and their outputs,
//! sampling params, usage) rather than the full Responses API surface
//! (background mode, conversations, prompt templates, reasoning summaries,
//! file/computer-use tools — none named by the spec's UIF).
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CreateResponseRequestBody {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<ResponseInputParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ResponseToolDef>>,
    /// Not enforced here (spec's UIF has no multi-turn conversation
    /// store; each request is translated independently).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseInputParam {
    Text(String),
    Items(Vec<ResponseInputItem>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseInputRole {
    User,
    System,
    Developer,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseInputItem {
    Message {
        role: ResponseInputRole,
        content: ResponseInputContent,
    },
    FunctionCall {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        call_id: String,
        name: String,
        arguments: String,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseInputContent {
    Text(String),
    Parts(Vec<ResponseInputContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseInputContentPart {
    InputText { text: String },
    InputImage { image_url: String },
    OutputText { text: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseToolDef {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<JsonValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseOutputMessageRole {
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseOutputContent {
    OutputText { text: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseOutputItem {
    Message {
        id: String,
        role: ResponseOutputMessageRole,
        content: Vec<ResponseOutputContent>,
    },
    FunctionCall {
        id: String,
        call_id: String,
        name: String,
        arguments: String,
    },
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ResponseUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Response {
    pub id: String,
    pub object: &'static str,
    pub created_at: i64,
    pub model: String,
    #[serde(default)]
    pub output: Vec<ResponseOutputItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ResponseUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Streaming events, named per the real `response.*` SSE contract. Every
/// event carries a `type` tag and, unlike Chat Completions' bare `data:`
/// deltas, these are sent as named SSE events (`event: response.completed`
/// followed by `data: {...}`) mirroring the Anthropic streaming style this
/// protocol was modeled on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseStreamEvent {
    #[serde(rename = "response.created")]
    ResponseCreated { response: Response },
    #[serde(rename = "response.output_item.added")]
    ResponseOutputItemAdded {
        output_index: i64,
        item: ResponseOutputItem,
    },
    #[serde(rename = "response.output_text.delta")]
    ResponseOutputTextDelta {
        item_id: String,
        output_index: i64,
        delta: String,
    },
    #[serde(rename = "response.function_call_arguments.delta")]
    ResponseFunctionCallArgumentsDelta {
        item_id: String,
        output_index: i64,
        delta: String,
    },
    #[serde(rename = "response.output_item.done")]
    ResponseOutputItemDone {
        output_index: i64,
        item: ResponseOutputItem,
    },
    #[serde(rename = "response.completed")]
    ResponseCompleted { response: Response },
    #[serde(rename = "error")]
    ResponseError { message: String },
}

impl ResponseStreamEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            ResponseStreamEvent::ResponseCreated { .. } => "response.created",
            ResponseStreamEvent::ResponseOutputItemAdded { .. } => "response.output_item.added",
            ResponseStreamEvent::ResponseOutputTextDelta { .. } => "response.output_text.delta",
            ResponseStreamEvent::ResponseFunctionCallArgumentsDelta { .. } => {
                "response.function_call_arguments.delta"
            }
            ResponseStreamEvent::ResponseOutputItemDone { .. } => "response.output_item.done",
            ResponseStreamEvent::ResponseCompleted { .. } => "response.completed",
            ResponseStreamEvent::ResponseError { .. } => "error",
        }
    }
}
