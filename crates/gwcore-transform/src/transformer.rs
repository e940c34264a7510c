use gwcore_protocol::Protocol;

use crate::error::TransformError;
use crate::uif::{StopReason, StreamChunk, Usage};
use crate::uif::{UnifiedRequest, UnifiedResponse};

/// One upstream SSE event reduced to the fields the Stream State Machine
/// cares about. Producing this is the only protocol-specific part of
/// streaming; the state machine that turns ticks into `StreamChunk`s is
/// shared across every protocol pair.
#[derive(Debug, Clone, Default)]
pub struct UpstreamTick {
    pub text_delta: Option<String>,
    pub thinking_delta: Option<String>,
    pub tool_call_deltas: Vec<ToolCallDelta>,
    pub finish_reason: Option<StopReason>,
    pub usage: Option<Usage>,
}

/// Identifying fields every OpenAI-family stream chunk repeats, threaded
/// through rendering so the `Transformer` impl itself stays stateless.
#[derive(Debug, Clone)]
pub struct StreamRenderContext {
    pub id: String,
    pub model: String,
    pub created_unix: i64,
}

#[derive(Debug, Clone)]
pub struct ToolCallDelta {
    /// Upstream's own per-call index; the correlation key used to decide
    /// whether a `content_block_start` has already been emitted for this
    /// call (spec §4.6).
    pub index: i64,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments_delta: Option<String>,
}

/// The four blocking operations plus their streaming siblings (spec
/// §4.4). One implementation per client/provider protocol; the Transform
/// Pipeline looks the right one up from the registry by `Protocol`.
pub trait Transformer: Send + Sync {
    fn protocol(&self) -> Protocol;

    /// Parse an inbound client request body, or an already-mapped
    /// provider-bound body, into the Unified Intermediate Form.
    fn request_to_unified(&self, raw: &[u8]) -> Result<UnifiedRequest, TransformError>;

    /// Render a `UnifiedRequest` into this protocol's wire body.
    fn unified_to_request(&self, request: &UnifiedRequest) -> Result<Vec<u8>, TransformError>;

    /// Parse a full (non-streaming) upstream response body.
    fn response_to_unified(&self, raw: &[u8]) -> Result<UnifiedResponse, TransformError>;

    /// Render a `UnifiedResponse` into this protocol's client-facing body.
    fn unified_to_response(&self, response: &UnifiedResponse) -> Result<Vec<u8>, TransformError>;

    /// Reduce one upstream SSE event (its optional `event:` name and its
    /// `data:` payload, already joined) to an `UpstreamTick`. Returns
    /// `None` when the event carries nothing the state machine needs
    /// (e.g. a bare `ping`) or when the payload is not parseable JSON —
    /// per spec, an unparseable event is dropped, not an error.
    fn upstream_event_to_tick(&self, event_name: Option<&str>, data: &str) -> Option<UpstreamTick>;

    /// Render one `StreamChunk` as a full SSE frame (`event: ...\ndata:
    /// ...\n\n` or, for OpenAI-family protocols, a bare `data: ...\n\n`
    /// line) in this protocol's client-facing shape. Returning `None`
    /// means the chunk carries nothing this protocol frames as its own
    /// event (OpenAI has no `ping`/`content_block_start` wire event, for
    /// instance); the caller simply emits no bytes for it.
    fn render_client_event(&self, chunk: &StreamChunk, ctx: &StreamRenderContext) -> Option<String>;

    /// The terminal marker this protocol appends after its last content
    /// event, if any (`data: [DONE]\n\n` for OpenAI-family; Anthropic has
    /// none, relying on `message_stop` instead).
    fn terminal_marker(&self) -> Option<&'static str> {
        None
    }
}
