//! Content-block conversion rules shared by every protocol pair (spec
//! component 4.5.1). Each function is a pure, reusable mapping; the
//! per-protocol transformers call these instead of duplicating the rule.

use serde_json::Value as JsonValue;

use gwcore_protocol::Protocol;

use crate::uif::StopReason;

/// Client-facing error envelope, protocol-adapted per spec §4.7/§7:
/// OpenAI/Response-API get `{error: {message, type, code}}`; Anthropic and
/// GCP-Vertex get `{type: "error", error: {type, message}}`.
pub fn protocol_error_body(protocol: Protocol, error_type: &str, message: &str) -> JsonValue {
    match protocol {
        Protocol::OpenAi | Protocol::ResponseApi => serde_json::json!({
            "error": {
                "message": message,
                "type": error_type,
                "code": JsonValue::Null,
            }
        }),
        Protocol::Anthropic | Protocol::GcpVertexAnthropic => serde_json::json!({
            "type": "error",
            "error": {
                "type": error_type,
                "message": message,
            }
        }),
    }
}

/// OpenAI `function.arguments` (a JSON-encoded string, possibly malformed)
/// into Anthropic `tool_use.input` (a parsed JSON object). Malformed
/// arguments are wrapped rather than dropped so the call survives the
/// round trip.
pub fn parse_tool_arguments(raw_arguments: &str) -> JsonValue {
    match serde_json::from_str::<JsonValue>(raw_arguments) {
        Ok(value) if value.is_object() => value,
        Ok(value) => serde_json::json!({ "raw_arguments": value }),
        Err(_) => serde_json::json!({ "raw_arguments": raw_arguments }),
    }
}

/// The inverse: Anthropic `tool_use.input` back into an OpenAI
/// `function.arguments` JSON string.
pub fn encode_tool_arguments(input: &JsonValue) -> String {
    if let Some(raw) = input.get("raw_arguments") {
        if let Some(s) = raw.as_str() {
            return s.to_string();
        }
        return raw.to_string();
    }
    input.to_string()
}

/// Join Anthropic's `system` param (either a bare string or a list of text
/// blocks) into one flat string.
pub fn join_system_blocks(blocks: &[String]) -> String {
    blocks.join("\n\n")
}

/// `data:<media_type>;base64,<data>` URL used by OpenAI `image_url` parts,
/// built from Anthropic-shaped base64 image source fields.
pub fn data_url(media_type: &str, base64_data: &str) -> String {
    format!("data:{media_type};base64,{base64_data}")
}

/// Split a `data:<media_type>;base64,<data>` URL back into its parts.
/// Returns `None` for http(s) URLs (not convertible to an Anthropic
/// base64 source without fetching, which this layer does not do).
pub fn parse_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (media_type, tail) = rest.split_once(';')?;
    let data = tail.strip_prefix("base64,")?;
    Some((media_type.to_string(), data.to_string()))
}

/// `stop→end_turn`, `length→max_tokens`, `tool_calls|function_call→tool_use`,
/// `content_filter→error`.
pub fn openai_finish_reason_to_stop_reason(finish_reason: &str) -> StopReason {
    match finish_reason {
        "stop" => StopReason::EndTurn,
        "length" => StopReason::MaxTokens,
        "tool_calls" | "function_call" => StopReason::ToolUse,
        "content_filter" => StopReason::Error,
        _ => StopReason::EndTurn,
    }
}

/// The inverse, used when rendering an OpenAI-shaped `finish_reason` from
/// a UIF `StopReason` (e.g. Anthropic upstream, OpenAI-speaking client).
pub fn stop_reason_to_openai_finish_reason(reason: StopReason) -> &'static str {
    match reason {
        StopReason::EndTurn => "stop",
        StopReason::MaxTokens => "length",
        StopReason::StopSequence => "stop",
        StopReason::ToolUse => "tool_calls",
        StopReason::Error => "content_filter",
    }
}

/// The inverse used when rendering an Anthropic-shaped `stop_reason`.
pub fn stop_reason_to_anthropic_stop_reason(
    reason: StopReason,
) -> gwcore_protocol::anthropic::StopReason {
    use gwcore_protocol::anthropic::StopReason as Wire;
    match reason {
        StopReason::EndTurn => Wire::EndTurn,
        StopReason::MaxTokens => Wire::MaxTokens,
        StopReason::StopSequence => Wire::StopSequence,
        StopReason::ToolUse => Wire::ToolUse,
        StopReason::Error => Wire::EndTurn,
    }
}

pub fn anthropic_stop_reason_to_stop_reason(
    reason: gwcore_protocol::anthropic::StopReason,
) -> StopReason {
    use gwcore_protocol::anthropic::StopReason as Wire;
    match reason {
        Wire::EndTurn => StopReason::EndTurn,
        Wire::MaxTokens => StopReason::MaxTokens,
        Wire::StopSequence => StopReason::StopSequence,
        Wire::ToolUse => StopReason::ToolUse,
    }
}

/// `max_tokens` is clamped to `[min_tokens_limit, max_tokens_limit]`
/// configured for the gateway.
pub fn clamp_max_tokens(requested: Option<u32>, min_limit: u32, max_limit: u32) -> u32 {
    requested
        .unwrap_or(min_limit)
        .clamp(min_limit, max_limit.max(min_limit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_arguments_are_wrapped_not_dropped() {
        let parsed = parse_tool_arguments("{not json");
        assert_eq!(parsed["raw_arguments"], "{not json");
    }

    #[test]
    fn well_formed_object_arguments_pass_through() {
        let parsed = parse_tool_arguments(r#"{"city":"nyc"}"#);
        assert_eq!(parsed["city"], "nyc");
    }

    #[test]
    fn data_url_round_trips() {
        let url = data_url("image/png", "AAAA");
        let (media_type, data) = parse_data_url(&url).unwrap();
        assert_eq!(media_type, "image/png");
        assert_eq!(data, "AAAA");
    }

    #[test]
    fn clamp_respects_bounds() {
        assert_eq!(clamp_max_tokens(Some(5), 10, 1000), 10);
        assert_eq!(clamp_max_tokens(Some(5000), 10, 1000), 1000);
        assert_eq!(clamp_max_tokens(None, 10, 1000), 10);
    }

    #[test]
    fn finish_reason_mapping_matches_rule_table() {
        assert_eq!(openai_finish_reason_to_stop_reason("stop"), StopReason::EndTurn);
        assert_eq!(openai_finish_reason_to_stop_reason("length"), StopReason::MaxTokens);
        assert_eq!(openai_finish_reason_to_stop_reason("tool_calls"), StopReason::ToolUse);
        assert_eq!(openai_finish_reason_to_stop_reason("content_filter"), StopReason::Error);
    }
}
