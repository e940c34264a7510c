use gwcore_protocol::Protocol;
use gwcore_transform::content::clamp_max_tokens;
use gwcore_transform::{TransformError, TransformerRegistry};
use serde_json::Value as JsonValue;

/// Translates a client request body into the provider's wire shape and a
/// provider response body back into the client's, rewriting the `model`
/// field at each boundary so the caller always sees the name it asked
/// for, and clamping `max_tokens` into the configured bounds.
pub struct TransformPipeline<'a> {
    registry: &'a TransformerRegistry,
    min_tokens_limit: u32,
    max_tokens_limit: u32,
}

impl<'a> TransformPipeline<'a> {
    pub fn new(registry: &'a TransformerRegistry) -> Self {
        Self {
            registry,
            min_tokens_limit: 1,
            max_tokens_limit: u32::MAX,
        }
    }

    pub fn with_token_limits(registry: &'a TransformerRegistry, min_tokens_limit: u32, max_tokens_limit: u32) -> Self {
        Self {
            registry,
            min_tokens_limit,
            max_tokens_limit,
        }
    }

    /// Same-protocol fast path never needs the unified round trip.
    pub fn is_bypass(&self, client_protocol: Protocol, provider_protocol: Protocol) -> bool {
        client_protocol == provider_protocol
    }

    /// Steps 1-5: builds the provider-bound request body, with the
    /// client's requested model name replaced by the provider's resolved
    /// upstream model name.
    pub fn build_upstream_request(
        &self,
        client_protocol: Protocol,
        provider_protocol: Protocol,
        raw_client_body: &[u8],
        upstream_model: &str,
    ) -> Result<Vec<u8>, TransformError> {
        let body = if self.is_bypass(client_protocol, provider_protocol) {
            rewrite_model_field(raw_client_body, upstream_model)?
        } else {
            let mut unified = self
                .registry
                .get(client_protocol)
                .request_to_unified(raw_client_body)?;
            unified.model = upstream_model.to_string();
            self.registry.get(provider_protocol).unified_to_request(&unified)?
        };
        clamp_max_tokens_field(&body, self.min_tokens_limit, self.max_tokens_limit)
    }

    /// Step 7: blocking response path. `original_model` is the name the
    /// client originally asked for, restored in the returned body
    /// regardless of which upstream model actually served it.
    pub fn build_client_response(
        &self,
        client_protocol: Protocol,
        provider_protocol: Protocol,
        raw_upstream_body: &[u8],
        original_model: &str,
    ) -> Result<Vec<u8>, TransformError> {
        let body = if self.is_bypass(client_protocol, provider_protocol) {
            raw_upstream_body.to_vec()
        } else {
            let unified = self
                .registry
                .get(provider_protocol)
                .response_to_unified(raw_upstream_body)?;
            self.registry.get(client_protocol).unified_to_response(&unified)?
        };
        rewrite_model_field(&body, original_model)
    }
}

/// Replaces the top-level `model` string field of a JSON body in place,
/// used for both the bypass fast path and restoring the caller's original
/// model name in blocking responses.
pub fn rewrite_model_field(raw: &[u8], model: &str) -> Result<Vec<u8>, TransformError> {
    let mut value: JsonValue =
        serde_json::from_slice(raw).map_err(|e| TransformError::InvalidResponse(e.to_string()))?;
    if let Some(obj) = value.as_object_mut() {
        obj.insert("model".to_string(), JsonValue::String(model.to_string()));
    }
    serde_json::to_vec(&value).map_err(TransformError::from)
}

/// Clamps an existing top-level `max_tokens` field into `[min_limit,
/// max_limit]`. Leaves the body untouched when the field is absent —
/// some client protocols never set it, and this pipeline doesn't invent
/// sampling parameters the caller didn't ask for.
fn clamp_max_tokens_field(raw: &[u8], min_limit: u32, max_limit: u32) -> Result<Vec<u8>, TransformError> {
    let mut value: JsonValue =
        serde_json::from_slice(raw).map_err(|e| TransformError::InvalidResponse(e.to_string()))?;
    if let Some(obj) = value.as_object_mut() {
        if obj.contains_key("max_tokens") {
            let current = obj.get("max_tokens").and_then(|v| v.as_u64()).map(|v| v as u32);
            let clamped = clamp_max_tokens(current, min_limit, max_limit);
            obj.insert("max_tokens".to_string(), JsonValue::from(clamped));
        }
    }
    serde_json::to_vec(&value).map_err(TransformError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_model_field_replaces_existing_value() {
        let raw = br#"{"model":"gpt-4o","messages":[]}"#;
        let out = rewrite_model_field(raw, "gpt-4o-mini-2024").unwrap();
        let value: JsonValue = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["model"], "gpt-4o-mini-2024");
        assert!(value["messages"].is_array());
    }

    #[test]
    fn bypass_skips_the_unified_round_trip_and_only_rewrites_model() {
        let registry = TransformerRegistry::new();
        let pipeline = TransformPipeline::new(&registry);
        let raw = br#"{"model":"gpt-4o","unrecognized_field":"kept-verbatim"}"#;

        let out = pipeline
            .build_upstream_request(Protocol::OpenAi, Protocol::OpenAi, raw, "gpt-4o-upstream")
            .unwrap();
        let value: JsonValue = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["model"], "gpt-4o-upstream");
        assert_eq!(value["unrecognized_field"], "kept-verbatim");
    }

    #[test]
    fn cross_protocol_request_goes_through_the_unified_form() {
        let registry = TransformerRegistry::new();
        let pipeline = TransformPipeline::new(&registry);
        let raw = br#"{"model":"claude-3-5-sonnet","max_tokens":256,"messages":[{"role":"user","content":[{"type":"text","text":"hi"}]}]}"#;

        let out = pipeline
            .build_upstream_request(Protocol::Anthropic, Protocol::OpenAi, raw, "gpt-4o")
            .unwrap();
        let value: JsonValue = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["model"], "gpt-4o");
    }

    #[test]
    fn max_tokens_is_clamped_into_configured_bounds() {
        let registry = TransformerRegistry::new();
        let pipeline = TransformPipeline::with_token_limits(&registry, 16, 1024);
        let raw = br#"{"model":"gpt-4o","max_tokens":100000}"#;

        let out = pipeline
            .build_upstream_request(Protocol::OpenAi, Protocol::OpenAi, raw, "gpt-4o")
            .unwrap();
        let value: JsonValue = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["max_tokens"], 1024);
    }

    #[test]
    fn missing_max_tokens_field_is_left_untouched() {
        let registry = TransformerRegistry::new();
        let pipeline = TransformPipeline::with_token_limits(&registry, 16, 1024);
        let raw = br#"{"model":"gpt-4o","messages":[]}"#;

        let out = pipeline
            .build_upstream_request(Protocol::OpenAi, Protocol::OpenAi, raw, "gpt-4o")
            .unwrap();
        let value: JsonValue = serde_json::from_slice(&out).unwrap();
        assert!(value.get("max_tokens").is_none());
    }
}
