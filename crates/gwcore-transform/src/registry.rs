use std::collections::HashMap;

use gwcore_protocol::Protocol;

use crate::anthropic::AnthropicTransformer;
use crate::openai::OpenAiTransformer;
use crate::response_api::ResponseApiTransformer;
use crate::transformer::Transformer;

/// Owns one `Transformer` per protocol variant spec §4.4 names. GCP-Vertex
/// wraps the Anthropic wire shape (only the URL/header building differs,
/// which is the Upstream Dispatcher's concern), so it reuses
/// `AnthropicTransformer`; the OpenAI Responses API (`/v1/responses`) is a
/// genuinely distinct wire shape (`input` items in, `output` items and
/// named `response.*` stream events out) and gets its own
/// `ResponseApiTransformer`.
pub struct TransformerRegistry {
    transformers: HashMap<Protocol, Box<dyn Transformer>>,
}

impl TransformerRegistry {
    pub fn new() -> Self {
        let mut transformers: HashMap<Protocol, Box<dyn Transformer>> = HashMap::new();
        transformers.insert(Protocol::OpenAi, Box::new(OpenAiTransformer));
        transformers.insert(Protocol::ResponseApi, Box::new(ResponseApiTransformer));
        transformers.insert(Protocol::Anthropic, Box::new(AnthropicTransformer));
        transformers.insert(Protocol::GcpVertexAnthropic, Box::new(AnthropicTransformer));
        Self { transformers }
    }

    pub fn get(&self, protocol: Protocol) -> &dyn Transformer {
        self.transformers
            .get(&protocol)
            .expect("every Protocol variant has a registered transformer")
            .as_ref()
    }
}

impl Default for TransformerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_protocol_variant_resolves_to_a_transformer() {
        let registry = TransformerRegistry::new();
        for protocol in [
            Protocol::OpenAi,
            Protocol::Anthropic,
            Protocol::GcpVertexAnthropic,
            Protocol::ResponseApi,
        ] {
            assert_eq!(registry.get(protocol).protocol().as_str().is_empty(), false);
        }
    }
}
