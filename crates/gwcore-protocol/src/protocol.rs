use serde::{Deserialize, Serialize};

/// Wire protocol spoken by a client or an upstream provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    OpenAi,
    Anthropic,
    GcpVertexAnthropic,
    ResponseApi,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::OpenAi => "openai",
            Protocol::Anthropic => "anthropic",
            Protocol::GcpVertexAnthropic => "gcp-vertex-anthropic",
            Protocol::ResponseApi => "response-api",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "openai" => Some(Protocol::OpenAi),
            "anthropic" => Some(Protocol::Anthropic),
            "gcp-vertex-anthropic" => Some(Protocol::GcpVertexAnthropic),
            "response-api" => Some(Protocol::ResponseApi),
            _ => None,
        }
    }
}

/// Classifies an inbound route into the client protocol it speaks. Mirrors
/// the route table of the HTTP surface (out of scope here; the surface
/// layer calls this once per request before invoking the transform
/// pipeline).
pub fn detect_client_protocol(path: &str) -> Option<Protocol> {
    if path.starts_with("/v1/messages") {
        Some(Protocol::Anthropic)
    } else if path.starts_with("/v1/responses") {
        Some(Protocol::ResponseApi)
    } else if path.starts_with("/v1/chat/completions") || path.starts_with("/v1/completions") {
        Some(Protocol::OpenAi)
    } else if path.starts_with("/models/gcp-vertex/") {
        Some(Protocol::GcpVertexAnthropic)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_known_routes() {
        assert_eq!(
            detect_client_protocol("/v1/chat/completions"),
            Some(Protocol::OpenAi)
        );
        assert_eq!(
            detect_client_protocol("/v1/messages/count_tokens"),
            Some(Protocol::Anthropic)
        );
        assert_eq!(detect_client_protocol("/v1/responses"), Some(Protocol::ResponseApi));
        assert_eq!(
            detect_client_protocol(
                "/models/gcp-vertex/v1/projects/p/locations/l/publishers/anthropic/models/claude:rawPredict"
            ),
            Some(Protocol::GcpVertexAnthropic)
        );
        assert_eq!(detect_client_protocol("/health"), None);
    }

    #[test]
    fn round_trips_as_str_and_parse() {
        for p in [
            Protocol::OpenAi,
            Protocol::Anthropic,
            Protocol::GcpVertexAnthropic,
            Protocol::ResponseApi,
        ] {
            assert_eq!(Protocol::parse(p.as_str()), Some(p));
        }
    }
}
