use bytes::Bytes;
use gwcore_common::GatewayError;
use gwcore_protocol::Protocol;
use gwcore_routing::model::Provider;
use gwcore_routing::selector::ProviderSelector;
use wreq::Method;

use crate::upstream_client::{
    UpstreamBody, UpstreamClient, UpstreamHttpRequest, UpstreamHttpResponse, UpstreamTransportError,
    UpstreamTransportErrorKind,
};

/// Upstream Dispatcher (spec §4.7): builds the URL and headers for a
/// provider's protocol, sends the request through the shared client, and
/// reports the outcome back to the Provider Selector so later picks can
/// route around a failing provider.
pub struct Dispatcher {
    client: std::sync::Arc<dyn UpstreamClient>,
}

impl Dispatcher {
    pub fn new(client: std::sync::Arc<dyn UpstreamClient>) -> Self {
        Self { client }
    }

    /// Builds the fully-qualified upstream URL for one call. GCP-Vertex
    /// path segments are validated against traversal sequences and path
    /// separators before being interpolated into the URL.
    pub fn build_url(
        &self,
        provider: &Provider,
        upstream_model: &str,
        is_stream: bool,
    ) -> Result<String, GatewayError> {
        let base = provider.base_url.trim_end_matches('/');
        match provider.protocol {
            Protocol::OpenAi => Ok(format!("{base}/v1/chat/completions")),
            Protocol::ResponseApi => Ok(format!("{base}/v1/responses")),
            Protocol::Anthropic => Ok(format!("{base}/v1/messages")),
            Protocol::GcpVertexAnthropic => self.build_vertex_url(provider, upstream_model, is_stream),
        }
    }

    fn build_vertex_url(
        &self,
        provider: &Provider,
        upstream_model: &str,
        is_stream: bool,
    ) -> Result<String, GatewayError> {
        let project = provider
            .gcp_project
            .as_deref()
            .ok_or_else(|| GatewayError::Internal("gcp-vertex provider missing gcp_project".to_string()))?;
        let location = provider
            .gcp_location
            .as_deref()
            .ok_or_else(|| GatewayError::Internal("gcp-vertex provider missing gcp_location".to_string()))?;
        let publisher = provider.gcp_publisher.as_deref().unwrap_or("anthropic");

        for segment in [project, location, publisher, upstream_model] {
            validate_path_segment(segment)?;
        }

        let action = if is_stream { "streamRawPredict" } else { "rawPredict" };
        let base = provider.base_url.trim_end_matches('/');
        Ok(format!(
            "{base}/v1/projects/{project}/locations/{location}/publishers/{publisher}/models/{upstream_model}:{action}"
        ))
    }

    /// `Authorization: Bearer <key>` for OpenAI/Response-API/GCP-Vertex;
    /// `x-api-key` plus `anthropic-version` for Anthropic.
    pub fn build_headers(&self, provider: &Provider) -> Vec<(String, String)> {
        let mut headers = vec![("content-type".to_string(), "application/json".to_string())];
        match provider.protocol {
            Protocol::OpenAi | Protocol::ResponseApi | Protocol::GcpVertexAnthropic => {
                headers.push(("authorization".to_string(), format!("Bearer {}", provider.api_key)));
            }
            Protocol::Anthropic => {
                headers.push(("x-api-key".to_string(), provider.api_key.clone()));
                let version = provider.anthropic_version.as_deref().unwrap_or("2023-06-01");
                headers.push(("anthropic-version".to_string(), version.to_string()));
            }
        }
        headers
    }

    /// Sends one upstream call and reports the outcome to the selector.
    /// Transport failures are classified and turned into a `GatewayError`
    /// directly; an upstream HTTP status (including a non-2xx one) is
    /// handed back unmodified so the caller can decide how to treat the
    /// body (blocking callers surface it as an error, streaming callers
    /// feed it through the state machine regardless of status).
    pub async fn dispatch(
        &self,
        selector: &ProviderSelector,
        provider: &Provider,
        url: String,
        headers: Vec<(String, String)>,
        body: Bytes,
        is_stream: bool,
    ) -> Result<UpstreamHttpResponse, GatewayError> {
        let req = UpstreamHttpRequest {
            method: Method::POST,
            url,
            headers,
            body: Some(body),
            is_stream,
        };

        match self.client.send(req).await {
            Ok(resp) => {
                let retry_after = retry_after_from_headers(&resp.headers);
                selector.report_http_status(provider.id, resp.status, retry_after);
                Ok(resp)
            }
            Err(err) => {
                selector.report_transport_error(provider.id);
                Err(transport_error_to_gateway(err))
            }
        }
    }
}

fn validate_path_segment(segment: &str) -> Result<(), GatewayError> {
    if segment.is_empty() || segment.contains("..") || segment.contains('/') || segment.contains('\\') {
        return Err(GatewayError::BadRequest(format!(
            "invalid gcp-vertex path segment: {segment}"
        )));
    }
    Ok(())
}

pub fn retry_after_from_headers(headers: &[(String, String)]) -> Option<u64> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("retry-after"))
        .and_then(|(_, value)| value.trim().parse::<u64>().ok())
}

fn transport_error_to_gateway(err: UpstreamTransportError) -> GatewayError {
    match err.kind {
        UpstreamTransportErrorKind::Timeout => GatewayError::UpstreamTimeout,
        UpstreamTransportErrorKind::Connect => {
            GatewayError::UpstreamTransport("failed to connect".to_string())
        }
        UpstreamTransportErrorKind::Other => GatewayError::UpstreamTransport(err.message),
    }
}

/// Reads the whole body out of an `UpstreamHttpResponse` for the blocking
/// path; streaming callers drain `UpstreamBody::Stream` themselves.
pub async fn read_blocking_body(body: UpstreamBody) -> Bytes {
    match body {
        UpstreamBody::Bytes(bytes) => bytes,
        UpstreamBody::Stream(mut rx) => {
            let mut buf = Vec::new();
            while let Some(chunk) = rx.recv().await {
                buf.extend_from_slice(&chunk);
            }
            Bytes::from(buf)
        }
    }
}

/// Surfaces a non-2xx upstream status as a `GatewayError::Upstream`,
/// extracting `error.message` (or `message`) from the upstream body where
/// present (spec §4.7). A `Retry-After` header on the upstream response is
/// carried through unchanged (spec §9 Open Question, resolved in
/// DESIGN.md: surfaced to the client as-is).
pub fn upstream_error_from_body(status: u16, body: &[u8], headers: &[(String, String)]) -> GatewayError {
    let message = extract_upstream_message(body).unwrap_or_else(|| "upstream error".to_string());
    GatewayError::Upstream {
        status,
        message,
        error_type: "upstream_error".to_string(),
        retry_after_secs: retry_after_from_headers(headers),
    }
}

fn extract_upstream_message(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .or_else(|| value.get("message").and_then(|m| m.as_str()))
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gwcore_common::ProviderId;

    fn provider(protocol: Protocol) -> Provider {
        Provider {
            id: ProviderId(1),
            name: "p1".to_string(),
            protocol,
            base_url: "https://api.example.com/".to_string(),
            api_key: "sk-upstream".to_string(),
            weight: 1,
            enabled: true,
            model_map: Vec::new(),
            anthropic_version: None,
            gcp_project: Some("proj".to_string()),
            gcp_location: Some("us-central1".to_string()),
            gcp_publisher: Some("anthropic".to_string()),
        }
    }

    fn dispatcher() -> Dispatcher {
        struct NullClient;
        impl UpstreamClient for NullClient {
            fn send<'a>(
                &'a self,
                _req: UpstreamHttpRequest,
            ) -> std::pin::Pin<
                Box<dyn std::future::Future<Output = Result<UpstreamHttpResponse, UpstreamTransportError>> + Send + 'a>,
            > {
                Box::pin(async { unreachable!("not exercised by these tests") })
            }
        }
        Dispatcher::new(std::sync::Arc::new(NullClient))
    }

    #[test]
    fn openai_url_is_chat_completions() {
        let d = dispatcher();
        let url = d.build_url(&provider(Protocol::OpenAi), "gpt-4o", false).unwrap();
        assert_eq!(url, "https://api.example.com/v1/chat/completions");
    }

    #[test]
    fn anthropic_headers_use_x_api_key_and_version() {
        let d = dispatcher();
        let headers = d.build_headers(&provider(Protocol::Anthropic));
        assert!(headers.contains(&("x-api-key".to_string(), "sk-upstream".to_string())));
        assert!(headers
            .iter()
            .any(|(k, v)| k == "anthropic-version" && v == "2023-06-01"));
    }

    #[test]
    fn openai_headers_use_bearer() {
        let d = dispatcher();
        let headers = d.build_headers(&provider(Protocol::OpenAi));
        assert!(headers.contains(&("authorization".to_string(), "Bearer sk-upstream".to_string())));
    }

    #[test]
    fn vertex_url_includes_project_location_publisher_and_action() {
        let d = dispatcher();
        let url = d
            .build_url(&provider(Protocol::GcpVertexAnthropic), "claude-3-5-sonnet", true)
            .unwrap();
        assert_eq!(
            url,
            "https://api.example.com/v1/projects/proj/locations/us-central1/publishers/anthropic/models/claude-3-5-sonnet:streamRawPredict"
        );
    }

    #[test]
    fn vertex_url_rejects_path_traversal_in_model_name() {
        let d = dispatcher();
        let err = d
            .build_url(&provider(Protocol::GcpVertexAnthropic), "../../etc/passwd", false)
            .unwrap_err();
        assert!(matches!(err, GatewayError::BadRequest(_)));
    }

    #[test]
    fn vertex_url_rejects_path_separator_in_model_name() {
        let d = dispatcher();
        let err = d
            .build_url(&provider(Protocol::GcpVertexAnthropic), "claude/foo", false)
            .unwrap_err();
        assert!(matches!(err, GatewayError::BadRequest(_)));
    }

    #[test]
    fn retry_after_header_is_parsed() {
        let headers = vec![("Retry-After".to_string(), "7".to_string())];
        assert_eq!(retry_after_from_headers(&headers), Some(7));
    }

    #[test]
    fn upstream_message_is_extracted_from_error_object() {
        let body = br#"{"error":{"message":"rate limited upstream"}}"#;
        let err = upstream_error_from_body(429, body, &[]);
        match err {
            GatewayError::Upstream { status, message, .. } => {
                assert_eq!(status, 429);
                assert_eq!(message, "rate limited upstream");
            }
            _ => panic!("expected Upstream variant"),
        }
    }

    #[test]
    fn upstream_message_falls_back_when_unparseable() {
        let err = upstream_error_from_body(500, b"not json", &[]);
        match err {
            GatewayError::Upstream { message, .. } => assert_eq!(message, "upstream error"),
            _ => panic!("expected Upstream variant"),
        }
    }

    #[test]
    fn upstream_error_carries_retry_after_through_unchanged() {
        let headers = vec![("Retry-After".to_string(), "30".to_string())];
        let err = upstream_error_from_body(429, b"{}", &headers);
        match err {
            GatewayError::Upstream { retry_after_secs, .. } => assert_eq!(retry_after_secs, Some(30)),
            _ => panic!("expected Upstream variant"),
        }
    }
}
