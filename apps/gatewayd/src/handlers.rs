use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use gwcore_common::GatewayError;
use gwcore_engine::dispatcher::{read_blocking_body, retry_after_from_headers, upstream_error_from_body};
use gwcore_engine::observability::RequestLabels;
use gwcore_engine::pipeline::{rewrite_model_field, TransformPipeline};
use gwcore_engine::state::AppState;
use gwcore_engine::stream_pump::pump;
use gwcore_protocol::Protocol;
use gwcore_routing::credential_gate::extract_api_key;
use gwcore_storage::sinks::RequestLogRecord;
use gwcore_transform::content::protocol_error_body;
use gwcore_transform::transformer::StreamRenderContext;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::bootstrap::strip_provider_suffix;

/// `POST /v1/chat/completions`. The legacy `/v1/completions` route is
/// wired to the same handler (spec's text-completion shape has no
/// `messages` array the UIF can represent; a same-protocol provider still
/// gets a correct bypass round trip, which is the only case this route
/// realistically exercises against a configured OpenAI-protocol
/// provider).
pub async fn chat_completions(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    handle(state, Protocol::OpenAi, headers, body, None).await
}

pub async fn messages(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    handle(state, Protocol::Anthropic, headers, body, None).await
}

pub async fn responses(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    handle(state, Protocol::ResponseApi, headers, body, None).await
}

/// `POST /v1/messages/count_tokens`: answered locally, never dispatched
/// upstream. `CreateMessageRequestBody` requires `max_tokens`, which this
/// route's wire shape doesn't carry, so a placeholder is injected before
/// the body is handed to the Anthropic transformer's request parser.
pub async fn count_tokens(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    let raw_key = extract_api_key(|name| find_header(&headers, name));
    if let Err(err) = state.credential_gate.authenticate_any_model(raw_key, Instant::now()) {
        return error_response(Protocol::Anthropic, &err);
    }

    let mut value: JsonValue = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => return error_response(Protocol::Anthropic, &GatewayError::BadRequest(e.to_string())),
    };
    let Some(obj) = value.as_object_mut() else {
        return error_response(Protocol::Anthropic, &GatewayError::BadRequest("body must be a JSON object".to_string()));
    };
    obj.entry("max_tokens").or_insert(JsonValue::from(4096));
    let model = obj.get("model").and_then(|m| m.as_str()).unwrap_or("").to_string();

    let patched = match serde_json::to_vec(&value) {
        Ok(bytes) => bytes,
        Err(e) => return error_response(Protocol::Anthropic, &GatewayError::Internal(e.to_string())),
    };

    let unified = match state.transformers.get(Protocol::Anthropic).request_to_unified(&patched) {
        Ok(u) => u,
        Err(e) => return error_response(Protocol::Anthropic, &GatewayError::BadRequest(e.to_string())),
    };

    let mut text = unified.system.clone().unwrap_or_default();
    for message in &unified.messages {
        for block in &message.content {
            match block {
                gwcore_transform::uif::ContentBlock::Text { text: t } => {
                    text.push('\n');
                    text.push_str(t);
                }
                gwcore_transform::uif::ContentBlock::Thinking { text: t, .. } => {
                    text.push('\n');
                    text.push_str(t);
                }
                _ => {}
            }
        }
    }

    let tokens = gwcore_transform::count_tokens(&model, &text);
    axum::Json(serde_json::json!({ "input_tokens": tokens })).into_response()
}

/// `POST /models/gcp-vertex/v1/projects/{project}/locations/{location}/publishers/{publisher}/models/{model}:{action}`.
/// The model name authoritative for routing comes from the path, not the
/// body; `project`/`location`/`publisher` identify nothing here beyond
/// matching the configured provider's own fields (the Upstream
/// Dispatcher builds the actual outbound URL from the provider record,
/// not by echoing these segments back).
pub async fn vertex_predict(
    State(state): State<Arc<AppState>>,
    Path((_project, _location, _publisher, model_and_action)): Path<(String, String, String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some((model, action)) = model_and_action.split_once(':') else {
        return error_response(
            Protocol::GcpVertexAnthropic,
            &GatewayError::BadRequest("expected {model}:rawPredict or {model}:streamRawPredict".to_string()),
        );
    };
    let is_stream = match action {
        "rawPredict" => false,
        "streamRawPredict" => true,
        other => {
            return error_response(
                Protocol::GcpVertexAnthropic,
                &GatewayError::BadRequest(format!("unknown vertex action {other}")),
            )
        }
    };

    let body = match rewrite_model_field(&body, model) {
        Ok(bytes) => Bytes::from(bytes),
        Err(e) => return error_response(Protocol::GcpVertexAnthropic, &GatewayError::BadRequest(e.to_string())),
    };

    handle(state, Protocol::GcpVertexAnthropic, headers, body, Some(is_stream)).await
}

async fn handle(
    state: Arc<AppState>,
    client_protocol: Protocol,
    headers: HeaderMap,
    body: Bytes,
    force_stream: Option<bool>,
) -> Response {
    state.tap.request_started(client_protocol.as_str());

    let parsed: JsonValue = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => return error_response(client_protocol, &GatewayError::BadRequest(e.to_string())),
    };
    let Some(raw_model) = parsed.get("model").and_then(|m| m.as_str()).map(|s| s.to_string()) else {
        return error_response(client_protocol, &GatewayError::BadRequest("missing model field".to_string()));
    };
    let is_stream = force_stream.unwrap_or_else(|| parsed.get("stream").and_then(|s| s.as_bool()).unwrap_or(false));

    let stripped_model = strip_provider_suffix(&state.global, &raw_model).to_string();
    let raw_key = extract_api_key(|name| find_header(&headers, name));

    let auth = match state.credential_gate.authenticate(raw_key, &stripped_model, Instant::now()) {
        Ok(ctx) => ctx,
        Err(err) => return error_response(client_protocol, &err),
    };

    let provider = match state.selector.pick(&stripped_model) {
        Ok(p) => p,
        Err(err) => return error_response(client_protocol, &err),
    };

    let Some(upstream_model) = provider.resolve_model(&stripped_model) else {
        return error_response(
            client_protocol,
            &GatewayError::NoProviderForModel { model: stripped_model },
        );
    };
    let upstream_model = upstream_model.to_string();

    let pipeline = TransformPipeline::with_token_limits(
        &state.transformers,
        state.global.min_tokens_limit,
        state.global.max_tokens_limit,
    );
    let is_bypass = pipeline.is_bypass(client_protocol, provider.protocol);
    state.tap.bypass(is_bypass);

    let upstream_body = match pipeline.build_upstream_request(client_protocol, provider.protocol, &body, &upstream_model) {
        Ok(b) => b,
        Err(e) => return error_response(client_protocol, &GatewayError::BadRequest(e.to_string())),
    };

    let url = match state.dispatcher.build_url(&provider, &upstream_model, is_stream) {
        Ok(u) => u,
        Err(e) => return error_response(client_protocol, &e),
    };
    let req_headers = state.dispatcher.build_headers(&provider);

    let started = Instant::now();
    let upstream_response = match state
        .dispatcher
        .dispatch(
            &state.selector,
            &provider,
            url,
            req_headers,
            bytes::Bytes::from(upstream_body),
            is_stream,
        )
        .await
    {
        Ok(resp) => resp,
        Err(err) => {
            state.tap.provider_transport_error(&provider.name);
            log_request(
                &state,
                &auth,
                client_protocol,
                Some(&provider),
                &raw_model,
                Some(&upstream_model),
                is_stream,
                err.status(),
                started.elapsed(),
                None,
                None,
                Some(err.error_type()),
                &headers,
                &[],
                &body,
                None,
            );
            return error_response(client_protocol, &err);
        }
    };

    let labels = RequestLabels::new(
        &raw_model,
        Some(&provider.name),
        Some(&auth.credential_name),
        client_protocol.as_str(),
    );

    if is_stream {
        return stream_response(
            state,
            client_protocol,
            provider.protocol,
            upstream_response,
            &upstream_model,
            labels,
            auth,
            provider,
            raw_model,
            started,
            headers,
            body,
        );
    }

    let status = upstream_response.status;
    let response_headers = upstream_response.headers.clone();
    let raw_bytes = read_blocking_body(upstream_response.body).await;

    let (response, rendered_body) = if (200..300).contains(&status) {
        match pipeline.build_client_response(client_protocol, provider.protocol, &raw_bytes, &raw_model) {
            Ok(rendered) => {
                state.tap.request_completed(&labels, started.elapsed(), 200);
                let resp = axum::http::Response::builder()
                    .status(StatusCode::OK)
                    .header("content-type", "application/json")
                    .body(Body::from(rendered.clone()))
                    .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
                (resp, rendered)
            }
            Err(e) => (error_response(client_protocol, &GatewayError::Internal(e.to_string())), raw_bytes.clone()),
        }
    } else {
        let err = upstream_error_from_body(status, &raw_bytes, &response_headers);
        state.tap.request_completed(&labels, started.elapsed(), status);
        (error_response(client_protocol, &err), raw_bytes.clone())
    };

    log_request(
        &state,
        &auth,
        client_protocol,
        Some(&provider),
        &raw_model,
        Some(&upstream_model),
        false,
        status,
        started.elapsed(),
        None,
        None,
        None,
        &headers,
        &response_headers,
        &body,
        Some(&rendered_body),
    );

    response
}

#[allow(clippy::too_many_arguments)]
fn stream_response(
    state: Arc<AppState>,
    client_protocol: Protocol,
    provider_protocol: Protocol,
    upstream_response: gwcore_engine::upstream_client::UpstreamHttpResponse,
    upstream_model: &str,
    labels: RequestLabels,
    auth: gwcore_routing::AuthContext,
    provider: gwcore_routing::model::Provider,
    raw_model: String,
    started: Instant,
    request_headers: HeaderMap,
    request_body: Bytes,
) -> Response {
    if !(200..300).contains(&upstream_response.status) {
        return error_response(client_protocol, &GatewayError::Upstream {
            status: upstream_response.status,
            message: "upstream error".to_string(),
            error_type: "upstream_error".to_string(),
            retry_after_secs: retry_after_from_headers(&upstream_response.headers),
        });
    }

    let response_headers = upstream_response.headers.clone();
    let (out_tx, out_rx) = mpsc::channel::<Result<bytes::Bytes, std::io::Error>>(32);
    let render_ctx = StreamRenderContext {
        id: gwcore_common::RequestId::new().to_string(),
        model: raw_model.clone(),
        created_unix: time::OffsetDateTime::now_utc().unix_timestamp(),
    };
    let transformers = state.transformers.clone();
    let tap = state.tap.clone();
    let upstream_model = upstream_model.to_string();

    tokio::spawn(async move {
        let outcome = pump(
            upstream_response.body,
            out_tx,
            transformers,
            provider_protocol,
            client_protocol,
            render_ctx,
            tap.clone(),
            labels.clone(),
            &upstream_model,
        )
        .await;

        let status: u16 = if outcome.client_disconnected { 408 } else { 200 };
        tap.request_completed(&labels, started.elapsed(), status);
        tap.token_usage(&labels, outcome.input_tokens, outcome.output_tokens);
        log_request(
            &state,
            &auth,
            client_protocol,
            Some(&provider),
            &raw_model,
            Some(&upstream_model),
            true,
            status,
            started.elapsed(),
            Some(outcome.input_tokens as u64),
            Some(outcome.output_tokens as u64),
            None,
            &request_headers,
            &response_headers,
            &request_body,
            None,
        );
    });

    let body = Body::from_stream(ReceiverStream::new(out_rx));
    axum::http::Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/event-stream")
        .header("cache-control", "no-cache")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

pub async fn list_models(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let raw_key = extract_api_key(|name| find_header(&headers, name));
    if let Err(err) = state.credential_gate.authenticate_any_model(raw_key, Instant::now()) {
        return error_response(Protocol::OpenAi, &err);
    }

    let data: Vec<JsonValue> = state
        .selector
        .all_models()
        .into_iter()
        .map(|id| serde_json::json!({ "id": id, "object": "model", "created": 0, "owned_by": "gatewayd" }))
        .collect();
    axum::Json(serde_json::json!({ "object": "list", "data": data })).into_response()
}

pub async fn health() -> Response {
    axum::Json(serde_json::json!({ "status": "ok" })).into_response()
}

pub async fn health_detailed(State(state): State<Arc<AppState>>) -> Response {
    let providers: Vec<JsonValue> = state
        .selector
        .health_snapshot()
        .into_iter()
        .map(|(provider, unhealthy)| {
            serde_json::json!({
                "name": provider.name,
                "protocol": provider.protocol.as_str(),
                "healthy": !unhealthy,
            })
        })
        .collect();
    axum::Json(serde_json::json!({ "status": "ok", "providers": providers })).into_response()
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match &state.metrics {
        Some(tap) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            tap.encode_text(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Upper bound on the bytes of request/response body copied into a
/// persisted log record (spec §7: "a length-bounded copy is made for
/// logs"). Bodies longer than this are truncated before being stored, to
/// keep the JSONL sink from being driven into ever-larger disk writes by
/// a single pathological request.
const LOG_BODY_MAX_BYTES: usize = 8192;

/// Parses `bytes` as JSON (falling back to a lossy UTF-8 string) and caps
/// it at `LOG_BODY_MAX_BYTES`, tagging truncated records so a reader of
/// the JSONL log can tell a short body from one that was cut off.
fn bounded_body_json(bytes: &[u8]) -> JsonValue {
    let truncated = bytes.len() > LOG_BODY_MAX_BYTES;
    let slice = &bytes[..bytes.len().min(LOG_BODY_MAX_BYTES)];
    if !truncated {
        if let Ok(value) = serde_json::from_slice::<JsonValue>(slice) {
            return value;
        }
    }
    serde_json::json!({
        "truncated": truncated,
        "text": String::from_utf8_lossy(slice),
    })
}

fn masked_header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    gwcore_common::mask_headers(
        headers
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v))),
    )
}

#[allow(clippy::too_many_arguments)]
fn log_request(
    state: &AppState,
    auth: &gwcore_routing::AuthContext,
    client_protocol: Protocol,
    provider: Option<&gwcore_routing::model::Provider>,
    requested_model: &str,
    mapped_model: Option<&str>,
    is_streaming: bool,
    status: u16,
    elapsed: Duration,
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
    error_kind: Option<&str>,
    request_headers: &HeaderMap,
    response_headers: &[(String, String)],
    request_body: &[u8],
    response_body: Option<&[u8]>,
) {
    let response_headers = gwcore_common::mask_headers(response_headers.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    let (request_body, response_body) = if state.global.request_log_body_enabled {
        (Some(bounded_body_json(request_body)), response_body.map(bounded_body_json))
    } else {
        (None, None)
    };

    let record = RequestLogRecord {
        request_id: gwcore_common::RequestId::new().to_string(),
        timestamp: time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default(),
        credential_name: Some(auth.credential_name.clone()),
        client_protocol: client_protocol.as_str().to_string(),
        provider_name: provider.map(|p| p.name.clone()),
        provider_protocol: provider.map(|p| p.protocol.as_str().to_string()),
        requested_model: requested_model.to_string(),
        mapped_model: mapped_model.map(|m| m.to_string()),
        is_streaming,
        status,
        duration_ms: elapsed.as_millis() as u64,
        input_tokens,
        output_tokens,
        error_kind: error_kind.map(|k| k.to_string()),
        request_headers: masked_header_pairs(request_headers),
        response_headers,
        request_body,
        response_body,
    };
    state.log_sink.submit(record);
}

fn error_response(protocol: Protocol, err: &GatewayError) -> Response {
    let body = protocol_error_body(protocol, err.error_type(), &err.to_string());
    let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, axum::Json(body)).into_response();
    if let Some(retry_after) = err.retry_after_secs() {
        if let Ok(value) = axum::http::HeaderValue::from_str(&retry_after.to_string()) {
            response.headers_mut().insert("retry-after", value);
        }
    }
    response
}

fn find_header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_body_json_parses_small_json_bodies_verbatim() {
        let value = bounded_body_json(br#"{"model":"gpt-4o"}"#);
        assert_eq!(value["model"], "gpt-4o");
    }

    #[test]
    fn bounded_body_json_tags_oversized_bodies_as_truncated() {
        let oversized = vec![b'a'; LOG_BODY_MAX_BYTES + 1];
        let value = bounded_body_json(&oversized);
        assert_eq!(value["truncated"], true);
        assert_eq!(value["text"].as_str().unwrap().len(), LOG_BODY_MAX_BYTES);
    }

    #[test]
    fn bounded_body_json_falls_back_to_text_for_non_json_bodies() {
        let value = bounded_body_json(b"not json");
        assert_eq!(value["truncated"], false);
        assert_eq!(value["text"], "not json");
    }

    #[test]
    fn masked_header_pairs_hides_authorization_but_keeps_other_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer sk-live-123".parse().unwrap());
        headers.insert("x-request-id", "abc".parse().unwrap());

        let pairs = masked_header_pairs(&headers);
        let find = |name: &str| pairs.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)).map(|(_, v)| v.clone());
        assert_eq!(find("authorization"), Some("***".to_string()));
        assert_eq!(find("x-request-id"), Some("abc".to_string()));
    }
}
