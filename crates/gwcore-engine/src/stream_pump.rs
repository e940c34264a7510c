use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use gwcore_protocol::sse::SseParser;
use gwcore_protocol::Protocol;
use gwcore_transform::{StreamRenderContext, StreamStateMachine, TransformerRegistry};
use tokio::sync::mpsc;

use crate::observability::{ObservabilityTap, RequestLabels};
use crate::upstream_client::UpstreamBody;

/// What the pump learned by the time the stream ended, handed back to the
/// caller so it can finish the request log record and report final usage
/// and timing metrics once the stream concludes.
#[derive(Debug, Clone, Default)]
pub struct PumpOutcome {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub first_token_elapsed: Option<Duration>,
    pub client_disconnected: bool,
}

/// Drives a raw upstream byte stream through the Stream State Machine and
/// writes the client's protocol-rendered SSE frames to `out`. Always
/// round-trips through the state machine (no raw-passthrough bypass, even
/// for a same-protocol pair): that keeps `message_start`/block synthesis
/// and usage accounting uniform regardless of which provider is upstream.
pub async fn pump(
    mut body: UpstreamBody,
    out: mpsc::Sender<Result<Bytes, std::io::Error>>,
    transformers: Arc<TransformerRegistry>,
    provider_protocol: Protocol,
    client_protocol: Protocol,
    render_ctx: StreamRenderContext,
    tap: Arc<dyn ObservabilityTap>,
    labels: RequestLabels,
    requested_model: &str,
) -> PumpOutcome {
    let UpstreamBody::Stream(mut rx) = body else {
        return PumpOutcome::default();
    };

    let provider_transformer = transformers.get(provider_protocol);
    let client_transformer = transformers.get(client_protocol);
    let mut sse = SseParser::new();
    let mut machine = StreamStateMachine::new(render_ctx.id.clone(), render_ctx.model.clone());
    let started = Instant::now();
    let mut emitted_text_tokens = 0i64;
    let mut disconnected = false;

    'drain: while let Some(raw_chunk) = rx.recv().await {
        for event in sse.push_bytes(&raw_chunk) {
            let Some(tick) = provider_transformer.upstream_event_to_tick(event.event.as_deref(), &event.data) else {
                continue;
            };
            if let Some(text) = &tick.text_delta {
                emitted_text_tokens += gwcore_transform::count_tokens(requested_model, text);
            }
            let chunks = machine.ingest(tick);
            if !emit(client_transformer, &chunks, &render_ctx, &out).await {
                disconnected = true;
                break 'drain;
            }
        }
    }

    if !disconnected {
        for event in sse.finish() {
            if let Some(tick) = provider_transformer.upstream_event_to_tick(event.event.as_deref(), &event.data) {
                let chunks = machine.ingest(tick);
                if !emit(client_transformer, &chunks, &render_ctx, &out).await {
                    disconnected = true;
                    break;
                }
            }
        }
    }

    if disconnected {
        machine.abort();
        tap.client_disconnect(client_protocol.as_str());
    } else {
        machine.add_local_output_tokens(0i64.max(emitted_text_tokens - machine.accumulated_usage().output_tokens));
        let closing = machine.finish();
        let _ = emit(client_transformer, &closing, &render_ctx, &out).await;
        if let Some(marker) = client_transformer.terminal_marker() {
            let _ = out.send(Ok(Bytes::from(marker))).await;
        }
    }

    let usage = machine.accumulated_usage();
    let first_token_elapsed = machine.first_token_at().map(|at| at.saturating_duration_since(started));
    if let Some(elapsed) = first_token_elapsed {
        tap.first_token_time(&labels, elapsed);
    }
    let total_elapsed = started.elapsed();
    if total_elapsed.as_secs_f64() > 0.0 && usage.output_tokens > 0 {
        tap.tokens_per_second(&labels, usage.output_tokens as f64 / total_elapsed.as_secs_f64());
    }

    PumpOutcome {
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        first_token_elapsed,
        client_disconnected: disconnected,
    }
}

async fn emit(
    transformer: &dyn gwcore_transform::Transformer,
    chunks: &[gwcore_transform::StreamChunk],
    ctx: &StreamRenderContext,
    out: &mpsc::Sender<Result<Bytes, std::io::Error>>,
) -> bool {
    for chunk in chunks {
        if let Some(frame) = transformer.render_client_event(chunk, ctx) {
            if out.send(Ok(Bytes::from(frame))).await.is_err() {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use gwcore_transform::TransformerRegistry;

    fn render_ctx() -> StreamRenderContext {
        StreamRenderContext {
            id: "msg_1".to_string(),
            model: "gpt-4o".to_string(),
            created_unix: 0,
        }
    }

    #[tokio::test]
    async fn pump_renders_openai_sse_frames_and_reports_usage() {
        let (upstream_tx, upstream_rx) = mpsc::channel::<Bytes>(8);
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let transformers = Arc::new(TransformerRegistry::new());
        let tap: Arc<dyn ObservabilityTap> = Arc::new(crate::observability::NoopTap);
        let labels = RequestLabels::new("gpt-4o", Some("p1"), Some("k1"), "openai");

        let handle = tokio::spawn(pump(
            UpstreamBody::Stream(upstream_rx),
            out_tx,
            transformers,
            Protocol::OpenAi,
            Protocol::OpenAi,
            render_ctx(),
            tap,
            labels,
            "gpt-4o",
        ));

        let frame = br#"data: {"id":"chatcmpl-1","object":"chat.completion.chunk","created":0,"model":"gpt-4o","choices":[{"index":0,"delta":{"content":"hi"},"finish_reason":null}]}"#;
        upstream_tx.send(Bytes::from_static(frame)).await.unwrap();
        upstream_tx
            .send(Bytes::from_static(b"\n\ndata: [DONE]\n\n"))
            .await
            .unwrap();
        drop(upstream_tx);

        let outcome = handle.await.unwrap();
        assert!(!outcome.client_disconnected);

        let mut saw_content = false;
        while let Ok(Some(item)) = tokio::time::timeout(Duration::from_millis(200), out_rx.recv()).await {
            let bytes = item.unwrap();
            if String::from_utf8_lossy(&bytes).contains("\"content\":\"hi\"") {
                saw_content = true;
            }
        }
        assert!(saw_content);
    }

    #[tokio::test]
    async fn dropped_receiver_is_reported_as_disconnect() {
        let (upstream_tx, upstream_rx) = mpsc::channel::<Bytes>(8);
        let (out_tx, out_rx) = mpsc::channel(1);
        drop(out_rx);
        let transformers = Arc::new(TransformerRegistry::new());
        let tap: Arc<dyn ObservabilityTap> = Arc::new(crate::observability::NoopTap);
        let labels = RequestLabels::new("gpt-4o", None, None, "openai");

        let handle = tokio::spawn(pump(
            UpstreamBody::Stream(upstream_rx),
            out_tx,
            transformers,
            Protocol::OpenAi,
            Protocol::OpenAi,
            render_ctx(),
            tap,
            labels,
            "gpt-4o",
        ));

        let frame = br#"data: {"id":"chatcmpl-1","object":"chat.completion.chunk","created":0,"model":"gpt-4o","choices":[{"index":0,"delta":{"content":"hi"},"finish_reason":null}]}

"#;
        upstream_tx.send(Bytes::from_static(frame)).await.unwrap();
        drop(upstream_tx);

        let outcome = handle.await.unwrap();
        assert!(outcome.client_disconnected);
    }
}
