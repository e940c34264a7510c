use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

/// One structured request/response record (spec §6 persisted-state
/// layout / `JSONL_LOG_*` env vars). Bodies are only populated when
/// `REQUEST_LOG_BODY_ENABLED` is set — callers decide whether to fill
/// `request_body`/`response_body` before submitting. Headers are always
/// masked via `gwcore_common::mask_headers` before the caller attaches
/// them here (spec §7: sensitive headers are masked before any record is
/// persisted).
#[derive(Debug, Clone, Serialize)]
pub struct RequestLogRecord {
    pub request_id: String,
    pub timestamp: String,
    pub credential_name: Option<String>,
    pub client_protocol: String,
    pub provider_name: Option<String>,
    pub provider_protocol: Option<String>,
    pub requested_model: String,
    pub mapped_model: Option<String>,
    pub is_streaming: bool,
    pub status: u16,
    pub duration_ms: u64,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub error_kind: Option<String>,
    pub request_headers: Vec<(String, String)>,
    pub response_headers: Vec<(String, String)>,
    pub request_body: Option<serde_json::Value>,
    pub response_body: Option<serde_json::Value>,
}

/// Best-effort JSONL sink: a bounded channel feeding a single background
/// writer task, matching the teacher's event-sink shape
/// (`DbEventSink`/`EventSink`) but writing newline-delimited JSON to a
/// file instead of a DB table. Per spec §5's backpressure policy, a full
/// channel drops the record and increments `dropped` rather than
/// blocking the request path.
pub struct JsonlLogSink {
    sender: mpsc::Sender<RequestLogRecord>,
    dropped: Arc<AtomicU64>,
}

impl JsonlLogSink {
    pub fn spawn(path: PathBuf, buffer_size: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<RequestLogRecord>(buffer_size.max(1));
        let dropped = Arc::new(AtomicU64::new(0));

        tokio::spawn(async move {
            let file = OpenOptions::new().create(true).append(true).open(&path).await;
            let mut file = match file {
                Ok(file) => file,
                Err(err) => {
                    tracing::error!(path = %path.display(), error = %err, "jsonl log sink failed to open file");
                    return;
                }
            };

            while let Some(record) = receiver.recv().await {
                match serde_json::to_string(&record) {
                    Ok(mut line) => {
                        line.push('\n');
                        if let Err(err) = file.write_all(line.as_bytes()).await {
                            tracing::error!(error = %err, "jsonl log sink write failed");
                        }
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "jsonl log record failed to serialize");
                    }
                }
            }
        });

        Self { sender, dropped }
    }

    /// Non-blocking submit. Never awaits backpressure from the writer
    /// task — a slow disk must not slow down request handling.
    pub fn submit(&self, record: RequestLogRecord) {
        if self.sender.try_send(record).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// No-op sink used when `JSONL_LOG_ENABLED` is false, so callers don't
/// need an `Option<JsonlLogSink>` branch on every request.
pub struct NoopLogSink;

impl NoopLogSink {
    pub fn submit(&self, _record: RequestLogRecord) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> RequestLogRecord {
        RequestLogRecord {
            request_id: "req-1".to_string(),
            timestamp: "2026-07-29T00:00:00Z".to_string(),
            credential_name: Some("k1".to_string()),
            client_protocol: "openai".to_string(),
            provider_name: Some("p1".to_string()),
            provider_protocol: Some("openai".to_string()),
            requested_model: "gpt-4".to_string(),
            mapped_model: Some("gpt-4-0613".to_string()),
            is_streaming: false,
            status: 200,
            duration_ms: 42,
            input_tokens: Some(10),
            output_tokens: Some(5),
            error_kind: None,
            request_headers: Vec::new(),
            response_headers: Vec::new(),
            request_body: None,
            response_body: None,
        }
    }

    #[tokio::test]
    async fn writes_newline_delimited_json_records() {
        let dir = tempdir();
        let path = dir.join("requests.jsonl");
        let sink = JsonlLogSink::spawn(path.clone(), 16);

        sink.submit(sample_record());
        sink.submit(sample_record());

        // give the background writer a chance to drain the channel
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(parsed["request_id"], "req-1");
        }
    }

    #[tokio::test]
    async fn dropped_count_starts_at_zero() {
        let dir = tempdir();
        let sink = JsonlLogSink::spawn(dir.join("requests.jsonl"), 1);
        assert_eq!(sink.dropped_count(), 0);
    }

    fn tempdir() -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("gwcore-storage-test-{}", std::process::id()));
        let _ = std::fs::create_dir_all(&dir);
        dir
    }
}
