use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use wreq::{Client, Method};

/// One upstream HTTP call, protocol-neutral. The Upstream Dispatcher
/// (spec §4.7) builds one of these per request; this module is the only
/// place that actually touches a socket.
#[derive(Debug, Clone)]
pub struct UpstreamHttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    pub is_stream: bool,
}

pub enum UpstreamBody {
    Bytes(Bytes),
    /// Each item is one raw chunk off the wire, not yet split on SSE
    /// event boundaries — that's the Stream State Machine's job.
    Stream(mpsc::Receiver<Bytes>),
}

pub struct UpstreamHttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: UpstreamBody,
}

/// Transport-level failure, distinct from an upstream HTTP error status
/// (spec §4.7): a non-2xx/4xx/5xx response still reaches the dispatcher
/// as an `Ok(UpstreamHttpResponse)`; only connection/timeout failures
/// come back through this path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamTransportErrorKind {
    Timeout,
    Connect,
    Other,
}

#[derive(Debug)]
pub struct UpstreamTransportError {
    pub kind: UpstreamTransportErrorKind,
    pub message: String,
}

pub trait UpstreamClient: Send + Sync {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, UpstreamTransportError>> + Send + 'a>>;
}

#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub stream_idle_timeout: Duration,
}

impl Default for UpstreamClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            // Spec §5: overall upstream deadline, default on the order of
            // five minutes, configurable via REQUEST_TIMEOUT_SECS.
            request_timeout: Duration::from_secs(300),
            stream_idle_timeout: Duration::from_secs(30),
        }
    }
}

impl UpstreamClientConfig {
    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout = Duration::from_secs(secs);
        self
    }
}

/// Shared-pool HTTP client (spec §5: one bounded keep-alive pool for
/// every request). Grounded on the teacher's `WreqUpstreamClient`,
/// trimmed of its per-proxy client cache since this rewrite's
/// `GlobalConfig` carries no outbound-proxy setting.
#[derive(Clone)]
pub struct WreqUpstreamClient {
    client: Client,
    stream_idle_timeout: Duration,
}

impl WreqUpstreamClient {
    pub fn new(config: UpstreamClientConfig) -> Result<Self, wreq::Error> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .read_timeout(config.stream_idle_timeout)
            .build()?;
        Ok(Self {
            client,
            stream_idle_timeout: config.stream_idle_timeout,
        })
    }
}

impl UpstreamClient for WreqUpstreamClient {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, UpstreamTransportError>> + Send + 'a>>
    {
        Box::pin(async move {
            let mut builder = self.client.request(req.method, &req.url);
            for (name, value) in &req.headers {
                builder = builder.header(name, value);
            }
            if let Some(body) = req.body {
                builder = builder.body(body);
            }

            let resp = builder.send().await.map_err(map_wreq_error)?;
            convert_response(resp, req.is_stream, self.stream_idle_timeout).await
        })
    }
}

async fn convert_response(
    resp: wreq::Response,
    want_stream: bool,
    stream_idle_timeout: Duration,
) -> Result<UpstreamHttpResponse, UpstreamTransportError> {
    let status = resp.status().as_u16();
    let headers = headers_from_wreq(resp.headers());

    let is_success = (200..300).contains(&status);
    if !is_success || !want_stream {
        let body = resp.bytes().await.map_err(map_wreq_error)?;
        return Ok(UpstreamHttpResponse {
            status,
            headers,
            body: UpstreamBody::Bytes(body),
        });
    }

    let (tx, rx) = mpsc::channel::<Bytes>(16);
    tokio::spawn(async move {
        let mut stream = resp.bytes_stream();
        loop {
            let next = tokio::time::timeout(stream_idle_timeout, stream.next()).await;
            let item = match next {
                Ok(item) => item,
                Err(_) => break,
            };
            let Some(item) = item else {
                break;
            };
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(_) => break,
            };
            if tx.send(chunk).await.is_err() {
                break;
            }
        }
    });

    Ok(UpstreamHttpResponse {
        status,
        headers,
        body: UpstreamBody::Stream(rx),
    })
}

fn headers_from_wreq(map: &wreq::header::HeaderMap) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for (name, value) in map {
        if let Ok(value) = value.to_str() {
            out.push((name.as_str().to_string(), value.to_string()));
        }
    }
    out
}

fn map_wreq_error(err: wreq::Error) -> UpstreamTransportError {
    let kind = if err.is_timeout() {
        UpstreamTransportErrorKind::Timeout
    } else if err.is_connect() {
        UpstreamTransportErrorKind::Connect
    } else {
        UpstreamTransportErrorKind::Other
    };
    UpstreamTransportError {
        kind,
        message: err.to_string(),
    }
}
