use std::sync::Arc;

use gwcore_common::GlobalConfig;
use gwcore_routing::{ConfigStore, CredentialGate, ProviderSelector, RateLimiter};
use gwcore_storage::sinks::{JsonlLogSink, NoopLogSink};
use gwcore_storage::Storage;
use gwcore_transform::TransformerRegistry;

use crate::dispatcher::Dispatcher;
use crate::observability::{NoopTap, ObservabilityTap, PrometheusTap};
use crate::upstream_client::{UpstreamClient, UpstreamClientConfig, WreqUpstreamClient};

/// Either log sink shape the pipeline submits to, chosen once at startup
/// from `JSONL_LOG_ENABLED` so the request path never branches on it.
pub enum LogSink {
    Jsonl(JsonlLogSink),
    Noop(NoopLogSink),
}

impl LogSink {
    pub fn submit(&self, record: gwcore_storage::sinks::RequestLogRecord) {
        match self {
            LogSink::Jsonl(sink) => sink.submit(record),
            LogSink::Noop(sink) => sink.submit(record),
        }
    }
}

/// Everything a request handler needs, composed once at startup and
/// shared via `Arc` across every axum task (spec §5: config/selector/rate
/// limiter are each internally synchronized for concurrent access).
pub struct AppState {
    pub global: GlobalConfig,
    pub config: Arc<ConfigStore>,
    pub selector: Arc<ProviderSelector>,
    pub rate_limiter: Arc<RateLimiter>,
    pub credential_gate: Arc<CredentialGate>,
    pub transformers: Arc<TransformerRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub tap: Arc<dyn ObservabilityTap>,
    /// Present whenever `tap` is a `PrometheusTap`, so the `/metrics` route
    /// can render text exposition without downcasting the trait object.
    pub metrics: Option<Arc<PrometheusTap>>,
    pub log_sink: Arc<LogSink>,
    pub storage: Arc<dyn Storage>,
}

impl AppState {
    pub async fn bootstrap(
        global: GlobalConfig,
        storage: Arc<dyn Storage>,
        config: Arc<ConfigStore>,
        rate_limiter: Arc<RateLimiter>,
        use_prometheus: bool,
    ) -> anyhow::Result<Arc<Self>> {
        let selector = Arc::new(ProviderSelector::new(config.clone()));
        let credential_gate = Arc::new(CredentialGate::new(config.clone(), rate_limiter.clone()));
        let transformers = Arc::new(TransformerRegistry::new());

        let upstream_config = UpstreamClientConfig::default().with_request_timeout(global.request_timeout_secs);
        let client: Arc<dyn UpstreamClient> = Arc::new(WreqUpstreamClient::new(upstream_config)?);
        let dispatcher = Arc::new(Dispatcher::new(client));

        let (tap, metrics): (Arc<dyn ObservabilityTap>, Option<Arc<PrometheusTap>>) = if use_prometheus {
            let prometheus = Arc::new(PrometheusTap::new());
            (prometheus.clone(), Some(prometheus))
        } else {
            (Arc::new(NoopTap), None)
        };

        let log_sink = Arc::new(if global.jsonl_log_enabled {
            let path = global
                .jsonl_log_path
                .clone()
                .unwrap_or_else(|| "gateway-requests.jsonl".to_string());
            LogSink::Jsonl(JsonlLogSink::spawn(path.into(), global.jsonl_log_buffer_size))
        } else {
            LogSink::Noop(NoopLogSink)
        });

        Ok(Arc::new(Self {
            global,
            config,
            selector,
            rate_limiter,
            credential_gate,
            transformers,
            dispatcher,
            tap,
            metrics,
            log_sink,
            storage,
        }))
    }
}
