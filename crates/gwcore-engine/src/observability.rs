use std::time::Duration;

use prometheus::{Encoder, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Identity tuple attached to most Observability Tap events (spec §4.8).
/// Cardinality is bounded by the caller before these are constructed: an
/// absent credential becomes `"anonymous"`, an absent provider becomes
/// `"unknown"`, so a flood of bad requests never mints unbounded label
/// series.
#[derive(Debug, Clone)]
pub struct RequestLabels {
    pub model: String,
    pub provider: String,
    pub credential: String,
    pub client_protocol: String,
}

impl RequestLabels {
    pub fn new(model: &str, provider: Option<&str>, credential: Option<&str>, client_protocol: &str) -> Self {
        Self {
            model: model.to_string(),
            provider: non_empty(provider).unwrap_or("unknown").to_string(),
            credential: non_empty(credential).unwrap_or("anonymous").to_string(),
            client_protocol: client_protocol.to_string(),
        }
    }

    fn as_array(&self) -> [&str; 4] {
        [&self.model, &self.provider, &self.credential, &self.client_protocol]
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Observability Tap (spec §4.8): the core calls this at well-defined
/// points throughout the request lifecycle. Implementations may no-op;
/// nothing on the request path depends on a tap actually recording
/// anything.
pub trait ObservabilityTap: Send + Sync {
    fn request_started(&self, client_protocol: &str);
    fn request_completed(&self, labels: &RequestLabels, duration: Duration, status: u16);
    fn active_request_inc(&self);
    fn active_request_dec(&self);
    fn token_usage(&self, labels: &RequestLabels, input_tokens: i64, output_tokens: i64);
    fn first_token_time(&self, labels: &RequestLabels, elapsed: Duration);
    fn tokens_per_second(&self, labels: &RequestLabels, rate: f64);
    fn bypass(&self, is_bypass: bool);
    fn provider_transport_error(&self, provider: &str);
    fn client_disconnect(&self, client_protocol: &str);
}

/// Used where a tap is required but nothing downstream consumes metrics
/// (tests, or a deployment that exposes no `/metrics` route).
pub struct NoopTap;

impl ObservabilityTap for NoopTap {
    fn request_started(&self, _client_protocol: &str) {}
    fn request_completed(&self, _labels: &RequestLabels, _duration: Duration, _status: u16) {}
    fn active_request_inc(&self) {}
    fn active_request_dec(&self) {}
    fn token_usage(&self, _labels: &RequestLabels, _input_tokens: i64, _output_tokens: i64) {}
    fn first_token_time(&self, _labels: &RequestLabels, _elapsed: Duration) {}
    fn tokens_per_second(&self, _labels: &RequestLabels, _rate: f64) {}
    fn bypass(&self, _is_bypass: bool) {}
    fn provider_transport_error(&self, _provider: &str) {}
    fn client_disconnect(&self, _client_protocol: &str) {}
}

const LABELS: &[&str] = &["model", "provider", "credential", "client_protocol"];

/// Prometheus-backed tap, grounded on the sibling example's `prometheus`
/// dependency choice rather than its hand-rolled `HashMap` counters: real
/// label vectors and histograms give the bounded-cardinality guarantee
/// the spec asks for without a parallel bookkeeping layer.
pub struct PrometheusTap {
    registry: Registry,
    requests_started: IntCounterVec,
    requests_completed: IntCounterVec,
    request_duration_seconds: HistogramVec,
    active_requests: IntGauge,
    input_tokens_total: IntCounterVec,
    output_tokens_total: IntCounterVec,
    first_token_seconds: HistogramVec,
    tokens_per_second: HistogramVec,
    bypass_total: IntCounterVec,
    provider_transport_errors_total: IntCounterVec,
    client_disconnects_total: IntCounterVec,
}

impl PrometheusTap {
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_started = IntCounterVec::new(
            Opts::new("gateway_requests_started_total", "Requests accepted by the gateway"),
            &["client_protocol"],
        )
        .expect("metric definition is valid");
        let requests_completed = IntCounterVec::new(
            Opts::new("gateway_requests_completed_total", "Requests that received a final status"),
            &["model", "provider", "credential", "client_protocol", "status"],
        )
        .expect("metric definition is valid");
        let request_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new("gateway_request_duration_seconds", "End-to-end request duration"),
            LABELS,
        )
        .expect("metric definition is valid");
        let active_requests =
            IntGauge::new("gateway_active_requests", "Requests currently in flight").expect("metric definition is valid");
        let input_tokens_total = IntCounterVec::new(
            Opts::new("gateway_input_tokens_total", "Input tokens billed upstream"),
            LABELS,
        )
        .expect("metric definition is valid");
        let output_tokens_total = IntCounterVec::new(
            Opts::new("gateway_output_tokens_total", "Output tokens produced upstream"),
            LABELS,
        )
        .expect("metric definition is valid");
        let first_token_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new("gateway_first_token_seconds", "Time to first streamed token"),
            LABELS,
        )
        .expect("metric definition is valid");
        let tokens_per_second = HistogramVec::new(
            prometheus::HistogramOpts::new("gateway_tokens_per_second", "Output tokens per second once streaming"),
            LABELS,
        )
        .expect("metric definition is valid");
        let bypass_total = IntCounterVec::new(
            Opts::new("gateway_bypass_requests_total", "Requests served via the same-protocol bypass path"),
            &["bypass"],
        )
        .expect("metric definition is valid");
        let provider_transport_errors_total = IntCounterVec::new(
            Opts::new("gateway_provider_transport_errors_total", "Transport-level failures talking to a provider"),
            &["provider"],
        )
        .expect("metric definition is valid");
        let client_disconnects_total = IntCounterVec::new(
            Opts::new("gateway_client_disconnects_total", "Client connections that dropped mid-stream"),
            &["client_protocol"],
        )
        .expect("metric definition is valid");

        for collector in [
            Box::new(requests_started.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(requests_completed.clone()),
            Box::new(request_duration_seconds.clone()),
            Box::new(active_requests.clone()),
            Box::new(input_tokens_total.clone()),
            Box::new(output_tokens_total.clone()),
            Box::new(first_token_seconds.clone()),
            Box::new(tokens_per_second.clone()),
            Box::new(bypass_total.clone()),
            Box::new(provider_transport_errors_total.clone()),
            Box::new(client_disconnects_total.clone()),
        ] {
            registry
                .register(collector)
                .expect("each metric is registered exactly once");
        }

        Self {
            registry,
            requests_started,
            requests_completed,
            request_duration_seconds,
            active_requests,
            input_tokens_total,
            output_tokens_total,
            first_token_seconds,
            tokens_per_second,
            bypass_total,
            provider_transport_errors_total,
            client_disconnects_total,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Renders the current state in Prometheus text exposition format for
    /// the `/metrics` route.
    pub fn encode_text(&self) -> String {
        let families = self.registry.gather();
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buf)
            .expect("well-formed metric families always encode");
        String::from_utf8(buf).unwrap_or_default()
    }
}

impl Default for PrometheusTap {
    fn default() -> Self {
        Self::new()
    }
}

impl ObservabilityTap for PrometheusTap {
    fn request_started(&self, client_protocol: &str) {
        self.requests_started.with_label_values(&[client_protocol]).inc();
    }

    fn request_completed(&self, labels: &RequestLabels, duration: Duration, status: u16) {
        let [model, provider, credential, client_protocol] = labels.as_array();
        let status = status.to_string();
        self.requests_completed
            .with_label_values(&[model, provider, credential, client_protocol, &status])
            .inc();
        self.request_duration_seconds
            .with_label_values(&labels.as_array())
            .observe(duration.as_secs_f64());
    }

    fn active_request_inc(&self) {
        self.active_requests.inc();
    }

    fn active_request_dec(&self) {
        self.active_requests.dec();
    }

    fn token_usage(&self, labels: &RequestLabels, input_tokens: i64, output_tokens: i64) {
        let array = labels.as_array();
        self.input_tokens_total
            .with_label_values(&array)
            .inc_by(input_tokens.max(0) as u64);
        self.output_tokens_total
            .with_label_values(&array)
            .inc_by(output_tokens.max(0) as u64);
    }

    fn first_token_time(&self, labels: &RequestLabels, elapsed: Duration) {
        self.first_token_seconds
            .with_label_values(&labels.as_array())
            .observe(elapsed.as_secs_f64());
    }

    fn tokens_per_second(&self, labels: &RequestLabels, rate: f64) {
        self.tokens_per_second.with_label_values(&labels.as_array()).observe(rate);
    }

    fn bypass(&self, is_bypass: bool) {
        let label = if is_bypass { "true" } else { "false" };
        self.bypass_total.with_label_values(&[label]).inc();
    }

    fn provider_transport_error(&self, provider: &str) {
        self.provider_transport_errors_total.with_label_values(&[provider]).inc();
    }

    fn client_disconnect(&self, client_protocol: &str) {
        self.client_disconnects_total.with_label_values(&[client_protocol]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_and_anonymous_credential_bound_cardinality() {
        let labels = RequestLabels::new("gpt-4o", None, None, "openai");
        assert_eq!(labels.provider, "unknown");
        assert_eq!(labels.credential, "anonymous");
    }

    #[test]
    fn empty_strings_are_treated_as_absent() {
        let labels = RequestLabels::new("gpt-4o", Some(""), Some(""), "openai");
        assert_eq!(labels.provider, "unknown");
        assert_eq!(labels.credential, "anonymous");
    }

    #[test]
    fn recording_events_does_not_panic_and_shows_up_in_text_export() {
        let tap = PrometheusTap::new();
        let labels = RequestLabels::new("gpt-4o", Some("p1"), Some("k1"), "openai");
        tap.request_started("openai");
        tap.active_request_inc();
        tap.request_completed(&labels, Duration::from_millis(120), 200);
        tap.token_usage(&labels, 10, 20);
        tap.first_token_time(&labels, Duration::from_millis(50));
        tap.tokens_per_second(&labels, 12.5);
        tap.bypass(true);
        tap.provider_transport_error("p1");
        tap.client_disconnect("openai");
        tap.active_request_dec();

        let text = tap.encode_text();
        assert!(text.contains("gateway_requests_started_total"));
        assert!(text.contains("gateway_output_tokens_total"));
    }
}
