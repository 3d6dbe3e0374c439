//! Prometheus metrics for gateway calls

use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry as MetricsRegistry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

/// Prometheus metrics collector for gateway calls
#[derive(Clone)]
pub struct GatewayMetrics {
    /// Completed calls by downstream service and outcome
    pub calls_total: CounterVec,
    /// Call latency in seconds, including resolution and retries
    pub call_duration_seconds: HistogramVec,
    /// Address lookups that failed for reasons other than "no instances"
    pub discovery_failures_total: CounterVec,
    /// Retries issued by the retry policy
    pub retries_total: CounterVec,
    registry: Arc<MetricsRegistry>,
}

impl GatewayMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(MetricsRegistry::new());

        let calls_total = CounterVec::new(
            Opts::new("gateway_calls_total", "Total gateway calls by outcome"),
            &["service", "outcome"],
        )?;

        let call_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "gateway_call_duration_seconds",
                "Gateway call latency in seconds",
            ),
            &["service"],
        )?;

        let discovery_failures_total = CounterVec::new(
            Opts::new(
                "gateway_discovery_failures_total",
                "Failed address lookups against the registry",
            ),
            &["service"],
        )?;

        let retries_total = CounterVec::new(
            Opts::new("gateway_retries_total", "Gateway call retries"),
            &["service"],
        )?;

        registry.register(Box::new(calls_total.clone()))?;
        registry.register(Box::new(call_duration_seconds.clone()))?;
        registry.register(Box::new(discovery_failures_total.clone()))?;
        registry.register(Box::new(retries_total.clone()))?;

        Ok(Self {
            calls_total,
            call_duration_seconds,
            discovery_failures_total,
            retries_total,
            registry,
        })
    }

    /// Record a finished call. `outcome` is `"success"` or a `GatewayError::kind`.
    pub fn record_call(&self, service: &str, outcome: &str, elapsed: Duration) {
        self.calls_total.with_label_values(&[service, outcome]).inc();
        self.call_duration_seconds
            .with_label_values(&[service])
            .observe(elapsed.as_secs_f64());
        if outcome == "discovery_failure" {
            self.discovery_failures_total.with_label_values(&[service]).inc();
        }
    }

    pub fn record_retry(&self, service: &str) {
        self.retries_total.with_label_values(&[service]).inc();
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
