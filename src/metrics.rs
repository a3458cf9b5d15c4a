//! Metrics collection and export module

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};
use std::time::Instant;

/// Process-wide metrics registry
pub struct Metrics {
    registry: Registry,

    // Nonce allocation
    pub nonce_allocations_total: IntCounter,
    pub nonce_unbound_total: IntCounter,
    pub nonce_evictions_total: IntCounter,
    pub nonce_rebinds_total: IntCounter,
    pub nonce_bound_identities: IntGauge,

    // Submission
    pub tx_submissions_total: IntCounter,
    pub tx_failed_total: IntCounter,
    pub nonce_conflicts_total: IntCounter,
    pub retries_exhausted_total: IntCounter,

    // Subscriptions
    pub subscriptions_opened_total: IntCounter,
    pub subscription_items_delivered_total: IntCounter,
    pub subscriptions_active: IntGauge,

    // Histograms
    pub submit_latency: Histogram,
    pub invoke_latency: Histogram,
    pub sign_latency: Histogram,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let nonce_allocations_total = IntCounter::with_opts(Opts::new(
            "nonce_allocations_total",
            "Nonces handed out by the allocator",
        ))?;

        let nonce_unbound_total = IntCounter::with_opts(Opts::new(
            "nonce_unbound_total",
            "Allocations rejected because the identity was not bound",
        ))?;

        let nonce_evictions_total = IntCounter::with_opts(Opts::new(
            "nonce_evictions_total",
            "Identities evicted from the allocator",
        ))?;

        let nonce_rebinds_total = IntCounter::with_opts(Opts::new(
            "nonce_rebinds_total",
            "Allocator rebinds from authoritative account state",
        ))?;

        let nonce_bound_identities = IntGauge::with_opts(Opts::new(
            "nonce_bound_identities",
            "Identities currently tracked by the allocator",
        ))?;

        let tx_submissions_total = IntCounter::with_opts(Opts::new(
            "tx_submissions_total",
            "Transactions accepted by the endpoint",
        ))?;

        let tx_failed_total =
            IntCounter::with_opts(Opts::new("tx_failed_total", "Invocations that ended in error"))?;

        let nonce_conflicts_total = IntCounter::with_opts(Opts::new(
            "nonce_conflicts_total",
            "Nonce conflicts reported by the endpoint",
        ))?;

        let retries_exhausted_total = IntCounter::with_opts(Opts::new(
            "retries_exhausted_total",
            "Invocations that ran out of nonce-conflict retries",
        ))?;

        let subscriptions_opened_total = IntCounter::with_opts(Opts::new(
            "subscriptions_opened_total",
            "Push subscriptions opened",
        ))?;

        let subscription_items_delivered_total = IntCounter::with_opts(Opts::new(
            "subscription_items_delivered_total",
            "Items delivered to subscription observers",
        ))?;

        let subscriptions_active = IntGauge::with_opts(Opts::new(
            "subscriptions_active",
            "Subscriptions currently streaming",
        ))?;

        let submit_latency = Histogram::with_opts(
            HistogramOpts::new("submit_latency_seconds", "Endpoint submit latency")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )?;

        let invoke_latency = Histogram::with_opts(
            HistogramOpts::new(
                "invoke_latency_seconds",
                "End-to-end invocation latency including retries",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]),
        )?;

        let sign_latency = Histogram::with_opts(
            HistogramOpts::new("sign_latency_seconds", "Transaction signing latency")
                .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05]),
        )?;

        registry.register(Box::new(nonce_allocations_total.clone()))?;
        registry.register(Box::new(nonce_unbound_total.clone()))?;
        registry.register(Box::new(nonce_evictions_total.clone()))?;
        registry.register(Box::new(nonce_rebinds_total.clone()))?;
        registry.register(Box::new(nonce_bound_identities.clone()))?;
        registry.register(Box::new(tx_submissions_total.clone()))?;
        registry.register(Box::new(tx_failed_total.clone()))?;
        registry.register(Box::new(nonce_conflicts_total.clone()))?;
        registry.register(Box::new(retries_exhausted_total.clone()))?;
        registry.register(Box::new(subscriptions_opened_total.clone()))?;
        registry.register(Box::new(subscription_items_delivered_total.clone()))?;
        registry.register(Box::new(subscriptions_active.clone()))?;
        registry.register(Box::new(submit_latency.clone()))?;
        registry.register(Box::new(invoke_latency.clone()))?;
        registry.register(Box::new(sign_latency.clone()))?;

        Ok(Self {
            registry,
            nonce_allocations_total,
            nonce_unbound_total,
            nonce_evictions_total,
            nonce_rebinds_total,
            nonce_bound_identities,
            tx_submissions_total,
            tx_failed_total,
            nonce_conflicts_total,
            retries_exhausted_total,
            subscriptions_opened_total,
            subscription_items_delivered_total,
            subscriptions_active,
            submit_latency,
            invoke_latency,
            sign_latency,
        })
    }

    /// Get the registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every registered metric in the Prometheus text format
    pub fn gather_text(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}

/// Measures an operation and records it into a histogram
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self { start: Instant::now() }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    pub fn observe(self, histogram: &Histogram) {
        histogram.observe(self.elapsed_secs());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_registered_names() {
        let metrics = Metrics::new().unwrap();
        metrics.nonce_allocations_total.inc();
        metrics.submit_latency.observe(0.002);
        let text = metrics.gather_text().unwrap();
        assert!(text.contains("nonce_allocations_total 1"));
        assert!(text.contains("submit_latency_seconds"));
    }

    #[test]
    fn test_timer_records_observation() {
        let metrics = Metrics::new().unwrap();
        Timer::start().observe(&metrics.sign_latency);
        assert_eq!(metrics.sign_latency.get_sample_count(), 1);
    }
}
