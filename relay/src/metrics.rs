use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use tracing::error;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref READINGS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relay_readings_total",
        "Total readings received on the ingress endpoint"
    ))
    .expect("valid metric");
    pub static ref REJECTED_READINGS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            "relay_rejected_readings_total",
            "Total readings rejected before publishing"
        ),
        &["reason"]
    )
    .expect("valid metric");
    pub static ref PUBLISHED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relay_published_total",
        "Total readings acknowledged by the message channel"
    ))
    .expect("valid metric");
    pub static ref PUBLISH_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relay_publish_failures_total",
        "Total publishes that failed or were not acknowledged"
    ))
    .expect("valid metric");
    pub static ref STORED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relay_stored_total",
        "Total channel messages written to the store"
    ))
    .expect("valid metric");
    pub static ref DROPPED_MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relay_dropped_messages_total",
        "Total channel messages discarded by the consumer"
    ))
    .expect("valid metric");
    pub static ref STORE_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relay_store_failures_total",
        "Total store read or write failures"
    ))
    .expect("valid metric");
    pub static ref QUERY_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "relay_query_latency_seconds",
            "Time taken to read the latest readings from the store"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ])
    )
    .expect("valid metric");
}

pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(READINGS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REJECTED_READINGS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PUBLISHED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PUBLISH_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STORED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DROPPED_MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STORE_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(QUERY_LATENCY_SECONDS.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_after_init() {
        // Other tests in the binary may have registered already.
        let _ = init_metrics();
        PUBLISHED_TOTAL.inc();
        REJECTED_READINGS_TOTAL.with_label_values(&["unauthorized"]).inc();

        let text = gather_metrics();
        assert!(text.contains("relay_published_total"));
        assert!(text.contains("relay_rejected_readings_total{reason=\"unauthorized\"}"));
    }
}
