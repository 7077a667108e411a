use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder, HistogramVec,
    IntCounter, IntCounterVec, TextEncoder,
};
use std::sync::LazyLock;

pub static PAYMENTS_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("paygate_payments_created_total", "Payment intents created").unwrap()
});

pub static CONFIRM_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "paygate_confirm_total",
        "Confirmation requests by resulting state",
        &["result"]
    )
    .unwrap()
});

pub static CONFIRM_LATENCY: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "paygate_confirm_duration_seconds",
        "Confirmation latency in seconds",
        &["result"],
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .unwrap()
});

pub static SETTLEMENTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "paygate_settlements_total",
        "Payments reaching a terminal state",
        &["result"]
    )
    .unwrap()
});

pub static WEBHOOK_DELIVERIES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "paygate_webhook_deliveries_total",
        "Webhook delivery attempts",
        &["result"]
    )
    .unwrap()
});

pub fn metrics_output() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
