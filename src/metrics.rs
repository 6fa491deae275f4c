use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramVec, IntCounterVec, TextEncoder,
    register_histogram_vec, register_int_counter_vec,
};
use std::time::Instant;

lazy_static! {
    // Request metrics
    pub static ref REQUEST_COUNTER: IntCounterVec = register_int_counter_vec!(
        "gateway_requests_total",
        "Total number of requests received",
        &["endpoint"]
    ).unwrap();

    pub static ref REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "gateway_request_duration_seconds",
        "Request duration in seconds",
        &["endpoint"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 15.0]
    ).unwrap();

    // Backend metrics
    pub static ref BACKEND_QUERY_DURATION: HistogramVec = register_histogram_vec!(
        "gateway_backend_query_duration_seconds",
        "Time spent waiting on the time-series backend",
        &["kind"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 15.0]
    ).unwrap();

    pub static ref BACKEND_FAILURES: IntCounterVec = register_int_counter_vec!(
        "gateway_backend_failures_total",
        "Backend queries that failed, by failure kind",
        &["kind"]
    ).unwrap();

    pub static ref DEGRADED_RESPONSES: IntCounterVec = register_int_counter_vec!(
        "gateway_degraded_responses_total",
        "Responses served from the empty or placeholder default",
        &["metric"]
    ).unwrap();
}

/// Counts a request on creation and records its duration when dropped.
pub struct RequestTimer {
    endpoint: &'static str,
    start: Instant,
}

impl RequestTimer {
    pub fn new(endpoint: &'static str) -> Self {
        REQUEST_COUNTER.with_label_values(&[endpoint]).inc();
        Self {
            endpoint,
            start: Instant::now(),
        }
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        REQUEST_DURATION
            .with_label_values(&[self.endpoint])
            .observe(duration);
    }
}

pub fn observe_backend_query(kind: &str, duration: f64) {
    BACKEND_QUERY_DURATION.with_label_values(&[kind]).observe(duration);
}

pub fn record_backend_failure(kind: &str) {
    BACKEND_FAILURES.with_label_values(&[kind]).inc();
}

pub fn record_degraded(metric: &str) {
    DEGRADED_RESPONSES.with_label_values(&[metric]).inc();
}

/// Text exposition of everything in the default registry.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_timer_records() {
        let before = REQUEST_COUNTER.with_label_values(&["timer_test"]).get();
        {
            let _timer = RequestTimer::new("timer_test");
        }
        assert_eq!(REQUEST_COUNTER.with_label_values(&["timer_test"]).get(), before + 1);
        assert!(REQUEST_DURATION.with_label_values(&["timer_test"]).get_sample_count() >= 1);
    }

    #[test]
    fn test_render_contains_gateway_metrics() {
        record_degraded("render_test");
        let text = render();
        assert!(text.contains("gateway_degraded_responses_total"));
        assert!(text.contains("render_test"));
    }
}
