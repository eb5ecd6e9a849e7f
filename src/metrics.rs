use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};

#[derive(Debug, Clone)]
pub struct PrometheusConfig {
    pub port: u16,
    pub host: String,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            port: 29000,
            host: "0.0.0.0".to_string(),
        }
    }
}

pub fn init_metrics() {
    // Request metrics
    describe_counter!(
        "sgl_streamer_requests_total",
        "Total number of generate requests by endpoint"
    );
    describe_counter!(
        "sgl_streamer_request_errors_total",
        "Total number of failed requests by endpoint and error kind"
    );
    describe_histogram!(
        "sgl_streamer_request_duration_seconds",
        "Request duration in seconds by endpoint"
    );
    describe_histogram!(
        "sgl_streamer_time_to_first_fragment_seconds",
        "Time from request start to the first emitted text fragment"
    );

    // Detokenizer metrics
    describe_counter!(
        "sgl_streamer_tokens_total",
        "Total generated tokens consumed by the detokenizer"
    );
    describe_counter!(
        "sgl_streamer_fragments_total",
        "Total text fragments emitted to clients"
    );
    describe_counter!(
        "sgl_streamer_decode_failures_total",
        "Total decode steps that failed and produced an empty delta"
    );
    describe_counter!(
        "sgl_streamer_incomplete_utf8_total",
        "Total decode steps held back on an incomplete UTF-8 sequence"
    );
    describe_histogram!(
        "sgl_streamer_step_duration_seconds",
        "Time spent decoding one generation step"
    );

    // Token source metrics
    describe_counter!(
        "sgl_streamer_skipped_messages_total",
        "Total malformed inference messages skipped by reason"
    );
    describe_counter!(
        "sgl_streamer_source_cancellations_total",
        "Total token sources stopped before completion by backend"
    );
}

pub fn start_prometheus(config: PrometheusConfig) {
    init_metrics();

    let duration_matcher = Matcher::Suffix(String::from("seconds"));
    let duration_bucket = [
        0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        30.0, 60.0, 120.0, 300.0,
    ];

    let ip_addr: IpAddr = config
        .host
        .parse()
        .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
    let socket_addr = SocketAddr::new(ip_addr, config.port);

    PrometheusBuilder::new()
        .with_http_listener(socket_addr)
        .upkeep_timeout(Duration::from_secs(5 * 60))
        .set_buckets_for_metric(duration_matcher, &duration_bucket)
        .expect("failed to set duration bucket")
        .install()
        .expect("failed to install Prometheus metrics exporter");
}

pub struct StreamMetrics;

impl StreamMetrics {
    // Request metrics
    pub fn record_request(endpoint: &str) {
        counter!("sgl_streamer_requests_total",
            "endpoint" => endpoint.to_string()
        )
        .increment(1);
    }

    pub fn record_request_error(endpoint: &str, kind: &str) {
        counter!("sgl_streamer_request_errors_total",
            "endpoint" => endpoint.to_string(),
            "kind" => kind.to_string()
        )
        .increment(1);
    }

    pub fn record_request_duration(endpoint: &str, duration: Duration) {
        histogram!("sgl_streamer_request_duration_seconds",
            "endpoint" => endpoint.to_string()
        )
        .record(duration.as_secs_f64());
    }

    pub fn record_time_to_first_fragment(duration: Duration) {
        histogram!("sgl_streamer_time_to_first_fragment_seconds").record(duration.as_secs_f64());
    }

    // Detokenizer metrics
    pub fn record_token() {
        counter!("sgl_streamer_tokens_total").increment(1);
    }

    pub fn record_fragment() {
        counter!("sgl_streamer_fragments_total").increment(1);
    }

    pub fn record_decode_failure() {
        counter!("sgl_streamer_decode_failures_total").increment(1);
    }

    pub fn record_incomplete_utf8() {
        counter!("sgl_streamer_incomplete_utf8_total").increment(1);
    }

    pub fn record_step_duration(duration: Duration) {
        histogram!("sgl_streamer_step_duration_seconds").record(duration.as_secs_f64());
    }

    // Token source metrics
    pub fn record_skipped_message(reason: &str) {
        counter!("sgl_streamer_skipped_messages_total",
            "reason" => reason.to_string()
        )
        .increment(1);
    }

    pub fn record_source_cancelled(backend: &str) {
        counter!("sgl_streamer_source_cancellations_total",
            "backend" => backend.to_string()
        )
        .increment(1);
    }
}
