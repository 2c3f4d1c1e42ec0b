use std::time::Duration;

use anyhow::Context;
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

/// One-time metric descriptions (so series show up on /metrics with help text).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "advisor_fetch_attempts_total",
            "Provider attempts by source and outcome."
        );
        describe_histogram!(
            "advisor_fetch_attempt_latency_seconds",
            "Latency of a single provider attempt."
        );
        describe_histogram!("advisor_parse_ms", "Provider payload normalisation time in milliseconds.");
        describe_counter!(
            "advisor_connectivity_checks_total",
            "Connectivity checks by overall result."
        );
        describe_counter!("advisor_cache_lookups_total", "Feature cache lookups by result.");
        describe_counter!(
            "advisor_degraded_sources_total",
            "Optional sources dropped from a request."
        );
        describe_counter!(
            "advisor_single_flight_joins_total",
            "Requests that attached to a running flight."
        );
        describe_counter!("advisor_requests_total", "Finished requests by outcome.");
        describe_histogram!("advisor_request_seconds", "End-to-end flight duration.");
        describe_gauge!("advisor_cache_ttl_seconds", "Configured feature cache TTL.");
    });
}

impl Metrics {
    /// Install the Prometheus recorder and publish the configured cache TTL.
    pub fn init(cache_ttl: Duration) -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;

        ensure_metrics_described();
        gauge!("advisor_cache_ttl_seconds").set(cache_ttl.as_secs_f64());

        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
