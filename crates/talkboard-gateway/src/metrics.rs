//! Prometheus metrics recording and endpoint.

use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use talkboard_pipeline::PhraseSource;

/// Install the Prometheus metrics recorder and return the handle for rendering.
pub fn install_prometheus_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(handle)
}

/// Record an HTTP request with its route, status and duration.
pub fn record_request(route: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("route", route.to_string()),
        ("status", status.to_string()),
    ];
    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_request_duration_seconds", &labels).record(duration_secs);
}

/// Record an error response of a given kind.
pub fn record_error(kind: &str) {
    let labels = [("kind", kind.to_string())];
    metrics::counter!("errors_total", &labels).increment(1);
}

/// Record whether a phrase came from the model or the fallback chain.
pub fn record_phrase(source: PhraseSource) {
    let source = match source {
        PhraseSource::Model => "model",
        PhraseSource::Fallback => "fallback",
    };
    let labels = [("source", source.to_string())];
    metrics::counter!("phrases_total", &labels).increment(1);
}

/// Middleware timing every routed request.
pub async fn track(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let start = Instant::now();

    let response = next.run(request).await;
    record_request(
        &route,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}
