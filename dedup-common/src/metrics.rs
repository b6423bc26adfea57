use std::time::Instant;

use axum::{
    body::Body, extract::MatchedPath, http::Request, middleware::Next, response::IntoResponse,
    routing::get, Router,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Add the prometheus endpoint and middleware to a router, should be called last.
pub fn setup_metrics_routes(router: Router) -> Router {
    match setup_metrics_recorder() {
        Some(recorder_handle) => router
            .route(
                "/metrics",
                get(move || std::future::ready(recorder_handle.render())),
            )
            .layer(axum::middleware::from_fn(track_metrics)),
        None => router.layer(axum::middleware::from_fn(track_metrics)),
    }
}

/// Installs the global prometheus recorder. Returns `None` if a recorder is
/// already installed, which happens when several routers are built in one process.
pub fn setup_metrics_recorder() -> Option<PrometheusHandle> {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    match PrometheusBuilder::new()
        .set_buckets(EXPONENTIAL_SECONDS)
        .and_then(|builder| builder.install_recorder())
    {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!("failed to install prometheus recorder: {}", e);
            None
        }
    }
}

/// Middleware to record some common HTTP metrics
/// Someday tower-http might provide a metrics middleware: https://github.com/tower-rs/tower-http/issues/57
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };

    let method = req.method().clone();

    // Run the rest of the request handling first, so we can measure it and get response
    // codes.
    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", status),
    ];

    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels).record(latency);

    response
}
