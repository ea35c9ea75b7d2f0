//! Per-request HTTP metrics

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

/// Record request count, status and latency, and log one line per request.
pub async fn track_requests(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    let elapsed = start.elapsed();
    let status = response.status().as_u16().to_string();

    metrics::counter!(
        "http_requests_total",
        "path" => path.clone(),
        "method" => method.clone(),
        "status" => status.clone(),
    )
    .increment(1);
    metrics::histogram!("http_request_duration_seconds", "path" => path.clone())
        .record(elapsed.as_secs_f64());

    tracing::info!("{} {} {} {:?}", method, path, status, elapsed);
    response
}
