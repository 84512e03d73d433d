//! Latency and status accounting for every request, attributed to the
//! service tag the dispatcher stamps on the response.

use crate::metrics::MetricsRegistry;
use axum::{extract::Request, extract::State, middleware::Next, response::Response};
use std::sync::Arc;
use std::time::Instant;

/// Service tag used when a response carries no route attribution.
const UNKNOWN_SERVICE: &str = "unknown";

/// Route tag attached to responses by the dispatcher for metrics
/// attribution.
#[derive(Debug, Clone)]
pub struct RouteTag(pub String);

pub async fn metrics_middleware(
    State(registry): State<Arc<MetricsRegistry>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    let duration = start.elapsed();
    let service = response
        .extensions()
        .get::<RouteTag>()
        .map(|tag| tag.0.clone())
        .unwrap_or_else(|| UNKNOWN_SERVICE.to_string());

    registry.record(&service, &path, response.status().as_u16(), duration);

    response
}
