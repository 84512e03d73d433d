//! Request-id stamping and asynchronous request logging.
//!
//! Every request gets an `x-request-id` (incoming value reused, otherwise
//! freshly generated) that is echoed on the response and attached to the
//! request extensions for trace correlation. On completion a request log
//! record is handed to a background writer; the response path never waits
//! on persistence.

use crate::error::ErrorMessage;
use crate::middleware::rate_limit::client_ip;
use crate::observability::trace::RequestId;
use axum::http::HeaderValue;
use axum::{extract::Request, extract::State, middleware::Next, response::Response};
use serde::Serialize;
use std::time::Instant;
use tokio::sync::mpsc;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// One persisted row per completed request.
#[derive(Debug, Clone, Serialize)]
pub struct RequestLogEntry {
    pub request_id: String,
    pub method: String,
    pub path: String,
    pub status_code: u16,
    pub latency_ms: i64,
    pub client_ip: String,
    pub user_agent: String,
    pub error_message: Option<String>,
}

/// Cloneable handle feeding the background log writer.
#[derive(Debug, Clone)]
pub struct TrafficLogger {
    tx: mpsc::UnboundedSender<RequestLogEntry>,
}

impl TrafficLogger {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RequestLogEntry>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn enqueue(&self, entry: RequestLogEntry) {
        if self.tx.send(entry).is_err() {
            tracing::warn!("Request log writer is gone, dropping entry");
        }
    }
}

pub async fn traffic_log_middleware(
    State(logger): State<TrafficLogger>,
    mut request: Request,
    next: Next,
) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        request.headers_mut().insert(REQUEST_ID_HEADER, header_value);
    }
    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let ip = client_ip(&request)
        .map(|ip| ip.to_string())
        .unwrap_or_default();
    let user_agent = request
        .headers()
        .get(axum::http::header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let start = Instant::now();
    let mut response = next.run(request).await;
    let latency = start.elapsed();

    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(REQUEST_ID_HEADER, header_value);
    }

    let error_message = response
        .extensions()
        .get::<ErrorMessage>()
        .map(|message| message.0.clone());

    logger.enqueue(RequestLogEntry {
        request_id,
        method,
        path,
        status_code: response.status().as_u16(),
        latency_ms: latency.as_millis() as i64,
        client_ip: ip,
        user_agent,
        error_message,
    });

    response
}
