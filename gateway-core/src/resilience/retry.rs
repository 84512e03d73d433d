//! Retry and timeout combinators applied around a route's downstream call.

use crate::error::GatewayError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Default deadline for the per-route `timeout` middleware.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Total attempts made by the per-route `retry` middleware.
pub const DEFAULT_RETRIES: u32 = 3;

/// Only server errors and request timeouts are worth a fresh attempt.
/// Idempotency is not enforced here; the route owner must only attach the
/// retry middleware to idempotent routes.
pub fn should_retry(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT
}

/// Runs up to `max_attempts` downstream attempts, sleeping 100 ms × attempt
/// between them. A new attempt starts only after the previous response has
/// been observed.
pub async fn retry_attempts<F, Fut>(max_attempts: u32, mut attempt_fn: F) -> Response
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Response>,
{
    let mut response = attempt_fn().await;
    for attempt in 1..max_attempts {
        if !should_retry(response.status()) {
            return response;
        }
        warn!(
            attempt,
            status = %response.status(),
            "Downstream attempt failed, retrying"
        );
        sleep(Duration::from_millis(100 * attempt as u64)).await;
        response = attempt_fn().await;
    }
    response
}

/// Wraps the downstream call with a deadline. On expiry the downstream
/// future is dropped, which cancels any in-flight upstream I/O, and the
/// client receives 504.
pub async fn with_timeout<Fut>(deadline: Duration, fut: Fut) -> Response
where
    Fut: Future<Output = Response>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(response) => response,
        Err(_) => GatewayError::Timeout.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn status_response(status: StatusCode) -> Response {
        status.into_response()
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_server_errors() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let response = retry_attempts(3, move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    status_response(StatusCode::BAD_GATEWAY)
                } else {
                    status_response(StatusCode::OK)
                }
            }
        })
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_stops_on_client_error() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let response = retry_attempts(3, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { status_response(StatusCode::NOT_FOUND) }
        })
        .await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausts_attempts() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let response = retry_attempts(3, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { status_response(StatusCode::INTERNAL_SERVER_ERROR) }
        })
        .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_returns_gateway_timeout() {
        let response = with_timeout(Duration::from_millis(100), async {
            sleep(Duration::from_secs(60)).await;
            status_response(StatusCode::OK)
        })
        .await;

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_timeout_passes_fast_response_through() {
        let response = with_timeout(Duration::from_secs(1), async {
            status_response(StatusCode::CREATED)
        })
        .await;

        assert_eq!(response.status(), StatusCode::CREATED);
    }
}
