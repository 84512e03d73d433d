use axum::http::header::{
    HeaderValue, ACCEPT, ACCEPT_ENCODING, AUTHORIZATION, CACHE_CONTROL, CONTENT_DISPOSITION,
    CONTENT_LENGTH, CONTENT_TYPE, ORIGIN,
};
use axum::http::{HeaderName, Method};
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use gateway_core::middleware::{metrics_middleware, rate_limit_middleware, traffic_log_middleware};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{admin, app};
use crate::routing::dispatch;
use crate::AppState;

pub fn build_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route(
            "/admin/services",
            get(admin::list_services).post(admin::create_service),
        )
        .route(
            "/admin/services/:id",
            axum::routing::put(admin::update_service).delete(admin::delete_service),
        )
        .route(
            "/admin/routes",
            get(admin::list_routes).post(admin::create_route),
        )
        .route(
            "/admin/routes/:id",
            axum::routing::put(admin::update_route).delete(admin::delete_route),
        )
        .route(
            "/admin/proto-mappings",
            get(admin::list_proto_mappings).post(admin::create_proto_mapping),
        )
        .route(
            "/admin/proto-mappings/:id",
            axum::routing::put(admin::update_proto_mapping).delete(admin::delete_proto_mapping),
        )
        .route("/admin/reload", post(admin::reload_routes))
        .route("/admin/metrics", get(admin::admin_metrics))
        .route("/admin/logs", get(admin::list_activity_logs))
        .route("/admin/request-logs", get(admin::list_request_logs))
        .route("/admin/traces/:id", get(admin::traces_for_request))
        .route("/admin/server-logs", get(admin::server_logs));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::PUT,
            Method::PATCH,
            Method::POST,
            Method::DELETE,
        ])
        .allow_headers([
            ORIGIN,
            CONTENT_TYPE,
            ACCEPT,
            AUTHORIZATION,
            CONTENT_LENGTH,
            ACCEPT_ENCODING,
            CONTENT_DISPOSITION,
            CACHE_CONTROL,
            HeaderName::from_static("x-request-id"),
            HeaderName::from_static("device-id"),
            HeaderName::from_static("x-api-key"),
            HeaderName::from_static("x-csrf-token"),
            HeaderName::from_static("client-secret"),
        ])
        .expose_headers([
            CONTENT_DISPOSITION,
            HeaderName::from_static("x-request-id"),
        ]);

    // Layer order, outermost first: cache headers, metrics, traffic logging
    // (which stamps the request id), per-IP rate limiting, then the
    // amenities: panic recovery, request tracing, CORS, gzip. Cache headers
    // wrap panic recovery so even a panic-recovered 500 carries them, and
    // metrics and the traffic logger see every response. Everything below
    // the rate limiter is throttled; admin and dashboard paths bypass
    // inside the limiter.
    Router::new()
        .route("/", get(app::index))
        .route("/health", get(app::health_check))
        .merge(admin_routes)
        .nest_service("/dashboard", ServeDir::new("gateway-service/dashboard"))
        .fallback(dispatch)
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(CatchPanicLayer::new())
        .layer(from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(from_fn_with_state(
            state.traffic.clone(),
            traffic_log_middleware,
        ))
        .layer(from_fn_with_state(state.metrics.clone(), metrics_middleware))
        .layer(SetResponseHeaderLayer::overriding(
            CACHE_CONTROL,
            HeaderValue::from_static("no-store, no-cache, must-revalidate, private"),
        ))
        .with_state(state)
}
