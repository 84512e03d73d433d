//! The gateway's request dispatcher: resolves the route snapshot entry,
//! gates on the service circuit, applies the per-route middleware chain,
//! and hands the request to a named handler or the generic proxy.

use crate::models::{MiddlewareKind, PROTOCOL_GRPC};
use crate::proxy::proxy_rest;
use crate::routing::{EndpointContext, RouteEntry, RouteMatch};
use crate::AppState;
use axum::body::{to_bytes, Body, Bytes};
use axum::extract::{Request, State};
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use gateway_core::error::GatewayError;
use gateway_core::middleware::metrics::RouteTag;
use gateway_core::middleware::rate_limit::client_ip;
use gateway_core::observability::RequestId;
use gateway_core::resilience::{retry_attempts, with_timeout, DEFAULT_RETRIES, DEFAULT_TIMEOUT};
use std::net::IpAddr;
use std::sync::Arc;

/// Mirrors the upstream gRPC message ceiling.
const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

pub async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    let table = state.routes.current();
    let path = request.uri().path().to_string();

    let entry = match table.lookup(request.method(), &path) {
        RouteMatch::Found(entry) => entry,
        RouteMatch::MethodNotAllowed => return GatewayError::MethodNotAllowed.into_response(),
        RouteMatch::NotFound => {
            return GatewayError::NotConfigured("Endpoint configuration not found".to_string())
                .into_response()
        }
    };

    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();
    let ip = client_ip(&request);

    // The service-scoped breaker short-circuits before any upstream work.
    let health = state.health.stats(entry.service.id);
    if !health.should_allow() {
        state.traces.warn(
            &request_id,
            "Gateway",
            format!("Circuit open, rejecting request for {}", entry.service.name),
        );
        let mut response = GatewayError::CircuitOpen(entry.service.name.clone()).into_response();
        response
            .extensions_mut()
            .insert(RouteTag(entry.route.tag.clone()));
        return response;
    }

    let tag = entry.route.tag.clone();
    let mut response = run_route(state, entry, request_id, ip, request).await;
    response.extensions_mut().insert(RouteTag(tag));
    response
}

/// Applies the route's middleware list: route-scoped breaker, retry with a
/// replayable body, and the downstream deadline.
async fn run_route(
    state: AppState,
    entry: Arc<RouteEntry>,
    request_id: String,
    client_ip: Option<IpAddr>,
    request: Request,
) -> Response {
    let use_timeout = entry.has_middleware(MiddlewareKind::Timeout);
    let use_retry = entry.has_middleware(MiddlewareKind::Retry);

    let breaker = entry
        .has_middleware(MiddlewareKind::CircuitBreaker)
        .then(|| state.route_breakers.breaker(&entry.route.tag));
    if let Some(breaker) = &breaker {
        if !breaker.allow() {
            return GatewayError::CircuitOpen(entry.route.tag.clone()).into_response();
        }
    }

    let response = if use_retry {
        // Retry needs to replay the request, so the body is buffered here.
        let (parts, body) = request.into_parts();
        let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return GatewayError::InvalidInput(format!("failed to read request body: {e}"))
                    .into_response()
            }
        };

        retry_attempts(DEFAULT_RETRIES, || {
            run_leaf(
                state.clone(),
                entry.clone(),
                request_id.clone(),
                client_ip,
                rebuild_request(&parts, &bytes),
                use_timeout,
            )
        })
        .await
    } else {
        run_leaf(state, entry.clone(), request_id, client_ip, request, use_timeout).await
    };

    if let Some(breaker) = breaker {
        breaker.record(!response.status().is_server_error());
    }
    response
}

fn rebuild_request(parts: &Parts, body: &Bytes) -> Request {
    let mut request = Request::builder()
        .method(parts.method.clone())
        .uri(parts.uri.clone())
        .version(parts.version)
        .body(Body::from(body.clone()))
        .expect("request reassembly from parsed parts cannot fail");
    *request.headers_mut() = parts.headers.clone();
    request
}

async fn run_leaf(
    state: AppState,
    entry: Arc<RouteEntry>,
    request_id: String,
    client_ip: Option<IpAddr>,
    request: Request,
    use_timeout: bool,
) -> Response {
    if use_timeout {
        with_timeout(
            DEFAULT_TIMEOUT,
            invoke_endpoint(state, entry, request_id, client_ip, request),
        )
        .await
    } else {
        invoke_endpoint(state, entry, request_id, client_ip, request).await
    }
}

/// A specifically-implemented handler wins over the generic proxy.
async fn invoke_endpoint(
    state: AppState,
    entry: Arc<RouteEntry>,
    request_id: String,
    client_ip: Option<IpAddr>,
    request: Request,
) -> Response {
    if let Some(handler) = state.endpoints.get(&entry.route.endpoint_filter) {
        let ctx = EndpointContext {
            state: state.clone(),
            entry: entry.clone(),
            request_id,
            client_ip,
        };
        return match handler.handle(ctx, request).await {
            Ok(response) => response,
            Err(error) => error.into_response(),
        };
    }

    generic_proxy(state, entry, request_id, client_ip, request).await
}

async fn generic_proxy(
    state: AppState,
    entry: Arc<RouteEntry>,
    request_id: String,
    client_ip: Option<IpAddr>,
    request: Request,
) -> Response {
    let health = state.health.stats(entry.service.id);

    if entry.service.protocol == PROTOCOL_GRPC {
        let mapping = match state.db.mapping_for_service(entry.service.id).await {
            Ok(Some(mapping)) => mapping,
            Ok(None) => {
                state.traces.error(
                    &request_id,
                    "gRPC",
                    format!(
                        "No proto mapping configured for service {}",
                        entry.service.name
                    ),
                );
                return GatewayError::NotConfigured("gRPC mapping not found".to_string())
                    .into_response();
            }
            Err(error) => return error.into_response(),
        };

        let body = match to_bytes(request.into_body(), MAX_BODY_BYTES).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return GatewayError::InvalidInput(format!("failed to read request body: {e}"))
                    .into_response()
            }
        };

        match state
            .grpc
            .invoke(&state.traces, &request_id, &entry.service, &mapping, body)
            .await
        {
            Ok(response) => {
                health.record_success();
                response
            }
            Err(error) => {
                if matches!(
                    error,
                    GatewayError::UpstreamUnavailable(_)
                        | GatewayError::UpstreamFailure(_)
                        | GatewayError::Timeout
                ) {
                    health.record_failure();
                }
                error.into_response()
            }
        }
    } else {
        proxy_rest(
            &state.http,
            &state.traces,
            &health,
            &entry.service,
            &request_id,
            client_ip,
            request,
        )
        .await
    }
}
