//! Administrative surface: CRUD over the config tables, the merged metrics
//! document, and the observability reads. Every write lands an audit row.

use crate::models::{ProtoMappingPayload, RoutePayload, ServicePayload};
use crate::routing;
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use gateway_core::error::GatewayError;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

const DEFAULT_LOG_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub limit: Option<i64>,
}

fn admin_user(headers: &HeaderMap) -> String {
    headers
        .get("x-admin-user")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("admin")
        .to_string()
}

async fn audit(state: &AppState, action: &str, resource: &str, user: &str, message: String) {
    if let Err(e) = state.db.insert_activity(action, resource, user, &message).await {
        warn!(action, resource, error = %e, "Failed to record admin activity");
    }
}

// --- Services ---

pub async fn list_services(State(state): State<AppState>) -> Result<impl IntoResponse, GatewayError> {
    Ok(Json(state.db.list_services().await?))
}

pub async fn create_service(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ServicePayload>,
) -> Result<impl IntoResponse, GatewayError> {
    if !payload.protocol_is_valid() {
        return Err(GatewayError::InvalidInput(
            "protocol must be 'rest' or 'grpc'".to_string(),
        ));
    }

    let service = state.db.create_service(&payload).await?;
    audit(
        &state,
        "CREATE",
        "service",
        &admin_user(&headers),
        format!("Created new service: {}", service.name),
    )
    .await;
    Ok((StatusCode::CREATED, Json(service)))
}

pub async fn update_service(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(payload): Json<ServicePayload>,
) -> Result<impl IntoResponse, GatewayError> {
    if !payload.protocol_is_valid() {
        return Err(GatewayError::InvalidInput(
            "protocol must be 'rest' or 'grpc'".to_string(),
        ));
    }

    let service = state
        .db
        .update_service(id, &payload)
        .await?
        .ok_or_else(|| GatewayError::NotConfigured("Service not found".to_string()))?;
    audit(
        &state,
        "UPDATE",
        "service",
        &admin_user(&headers),
        format!("Updated service: {}", service.name),
    )
    .await;
    Ok(Json(service))
}

pub async fn delete_service(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, GatewayError> {
    if !state.db.delete_service(id).await? {
        return Err(GatewayError::NotConfigured("Service not found".to_string()));
    }
    audit(
        &state,
        "DELETE",
        "service",
        &admin_user(&headers),
        format!("Deleted service: {id}"),
    )
    .await;
    Ok(StatusCode::NO_CONTENT)
}

// --- Routes ---

pub async fn list_routes(State(state): State<AppState>) -> Result<impl IntoResponse, GatewayError> {
    Ok(Json(state.db.list_routes().await?))
}

pub async fn create_route(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RoutePayload>,
) -> Result<impl IntoResponse, GatewayError> {
    let route = state.db.create_route(&payload).await?;
    audit(
        &state,
        "CREATE",
        "route",
        &admin_user(&headers),
        format!("Created new route: {} {}", route.method, route.path),
    )
    .await;
    Ok((StatusCode::CREATED, Json(route)))
}

pub async fn update_route(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(payload): Json<RoutePayload>,
) -> Result<impl IntoResponse, GatewayError> {
    let route = state
        .db
        .update_route(id, &payload)
        .await?
        .ok_or_else(|| GatewayError::NotConfigured("Route not found".to_string()))?;
    audit(
        &state,
        "UPDATE",
        "route",
        &admin_user(&headers),
        format!("Updated route: {} {}", route.method, route.path),
    )
    .await;
    Ok(Json(route))
}

pub async fn delete_route(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, GatewayError> {
    if !state.db.delete_route(id).await? {
        return Err(GatewayError::NotConfigured("Route not found".to_string()));
    }
    audit(
        &state,
        "DELETE",
        "route",
        &admin_user(&headers),
        format!("Deleted route: {id}"),
    )
    .await;
    Ok(StatusCode::NO_CONTENT)
}

/// Swaps in a freshly-loaded route snapshot; the running router picks it up
/// on the next request.
pub async fn reload_routes(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, GatewayError> {
    let table = routing::load_route_table(&state.db).await?;
    let count = table.len();
    state.routes.replace(table);
    audit(
        &state,
        "RELOAD",
        "route",
        &admin_user(&headers),
        format!("Reloaded route table with {count} routes"),
    )
    .await;
    Ok(Json(json!({ "status": true, "routes": count })))
}

// --- Proto mappings ---

pub async fn list_proto_mappings(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, GatewayError> {
    Ok(Json(state.db.list_proto_mappings().await?))
}

pub async fn create_proto_mapping(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ProtoMappingPayload>,
) -> Result<impl IntoResponse, GatewayError> {
    let mapping = state.db.create_proto_mapping(&payload).await?;
    audit(
        &state,
        "CREATE",
        "proto-mapping",
        &admin_user(&headers),
        format!(
            "Created new proto mapping: {}/{}",
            mapping.qualified_service(),
            mapping.rpc_method
        ),
    )
    .await;
    Ok((StatusCode::CREATED, Json(mapping)))
}

pub async fn update_proto_mapping(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(payload): Json<ProtoMappingPayload>,
) -> Result<impl IntoResponse, GatewayError> {
    let mapping = state
        .db
        .update_proto_mapping(id, &payload)
        .await?
        .ok_or_else(|| GatewayError::NotConfigured("Proto mapping not found".to_string()))?;
    audit(
        &state,
        "UPDATE",
        "proto-mapping",
        &admin_user(&headers),
        format!(
            "Updated proto mapping: {}/{}",
            mapping.qualified_service(),
            mapping.rpc_method
        ),
    )
    .await;
    Ok(Json(mapping))
}

pub async fn delete_proto_mapping(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, GatewayError> {
    if !state.db.delete_proto_mapping(id).await? {
        return Err(GatewayError::NotConfigured(
            "Proto mapping not found".to_string(),
        ));
    }
    audit(
        &state,
        "DELETE",
        "proto-mapping",
        &admin_user(&headers),
        format!("Deleted proto mapping: {id}"),
    )
    .await;
    Ok(StatusCode::NO_CONTENT)
}

// --- Observability reads ---

/// Live metrics registry merged with the health registry into one document.
pub async fn admin_metrics(State(state): State<AppState>) -> Result<impl IntoResponse, GatewayError> {
    let mut snapshot = state.metrics.snapshot();

    for service in state.db.list_services().await? {
        let health = state.health.stats(service.id).snapshot();
        let entry = snapshot.services.entry(service.name.clone()).or_default();
        entry.health_score = Some(health.health_score);
        entry.circuit_status = Some(health.circuit_state.as_str().to_string());
    }

    let uptime_seconds = (Utc::now() - snapshot.start_time).num_seconds();
    Ok(Json(json!({
        "services": snapshot.services,
        "start_time": snapshot.start_time,
        "uptime_seconds": uptime_seconds,
    })))
}

pub async fn list_activity_logs(
    State(state): State<AppState>,
    Query(query): Query<LogQuery>,
) -> Result<impl IntoResponse, GatewayError> {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    Ok(Json(state.db.list_activity(limit).await?))
}

pub async fn list_request_logs(
    State(state): State<AppState>,
    Query(query): Query<LogQuery>,
) -> Result<impl IntoResponse, GatewayError> {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    Ok(Json(state.db.list_request_logs(limit).await?))
}

pub async fn traces_for_request(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    Ok(Json(state.db.list_traces(&request_id).await?))
}

pub async fn server_logs(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.log_buffer.entries())
}
