use crate::AppState;
use axum::extract::State;
use axum::Json;
use gateway_core::error::GatewayError;
use serde_json::{json, Value};

pub async fn index() -> Json<Value> {
    Json(json!({
        "service": "gateway-service",
        "status": "running",
    }))
}

pub async fn health_check(State(state): State<AppState>) -> Result<Json<Value>, GatewayError> {
    state.db.health_check().await?;
    Ok(Json(json!({
        "status": "ok",
        "database": "up",
    })))
}
