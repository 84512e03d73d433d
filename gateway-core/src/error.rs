use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Bad request: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotConfigured(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Too many requests")]
    RateLimited,

    #[error("Circuit Breaker OPEN")]
    CircuitOpen(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Bad gateway: {0}")]
    UpstreamFailure(String),

    #[error("Gateway timeout")]
    Timeout,

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Configuration error: {0}")]
    Config(anyhow::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for GatewayError {
    fn from(err: config::ConfigError) -> Self {
        GatewayError::Config(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::Internal(anyhow::Error::new(err))
    }
}

/// Human-readable error message carried in response extensions so the
/// traffic logger can persist it alongside the request log row.
#[derive(Debug, Clone)]
pub struct ErrorMessage(pub String);

/// Fixed JSON body returned for every gateway-generated error.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub status: bool,
    pub code: String,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

/// Maps an HTTP status to the gateway's response code table.
pub fn envelope_code(status: StatusCode) -> &'static str {
    match status.as_u16() {
        400 => "005",
        401 => "006",
        403 => "007",
        404 => "008",
        405 => "009",
        408 => "011",
        409 => "012",
        413 => "013",
        414 => "014",
        415 => "015",
        429 => "016",
        431 => "017",
        _ => "999",
    }
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) | GatewayError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotConfigured(_) => StatusCode::NOT_FOUND,
            GatewayError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::Conflict(_) => StatusCode::CONFLICT,
            GatewayError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::CircuitOpen(_) | GatewayError::UpstreamUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GatewayError::UpstreamFailure(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Database(_) | GatewayError::Config(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn message(&self) -> String {
        match self {
            GatewayError::Validation(err) => format!("Validation error: {}", err),
            GatewayError::InvalidInput(msg) => msg.clone(),
            GatewayError::NotConfigured(msg) => msg.clone(),
            GatewayError::MethodNotAllowed => "Method not allowed".to_string(),
            GatewayError::Conflict(msg) => msg.clone(),
            GatewayError::RateLimited => "Too Many Requests".to_string(),
            GatewayError::CircuitOpen(_) => "Circuit Breaker OPEN".to_string(),
            GatewayError::UpstreamUnavailable(msg) => msg.clone(),
            GatewayError::UpstreamFailure(msg) => msg.clone(),
            GatewayError::Timeout => "Gateway Timeout".to_string(),
            GatewayError::Database(_) => "Internal server error".to_string(),
            GatewayError::Config(err) => format!("Configuration error: {}", err),
            GatewayError::Internal(err) => err.to_string(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.message();

        let mut response = (
            status,
            Json(ErrorEnvelope {
                status: false,
                code: envelope_code(status).to_string(),
                message: message.clone(),
                data: None,
            }),
        )
            .into_response();

        response.extensions_mut().insert(ErrorMessage(message));
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn test_envelope_code_table() {
        assert_eq!(envelope_code(StatusCode::BAD_REQUEST), "005");
        assert_eq!(envelope_code(StatusCode::UNAUTHORIZED), "006");
        assert_eq!(envelope_code(StatusCode::FORBIDDEN), "007");
        assert_eq!(envelope_code(StatusCode::NOT_FOUND), "008");
        assert_eq!(envelope_code(StatusCode::METHOD_NOT_ALLOWED), "009");
        assert_eq!(envelope_code(StatusCode::REQUEST_TIMEOUT), "011");
        assert_eq!(envelope_code(StatusCode::CONFLICT), "012");
        assert_eq!(envelope_code(StatusCode::PAYLOAD_TOO_LARGE), "013");
        assert_eq!(envelope_code(StatusCode::URI_TOO_LONG), "014");
        assert_eq!(envelope_code(StatusCode::UNSUPPORTED_MEDIA_TYPE), "015");
        assert_eq!(envelope_code(StatusCode::TOO_MANY_REQUESTS), "016");
        assert_eq!(
            envelope_code(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE),
            "017"
        );
        assert_eq!(envelope_code(StatusCode::INTERNAL_SERVER_ERROR), "999");
        assert_eq!(envelope_code(StatusCode::BAD_GATEWAY), "999");
    }

    #[tokio::test]
    async fn test_rate_limited_envelope() {
        let response = GatewayError::RateLimited.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], false);
        assert_eq!(json["code"], "016");
        assert_eq!(json["message"], "Too Many Requests");
        assert!(json["data"].is_null());
    }

    #[tokio::test]
    async fn test_circuit_open_envelope() {
        let response = GatewayError::CircuitOpen("auth-service".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.extensions().get::<ErrorMessage>().is_some());

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["message"], "Circuit Breaker OPEN");
    }
}
