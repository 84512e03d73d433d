//! Specifically-implemented auth endpoints.
//!
//! Unlike the payload-agnostic generic proxy, these handlers bind concrete,
//! validated request records, inject the configured default language into
//! the upstream payload, and forward by the route's service protocol.

use crate::models::PROTOCOL_GRPC;
use crate::routing::{EndpointContext, EndpointHandler};
use async_trait::async_trait;
use axum::body::{to_bytes, Bytes};
use axum::extract::Request;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use gateway_core::error::GatewayError;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

const MAX_AUTH_BODY_BYTES: usize = 64 * 1024;
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "phoneNumber is required"))]
    pub phone_number: String,
    #[validate(length(min = 1, message = "password is required"))]
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CheckPhoneRequest {
    #[validate(length(min = 1, message = "phoneNumber is required"))]
    pub phone_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    #[validate(length(min = 1, message = "refreshToken is required"))]
    pub refresh_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
}

/// Upstream auth envelope, passed back to the client verbatim.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthEnvelope {
    pub success: bool,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<TokenPair>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

pub struct LoginHandler;

#[async_trait]
impl EndpointHandler for LoginHandler {
    async fn handle(
        &self,
        ctx: EndpointContext,
        request: Request,
    ) -> Result<Response, GatewayError> {
        let mut payload: LoginRequest = read_payload(request).await?;
        payload.validate()?;
        payload.lang.get_or_insert_with(|| ctx.state.settings.default_lang.clone());
        forward(&ctx, "Login", serde_json::to_value(&payload).map_err(to_internal)?).await
    }
}

pub struct CheckPhoneHandler;

#[async_trait]
impl EndpointHandler for CheckPhoneHandler {
    async fn handle(
        &self,
        ctx: EndpointContext,
        request: Request,
    ) -> Result<Response, GatewayError> {
        let mut payload: CheckPhoneRequest = read_payload(request).await?;
        payload.validate()?;
        payload.lang.get_or_insert_with(|| ctx.state.settings.default_lang.clone());
        forward(&ctx, "CheckPhone", serde_json::to_value(&payload).map_err(to_internal)?).await
    }
}

pub struct RefreshTokenHandler;

#[async_trait]
impl EndpointHandler for RefreshTokenHandler {
    async fn handle(
        &self,
        ctx: EndpointContext,
        request: Request,
    ) -> Result<Response, GatewayError> {
        let mut payload: RefreshTokenRequest = read_payload(request).await?;
        payload.validate()?;
        payload.lang.get_or_insert_with(|| ctx.state.settings.default_lang.clone());
        forward(&ctx, "RefreshToken", serde_json::to_value(&payload).map_err(to_internal)?).await
    }
}

pub struct LogoutHandler;

#[async_trait]
impl EndpointHandler for LogoutHandler {
    async fn handle(
        &self,
        ctx: EndpointContext,
        request: Request,
    ) -> Result<Response, GatewayError> {
        let mut payload: RefreshTokenRequest = read_payload(request).await?;
        payload.validate()?;
        payload.lang.get_or_insert_with(|| ctx.state.settings.default_lang.clone());
        forward(&ctx, "Logout", serde_json::to_value(&payload).map_err(to_internal)?).await
    }
}

fn to_internal(e: serde_json::Error) -> GatewayError {
    GatewayError::Internal(anyhow::anyhow!("failed to encode upstream payload: {e}"))
}

async fn read_payload<T: DeserializeOwned>(request: Request) -> Result<T, GatewayError> {
    let bytes = to_bytes(request.into_body(), MAX_AUTH_BODY_BYTES)
        .await
        .map_err(|e| GatewayError::InvalidInput(format!("failed to read request body: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| GatewayError::InvalidInput(format!("invalid JSON request body: {e}")))
}

/// Forwards the concrete payload by the route's service protocol and feeds
/// the service health stats with the outcome.
async fn forward(
    ctx: &EndpointContext,
    rpc_method: &str,
    payload: serde_json::Value,
) -> Result<Response, GatewayError> {
    let service = &ctx.entry.service;
    let health = ctx.state.health.stats(service.id);

    if service.protocol == PROTOCOL_GRPC {
        let mapping = ctx
            .state
            .db
            .mapping_for_method(service.id, rpc_method)
            .await?
            .ok_or_else(|| GatewayError::NotConfigured("gRPC mapping not found".to_string()))?;

        let body = Bytes::from(serde_json::to_vec(&payload).map_err(to_internal)?);
        return match ctx
            .state
            .grpc
            .invoke(&ctx.state.traces, &ctx.request_id, service, &mapping, body)
            .await
        {
            Ok(response) => {
                health.record_success();
                Ok(response)
            }
            Err(error) => {
                if matches!(
                    error,
                    GatewayError::UpstreamUnavailable(_) | GatewayError::UpstreamFailure(_)
                ) {
                    health.record_failure();
                }
                Err(error)
            }
        };
    }

    let url = format!(
        "{}{}",
        service.base_url.trim_end_matches('/'),
        ctx.entry.route.path
    );
    ctx.state
        .traces
        .info(&ctx.request_id, "REST", format!("Proxying to {}", service.base_url));

    let upstream = ctx
        .state
        .http
        .post(&url)
        .json(&payload)
        .timeout(UPSTREAM_TIMEOUT)
        .send()
        .await;

    match upstream {
        Ok(response) => {
            let status = response.status();
            if status.is_server_error() {
                health.record_failure();
                ctx.state.traces.error(
                    &ctx.request_id,
                    "REST",
                    format!("Upstream responded {status}"),
                );
            } else {
                health.record_success();
            }

            let body = response.bytes().await.map_err(|e| {
                GatewayError::UpstreamFailure(format!("failed to read upstream body: {e}"))
            })?;

            if status.is_success() {
                let envelope: AuthEnvelope = serde_json::from_slice(&body).map_err(|e| {
                    GatewayError::UpstreamFailure(format!("malformed upstream envelope: {e}"))
                })?;
                return Ok((StatusCode::OK, Json(envelope)).into_response());
            }

            Ok((
                status,
                [(header::CONTENT_TYPE, "application/json")],
                body,
            )
                .into_response())
        }
        Err(error) => {
            health.record_failure();
            ctx.state.traces.error(
                &ctx.request_id,
                "REST",
                format!("Upstream transport error: {error}"),
            );
            Err(GatewayError::UpstreamFailure(format!(
                "upstream unreachable: {error}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_request_uses_wire_field_names() {
        let payload: LoginRequest =
            serde_json::from_str(r#"{"phoneNumber":"0812","password":"p"}"#).unwrap();
        assert_eq!(payload.phone_number, "0812");
        assert!(payload.validate().is_ok());

        let encoded = serde_json::to_value(&payload).unwrap();
        assert_eq!(encoded["phoneNumber"], "0812");
        assert!(encoded.get("lang").is_none());
    }

    #[test]
    fn test_empty_credentials_fail_validation() {
        let payload: LoginRequest =
            serde_json::from_str(r#"{"phoneNumber":"","password":""}"#).unwrap();
        assert!(payload.validate().is_err());
    }

    #[test]
    fn test_envelope_round_trip() {
        let raw = r#"{"success":true,"code":"SUCCESS","message":"ok","data":{"accessToken":"t","refreshToken":"r"}}"#;
        let envelope: AuthEnvelope = serde_json::from_str(raw).unwrap();
        assert!(envelope.success);
        assert_eq!(envelope.data.as_ref().unwrap().access_token, "t");

        let encoded = serde_json::to_value(&envelope).unwrap();
        assert_eq!(encoded["data"]["accessToken"], "t");
    }
}
