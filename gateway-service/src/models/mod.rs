//! Persisted rows for the gateway's configuration and observability tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const PROTOCOL_REST: &str = "rest";
pub const PROTOCOL_GRPC: &str = "grpc";

pub const STATUS_ONLINE: &str = "online";
pub const STATUS_OFFLINE: &str = "offline";
pub const STATUS_UNKNOWN: &str = "unknown";

/// A downstream backend reachable over REST or gRPC.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Service {
    pub id: i64,
    pub name: String,
    pub protocol: String,
    pub base_url: String,
    pub grpc_addr: String,
    pub status: String,
    pub last_check: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServicePayload {
    pub name: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub grpc_addr: String,
}

fn default_protocol() -> String {
    PROTOCOL_REST.to_string()
}

impl ServicePayload {
    pub fn protocol_is_valid(&self) -> bool {
        self.protocol == PROTOCOL_REST || self.protocol == PROTOCOL_GRPC
    }
}

/// A public path mapping onto a service. `middleware` is stored as a
/// JSON-encoded ordered list of middleware names.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Route {
    pub id: i64,
    pub path: String,
    pub method: String,
    pub service_id: i64,
    pub endpoint_filter: String,
    pub tag: String,
    pub middleware: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutePayload {
    pub path: String,
    pub method: String,
    pub service_id: i64,
    #[serde(default)]
    pub endpoint_filter: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub middleware: Vec<String>,
}

/// The binding between a service and one gRPC method, resolved via server
/// reflection at invocation time.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProtoMapping {
    pub id: i64,
    pub service_id: i64,
    pub service_name: String,
    pub proto_package: String,
    pub rpc_method: String,
    pub request_type: String,
    pub response_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProtoMapping {
    /// Fully-qualified protobuf service name, e.g. `auth.AuthService`.
    pub fn qualified_service(&self) -> String {
        format!("{}.{}", self.proto_package, self.service_name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProtoMappingPayload {
    pub service_id: i64,
    pub service_name: String,
    pub proto_package: String,
    pub rpc_method: String,
    #[serde(default)]
    pub request_type: String,
    #[serde(default)]
    pub response_type: String,
}

/// Audit entry for administrative writes.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ActivityLog {
    pub id: i64,
    pub action: String,
    pub resource: String,
    #[sqlx(rename = "username")]
    pub user: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RequestLog {
    pub id: i64,
    pub request_id: String,
    pub method: String,
    pub path: String,
    pub status_code: i32,
    pub latency_ms: i64,
    pub client_ip: String,
    pub user_agent: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TraceLog {
    pub id: i64,
    pub request_id: String,
    pub level: String,
    pub component: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Middleware names accepted in a route's middleware list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MiddlewareKind {
    #[serde(rename = "timeout")]
    Timeout,
    #[serde(rename = "retry")]
    Retry,
    #[serde(rename = "circuit-breaker")]
    CircuitBreaker,
}

/// Decodes the stored JSON middleware column. An empty column means no
/// per-route middleware; unknown names are a configuration error surfaced
/// at route load time.
pub fn parse_middleware_list(raw: &str) -> Result<Vec<MiddlewareKind>, serde_json::Error> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Vec::new());
    }
    serde_json::from_str(trimmed)
}

pub fn encode_middleware_list(names: &[String]) -> String {
    serde_json::to_string(names).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_middleware_list() {
        let parsed = parse_middleware_list(r#"["timeout","retry","circuit-breaker"]"#).unwrap();
        assert_eq!(
            parsed,
            vec![
                MiddlewareKind::Timeout,
                MiddlewareKind::Retry,
                MiddlewareKind::CircuitBreaker
            ]
        );
    }

    #[test]
    fn test_parse_empty_middleware_list() {
        assert!(parse_middleware_list("").unwrap().is_empty());
        assert!(parse_middleware_list("null").unwrap().is_empty());
        assert!(parse_middleware_list("[]").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_middleware_is_rejected() {
        assert!(parse_middleware_list(r#"["bulkhead"]"#).is_err());
    }

    #[test]
    fn test_qualified_service_name() {
        let mapping = ProtoMapping {
            id: 1,
            service_id: 1,
            service_name: "AuthService".to_string(),
            proto_package: "auth".to_string(),
            rpc_method: "Login".to_string(),
            request_type: "LoginRequest".to_string(),
            response_type: "LoginResponse".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(mapping.qualified_service(), "auth.AuthService");
    }
}
