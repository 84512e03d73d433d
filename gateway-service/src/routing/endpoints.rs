//! Registry of specifically-implemented endpoint handlers, selected by a
//! route's `endpoint_filter`. Filters with no registered handler fall back
//! to the generic proxy.

use crate::handlers::auth::{CheckPhoneHandler, LoginHandler, LogoutHandler, RefreshTokenHandler};
use crate::routing::RouteEntry;
use crate::AppState;
use async_trait::async_trait;
use axum::extract::Request;
use axum::response::Response;
use gateway_core::error::GatewayError;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

/// Everything a named handler needs beyond the request itself.
#[derive(Clone)]
pub struct EndpointContext {
    pub state: AppState,
    pub entry: Arc<RouteEntry>,
    pub request_id: String,
    pub client_ip: Option<IpAddr>,
}

#[async_trait]
pub trait EndpointHandler: Send + Sync {
    async fn handle(&self, ctx: EndpointContext, request: Request)
        -> Result<Response, GatewayError>;
}

pub struct EndpointRegistry {
    handlers: HashMap<String, Arc<dyn EndpointHandler>>,
}

impl EndpointRegistry {
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// The handlers shipped with the gateway.
    pub fn with_builtin_handlers() -> Self {
        let mut registry = Self::empty();
        registry.register("login", Arc::new(LoginHandler));
        registry.register("check-phone", Arc::new(CheckPhoneHandler));
        registry.register("refresh-token", Arc::new(RefreshTokenHandler));
        registry.register("logout", Arc::new(LogoutHandler));
        registry
    }

    pub fn register(&mut self, name: &str, handler: Arc<dyn EndpointHandler>) {
        self.handlers.insert(name.to_string(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn EndpointHandler>> {
        self.handlers.get(name).cloned()
    }
}
