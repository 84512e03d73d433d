//! Configuration-driven routing: the preloaded route snapshot and its
//! admin-triggered reload.

pub mod dispatch;
pub mod endpoints;

use crate::models::{parse_middleware_list, MiddlewareKind, Route, Service};
use crate::services::Database;
use axum::http::Method;
use gateway_core::error::GatewayError;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub use dispatch::dispatch;
pub use endpoints::{EndpointContext, EndpointHandler, EndpointRegistry};

/// One resolved route: the stored row, its preloaded service, and the
/// parsed middleware chain.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub route: Route,
    pub service: Service,
    pub middleware: Vec<MiddlewareKind>,
}

impl RouteEntry {
    pub fn has_middleware(&self, kind: MiddlewareKind) -> bool {
        self.middleware.contains(&kind)
    }
}

pub enum RouteMatch {
    Found(Arc<RouteEntry>),
    MethodNotAllowed,
    NotFound,
}

/// Immutable snapshot of all live routes keyed by path. Route paths are
/// globally unique, so each path binds exactly one method.
#[derive(Debug, Default)]
pub struct RouteTable {
    entries: HashMap<String, Arc<RouteEntry>>,
}

impl RouteTable {
    pub fn build(pairs: Vec<(Route, Service)>) -> Result<Self, GatewayError> {
        let mut entries: HashMap<String, Arc<RouteEntry>> = HashMap::new();

        for (route, service) in pairs {
            if entries.contains_key(&route.path) {
                return Err(GatewayError::Config(anyhow::anyhow!(
                    "duplicate route path: {}",
                    route.path
                )));
            }

            let middleware = parse_middleware_list(&route.middleware).map_err(|e| {
                GatewayError::Config(anyhow::anyhow!(
                    "route '{}': invalid middleware list: {}",
                    route.path,
                    e
                ))
            })?;

            Method::from_bytes(route.method.as_bytes()).map_err(|_| {
                GatewayError::Config(anyhow::anyhow!(
                    "route '{}': invalid method '{}'",
                    route.path,
                    route.method
                ))
            })?;

            let path = route.path.clone();
            entries.insert(
                path,
                Arc::new(RouteEntry {
                    route,
                    service,
                    middleware,
                }),
            );
        }

        Ok(Self { entries })
    }

    pub fn lookup(&self, method: &Method, path: &str) -> RouteMatch {
        match self.entries.get(path) {
            Some(entry) if entry.route.method.eq_ignore_ascii_case(method.as_str()) => {
                RouteMatch::Found(entry.clone())
            }
            Some(_) => RouteMatch::MethodNotAllowed,
            None => RouteMatch::NotFound,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Handle to the current route snapshot. Requests read a consistent
/// snapshot; the admin reload swaps in a fresh one atomically.
#[derive(Clone)]
pub struct SharedRoutes {
    inner: Arc<RwLock<Arc<RouteTable>>>,
}

impl SharedRoutes {
    pub fn new(table: RouteTable) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(table))),
        }
    }

    pub fn current(&self) -> Arc<RouteTable> {
        self.inner.read().expect("route table lock poisoned").clone()
    }

    pub fn replace(&self, table: RouteTable) {
        *self.inner.write().expect("route table lock poisoned") = Arc::new(table);
    }
}

/// Loads every live route with its service and validates the snapshot.
pub async fn load_route_table(db: &Database) -> Result<RouteTable, GatewayError> {
    let pairs = db.list_routes_with_services().await?;
    RouteTable::build(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PROTOCOL_REST, STATUS_UNKNOWN};
    use chrono::Utc;

    fn service(id: i64, name: &str) -> Service {
        Service {
            id,
            name: name.to_string(),
            protocol: PROTOCOL_REST.to_string(),
            base_url: "http://upstream:9000".to_string(),
            grpc_addr: String::new(),
            status: STATUS_UNKNOWN.to_string(),
            last_check: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn route(id: i64, path: &str, method: &str, middleware: &str) -> Route {
        Route {
            id,
            path: path.to_string(),
            method: method.to_string(),
            service_id: 1,
            endpoint_filter: String::new(),
            tag: "auth-service".to_string(),
            middleware: middleware.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_duplicate_paths_are_rejected() {
        let pairs = vec![
            (route(1, "/auth/login", "POST", "[]"), service(1, "auth")),
            (route(2, "/auth/login", "GET", "[]"), service(1, "auth")),
        ];
        assert!(RouteTable::build(pairs).is_err());
    }

    #[test]
    fn test_lookup_matches_method() {
        let pairs = vec![(
            route(1, "/auth/login", "POST", r#"["timeout","retry"]"#),
            service(1, "auth"),
        )];
        let table = RouteTable::build(pairs).unwrap();

        match table.lookup(&Method::POST, "/auth/login") {
            RouteMatch::Found(entry) => {
                assert!(entry.has_middleware(MiddlewareKind::Timeout));
                assert!(entry.has_middleware(MiddlewareKind::Retry));
                assert!(!entry.has_middleware(MiddlewareKind::CircuitBreaker));
            }
            _ => panic!("expected a match"),
        }

        assert!(matches!(
            table.lookup(&Method::GET, "/auth/login"),
            RouteMatch::MethodNotAllowed
        ));
        assert!(matches!(
            table.lookup(&Method::POST, "/missing"),
            RouteMatch::NotFound
        ));
    }

    #[test]
    fn test_invalid_middleware_list_is_a_load_error() {
        let pairs = vec![(
            route(1, "/auth/login", "POST", r#"["bulkhead"]"#),
            service(1, "auth"),
        )];
        assert!(RouteTable::build(pairs).is_err());
    }

    #[test]
    fn test_shared_routes_swap() {
        let shared = SharedRoutes::new(RouteTable::default());
        assert!(shared.current().is_empty());

        let pairs = vec![(route(1, "/auth/login", "POST", "[]"), service(1, "auth"))];
        shared.replace(RouteTable::build(pairs).unwrap());
        assert_eq!(shared.current().len(), 1);
    }
}
