//! Database service for the gateway: connection pool, migrations, and the
//! repository calls behind routing, admin CRUD, and the observability
//! writers.

use crate::models::{
    ActivityLog, ProtoMapping, ProtoMappingPayload, RequestLog, Route, RoutePayload, Service,
    ServicePayload, TraceLog, encode_middleware_list,
};
use chrono::{DateTime, Utc};
use gateway_core::error::GatewayError;
use gateway_core::middleware::RequestLogEntry;
use gateway_core::observability::TraceEvent;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "gateway-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, GatewayError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| GatewayError::Database(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), GatewayError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| GatewayError::Database(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), GatewayError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| GatewayError::Database(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Services
    // -------------------------------------------------------------------------

    pub async fn list_services(&self) -> Result<Vec<Service>, GatewayError> {
        sqlx::query_as::<_, Service>(
            "SELECT id, name, protocol, base_url, grpc_addr, status, last_check, created_at, updated_at \
             FROM services WHERE deleted_at IS NULL ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| GatewayError::Database(anyhow::anyhow!("Failed to list services: {}", e)))
    }

    pub async fn get_service(&self, id: i64) -> Result<Option<Service>, GatewayError> {
        sqlx::query_as::<_, Service>(
            "SELECT id, name, protocol, base_url, grpc_addr, status, last_check, created_at, updated_at \
             FROM services WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| GatewayError::Database(anyhow::anyhow!("Failed to load service: {}", e)))
    }

    pub async fn get_service_by_name(&self, name: &str) -> Result<Option<Service>, GatewayError> {
        sqlx::query_as::<_, Service>(
            "SELECT id, name, protocol, base_url, grpc_addr, status, last_check, created_at, updated_at \
             FROM services WHERE name = $1 AND deleted_at IS NULL",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| GatewayError::Database(anyhow::anyhow!("Failed to load service: {}", e)))
    }

    #[instrument(skip(self, payload), fields(name = %payload.name))]
    pub async fn create_service(&self, payload: &ServicePayload) -> Result<Service, GatewayError> {
        let service = sqlx::query_as::<_, Service>(
            "INSERT INTO services (name, protocol, base_url, grpc_addr, status) \
             VALUES ($1, $2, $3, $4, 'unknown') \
             RETURNING id, name, protocol, base_url, grpc_addr, status, last_check, created_at, updated_at",
        )
        .bind(&payload.name)
        .bind(&payload.protocol)
        .bind(&payload.base_url)
        .bind(&payload.grpc_addr)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                GatewayError::Conflict(format!("Service '{}' already exists", payload.name))
            }
            _ => GatewayError::Database(anyhow::anyhow!("Failed to create service: {}", e)),
        })?;

        info!(service_id = service.id, "Service created");
        Ok(service)
    }

    pub async fn update_service(
        &self,
        id: i64,
        payload: &ServicePayload,
    ) -> Result<Option<Service>, GatewayError> {
        sqlx::query_as::<_, Service>(
            "UPDATE services SET name = $2, protocol = $3, base_url = $4, grpc_addr = $5, updated_at = now() \
             WHERE id = $1 AND deleted_at IS NULL \
             RETURNING id, name, protocol, base_url, grpc_addr, status, last_check, created_at, updated_at",
        )
        .bind(id)
        .bind(&payload.name)
        .bind(&payload.protocol)
        .bind(&payload.base_url)
        .bind(&payload.grpc_addr)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                GatewayError::Conflict(format!("Service '{}' already exists", payload.name))
            }
            _ => GatewayError::Database(anyhow::anyhow!("Failed to update service: {}", e)),
        })
    }

    /// Soft-deletes a service. Rejected while any live route references it.
    #[instrument(skip(self))]
    pub async fn delete_service(&self, id: i64) -> Result<bool, GatewayError> {
        let referenced: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM routes WHERE service_id = $1 AND deleted_at IS NULL)",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| GatewayError::Database(anyhow::anyhow!("Failed to check routes: {}", e)))?;

        if referenced {
            return Err(GatewayError::Conflict(
                "Service is referenced by one or more routes".to_string(),
            ));
        }

        let result = sqlx::query(
            "UPDATE services SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| GatewayError::Database(anyhow::anyhow!("Failed to delete service: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    /// Health-checker write path: status and last_check only.
    pub async fn update_service_status(
        &self,
        id: i64,
        status: &str,
        last_check: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        sqlx::query(
            "UPDATE services SET status = $2, last_check = $3, updated_at = now() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(status)
        .bind(last_check)
        .execute(&self.pool)
        .await
        .map_err(|e| GatewayError::Database(anyhow::anyhow!("Failed to update status: {}", e)))?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Routes
    // -------------------------------------------------------------------------

    pub async fn list_routes(&self) -> Result<Vec<Route>, GatewayError> {
        sqlx::query_as::<_, Route>(
            "SELECT id, path, method, service_id, endpoint_filter, tag, middleware, created_at, updated_at \
             FROM routes WHERE deleted_at IS NULL ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| GatewayError::Database(anyhow::anyhow!("Failed to list routes: {}", e)))
    }

    /// Live routes joined with their services, for the route table load.
    pub async fn list_routes_with_services(
        &self,
    ) -> Result<Vec<(Route, Service)>, GatewayError> {
        let routes = self.list_routes().await?;
        let services = self.list_services().await?;
        let by_id: std::collections::HashMap<i64, Service> =
            services.into_iter().map(|s| (s.id, s)).collect();

        let mut pairs = Vec::with_capacity(routes.len());
        for route in routes {
            match by_id.get(&route.service_id) {
                Some(service) => pairs.push((route, service.clone())),
                None => {
                    return Err(GatewayError::Config(anyhow::anyhow!(
                        "Route '{}' references missing service {}",
                        route.path,
                        route.service_id
                    )))
                }
            }
        }
        Ok(pairs)
    }

    #[instrument(skip(self, payload), fields(path = %payload.path))]
    pub async fn create_route(&self, payload: &RoutePayload) -> Result<Route, GatewayError> {
        let route = sqlx::query_as::<_, Route>(
            "INSERT INTO routes (path, method, service_id, endpoint_filter, tag, middleware) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id, path, method, service_id, endpoint_filter, tag, middleware, created_at, updated_at",
        )
        .bind(&payload.path)
        .bind(payload.method.to_uppercase())
        .bind(payload.service_id)
        .bind(&payload.endpoint_filter)
        .bind(&payload.tag)
        .bind(encode_middleware_list(&payload.middleware))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                GatewayError::Conflict(format!("Route '{}' already exists", payload.path))
            }
            sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
                GatewayError::InvalidInput(format!(
                    "Service {} does not exist",
                    payload.service_id
                ))
            }
            _ => GatewayError::Database(anyhow::anyhow!("Failed to create route: {}", e)),
        })?;

        info!(route_id = route.id, "Route created");
        Ok(route)
    }

    pub async fn update_route(
        &self,
        id: i64,
        payload: &RoutePayload,
    ) -> Result<Option<Route>, GatewayError> {
        sqlx::query_as::<_, Route>(
            "UPDATE routes SET path = $2, method = $3, service_id = $4, endpoint_filter = $5, \
             tag = $6, middleware = $7, updated_at = now() \
             WHERE id = $1 AND deleted_at IS NULL \
             RETURNING id, path, method, service_id, endpoint_filter, tag, middleware, created_at, updated_at",
        )
        .bind(id)
        .bind(&payload.path)
        .bind(payload.method.to_uppercase())
        .bind(payload.service_id)
        .bind(&payload.endpoint_filter)
        .bind(&payload.tag)
        .bind(encode_middleware_list(&payload.middleware))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                GatewayError::Conflict(format!("Route '{}' already exists", payload.path))
            }
            _ => GatewayError::Database(anyhow::anyhow!("Failed to update route: {}", e)),
        })
    }

    pub async fn delete_route(&self, id: i64) -> Result<bool, GatewayError> {
        let result = sqlx::query(
            "UPDATE routes SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| GatewayError::Database(anyhow::anyhow!("Failed to delete route: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    // -------------------------------------------------------------------------
    // Proto mappings
    // -------------------------------------------------------------------------

    pub async fn list_proto_mappings(&self) -> Result<Vec<ProtoMapping>, GatewayError> {
        sqlx::query_as::<_, ProtoMapping>(
            "SELECT id, service_id, service_name, proto_package, rpc_method, request_type, response_type, created_at, updated_at \
             FROM proto_mappings WHERE deleted_at IS NULL ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| GatewayError::Database(anyhow::anyhow!("Failed to list mappings: {}", e)))
    }

    /// First mapping configured for a service; the generic gRPC proxy needs
    /// any binding that names the reflected service.
    pub async fn mapping_for_service(
        &self,
        service_id: i64,
    ) -> Result<Option<ProtoMapping>, GatewayError> {
        sqlx::query_as::<_, ProtoMapping>(
            "SELECT id, service_id, service_name, proto_package, rpc_method, request_type, response_type, created_at, updated_at \
             FROM proto_mappings WHERE service_id = $1 AND deleted_at IS NULL ORDER BY id LIMIT 1",
        )
        .bind(service_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| GatewayError::Database(anyhow::anyhow!("Failed to load mapping: {}", e)))
    }

    pub async fn mapping_for_method(
        &self,
        service_id: i64,
        rpc_method: &str,
    ) -> Result<Option<ProtoMapping>, GatewayError> {
        sqlx::query_as::<_, ProtoMapping>(
            "SELECT id, service_id, service_name, proto_package, rpc_method, request_type, response_type, created_at, updated_at \
             FROM proto_mappings WHERE service_id = $1 AND rpc_method = $2 AND deleted_at IS NULL LIMIT 1",
        )
        .bind(service_id)
        .bind(rpc_method)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| GatewayError::Database(anyhow::anyhow!("Failed to load mapping: {}", e)))
    }

    #[instrument(skip(self, payload), fields(rpc_method = %payload.rpc_method))]
    pub async fn create_proto_mapping(
        &self,
        payload: &ProtoMappingPayload,
    ) -> Result<ProtoMapping, GatewayError> {
        sqlx::query_as::<_, ProtoMapping>(
            "INSERT INTO proto_mappings (service_id, service_name, proto_package, rpc_method, request_type, response_type) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id, service_id, service_name, proto_package, rpc_method, request_type, response_type, created_at, updated_at",
        )
        .bind(payload.service_id)
        .bind(&payload.service_name)
        .bind(&payload.proto_package)
        .bind(&payload.rpc_method)
        .bind(&payload.request_type)
        .bind(&payload.response_type)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
                GatewayError::InvalidInput(format!(
                    "Service {} does not exist",
                    payload.service_id
                ))
            }
            _ => GatewayError::Database(anyhow::anyhow!("Failed to create mapping: {}", e)),
        })
    }

    pub async fn update_proto_mapping(
        &self,
        id: i64,
        payload: &ProtoMappingPayload,
    ) -> Result<Option<ProtoMapping>, GatewayError> {
        sqlx::query_as::<_, ProtoMapping>(
            "UPDATE proto_mappings SET service_id = $2, service_name = $3, proto_package = $4, \
             rpc_method = $5, request_type = $6, response_type = $7, updated_at = now() \
             WHERE id = $1 AND deleted_at IS NULL \
             RETURNING id, service_id, service_name, proto_package, rpc_method, request_type, response_type, created_at, updated_at",
        )
        .bind(id)
        .bind(payload.service_id)
        .bind(&payload.service_name)
        .bind(&payload.proto_package)
        .bind(&payload.rpc_method)
        .bind(&payload.request_type)
        .bind(&payload.response_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| GatewayError::Database(anyhow::anyhow!("Failed to update mapping: {}", e)))
    }

    pub async fn delete_proto_mapping(&self, id: i64) -> Result<bool, GatewayError> {
        let result = sqlx::query(
            "UPDATE proto_mappings SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| GatewayError::Database(anyhow::anyhow!("Failed to delete mapping: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    // -------------------------------------------------------------------------
    // Observability writes and reads
    // -------------------------------------------------------------------------

    pub async fn insert_request_log(&self, entry: &RequestLogEntry) -> Result<(), GatewayError> {
        sqlx::query(
            "INSERT INTO request_logs (request_id, method, path, status_code, latency_ms, client_ip, user_agent, error_message) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&entry.request_id)
        .bind(&entry.method)
        .bind(&entry.path)
        .bind(entry.status_code as i32)
        .bind(entry.latency_ms)
        .bind(&entry.client_ip)
        .bind(&entry.user_agent)
        .bind(&entry.error_message)
        .execute(&self.pool)
        .await
        .map_err(|e| GatewayError::Database(anyhow::anyhow!("Failed to write request log: {}", e)))?;
        Ok(())
    }

    pub async fn list_request_logs(&self, limit: i64) -> Result<Vec<RequestLog>, GatewayError> {
        sqlx::query_as::<_, RequestLog>(
            "SELECT id, request_id, method, path, status_code, latency_ms, client_ip, user_agent, error_message, created_at \
             FROM request_logs ORDER BY id DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| GatewayError::Database(anyhow::anyhow!("Failed to list request logs: {}", e)))
    }

    pub async fn insert_trace_log(&self, event: &TraceEvent) -> Result<(), GatewayError> {
        sqlx::query(
            "INSERT INTO trace_logs (request_id, level, component, message) VALUES ($1, $2, $3, $4)",
        )
        .bind(&event.request_id)
        .bind(event.level.as_str())
        .bind(&event.component)
        .bind(&event.message)
        .execute(&self.pool)
        .await
        .map_err(|e| GatewayError::Database(anyhow::anyhow!("Failed to write trace log: {}", e)))?;
        Ok(())
    }

    pub async fn list_traces(&self, request_id: &str) -> Result<Vec<TraceLog>, GatewayError> {
        sqlx::query_as::<_, TraceLog>(
            "SELECT id, request_id, level, component, message, created_at \
             FROM trace_logs WHERE request_id = $1 ORDER BY id",
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| GatewayError::Database(anyhow::anyhow!("Failed to list traces: {}", e)))
    }

    pub async fn insert_activity(
        &self,
        action: &str,
        resource: &str,
        user: &str,
        message: &str,
    ) -> Result<(), GatewayError> {
        sqlx::query(
            "INSERT INTO activity_logs (action, resource, username, message) VALUES ($1, $2, $3, $4)",
        )
        .bind(action)
        .bind(resource)
        .bind(user)
        .bind(message)
        .execute(&self.pool)
        .await
        .map_err(|e| GatewayError::Database(anyhow::anyhow!("Failed to write activity: {}", e)))?;
        Ok(())
    }

    pub async fn list_activity(&self, limit: i64) -> Result<Vec<ActivityLog>, GatewayError> {
        sqlx::query_as::<_, ActivityLog>(
            "SELECT id, action, resource, username, message, created_at \
             FROM activity_logs ORDER BY id DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| GatewayError::Database(anyhow::anyhow!("Failed to list activity: {}", e)))
    }
}
