//! Gateway Service - database-driven API gateway in front of REST and gRPC
//! backends.

pub mod handlers;
pub mod models;
pub mod proxy;
pub mod routing;
pub mod services;
pub mod startup;

use gateway_core::config::Settings;
use gateway_core::metrics::MetricsRegistry;
use gateway_core::middleware::{IpRateLimiter, TrafficLogger};
use gateway_core::observability::{LogBuffer, TraceSink};
use gateway_core::resilience::{HealthRegistry, RouteBreakerStore};
use proxy::GrpcInvoker;
use routing::{EndpointRegistry, SharedRoutes};
use services::Database;
use std::sync::Arc;

/// Shared application state: the repository, the shared HTTP client, and
/// the in-memory registries injected at router construction.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub db: Database,
    pub http: reqwest::Client,
    pub health: Arc<HealthRegistry>,
    pub metrics: Arc<MetricsRegistry>,
    pub rate_limiter: IpRateLimiter,
    pub route_breakers: Arc<RouteBreakerStore>,
    pub routes: SharedRoutes,
    pub endpoints: Arc<EndpointRegistry>,
    pub grpc: Arc<GrpcInvoker>,
    pub traffic: TrafficLogger,
    pub traces: TraceSink,
    pub log_buffer: LogBuffer,
}
