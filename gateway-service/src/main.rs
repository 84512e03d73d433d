use axum::extract::Request;
use axum::ServiceExt;
use dotenvy::dotenv;
use gateway_core::config::Settings;
use gateway_core::metrics::MetricsRegistry;
use gateway_core::middleware::{create_ip_rate_limiter, TrafficLogger};
use gateway_core::observability::{init_tracing, LogBuffer, TraceSink};
use gateway_core::resilience::{HealthRegistry, RouteBreakerStore};
use gateway_service::proxy::GrpcInvoker;
use gateway_service::routing::{self, EndpointRegistry, SharedRoutes};
use gateway_service::services::health_checker::spawn_health_checker;
use gateway_service::services::log_writer::spawn_log_writer;
use gateway_service::services::Database;
use gateway_service::{startup, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::Layer;
use tower_http::normalize_path::NormalizePathLayer;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let settings = Settings::load()?;
    let log_buffer = LogBuffer::new(1000);
    init_tracing(
        "gateway-service",
        &settings.log_level,
        settings.otlp_endpoint.as_deref(),
        log_buffer.clone(),
    );

    let db = Database::new(&settings.database_url(), 16, 2).await?;
    db.run_migrations().await?;

    let route_table = routing::load_route_table(&db).await?;
    info!(routes = route_table.len(), "Route table loaded");

    let (traffic, request_log_rx) = TrafficLogger::new();
    let (traces, trace_rx) = TraceSink::new();

    let state = AppState {
        settings: Arc::new(settings.clone()),
        db: db.clone(),
        http: reqwest::Client::builder().build()?,
        health: Arc::new(HealthRegistry::new()),
        metrics: Arc::new(MetricsRegistry::new()),
        rate_limiter: create_ip_rate_limiter(),
        route_breakers: Arc::new(RouteBreakerStore::new()),
        routes: SharedRoutes::new(route_table),
        endpoints: Arc::new(EndpointRegistry::with_builtin_handlers()),
        grpc: Arc::new(GrpcInvoker::new()),
        traffic,
        traces,
        log_buffer,
    };

    spawn_log_writer(db.clone(), request_log_rx, trace_rx);

    let shutdown = CancellationToken::new();
    spawn_health_checker(db, state.http.clone(), shutdown.clone());

    let app = startup::build_router(state);
    // Trailing-slash normalization must wrap the router itself: applied as
    // a Router layer it would run after route matching.
    let app = NormalizePathLayer::trim_trailing_slash().layer(app);

    let address = settings.listen_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!("Starting gateway-service on {}", address);
    axum::serve(
        listener,
        ServiceExt::<Request>::into_make_service_with_connect_info::<SocketAddr>(app),
    )
    .with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        shutdown.cancel();
    })
    .await?;

    Ok(())
}
