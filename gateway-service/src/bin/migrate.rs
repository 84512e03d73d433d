//! Seeds the configuration tables from a JSON route file: runs the SQL
//! migrations, upserts the auth service, and inserts any missing routes and
//! proto mappings. Safe to run repeatedly.

use dotenvy::dotenv;
use gateway_core::config::Settings;
use gateway_service::models::{ProtoMappingPayload, RoutePayload, ServicePayload};
use gateway_service::services::Database;
use serde::Deserialize;
use std::collections::HashSet;
use tracing::info;

const DEFAULT_SEED_PATH: &str = "gateway-service/seed/routes.json";

#[derive(Debug, Deserialize)]
struct SeedRoute {
    path: String,
    method: String,
    endpoint_filter: String,
    tag: String,
    #[serde(default)]
    middleware: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt().init();

    let settings = Settings::load()?;
    let db = Database::new(&settings.database_url(), 4, 1).await?;
    db.run_migrations().await?;

    let seed_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_SEED_PATH.to_string());
    let raw = std::fs::read_to_string(&seed_path)?;
    let seeds: Vec<SeedRoute> = serde_json::from_str(&raw)?;

    // Auth service, created once from the environment.
    let service = match db.get_service_by_name("auth-service").await? {
        Some(existing) => existing,
        None => {
            db.create_service(&ServicePayload {
                name: "auth-service".to_string(),
                protocol: "rest".to_string(),
                base_url: std::env::var("AUTH_SERVICE_BASE_URL").unwrap_or_default(),
                grpc_addr: std::env::var("AUTH_SERVICE_GRPC_ADDR").unwrap_or_default(),
            })
            .await?
        }
    };

    let existing_paths: HashSet<String> = db
        .list_routes()
        .await?
        .into_iter()
        .map(|route| route.path)
        .collect();

    let mut created = 0;
    for seed in seeds {
        if existing_paths.contains(&seed.path) {
            continue;
        }
        db.create_route(&RoutePayload {
            path: seed.path,
            method: seed.method,
            service_id: service.id,
            endpoint_filter: seed.endpoint_filter,
            tag: seed.tag,
            middleware: seed.middleware,
        })
        .await?;
        created += 1;
    }
    info!(created, "Routes seeded");

    let existing_mappings: HashSet<(i64, String)> = db
        .list_proto_mappings()
        .await?
        .into_iter()
        .map(|mapping| (mapping.service_id, mapping.rpc_method))
        .collect();

    let mappings = [
        ("Login", "LoginRequest", "LoginResponse"),
        ("CheckPhone", "CheckPhoneRequest", "CheckPhoneResponse"),
        ("RefreshToken", "RefreshTokenRequest", "RefreshTokenResponse"),
        ("Logout", "LogoutRequest", "StandardResponse"),
    ];
    for (rpc_method, request_type, response_type) in mappings {
        if existing_mappings.contains(&(service.id, rpc_method.to_string())) {
            continue;
        }
        db.create_proto_mapping(&ProtoMappingPayload {
            service_id: service.id,
            service_name: "AuthService".to_string(),
            proto_package: "auth".to_string(),
            rpc_method: rpc_method.to_string(),
            request_type: request_type.to_string(),
            response_type: response_type.to_string(),
        })
        .await?;
    }

    info!("Migration completed successfully");
    Ok(())
}
