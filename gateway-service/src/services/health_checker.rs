//! Periodic liveness probing of every configured service.

use crate::models::{Service, PROTOCOL_GRPC, STATUS_OFFLINE, STATUS_ONLINE};
use crate::services::Database;
use chrono::Utc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const CHECK_INTERVAL: Duration = Duration::from_secs(30);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Ticks every 30 seconds, first tick immediately at startup.
pub fn spawn_health_checker(
    db: Database,
    client: reqwest::Client,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CHECK_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => check_services(&db, &client).await,
            }
        }
    })
}

async fn check_services(db: &Database, client: &reqwest::Client) {
    let services = match db.list_services().await {
        Ok(services) => services,
        Err(e) => {
            warn!(error = %e, "Health check: failed to load services");
            return;
        }
    };

    for service in &services {
        let online = probe(client, service).await;
        let status = if online { STATUS_ONLINE } else { STATUS_OFFLINE };
        debug!(service = %service.name, status, "Health check probe finished");

        if let Err(e) = db
            .update_service_status(service.id, status, Utc::now())
            .await
        {
            warn!(service = %service.name, error = %e, "Health check: failed to persist status");
        }
    }
}

async fn probe(client: &reqwest::Client, service: &Service) -> bool {
    if service.protocol == PROTOCOL_GRPC {
        probe_grpc(&service.grpc_addr).await
    } else {
        probe_rest(client, &service.base_url).await
    }
}

/// A gRPC upstream counts as online when its address accepts a TCP dial.
async fn probe_grpc(addr: &str) -> bool {
    matches!(
        tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

/// A REST upstream counts as online when /health answers 200, or, for
/// services without a health endpoint, when the base URL answers at all.
async fn probe_rest(client: &reqwest::Client, base_url: &str) -> bool {
    let health_url = format!("{}/health", base_url.trim_end_matches('/'));
    if let Ok(response) = client
        .get(&health_url)
        .timeout(PROBE_TIMEOUT)
        .send()
        .await
    {
        if response.status() == reqwest::StatusCode::OK {
            return true;
        }
    }

    client
        .get(base_url)
        .timeout(PROBE_TIMEOUT)
        .send()
        .await
        .is_ok()
}
