//! Per-client-IP token bucket rate limiting.
//!
//! Limiters are created on first sight of an IP and never evicted; the map
//! grows with the set of distinct client IPs seen over the process lifetime.

use crate::error::GatewayError;
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::DefaultClock,
    state::keyed::DashMapStateStore,
    Quota, RateLimiter,
};
use std::{net::IpAddr, net::SocketAddr, num::NonZeroU32, sync::Arc};

/// Bucket refill rate per second.
const RATE_PER_SECOND: u32 = 10;
/// Bucket capacity.
const BURST: u32 = 5;

/// Rate limiter keyed by client IP address.
pub type IpRateLimiter = Arc<RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>>;

pub fn create_ip_rate_limiter() -> IpRateLimiter {
    let quota = Quota::per_second(
        NonZeroU32::new(RATE_PER_SECOND).expect("rate is guaranteed to be non-zero"),
    )
    .allow_burst(NonZeroU32::new(BURST).expect("burst is guaranteed to be non-zero"));

    Arc::new(RateLimiter::dashmap(quota))
}

/// Admin and dashboard traffic is never throttled.
pub fn bypasses_rate_limit(path: &str) -> bool {
    path.starts_with("/admin") || path.starts_with("/dashboard")
}

/// The client's real IP: first hop of `X-Forwarded-For` when present,
/// otherwise the peer socket address.
pub fn client_ip(request: &Request) -> Option<IpAddr> {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse::<IpAddr>().ok());

    forwarded.or_else(|| {
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    })
}

pub async fn rate_limit_middleware(
    State(limiter): State<IpRateLimiter>,
    request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    if bypasses_rate_limit(request.uri().path()) {
        return Ok(next.run(request).await);
    }

    match client_ip(&request) {
        Some(ip) => {
            if limiter.check_key(&ip).is_ok() {
                Ok(next.run(request).await)
            } else {
                Err(GatewayError::RateLimited)
            }
        }
        None => {
            tracing::warn!("Could not determine client IP for rate limiting");
            Ok(next.run(request).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_of_five_then_denied() {
        let limiter = create_ip_rate_limiter();
        let ip: IpAddr = "10.0.0.5".parse().unwrap();

        for _ in 0..5 {
            assert!(limiter.check_key(&ip).is_ok());
        }
        assert!(limiter.check_key(&ip).is_err());
    }

    #[test]
    fn test_limiters_are_independent_per_ip() {
        let limiter = create_ip_rate_limiter();
        let first: IpAddr = "10.0.0.5".parse().unwrap();
        let second: IpAddr = "10.0.0.6".parse().unwrap();

        for _ in 0..5 {
            assert!(limiter.check_key(&first).is_ok());
        }
        assert!(limiter.check_key(&first).is_err());
        assert!(limiter.check_key(&second).is_ok());
    }

    #[test]
    fn test_admin_and_dashboard_bypass() {
        assert!(bypasses_rate_limit("/admin"));
        assert!(bypasses_rate_limit("/admin/metrics"));
        assert!(bypasses_rate_limit("/dashboard"));
        assert!(bypasses_rate_limit("/dashboard/index.html"));
        assert!(!bypasses_rate_limit("/auth/login"));
        assert!(!bypasses_rate_limit("/"));
    }

    #[test]
    fn test_client_ip_prefers_forwarded_for() {
        let request = Request::builder()
            .uri("/auth/login")
            .header("x-forwarded-for", "10.0.0.5, 172.16.0.1")
            .body(axum::body::Body::empty())
            .unwrap();

        assert_eq!(client_ip(&request), Some("10.0.0.5".parse().unwrap()));
    }

    #[test]
    fn test_client_ip_falls_back_to_peer_address() {
        let mut request = Request::builder()
            .uri("/auth/login")
            .body(axum::body::Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo::<SocketAddr>("10.0.0.9:4431".parse().unwrap()));

        assert_eq!(client_ip(&request), Some("10.0.0.9".parse().unwrap()));
    }
}
