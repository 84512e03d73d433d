pub mod metrics;
pub mod rate_limit;
pub mod traffic_log;

pub use metrics::{metrics_middleware, RouteTag};
pub use rate_limit::{client_ip, create_ip_rate_limiter, rate_limit_middleware, IpRateLimiter};
pub use traffic_log::{traffic_log_middleware, RequestLogEntry, TrafficLogger, REQUEST_ID_HEADER};
