//! gateway-core: Shared infrastructure for the gateway workspace.
pub mod config;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod observability;
pub mod resilience;

pub use axum;
pub use serde;
pub use serde_json;
pub use tokio;
pub use tracing;
pub use validator;
