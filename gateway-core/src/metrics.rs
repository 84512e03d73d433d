//! Rolling per-service traffic metrics with EWMA latency, attributed by the
//! route tag. Health score and circuit status are merged in at admin read
//! time from the health registry, never written on the request path.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Weight of a new latency sample in the moving average.
const EWMA_ALPHA: f64 = 0.1;

fn ewma(avg: f64, sample: f64) -> f64 {
    if avg == 0.0 {
        sample
    } else {
        avg * (1.0 - EWMA_ALPHA) + sample * EWMA_ALPHA
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct PathInfo {
    pub count: u64,
    pub avg_latency_ms: f64,
}

#[derive(Debug, Default)]
struct ServiceMetricsInner {
    total_requests: u64,
    total_errors: u64,
    avg_latency_ms: f64,
    last_status: u16,
    status_counts: HashMap<u16, u64>,
    path_metrics: HashMap<String, PathInfo>,
}

#[derive(Debug, Default)]
pub struct ServiceMetrics {
    inner: RwLock<ServiceMetricsInner>,
}

impl ServiceMetrics {
    fn record(&self, path: &str, status: u16, duration: Duration) {
        // Microsecond source resolution, reported in milliseconds.
        let sample_ms = duration.as_micros() as f64 / 1000.0;

        let mut metrics = self.inner.write().expect("service metrics lock poisoned");
        metrics.total_requests += 1;
        if status >= 400 {
            metrics.total_errors += 1;
        }
        metrics.last_status = status;
        *metrics.status_counts.entry(status).or_insert(0) += 1;
        metrics.avg_latency_ms = ewma(metrics.avg_latency_ms, sample_ms);

        let path_info = metrics.path_metrics.entry(path.to_string()).or_default();
        path_info.count += 1;
        path_info.avg_latency_ms = ewma(path_info.avg_latency_ms, sample_ms);
    }

    fn snapshot(&self) -> ServiceMetricsSnapshot {
        let metrics = self.inner.read().expect("service metrics lock poisoned");
        ServiceMetricsSnapshot {
            total_requests: metrics.total_requests,
            total_errors: metrics.total_errors,
            avg_latency_ms: metrics.avg_latency_ms,
            last_status: metrics.last_status,
            status_counts: metrics.status_counts.clone(),
            path_metrics: metrics.path_metrics.clone(),
            health_score: None,
            circuit_status: None,
        }
    }
}

/// Serializable view of one service's counters. `health_score` and
/// `circuit_status` are populated by the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceMetricsSnapshot {
    pub total_requests: u64,
    pub total_errors: u64,
    pub avg_latency_ms: f64,
    pub last_status: u16,
    pub status_counts: HashMap<u16, u64>,
    pub path_metrics: HashMap<String, PathInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_score: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_status: Option<String>,
}

impl Default for ServiceMetricsSnapshot {
    fn default() -> Self {
        Self {
            total_requests: 0,
            total_errors: 0,
            avg_latency_ms: 0.0,
            last_status: 0,
            status_counts: HashMap::new(),
            path_metrics: HashMap::new(),
            health_score: None,
            circuit_status: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub services: HashMap<String, ServiceMetricsSnapshot>,
    pub start_time: DateTime<Utc>,
}

/// Process-wide metrics keyed by service name. Entries are created lazily
/// under a double-checked write lock and live for the process lifetime.
#[derive(Debug)]
pub struct MetricsRegistry {
    services: RwLock<HashMap<String, Arc<ServiceMetrics>>>,
    start_time: DateTime<Utc>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            start_time: Utc::now(),
        }
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, service: &str, path: &str, status: u16, duration: Duration) {
        self.service(service).record(path, status, duration);
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let services = self.services.read().expect("metrics registry lock poisoned");
        MetricsSnapshot {
            services: services
                .iter()
                .map(|(name, metrics)| (name.clone(), metrics.snapshot()))
                .collect(),
            start_time: self.start_time,
        }
    }

    fn service(&self, name: &str) -> Arc<ServiceMetrics> {
        {
            let services = self.services.read().expect("metrics registry lock poisoned");
            if let Some(metrics) = services.get(name) {
                return metrics.clone();
            }
        }

        let mut services = self.services.write().expect("metrics registry lock poisoned");
        services.entry(name.to_string()).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_sets_average_directly() {
        let registry = MetricsRegistry::new();
        registry.record("auth-service", "/auth/login", 200, Duration::from_millis(40));

        let snapshot = registry.snapshot();
        let metrics = &snapshot.services["auth-service"];
        assert_eq!(metrics.total_requests, 1);
        assert_eq!(metrics.total_errors, 0);
        assert!((metrics.avg_latency_ms - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_second_sample_moves_average_by_alpha() {
        let registry = MetricsRegistry::new();
        registry.record("auth-service", "/auth/login", 200, Duration::from_millis(40));
        registry.record("auth-service", "/auth/login", 200, Duration::from_millis(80));

        let snapshot = registry.snapshot();
        let metrics = &snapshot.services["auth-service"];
        // 0.9 * 40 + 0.1 * 80
        assert!((metrics.avg_latency_ms - 44.0).abs() < 1e-6);
    }

    #[test]
    fn test_status_counts_and_errors() {
        let registry = MetricsRegistry::new();
        registry.record("auth-service", "/auth/login", 200, Duration::from_millis(5));
        registry.record("auth-service", "/auth/login", 500, Duration::from_millis(5));
        registry.record("auth-service", "/auth/login", 500, Duration::from_millis(5));
        registry.record("auth-service", "/auth/login", 404, Duration::from_millis(5));

        let snapshot = registry.snapshot();
        let metrics = &snapshot.services["auth-service"];
        assert_eq!(metrics.total_requests, 4);
        assert_eq!(metrics.total_errors, 3);
        assert_eq!(metrics.last_status, 404);
        assert_eq!(metrics.status_counts[&200], 1);
        assert_eq!(metrics.status_counts[&500], 2);
        assert_eq!(metrics.status_counts[&404], 1);
    }

    #[test]
    fn test_path_metrics_tracked_per_path() {
        let registry = MetricsRegistry::new();
        registry.record("auth-service", "/auth/login", 200, Duration::from_millis(10));
        registry.record("auth-service", "/auth/logout", 200, Duration::from_millis(30));
        registry.record("auth-service", "/auth/login", 200, Duration::from_millis(20));

        let snapshot = registry.snapshot();
        let paths = &snapshot.services["auth-service"].path_metrics;
        assert_eq!(paths["/auth/login"].count, 2);
        assert_eq!(paths["/auth/logout"].count, 1);
        assert!((paths["/auth/login"].avg_latency_ms - 11.0).abs() < 1e-6);
        assert!((paths["/auth/logout"].avg_latency_ms - 30.0).abs() < 1e-6);
    }
}
