//! Per-service health statistics and the circuit breaker state machine that
//! gates all traffic to a service.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Consecutive failures that trip the circuit.
const TRIP_THRESHOLD: u32 = 5;
/// How long an open circuit waits before admitting a trial request.
const COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

#[derive(Debug, Default)]
struct StatsInner {
    total_requests: u64,
    failed_requests: u64,
    consecutive_failures: u32,
    last_failure: Option<DateTime<Utc>>,
    state: CircuitState,
}

#[derive(Debug)]
pub struct HealthStats {
    inner: Mutex<StatsInner>,
}

/// Point-in-time view of one service's health, merged into the admin
/// metrics document.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub total_requests: u64,
    pub failed_requests: u64,
    pub consecutive_failures: u32,
    pub last_failure: Option<DateTime<Utc>>,
    pub circuit_state: CircuitState,
    pub health_score: u64,
}

/// Cloneable handle to one service's stats. Handles are lazily created by
/// the registry and live for the rest of the process.
#[derive(Debug, Clone)]
pub struct ServiceHealth(Arc<HealthStats>);

impl ServiceHealth {
    fn new() -> Self {
        ServiceHealth(Arc::new(HealthStats {
            inner: Mutex::new(StatsInner::default()),
        }))
    }

    pub fn record_success(&self) {
        let mut stats = self.0.inner.lock().expect("health stats lock poisoned");
        stats.total_requests += 1;
        stats.consecutive_failures = 0;
        if stats.state == CircuitState::HalfOpen {
            stats.state = CircuitState::Closed;
        }
    }

    pub fn record_failure(&self) {
        let mut stats = self.0.inner.lock().expect("health stats lock poisoned");
        stats.total_requests += 1;
        stats.failed_requests += 1;
        stats.consecutive_failures += 1;
        stats.last_failure = Some(Utc::now());

        let trip = match stats.state {
            CircuitState::Closed => stats.consecutive_failures >= TRIP_THRESHOLD,
            // A failed trial re-opens the circuit with a fresh cooldown.
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };

        if trip {
            stats.state = CircuitState::Open;
            let shared = Arc::clone(&self.0);
            tokio::spawn(async move {
                tokio::time::sleep(COOLDOWN).await;
                let mut stats = shared.inner.lock().expect("health stats lock poisoned");
                if stats.state == CircuitState::Open {
                    stats.state = CircuitState::HalfOpen;
                }
            });
        }
    }

    /// False iff the circuit is open. HalfOpen admits trial requests; the
    /// first recorded result resolves the state.
    pub fn should_allow(&self) -> bool {
        let stats = self.0.inner.lock().expect("health stats lock poisoned");
        stats.state != CircuitState::Open
    }

    pub fn state(&self) -> CircuitState {
        self.0.inner.lock().expect("health stats lock poisoned").state
    }

    /// Percentage of successful requests; 100 for an idle service.
    pub fn health_score(&self) -> u64 {
        let stats = self.0.inner.lock().expect("health stats lock poisoned");
        if stats.total_requests == 0 {
            return 100;
        }
        (stats.total_requests - stats.failed_requests) * 100 / stats.total_requests
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let stats = self.0.inner.lock().expect("health stats lock poisoned");
        let health_score = if stats.total_requests == 0 {
            100
        } else {
            (stats.total_requests - stats.failed_requests) * 100 / stats.total_requests
        };
        HealthSnapshot {
            total_requests: stats.total_requests,
            failed_requests: stats.failed_requests,
            consecutive_failures: stats.consecutive_failures,
            last_failure: stats.last_failure,
            circuit_state: stats.state,
            health_score,
        }
    }
}

/// Process-wide map from service id to health stats. Entries are created on
/// first reference and never removed.
#[derive(Debug, Default)]
pub struct HealthRegistry {
    entries: DashMap<i64, ServiceHealth>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self, service_id: i64) -> ServiceHealth {
        self.entries
            .entry(service_id)
            .or_insert_with(ServiceHealth::new)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_circuit_trips_after_five_consecutive_failures() {
        let registry = HealthRegistry::new();
        let stats = registry.stats(1);

        for _ in 0..4 {
            stats.record_failure();
            assert!(stats.should_allow());
        }

        stats.record_failure();
        assert!(!stats.should_allow());
        assert_eq!(stats.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let registry = HealthRegistry::new();
        let stats = registry.stats(1);

        for _ in 0..4 {
            stats.record_failure();
        }
        stats.record_success();
        for _ in 0..4 {
            stats.record_failure();
        }

        assert!(stats.should_allow());
        assert_eq!(stats.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_half_opens_after_cooldown() {
        let registry = HealthRegistry::new();
        let stats = registry.stats(1);

        for _ in 0..5 {
            stats.record_failure();
        }
        assert!(!stats.should_allow());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(stats.should_allow());
        assert_eq!(stats.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_success_closes_circuit() {
        let registry = HealthRegistry::new();
        let stats = registry.stats(1);

        for _ in 0..5 {
            stats.record_failure();
        }
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(stats.state(), CircuitState::HalfOpen);

        stats.record_success();
        assert_eq!(stats.state(), CircuitState::Closed);
        assert!(stats.should_allow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_failure_reopens_with_fresh_cooldown() {
        let registry = HealthRegistry::new();
        let stats = registry.stats(1);

        for _ in 0..5 {
            stats.record_failure();
        }
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(stats.state(), CircuitState::HalfOpen);

        stats.record_failure();
        assert_eq!(stats.state(), CircuitState::Open);
        assert!(!stats.should_allow());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(stats.state(), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_health_score() {
        let registry = HealthRegistry::new();
        let stats = registry.stats(7);
        assert_eq!(stats.health_score(), 100);

        stats.record_success();
        stats.record_success();
        stats.record_success();
        stats.record_failure();
        assert_eq!(stats.health_score(), 75);
    }

    #[tokio::test]
    async fn test_registry_returns_same_entry() {
        let registry = HealthRegistry::new();
        let a = registry.stats(42);
        a.record_failure();

        let b = registry.stats(42);
        assert_eq!(b.snapshot().failed_requests, 1);
    }
}
