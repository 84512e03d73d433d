//! Route-scoped circuit breakers backing the optional `circuit-breaker`
//! middleware. These run in parallel with the service-scoped breakers in
//! [`super::health`]: both carry the same 5-failure / 30 s parameters but
//! share no state.

use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const FAILURE_THRESHOLD: u32 = 5;
const RESET_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct BreakerInner {
    failures: u32,
    last_failure: Option<Instant>,
}

#[derive(Debug, Default)]
pub struct RouteBreaker {
    inner: Mutex<BreakerInner>,
}

impl RouteBreaker {
    /// False while the breaker holds at least the threshold of failures and
    /// the most recent one is within the reset window.
    pub fn allow(&self) -> bool {
        let inner = self.inner.lock().expect("route breaker lock poisoned");
        match inner.last_failure {
            Some(at) if inner.failures >= FAILURE_THRESHOLD => at.elapsed() >= RESET_TIMEOUT,
            _ => true,
        }
    }

    pub fn record(&self, success: bool) {
        let mut inner = self.inner.lock().expect("route breaker lock poisoned");
        if success {
            inner.failures = 0;
        } else {
            inner.failures += 1;
            inner.last_failure = Some(Instant::now());
        }
    }
}

/// Lazily-populated store of route breakers keyed by route tag.
#[derive(Debug, Default)]
pub struct RouteBreakerStore {
    breakers: DashMap<String, Arc<RouteBreaker>>,
}

impl RouteBreakerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn breaker(&self, tag: &str) -> Arc<RouteBreaker> {
        self.breakers
            .entry(tag.to_string())
            .or_default()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breaker_opens_at_threshold() {
        let breaker = RouteBreaker::default();
        for _ in 0..4 {
            breaker.record(false);
            assert!(breaker.allow());
        }
        breaker.record(false);
        assert!(!breaker.allow());
    }

    #[test]
    fn test_success_resets_failures() {
        let breaker = RouteBreaker::default();
        for _ in 0..4 {
            breaker.record(false);
        }
        breaker.record(true);
        breaker.record(false);
        assert!(breaker.allow());
    }

    #[test]
    fn test_store_reuses_breaker_per_tag() {
        let store = RouteBreakerStore::new();
        for _ in 0..5 {
            store.breaker("auth-service").record(false);
        }
        assert!(!store.breaker("auth-service").allow());
        assert!(store.breaker("payment-service").allow());
    }
}
