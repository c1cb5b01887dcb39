//! Circuit breaker for calls to external services (model providers and
//! internal APIs).
//!
//! Grounded on the original `circuit_breaker.py`: a three-state
//! (closed/open/half-open) gate per named resource, with a registry of
//! per-name overrides for the failure threshold and recovery timeout.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lucy_domain::Error;
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_max_calls: u32,
    pub minimum_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 2,
            minimum_calls: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub total_calls: u32,
    pub opened_at: Option<Instant>,
}

struct Inner {
    state: BreakerState,
    failure_count: u32,
    total_calls: u32,
    half_open_in_flight: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
}

/// A single named circuit breaker.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                total_calls: 0,
                half_open_in_flight: 0,
                half_open_successes: 0,
                opened_at: None,
            }),
        }
    }

    /// Run `f` through the breaker: checks gate state before calling,
    /// records success/failure after. Returns `Error::CircuitOpen` if
    /// the breaker is open and the recovery timeout hasn't elapsed.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        self.before_call()?;
        let result = f().await;
        match &result {
            Ok(_) => self.on_success(),
            Err(_) => self.on_failure(),
        }
        result
    }

    fn before_call(&self) -> Result<(), Error> {
        let mut state = self.inner.lock();
        match state.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let opened_at = state.opened_at.unwrap_or_else(Instant::now);
                let elapsed = opened_at.elapsed();
                if elapsed >= self.config.recovery_timeout {
                    state.state = BreakerState::HalfOpen;
                    state.half_open_in_flight = 0;
                    state.half_open_successes = 0;
                    Ok(())
                } else {
                    let retry_after = self.config.recovery_timeout - elapsed;
                    Err(Error::CircuitOpen {
                        name: self.name.clone(),
                        retry_after_secs: retry_after.as_secs(),
                    })
                }
            }
            BreakerState::HalfOpen => {
                if state.half_open_in_flight >= self.config.half_open_max_calls {
                    Err(Error::CircuitOpen {
                        name: self.name.clone(),
                        retry_after_secs: 1,
                    })
                } else {
                    state.half_open_in_flight += 1;
                    Ok(())
                }
            }
        }
    }

    fn on_success(&self) {
        let mut state = self.inner.lock();
        state.total_calls += 1;
        match state.state {
            BreakerState::Closed => {
                state.failure_count = 0;
            }
            BreakerState::HalfOpen => {
                state.half_open_successes += 1;
                // One successful probe is enough to close.
                state.state = BreakerState::Closed;
                state.failure_count = 0;
                state.total_calls = 0;
                state.opened_at = None;
            }
            BreakerState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut state = self.inner.lock();
        state.total_calls += 1;
        match state.state {
            BreakerState::Closed => {
                state.failure_count += 1;
                if state.failure_count >= self.config.failure_threshold
                    && state.total_calls >= self.config.minimum_calls
                {
                    state.state = BreakerState::Open;
                    state.opened_at = Some(Instant::now());
                }
            }
            BreakerState::HalfOpen => {
                state.state = BreakerState::Open;
                state.opened_at = Some(Instant::now());
                state.half_open_in_flight = 0;
                state.half_open_successes = 0;
            }
            BreakerState::Open => {}
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.inner.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: state.state,
            failure_count: state.failure_count,
            total_calls: state.total_calls,
            opened_at: state.opened_at,
        }
    }
}

/// Registry of circuit breakers, one per named resource, created
/// lazily on first use with per-name config overrides.
pub struct CircuitBreakerRegistry {
    default_config: BreakerConfig,
    overrides: HashMap<String, BreakerConfig>,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default(), HashMap::new())
    }
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: BreakerConfig, overrides: HashMap<String, BreakerConfig>) -> Self {
        Self {
            default_config,
            overrides,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        let mut guard = self.breakers.lock();
        if let Some(b) = guard.get(name) {
            return b.clone();
        }
        let config = self.overrides.get(name).copied().unwrap_or(self.default_config);
        let breaker = Arc::new(CircuitBreaker::new(name, config));
        guard.insert(name.to_owned(), breaker.clone());
        breaker
    }

    pub fn all_snapshots(&self) -> Vec<BreakerSnapshot> {
        self.breakers
            .lock()
            .values()
            .map(|b| b.snapshot())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_millis(20),
            half_open_max_calls: 2,
            minimum_calls: 2,
        }
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new("test", fast_config());
        for _ in 0..2 {
            let _ = breaker
                .call(|| async { Err::<(), Error>(Error::Timeout("x".into())) })
                .await;
        }
        assert_eq!(breaker.snapshot().state, BreakerState::Open);
    }

    #[tokio::test]
    async fn rejects_calls_while_open() {
        let breaker = CircuitBreaker::new("test", fast_config());
        for _ in 0..2 {
            let _ = breaker
                .call(|| async { Err::<(), Error>(Error::Timeout("x".into())) })
                .await;
        }
        let result = breaker.call(|| async { Ok::<(), Error>(()) }).await;
        assert!(matches!(result, Err(Error::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn transitions_to_half_open_after_timeout_then_closes_on_success() {
        let breaker = CircuitBreaker::new("test", fast_config());
        for _ in 0..2 {
            let _ = breaker
                .call(|| async { Err::<(), Error>(Error::Timeout("x".into())) })
                .await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        for _ in 0..2 {
            breaker.call(|| async { Ok::<(), Error>(()) }).await.unwrap();
        }
        assert_eq!(breaker.snapshot().state, BreakerState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("test", fast_config());
        for _ in 0..2 {
            let _ = breaker
                .call(|| async { Err::<(), Error>(Error::Timeout("x".into())) })
                .await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        let _ = breaker
            .call(|| async { Err::<(), Error>(Error::Timeout("x".into())) })
            .await;
        assert_eq!(breaker.snapshot().state, BreakerState::Open);
    }

    #[tokio::test]
    async fn below_minimum_calls_does_not_open() {
        let config = BreakerConfig {
            failure_threshold: 1,
            minimum_calls: 5,
            ..fast_config()
        };
        let breaker = CircuitBreaker::new("test", config);
        let _ = breaker
            .call(|| async { Err::<(), Error>(Error::Timeout("x".into())) })
            .await;
        assert_eq!(breaker.snapshot().state, BreakerState::Closed);
    }

    #[test]
    fn registry_reuses_breaker_per_name() {
        let registry = CircuitBreakerRegistry::default();
        let a = registry.get("anthropic");
        let b = registry.get("anthropic");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn registry_applies_named_override() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "flaky".to_string(),
            BreakerConfig {
                failure_threshold: 1,
                ..BreakerConfig::default()
            },
        );
        let registry = CircuitBreakerRegistry::new(BreakerConfig::default(), overrides);
        let breaker = registry.get("flaky");
        assert_eq!(breaker.config.failure_threshold, 1);
    }
}
