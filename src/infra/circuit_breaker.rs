//! Circuit breaker for the key-management backend
//!
//! When the signing backend is down, callers should see a fast
//! `Unavailable` instead of stacking timeouts.
//!
//! # States
//!
//! - **Closed**: normal operation, requests pass through
//! - **Open**: backend unavailable, requests fail fast
//! - **HalfOpen**: testing if the backend recovered

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Configuration for the circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of failures before opening the circuit
    pub failure_threshold: u32,
    /// Number of successes in half-open state to close the circuit
    pub success_threshold: u32,
    /// Duration to wait before transitioning from open to half-open
    pub open_timeout: Duration,
    /// Duration window for counting failures
    pub failure_window: Duration,
    /// Maximum requests allowed through in half-open state
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            open_timeout: Duration::from_secs(30),
            failure_window: Duration::from_secs(60),
            half_open_max_requests: 3,
        }
    }
}

/// Circuit breaker statistics
#[derive(Debug, Default)]
pub struct CircuitBreakerStats {
    pub successes: AtomicU64,
    pub failures: AtomicU64,
    pub rejected: AtomicU64,
    pub times_opened: AtomicU64,
    pub times_closed: AtomicU64,
}

struct InternalState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
    opened_at: Option<Instant>,
    half_open_requests: u32,
}

impl Default for InternalState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
            opened_at: None,
            half_open_requests: 0,
        }
    }
}

/// Circuit breaker protecting calls to an external service
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: RwLock<InternalState>,
    stats: CircuitBreakerStats,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with default configuration
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, CircuitBreakerConfig::default())
    }

    /// Create with custom configuration
    pub fn with_config(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: RwLock::new(InternalState::default()),
            stats: CircuitBreakerStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get current state, applying any pending open -> half-open transition
    pub async fn state(&self) -> CircuitState {
        let mut state = self.state.write().await;
        self.maybe_transition(&mut state);
        state.state
    }

    /// Check if the circuit allows a request through
    pub async fn is_allowed(&self) -> bool {
        let mut state = self.state.write().await;
        self.maybe_transition(&mut state);

        match state.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                false
            }
            CircuitState::HalfOpen => {
                if state.half_open_requests < self.config.half_open_max_requests {
                    state.half_open_requests += 1;
                    true
                } else {
                    self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                    false
                }
            }
        }
    }

    /// Record a successful call
    pub async fn record_success(&self) {
        self.stats.successes.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.write().await;
        match state.state {
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    self.transition_to_closed(&mut state);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call
    pub async fn record_failure(&self) {
        self.stats.failures.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.write().await;

        match state.state {
            CircuitState::Closed => {
                // Failure counts reset once the window has passed
                if let Some(last_failure) = state.last_failure_time {
                    if last_failure.elapsed() > self.config.failure_window {
                        state.failure_count = 0;
                    }
                }

                state.last_failure_time = Some(Instant::now());
                state.failure_count += 1;
                if state.failure_count >= self.config.failure_threshold {
                    self.transition_to_open(&mut state);
                }
            }
            CircuitState::HalfOpen => {
                // Any failure in half-open state re-opens the circuit
                state.last_failure_time = Some(Instant::now());
                self.transition_to_open(&mut state);
            }
            CircuitState::Open => {
                state.last_failure_time = Some(Instant::now());
            }
        }
    }

    fn maybe_transition(&self, state: &mut InternalState) {
        if state.state == CircuitState::Open {
            if let Some(opened_at) = state.opened_at {
                if opened_at.elapsed() >= self.config.open_timeout {
                    state.state = CircuitState::HalfOpen;
                    state.half_open_requests = 0;
                    state.success_count = 0;
                    tracing::info!(
                        breaker = %self.name,
                        "Circuit breaker transitioning to half-open"
                    );
                }
            }
        }
    }

    fn transition_to_open(&self, state: &mut InternalState) {
        state.state = CircuitState::Open;
        state.opened_at = Some(Instant::now());
        state.failure_count = 0;
        state.success_count = 0;
        self.stats.times_opened.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(breaker = %self.name, "Circuit breaker opened");
    }

    fn transition_to_closed(&self, state: &mut InternalState) {
        state.state = CircuitState::Closed;
        state.opened_at = None;
        state.failure_count = 0;
        state.success_count = 0;
        state.half_open_requests = 0;
        self.stats.times_closed.fetch_add(1, Ordering::Relaxed);
        tracing::info!(breaker = %self.name, "Circuit breaker closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            open_timeout: Duration::from_millis(50),
            failure_window: Duration::from_secs(60),
            half_open_max_requests: 2,
        }
    }

    #[tokio::test]
    async fn test_opens_after_failure_threshold() {
        let breaker = CircuitBreaker::with_config("signing-backend", fast_config());

        assert!(breaker.is_allowed().await);
        for _ in 0..3 {
            breaker.record_failure().await;
        }

        assert_eq!(breaker.state().await, CircuitState::Open);
        assert!(!breaker.is_allowed().await);
    }

    #[tokio::test]
    async fn test_half_open_after_timeout_then_closes() {
        let breaker = CircuitBreaker::with_config("signing-backend", fast_config());

        for _ in 0..3 {
            breaker.record_failure().await;
        }
        assert_eq!(breaker.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
        assert!(breaker.is_allowed().await);

        breaker.record_success().await;
        breaker.record_success().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::with_config("signing-backend", fast_config());

        for _ in 0..3 {
            breaker.record_failure().await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);

        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::with_config("signing-backend", fast_config());

        breaker.record_failure().await;
        breaker.record_failure().await;
        breaker.record_success().await;
        breaker.record_failure().await;
        breaker.record_failure().await;

        // Still closed: the success reset the count
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }
}
