//! Traffic policies for gateway calls
//!
//! The default policy performs a single resolution and a single attempt.
//! Retries and circuit breaking are opt-in.

use rand::Rng;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::GatewayError;

/// Retry policy for failed calls
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Fraction of each backoff that is randomized away (0.0 - 1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            jitter: 0.5,
        }
    }
}

impl RetryPolicy {
    /// Only discovery and transport failures are retried; an answer from the
    /// downstream, good or bad, is final.
    pub fn should_retry(&self, error: &GatewayError) -> bool {
        error.is_retryable()
    }

    /// Backoff before retry number `retry_count` (0-based), with jitter.
    pub fn backoff_duration<R: Rng + ?Sized>(&self, retry_count: u32, rng: &mut R) -> Duration {
        let base = self.initial_backoff.as_millis() as u64;
        let exponential = 2u64.saturating_pow(retry_count);
        let backoff_ms = base
            .saturating_mul(exponential)
            .min(self.max_backoff.as_millis() as u64);

        let jitter = self.jitter.clamp(0.0, 1.0);
        let spread = (backoff_ms as f64 * jitter) as u64;
        let reduction = if spread > 0 { rng.gen_range(0..=spread) } else { 0 };
        Duration::from_millis(backoff_ms - reduction)
    }
}

/// Circuit breaker states
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed - calls flow normally
    Closed,
    /// Circuit is open - calls are rejected
    Open,
    /// Circuit is half-open - trial calls are allowed
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Consecutive upstream errors before opening the circuit
    pub failure_threshold: u32,
    /// Successes in half-open state before closing the circuit
    pub success_threshold: u32,
    /// How long the circuit stays open before allowing trial calls
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_duration: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
}

/// Circuit breaker guarding one downstream service
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerState>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            }),
            config,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Record a call that got a usable answer from the downstream
    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    debug!("Circuit breaker: closing circuit after {} successes", inner.success_count);
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.opened_at = None;
                }
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Record an upstream error
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    debug!("Circuit breaker: opening circuit after {} failures", inner.failure_count);
                    inner.state = CircuitState::Open;
                    inner.success_count = 0;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                debug!("Circuit breaker: reopening circuit after failure during half-open");
                inner.state = CircuitState::Open;
                inner.failure_count = 0;
                inner.success_count = 0;
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::Open => {}
        }
    }

    /// Record a call that ended without an answer from the downstream, such
    /// as a transport failure. Only a half-open circuit reacts: the trial
    /// failed, so it reopens.
    pub fn record_inconclusive(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            debug!("Circuit breaker: reopening circuit after inconclusive trial call");
            inner.state = CircuitState::Open;
            inner.failure_count = 0;
            inner.success_count = 0;
            inner.opened_at = Some(Instant::now());
        }
    }

    /// Whether a call may proceed. An open circuit turns half-open once
    /// `open_duration` has elapsed.
    pub fn can_attempt(&self) -> bool {
        let mut inner = self.lock();
        if inner.state == CircuitState::Open {
            let elapsed = inner
                .opened_at
                .map(|at| at.elapsed() >= self.config.open_duration)
                .unwrap_or(true);
            if elapsed {
                debug!("Circuit breaker: transitioning to half-open");
                inner.state = CircuitState::HalfOpen;
                inner.success_count = 0;
            }
        }
        inner.state != CircuitState::Open
    }
}

/// Complete traffic policy configuration
#[derive(Clone, Debug)]
pub struct TrafficPolicy {
    /// Bound on a single attempt, on top of the caller's context
    pub request_timeout: Option<Duration>,
    pub retry: RetryPolicy,
    /// Circuit breaking is off unless configured
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl Default for TrafficPolicy {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(30)),
            retry: RetryPolicy::default(),
            circuit_breaker: None,
        }
    }
}
