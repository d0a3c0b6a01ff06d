//! Circuit Breaker for failure handling.
//!
//! Prevents cascade failures by temporarily rejecting calls to an upstream
//! dependency after too many consecutive failures. One breaker is created
//! per logical dependency; breakers are fully independent of each other.

use std::collections::VecDeque;
use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, ErrorCode, Result};

/// How many state transitions are kept in the breaker's history.
const TRANSITION_HISTORY: usize = 10;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - calls allowed
    Closed,
    /// Too many failures - calls rejected
    Open,
    /// Testing if the dependency recovered - limited probe calls allowed
    HalfOpen,
}

/// Configuration for a circuit breaker.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures in closed state before the breaker opens
    pub failure_threshold: u32,
    /// How long to wait after the last failure before probing again
    pub recovery_timeout: Duration,
    /// Probe budget while half-open; also the number of consecutive
    /// successes required to close
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
        }
    }
}

/// Mutable breaker state; everything lives under one mutex.
#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// Consecutive failure count (closed state)
    failure_count: u32,
    /// Consecutive success count (meaningful only while half-open)
    success_count: u32,
    /// Probe admissions since entering half-open
    half_open_admissions: u32,
    /// When the last failure was observed
    last_failure_at: Option<Instant>,
    total_calls: u64,
    successful_calls: u64,
    failed_calls: u64,
    rejected_calls: u64,
    /// Bounded history of state transitions
    transitions: VecDeque<(DateTime<Utc>, CircuitState)>,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            half_open_admissions: 0,
            last_failure_at: None,
            total_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            rejected_calls: 0,
            transitions: VecDeque::with_capacity(TRANSITION_HISTORY),
        }
    }

    fn transition_to(&mut self, state: CircuitState) {
        self.state = state;
        if self.transitions.len() == TRANSITION_HISTORY {
            self.transitions.pop_front();
        }
        self.transitions.push_back((Utc::now(), state));
    }
}

/// Circuit breaker for failure detection and recovery.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker for a named dependency.
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    /// Create with the default configuration.
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, BreakerConfig::default())
    }

    /// Get the breaker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute a call under breaker protection.
    ///
    /// Admits or rejects based on current state, then routes the observed
    /// outcome back into the state machine. On rejection the distinguished
    /// [`ErrorCode::CircuitOpen`] error is returned without invoking the
    /// call; on failure the call's own error propagates unchanged after
    /// bookkeeping.
    pub async fn execute<F, Fut, T>(&self, call: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.try_acquire()?;

        match call().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }

    /// Admission control: pass, or reject with a `CircuitOpen` error.
    ///
    /// The first admission attempt after `recovery_timeout` has elapsed since
    /// the last failure flips an open breaker to half-open.
    pub fn try_acquire(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.total_calls += 1;

        if inner.state == CircuitState::Open {
            let recovered = inner
                .last_failure_at
                .map(|at| at.elapsed() >= self.config.recovery_timeout)
                .unwrap_or(true);

            if recovered {
                inner.transition_to(CircuitState::HalfOpen);
                inner.half_open_admissions = 0;
                inner.success_count = 0;
                tracing::info!(breaker = %self.name, "Circuit breaker transitioning to half-open");
            } else {
                inner.rejected_calls += 1;
                return Err(self.open_error());
            }
        }

        if inner.state == CircuitState::HalfOpen {
            if inner.half_open_admissions >= self.config.half_open_max_calls {
                inner.rejected_calls += 1;
                return Err(CoreError::new(
                    ErrorCode::CircuitOpen,
                    format!("Circuit '{}' is half-open and at its probe limit", self.name),
                ));
            }
            inner.half_open_admissions += 1;
        }

        Ok(())
    }

    /// Record a successful execution.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.successful_calls += 1;

        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.half_open_max_calls {
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.transition_to(CircuitState::Closed);
                    tracing::info!(
                        breaker = %self.name,
                        "Circuit breaker closed after successful recovery"
                    );
                }
            }
            CircuitState::Closed => {
                // Each success walks the consecutive-failure count back
                // toward zero rather than clearing it outright.
                inner.failure_count = inner.failure_count.saturating_sub(1);
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed execution.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failed_calls += 1;
        inner.failure_count += 1;
        inner.last_failure_at = Some(Instant::now());
        inner.success_count = 0;

        match inner.state {
            CircuitState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    inner.transition_to(CircuitState::Open);
                    tracing::warn!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        threshold = self.config.failure_threshold,
                        "Circuit breaker opened due to consecutive failures"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.transition_to(CircuitState::Open);
                tracing::warn!(
                    breaker = %self.name,
                    "Circuit breaker re-opened after failed recovery attempt"
                );
            }
            CircuitState::Open => {}
        }
    }

    /// Get current state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Get metrics.
    pub fn metrics(&self) -> BreakerMetrics {
        let inner = self.inner.lock();
        BreakerMetrics {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            failure_threshold: self.config.failure_threshold,
            recovery_timeout_secs: self.config.recovery_timeout.as_secs_f64(),
            total_calls: inner.total_calls,
            successful_calls: inner.successful_calls,
            failed_calls: inner.failed_calls,
            rejected_calls: inner.rejected_calls,
            state_changes: inner.transitions.iter().cloned().collect(),
        }
    }

    /// Force reset the circuit breaker to closed.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.half_open_admissions = 0;
        inner.transition_to(CircuitState::Closed);
        tracing::info!(breaker = %self.name, "Circuit breaker manually reset");
    }

    fn open_error(&self) -> CoreError {
        CoreError::new(
            ErrorCode::CircuitOpen,
            format!("Circuit '{}' is open", self.name),
        )
    }
}

/// Metrics snapshot for a circuit breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerMetrics {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub failure_threshold: u32,
    pub recovery_timeout_secs: f64,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    /// Last 10 state transitions with timestamps
    pub state_changes: Vec<(DateTime<Utc>, CircuitState)>,
}
