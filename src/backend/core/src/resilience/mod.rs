//! Resilience primitives for calling a slow, rate-limited upstream API.
//!
//! Two layers compose here, always explicitly at the call site:
//!
//! - [`CircuitBreaker`] gates admission per upstream dependency, rejecting
//!   calls outright once the dependency looks down.
//! - [`RetryManager`] wraps a call with exponential backoff and jitter,
//!   optionally delegating admission to a breaker. A breaker rejection is
//!   never retried; it propagates immediately so callers can distinguish
//!   "upstream is down, don't bother" from "transient failure, try again".

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{
    BreakerConfig, BreakerMetrics, CircuitBreaker, CircuitState,
};
pub use retry::{RetryConfig, RetryManager, RetryMetrics};
