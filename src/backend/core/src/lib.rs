//! # Satchel Core
//!
//! Resilience and background-processing core for the Satchel document
//! intelligence dashboard.
//!
//! ## Architecture
//!
//! - **Resilience**: per-dependency circuit breakers and retry with
//!   exponential backoff + jitter
//! - **Cache**: tiered caching (memory → file → optional Redis) with
//!   per-tier TTLs, LRU eviction, and a self-healing file tier
//! - **Batch**: chunked bounded-concurrency fan-out with ordered outcomes
//!   and an adaptive worker controller
//! - **Jobs**: in-memory background job table with a fixed worker pool,
//!   cooperative cancellation, and TTL reaping
//! - **Client**: HTTP client for the document-storage provider's REST API
//!   with uniform error classification
//! - **Context**: the explicit composition root wiring all of the above

pub mod batch;
pub mod cache;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod jobs;
pub mod observability;
pub mod resilience;

mod util;

pub use error::{CoreError, ErrorCode, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::batch::{
        AdaptiveBatchProcessor, BatchOutcome, BatchOverrides, BatchProcessor, ProgressFn,
    };
    pub use crate::cache::{KeyBuilder, TieredCache, TierTtls};
    pub use crate::client::{
        ExtractionSpec, StaticTokenProvider, StorageClient, TokenProvider,
    };
    pub use crate::config::CoreConfig;
    pub use crate::context::ServiceContext;
    pub use crate::error::{CoreError, ErrorCode, Result};
    pub use crate::jobs::{JobContext, JobId, JobManager, JobSnapshot, JobStatus};
    pub use crate::resilience::{
        BreakerConfig, CircuitBreaker, CircuitState, RetryConfig, RetryManager,
    };
}
