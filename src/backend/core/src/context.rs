//! The service context: one explicit composition root.
//!
//! Constructed once at process start and passed by `Arc` to whatever needs
//! it — there is no process-wide singleton. The context owns:
//!
//! - the tiered cache,
//! - one circuit breaker + retry manager pair per upstream dependency
//!   (`metadata`, `file_ops`, `ai`), tuned to how each one fails,
//! - the adaptive batch processor,
//! - the background job manager,
//! - the storage API client.
//!
//! Callers compose the layers explicitly: a cached read derives its key,
//! consults the cache, and on a miss runs the retry-wrapped client call
//! before storing the result. No decorator magic; every call site reads in
//! the order it executes.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::info;

use crate::batch::{AdaptiveBatchProcessor, BatchOutcome, BatchOverrides, ProgressFn};
use crate::cache::{KeyBuilder, TieredCache};
use crate::client::{ExtractionSpec, StorageClient, TokenProvider};
use crate::config::CoreConfig;
use crate::error::{CoreError, ErrorCode, Result};
use crate::jobs::{JobId, JobManager};
use crate::resilience::{BreakerConfig, CircuitBreaker, RetryConfig, RetryManager};

/// A breaker/retry pair bound to one upstream dependency.
struct Dependency {
    breaker: Arc<CircuitBreaker>,
    retry: RetryManager,
}

impl Dependency {
    fn new(
        name: &'static str,
        failure_threshold: u32,
        recovery_timeout: Duration,
        max_retries: u32,
        base_delay: Duration,
        max_delay: Duration,
    ) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(
            name,
            BreakerConfig {
                failure_threshold,
                recovery_timeout,
                half_open_max_calls: 3,
            },
        ));
        let retry = RetryManager::new(
            RetryConfig::transient()
                .with_max_retries(max_retries)
                .with_delays(base_delay, max_delay),
        )
        .with_circuit_breaker(Arc::clone(&breaker));

        Self { breaker, retry }
    }
}

/// Composition root for the dashboard backend.
pub struct ServiceContext {
    cache: Arc<TieredCache>,
    client: Arc<StorageClient>,
    metadata: Dependency,
    file_ops: Dependency,
    ai: Dependency,
    batch: AdaptiveBatchProcessor,
    jobs: JobManager,
}

impl ServiceContext {
    /// Build the context and start its background tasks (cache sweeper, job
    /// workers, job reaper). Must be called from within a tokio runtime.
    pub fn new(config: CoreConfig, auth: Arc<dyn TokenProvider>) -> Result<Arc<Self>> {
        let cache = Arc::new(TieredCache::new(config.cache.clone())?);
        cache.start_sweeper();

        let client = Arc::new(StorageClient::new(config.upstream.clone(), auth)?);

        // Thresholds and delays differ per dependency: metadata calls are
        // cheap and frequent, file operations moderately so, AI extraction
        // slow and expensive to hammer.
        let metadata = Dependency::new(
            "metadata",
            5,
            Duration::from_secs(30),
            3,
            Duration::from_secs(1),
            Duration::from_secs(30),
        );
        let file_ops = Dependency::new(
            "file_ops",
            3,
            Duration::from_secs(60),
            3,
            Duration::from_secs(2),
            Duration::from_secs(60),
        );
        let ai = Dependency::new(
            "ai",
            2,
            Duration::from_secs(120),
            2,
            Duration::from_secs(5),
            Duration::from_secs(120),
        );

        let batch = AdaptiveBatchProcessor::new(config.batch.clone());
        let jobs = JobManager::new(config.jobs.clone());

        info!("Service context initialized");

        Ok(Arc::new(Self {
            cache,
            client,
            metadata,
            file_ops,
            ai,
            batch,
            jobs,
        }))
    }

    /// The background job manager.
    pub fn jobs(&self) -> &JobManager {
        &self.jobs
    }

    /// The tiered cache.
    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    /// The raw API client (uncached, unretried).
    pub fn client(&self) -> &Arc<StorageClient> {
        &self.client
    }

    /// Look up a dependency's circuit breaker by name.
    pub fn breaker(&self, name: &str) -> Option<&Arc<CircuitBreaker>> {
        match name {
            "metadata" => Some(&self.metadata.breaker),
            "file_ops" => Some(&self.file_ops.breaker),
            "ai" => Some(&self.ai.breaker),
            _ => None,
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Cached reads
    // ───────────────────────────────────────────────────────────────────────────

    /// Get file information, cached.
    pub async fn file_info(
        &self,
        file_id: &str,
        fields: Option<&[&str]>,
        force_refresh: bool,
    ) -> Result<Value> {
        let key = KeyBuilder::new("file_info")
            .arg(file_id)
            .kwarg("fields", fields)
            .build();

        self.cached(&key, force_refresh, || {
            self.file_ops
                .retry
                .execute(|| self.client.get_file_info(file_id, fields))
        })
        .await
    }

    /// List folder items, cached.
    pub async fn folder_items(
        &self,
        folder_id: &str,
        limit: u32,
        offset: u32,
        fields: Option<&[&str]>,
        force_refresh: bool,
    ) -> Result<Value> {
        let key = KeyBuilder::new("folder_items")
            .arg(folder_id)
            .kwarg("limit", limit)
            .kwarg("offset", offset)
            .kwarg("fields", fields)
            .build();

        self.cached(&key, force_refresh, || {
            self.file_ops.retry.execute(|| {
                self.client
                    .get_folder_items(folder_id, limit, offset, fields)
            })
        })
        .await
    }

    /// List metadata templates, cached.
    pub async fn metadata_templates(&self, scope: &str, force_refresh: bool) -> Result<Value> {
        let key = KeyBuilder::new("metadata_templates").arg(scope).build();

        self.cached(&key, force_refresh, || {
            self.metadata
                .retry
                .execute(|| self.client.get_metadata_templates(scope))
        })
        .await
    }

    /// Get one metadata template, cached.
    pub async fn metadata_template(
        &self,
        scope: &str,
        template_key: &str,
        force_refresh: bool,
    ) -> Result<Value> {
        let key = KeyBuilder::new("metadata_template")
            .arg(scope)
            .arg(template_key)
            .build();

        self.cached(&key, force_refresh, || {
            self.metadata
                .retry
                .execute(|| self.client.get_metadata_template(scope, template_key))
        })
        .await
    }

    /// Cache-then-call composition shared by the cached reads.
    async fn cached<F, Fut>(&self, key: &str, force_refresh: bool, fetch: F) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Value>>,
    {
        if force_refresh {
            self.cache.invalidate(key).await;
        } else if let Some(value) = self.cache.get(key).await {
            return Ok(value);
        }

        let value = fetch().await?;
        self.cache.set(key, value.clone()).await;
        Ok(value)
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Uncached writes
    // ───────────────────────────────────────────────────────────────────────────

    /// Extract metadata from one file via the AI endpoint.
    pub async fn extract_metadata(&self, file_id: &str, spec: &ExtractionSpec) -> Result<Value> {
        self.ai
            .retry
            .execute(|| self.client.extract_metadata(file_id, spec))
            .await
    }

    /// Apply metadata values to one file.
    pub async fn apply_metadata(
        &self,
        file_id: &str,
        values: &Value,
        scope: &str,
        template_key: &str,
    ) -> Result<Value> {
        self.metadata
            .retry
            .execute(|| {
                self.client
                    .apply_metadata(file_id, values, scope, template_key)
            })
            .await
    }

    /// Update existing metadata on one file.
    pub async fn update_metadata(
        &self,
        file_id: &str,
        operations: &[Value],
        scope: &str,
        template_key: &str,
    ) -> Result<Value> {
        self.metadata
            .retry
            .execute(|| {
                self.client
                    .update_metadata(file_id, operations, scope, template_key)
            })
            .await
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Batched operations
    // ───────────────────────────────────────────────────────────────────────────

    /// Extract metadata for many files through the adaptive batch processor.
    /// Outcomes keep input order; one file's failure never masks another's.
    pub async fn batch_extract_metadata(
        &self,
        file_ids: Vec<String>,
        spec: ExtractionSpec,
        overrides: BatchOverrides,
        progress: Option<ProgressFn>,
    ) -> Vec<BatchOutcome<String, Value>> {
        let spec = Arc::new(spec);
        self.batch
            .process_batch(
                file_ids,
                |file_id: String| {
                    let spec = Arc::clone(&spec);
                    async move { self.extract_metadata(&file_id, &spec).await }
                },
                overrides,
                progress,
            )
            .await
    }

    /// Apply metadata to many files through the adaptive batch processor.
    pub async fn batch_apply_metadata(
        &self,
        items: Vec<(String, Value)>,
        scope: &str,
        template_key: &str,
        overrides: BatchOverrides,
        progress: Option<ProgressFn>,
    ) -> Vec<BatchOutcome<(String, Value), Value>> {
        self.batch
            .process_batch(
                items,
                |(file_id, values): (String, Value)| async move {
                    self.apply_metadata(&file_id, &values, scope, template_key)
                        .await
                },
                overrides,
                progress,
            )
            .await
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Background operations
    // ───────────────────────────────────────────────────────────────────────────

    /// Run a batched extraction as a background job. Chunk progress feeds
    /// the job's progress; the job checks its cancellation token before
    /// each file and stops taking new work once cancelled.
    pub fn background_batch_extract_metadata(
        self: &Arc<Self>,
        file_ids: Vec<String>,
        spec: ExtractionSpec,
        overrides: BatchOverrides,
    ) -> JobId {
        let context = Arc::clone(self);

        self.jobs.enqueue("Extract Metadata", move |job| async move {
            let progress: ProgressFn = {
                let job = job.clone();
                Arc::new(move |done, total, fraction| {
                    job.report_progress(fraction, Some(&format!("Processed {done}/{total} files")));
                })
            };

            let spec = Arc::new(spec);
            let outcomes = context
                .batch
                .process_batch(
                    file_ids,
                    |file_id: String| {
                        let spec = Arc::clone(&spec);
                        let job = job.clone();
                        let context = &context;
                        async move {
                            if job.is_cancelled() {
                                return Err(CoreError::new(
                                    ErrorCode::JobFailed,
                                    "Job cancelled before item started",
                                ));
                            }
                            context.extract_metadata(&file_id, &spec).await
                        }
                    },
                    overrides,
                    Some(progress),
                )
                .await;

            Ok(outcomes_to_value(&outcomes))
        })
    }

    /// Run a batched metadata apply as a background job.
    pub fn background_batch_apply_metadata(
        self: &Arc<Self>,
        items: Vec<(String, Value)>,
        scope: String,
        template_key: String,
        overrides: BatchOverrides,
    ) -> JobId {
        let context = Arc::clone(self);

        self.jobs.enqueue("Apply Metadata", move |job| async move {
            let progress: ProgressFn = {
                let job = job.clone();
                Arc::new(move |done, total, fraction| {
                    job.report_progress(
                        fraction,
                        Some(&format!("Applied metadata to {done}/{total} files")),
                    );
                })
            };

            let outcomes = context
                .batch
                .process_batch(
                    items,
                    |(file_id, values): (String, Value)| {
                        let job = job.clone();
                        let context = &context;
                        let scope = &scope;
                        let template_key = &template_key;
                        async move {
                            if job.is_cancelled() {
                                return Err(CoreError::new(
                                    ErrorCode::JobFailed,
                                    "Job cancelled before item started",
                                ));
                            }
                            context
                                .apply_metadata(&file_id, &values, scope, template_key)
                                .await
                        }
                    },
                    overrides,
                    Some(progress),
                )
                .await;

            Ok(outcomes_to_value(&outcomes))
        })
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Metrics and shutdown
    // ───────────────────────────────────────────────────────────────────────────

    /// Combined metrics snapshot across the client, batch processor,
    /// breakers, and retry managers.
    pub fn metrics(&self) -> Value {
        json!({
            "api": to_value(self.client.metrics()),
            "batch": to_value(self.batch.metrics()),
            "cache": to_value(self.cache.stats()),
            "circuit_breakers": {
                "metadata": to_value(self.metadata.breaker.metrics()),
                "file_ops": to_value(self.file_ops.breaker.metrics()),
                "ai": to_value(self.ai.breaker.metrics()),
            },
            "retry_managers": {
                "metadata": to_value(self.metadata.retry.metrics()),
                "file_ops": to_value(self.file_ops.retry.metrics()),
                "ai": to_value(self.ai.retry.metrics()),
            },
        })
    }

    /// Stop the cache sweeper and the job manager.
    pub async fn shutdown(&self) {
        self.cache.shutdown();
        self.jobs.shutdown().await;
        info!("Service context shut down");
    }
}

fn to_value<T: serde::Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Flatten batch outcomes into a job result payload: one element per item,
/// carrying either its result or its error message.
fn outcomes_to_value<T, U>(outcomes: &[BatchOutcome<T, U>]) -> Value
where
    T: serde::Serialize,
    U: serde::Serialize,
{
    Value::Array(
        outcomes
            .iter()
            .map(|outcome| match &outcome.outcome {
                Ok(result) => json!({"item": to_value(&outcome.item), "result": to_value(result)}),
                Err(err) => json!({"item": to_value(&outcome.item), "error": err.user_message()}),
            })
            .collect(),
    )
}
