//! Batch processing with bounded concurrency, throttling, and monitoring.
//!
//! Items are split into consecutive chunks; chunks run strictly one after
//! another, while items *within* a chunk fan out across a bounded worker
//! pool. Outcomes are collected by index, so the i-th outcome always
//! corresponds to the i-th input item regardless of completion order, and a
//! failing item never aborts its siblings.
//!
//! [`AdaptiveBatchProcessor`] layers a simple additive-increase /
//! additive-decrease controller on top: sustained failure pressure (mean
//! success rate over the last ten batches below target) sheds one worker,
//! sustained health adds one back.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::info;

use crate::config::BatchSettings;
use crate::error::{CoreError, ErrorCode, Result};

/// How many batch records the adaptive controller looks back over.
const ADAPTATION_WINDOW: usize = 10;

/// Progress callback: `(items_processed, total_items, fraction)`.
pub type ProgressFn = Arc<dyn Fn(usize, usize, f64) + Send + Sync>;

// ═══════════════════════════════════════════════════════════════════════════════
// Batch Outcome
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of processing one item within a batch.
///
/// Exactly one of result/error is present, carried by the `Result`.
#[derive(Debug)]
pub struct BatchOutcome<T, U> {
    /// The original input item
    pub item: T,
    /// The item's result or its captured error
    pub outcome: Result<U>,
}

impl<T, U> BatchOutcome<T, U> {
    /// Whether this item succeeded.
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// The success value, if any.
    pub fn result(&self) -> Option<&U> {
        self.outcome.as_ref().ok()
    }

    /// The captured error, if any.
    pub fn error(&self) -> Option<&CoreError> {
        self.outcome.as_ref().err()
    }
}

/// Per-call overrides for [`BatchProcessor::process_batch`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOverrides {
    pub chunk_size: Option<usize>,
    pub worker_count: Option<usize>,
    pub timeout: Option<Duration>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Metrics
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, Clone)]
struct BatchStats {
    total_batches: u64,
    total_items: u64,
    successful_items: u64,
    failed_items: u64,
    total_time: Duration,
    last_batch_time: Duration,
    last_batch_size: usize,
    last_batch_success_rate: f64,
}

/// Metrics snapshot; rates are derived on read, not stored.
#[derive(Debug, Clone, Serialize)]
pub struct BatchMetrics {
    pub total_batches: u64,
    pub total_items: u64,
    pub successful_items: u64,
    pub failed_items: u64,
    pub total_time_secs: f64,
    pub last_batch_time_secs: f64,
    pub last_batch_size: usize,
    pub last_batch_success_rate: f64,
    pub overall_success_rate: f64,
    pub avg_batch_time_secs: f64,
    pub avg_batch_size: f64,
    pub items_per_second: f64,
}

impl BatchStats {
    fn snapshot(&self) -> BatchMetrics {
        let overall_success_rate = if self.total_items > 0 {
            (self.successful_items as f64 / self.total_items as f64) * 100.0
        } else {
            0.0
        };
        let avg_batch_time_secs = if self.total_batches > 0 {
            self.total_time.as_secs_f64() / self.total_batches as f64
        } else {
            0.0
        };
        let avg_batch_size = if self.total_batches > 0 {
            self.total_items as f64 / self.total_batches as f64
        } else {
            0.0
        };
        let items_per_second = if self.total_time > Duration::ZERO && self.total_items > 0 {
            self.total_items as f64 / self.total_time.as_secs_f64()
        } else {
            0.0
        };

        BatchMetrics {
            total_batches: self.total_batches,
            total_items: self.total_items,
            successful_items: self.successful_items,
            failed_items: self.failed_items,
            total_time_secs: self.total_time.as_secs_f64(),
            last_batch_time_secs: self.last_batch_time.as_secs_f64(),
            last_batch_size: self.last_batch_size,
            last_batch_success_rate: self.last_batch_success_rate,
            overall_success_rate,
            avg_batch_time_secs,
            avg_batch_size,
            items_per_second,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Batch Processor
// ═══════════════════════════════════════════════════════════════════════════════

/// Batch processor with configurable concurrency, throttling, and metrics.
pub struct BatchProcessor {
    settings: BatchSettings,
    /// Shared last-call marker; holding the async lock across the wait
    /// serializes dispatch so the pool-wide rate never exceeds one call per
    /// spacing interval.
    throttle_marker: tokio::sync::Mutex<Option<Instant>>,
    stats: Mutex<BatchStats>,
}

impl BatchProcessor {
    /// Create a batch processor.
    pub fn new(settings: BatchSettings) -> Self {
        Self {
            settings,
            throttle_marker: tokio::sync::Mutex::new(None),
            stats: Mutex::new(BatchStats::default()),
        }
    }

    /// Process items in chunks, returning one outcome per item in input
    /// order.
    pub async fn process_batch<T, U, F, Fut>(
        &self,
        items: Vec<T>,
        work_fn: F,
        overrides: BatchOverrides,
        progress: Option<ProgressFn>,
    ) -> Vec<BatchOutcome<T, U>>
    where
        T: Clone,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<U>>,
    {
        let chunk_size = overrides
            .chunk_size
            .unwrap_or(self.settings.chunk_size)
            .max(1);
        let worker_count = overrides
            .worker_count
            .unwrap_or(self.settings.max_workers)
            .max(1);
        let timeout = overrides.timeout.or(self.settings.timeout);

        let total = items.len();
        let started = Instant::now();

        {
            let mut stats = self.stats.lock();
            stats.total_batches += 1;
            stats.total_items += total as u64;
        }

        let mut results: Vec<BatchOutcome<T, U>> = Vec::with_capacity(total);
        let mut processed = 0usize;
        let mut remaining = items.into_iter();

        loop {
            let chunk: Vec<T> = remaining.by_ref().take(chunk_size).collect();
            if chunk.is_empty() {
                break;
            }
            let chunk_len = chunk.len();

            let outcomes = self
                .process_chunk(chunk, &work_fn, worker_count, timeout)
                .await;
            results.extend(outcomes);

            processed += chunk_len;
            if let Some(callback) = &progress {
                callback(processed, total, processed as f64 / total as f64);
            }
        }

        let elapsed = started.elapsed();
        let successful = results.iter().filter(|o| o.is_success()).count();
        let failed = results.len() - successful;
        let success_rate = if results.is_empty() {
            0.0
        } else {
            (successful as f64 / results.len() as f64) * 100.0
        };

        {
            let mut stats = self.stats.lock();
            stats.successful_items += successful as u64;
            stats.failed_items += failed as u64;
            stats.total_time += elapsed;
            stats.last_batch_time = elapsed;
            stats.last_batch_size = total;
            stats.last_batch_success_rate = success_rate;
        }

        info!(
            items = total,
            successful,
            failed,
            elapsed_ms = elapsed.as_millis() as u64,
            success_rate = format!("{success_rate:.1}"),
            "Batch processed"
        );

        results
    }

    /// Run one chunk's items concurrently, bounded by `worker_count`.
    async fn process_chunk<T, U, F, Fut>(
        &self,
        chunk: Vec<T>,
        work_fn: &F,
        worker_count: usize,
        timeout: Option<Duration>,
    ) -> Vec<BatchOutcome<T, U>>
    where
        T: Clone,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<U>>,
    {
        let semaphore = Arc::new(Semaphore::new(worker_count));
        // One deadline for the whole chunk; items still waiting when it
        // passes surface a timeout failure rather than a silent drop.
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);

        let futures = chunk.into_iter().map(|item| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let work = async {
                    let _permit = semaphore.acquire().await.map_err(|_| {
                        CoreError::internal("Batch worker pool closed unexpectedly")
                    })?;
                    self.throttle().await;
                    work_fn(item.clone()).await
                };

                let outcome = match deadline {
                    Some(deadline) => match tokio::time::timeout_at(deadline, work).await {
                        Ok(result) => result,
                        Err(_) => Err(CoreError::new(
                            ErrorCode::Timeout,
                            "Chunk timeout elapsed before item completed",
                        )),
                    },
                    None => work.await,
                };

                BatchOutcome { item, outcome }
            }
        });

        // join_all preserves input order even though execution interleaves.
        join_all(futures).await
    }

    /// Enforce the minimum inter-call spacing, if configured.
    async fn throttle(&self) {
        let Some(spacing) = self.settings.throttle else {
            return;
        };
        if spacing.is_zero() {
            return;
        }

        let mut last = self.throttle_marker.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < spacing {
                tokio::time::sleep(spacing - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Get a metrics snapshot.
    pub fn metrics(&self) -> BatchMetrics {
        self.stats.lock().snapshot()
    }

    /// Reset all metrics.
    pub fn reset_metrics(&self) {
        *self.stats.lock() = BatchStats::default();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Adaptive Batch Processor
// ═══════════════════════════════════════════════════════════════════════════════

/// One batch's record in the adaptation window.
#[derive(Debug, Clone, Serialize)]
pub struct BatchRecord {
    pub workers: usize,
    pub items: usize,
    pub success_rate: f64,
    pub elapsed_secs: f64,
}

#[derive(Debug)]
struct AdaptiveState {
    current_workers: usize,
    batches_since_adaptation: u32,
    history: VecDeque<BatchRecord>,
}

/// Batch processor that tunes its worker count from recent success rates.
///
/// The step is always one worker in either direction; the controller reacts
/// to sustained pressure via the rolling window, not to a single bad batch.
pub struct AdaptiveBatchProcessor {
    inner: BatchProcessor,
    min_workers: usize,
    max_workers: usize,
    target_success_rate: f64,
    adaptation_interval: u32,
    state: Mutex<AdaptiveState>,
}

impl AdaptiveBatchProcessor {
    /// Create an adaptive batch processor. Starts at the worker ceiling and
    /// sheds workers under failure pressure.
    pub fn new(settings: BatchSettings) -> Self {
        let min_workers = settings.min_workers.max(1);
        let max_workers = settings.max_workers.max(min_workers);
        let target_success_rate = settings.target_success_rate;
        let adaptation_interval = settings.adaptation_interval.max(1);

        Self {
            inner: BatchProcessor::new(settings),
            min_workers,
            max_workers,
            target_success_rate,
            adaptation_interval,
            state: Mutex::new(AdaptiveState {
                current_workers: max_workers,
                batches_since_adaptation: 0,
                history: VecDeque::with_capacity(ADAPTATION_WINDOW),
            }),
        }
    }

    /// Current adaptive worker count.
    pub fn current_workers(&self) -> usize {
        self.state.lock().current_workers
    }

    /// Process a batch using the current adaptive worker count unless the
    /// caller overrides it.
    pub async fn process_batch<T, U, F, Fut>(
        &self,
        items: Vec<T>,
        work_fn: F,
        mut overrides: BatchOverrides,
        progress: Option<ProgressFn>,
    ) -> Vec<BatchOutcome<T, U>>
    where
        T: Clone,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<U>>,
    {
        let workers = overrides
            .worker_count
            .unwrap_or_else(|| self.current_workers());
        overrides.worker_count = Some(workers);

        let total = items.len();
        let results = self
            .inner
            .process_batch(items, work_fn, overrides, progress)
            .await;

        let successful = results.iter().filter(|o| o.is_success()).count();
        let success_rate = if results.is_empty() {
            0.0
        } else {
            (successful as f64 / results.len() as f64) * 100.0
        };
        let elapsed_secs = self.inner.metrics().last_batch_time_secs;

        let mut state = self.state.lock();
        if state.history.len() == ADAPTATION_WINDOW {
            state.history.pop_front();
        }
        state.history.push_back(BatchRecord {
            workers,
            items: total,
            success_rate,
            elapsed_secs,
        });

        state.batches_since_adaptation += 1;
        if state.batches_since_adaptation >= self.adaptation_interval {
            self.adapt(&mut state);
            state.batches_since_adaptation = 0;
        }

        results
    }

    /// Move the worker count one step toward the target success rate.
    fn adapt(&self, state: &mut AdaptiveState) {
        if state.history.is_empty() {
            return;
        }

        let avg_success_rate: f64 = state
            .history
            .iter()
            .map(|record| record.success_rate)
            .sum::<f64>()
            / state.history.len() as f64;

        if avg_success_rate < self.target_success_rate {
            let new_workers = state.current_workers.saturating_sub(1).max(self.min_workers);
            if new_workers != state.current_workers {
                info!(
                    from = state.current_workers,
                    to = new_workers,
                    success_rate = format!("{avg_success_rate:.1}"),
                    target = format!("{:.1}", self.target_success_rate),
                    "Decreasing batch concurrency"
                );
                state.current_workers = new_workers;
            }
        } else if state.current_workers < self.max_workers {
            let new_workers = state.current_workers + 1;
            info!(
                from = state.current_workers,
                to = new_workers,
                success_rate = format!("{avg_success_rate:.1}"),
                target = format!("{:.1}", self.target_success_rate),
                "Increasing batch concurrency"
            );
            state.current_workers = new_workers;
        }
    }

    /// Metrics snapshot including adaptation state.
    pub fn metrics(&self) -> AdaptiveBatchMetrics {
        let state = self.state.lock();
        AdaptiveBatchMetrics {
            batch: self.inner.metrics(),
            current_workers: state.current_workers,
            min_workers: self.min_workers,
            max_workers: self.max_workers,
            target_success_rate: self.target_success_rate,
            history: state.history.iter().cloned().collect(),
        }
    }
}

/// Metrics snapshot for the adaptive processor.
#[derive(Debug, Clone, Serialize)]
pub struct AdaptiveBatchMetrics {
    #[serde(flatten)]
    pub batch: BatchMetrics,
    pub current_workers: usize,
    pub min_workers: usize,
    pub max_workers: usize,
    pub target_success_rate: f64,
    pub history: Vec<BatchRecord>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings() -> BatchSettings {
        BatchSettings {
            min_workers: 2,
            max_workers: 5,
            chunk_size: 10,
            throttle: None,
            timeout: Some(Duration::from_secs(30)),
            target_success_rate: 95.0,
            adaptation_interval: 3,
        }
    }

    #[tokio::test]
    async fn test_outcomes_match_input_order() {
        let processor = BatchProcessor::new(settings());

        // Later items finish first; collection by index must not care.
        let items: Vec<u64> = (0..8).collect();
        let results = processor
            .process_batch(
                items,
                |n: u64| async move {
                    tokio::time::sleep(Duration::from_millis(40 - n * 5)).await;
                    Ok(n * 2)
                },
                BatchOverrides {
                    chunk_size: Some(4),
                    worker_count: Some(4),
                    ..Default::default()
                },
                None,
            )
            .await;

        assert_eq!(results.len(), 8);
        for (i, outcome) in results.iter().enumerate() {
            assert_eq!(outcome.item, i as u64);
            assert_eq!(*outcome.result().unwrap(), (i as u64) * 2);
        }
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_siblings() {
        let processor = BatchProcessor::new(settings());

        let results = processor
            .process_batch(
                vec![1, 2, 3, 4],
                |n: i32| async move {
                    if n == 2 {
                        Err(CoreError::new(ErrorCode::UpstreamRejected, "bad item"))
                    } else {
                        Ok(n)
                    }
                },
                BatchOverrides {
                    chunk_size: Some(2),
                    worker_count: Some(2),
                    ..Default::default()
                },
                None,
            )
            .await;

        assert_eq!(results.len(), 4);
        assert!(results[0].is_success());
        assert!(results[1].error().is_some());
        assert!(results[2].is_success());
        assert!(results[3].is_success());
        assert_eq!(
            results[1].error().unwrap().code(),
            ErrorCode::UpstreamRejected
        );
    }

    #[tokio::test]
    async fn test_worker_bound_is_respected() {
        let processor = BatchProcessor::new(settings());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = processor
            .process_batch(
                (0..12).collect::<Vec<u32>>(),
                {
                    let active = Arc::clone(&active);
                    let peak = Arc::clone(&peak);
                    move |_n: u32| {
                        let active = Arc::clone(&active);
                        let peak = Arc::clone(&peak);
                        async move {
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                            Ok(())
                        }
                    }
                },
                BatchOverrides {
                    chunk_size: Some(12),
                    worker_count: Some(3),
                    ..Default::default()
                },
                None,
            )
            .await;

        assert_eq!(results.len(), 12);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_chunks_run_sequentially() {
        let processor = BatchProcessor::new(settings());
        let order = Arc::new(Mutex::new(Vec::new()));

        processor
            .process_batch(
                vec![0usize, 1, 2, 3],
                {
                    let order = Arc::clone(&order);
                    move |n: usize| {
                        let order = Arc::clone(&order);
                        async move {
                            order.lock().push(n);
                            Ok(())
                        }
                    }
                },
                BatchOverrides {
                    chunk_size: Some(2),
                    worker_count: Some(4),
                    ..Default::default()
                },
                None,
            )
            .await;

        let seen = order.lock().clone();
        // Items 0,1 (first chunk) always dispatch before 2,3 (second chunk)
        let first_chunk_max = seen.iter().position(|&n| n == 2).unwrap();
        assert!(seen[..first_chunk_max].contains(&0));
        assert!(seen[..first_chunk_max].contains(&1));
    }

    #[tokio::test]
    async fn test_chunk_timeout_surfaces_per_item() {
        let processor = BatchProcessor::new(settings());

        let results = processor
            .process_batch(
                vec![1u32, 2],
                |n: u32| async move {
                    if n == 2 {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                    }
                    Ok(n)
                },
                BatchOverrides {
                    chunk_size: Some(2),
                    worker_count: Some(2),
                    timeout: Some(Duration::from_millis(50)),
                },
                None,
            )
            .await;

        assert_eq!(results.len(), 2);
        assert!(results[0].is_success());
        assert_eq!(results[1].error().unwrap().code(), ErrorCode::Timeout);
    }

    #[tokio::test]
    async fn test_throttle_bounds_call_rate() {
        let mut s = settings();
        s.throttle = Some(Duration::from_millis(30));
        let processor = BatchProcessor::new(s);

        let started = Instant::now();
        processor
            .process_batch(
                vec![1, 2, 3, 4],
                |_n: i32| async move { Ok(()) },
                BatchOverrides {
                    chunk_size: Some(4),
                    worker_count: Some(4),
                    ..Default::default()
                },
                None,
            )
            .await;

        // Four calls at >= 30ms spacing take at least 90ms regardless of
        // worker count.
        assert!(started.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn test_progress_callback_per_chunk() {
        let processor = BatchProcessor::new(settings());
        let updates = Arc::new(Mutex::new(Vec::new()));

        let progress: ProgressFn = {
            let updates = Arc::clone(&updates);
            Arc::new(move |done, total, fraction| {
                updates.lock().push((done, total, fraction));
            })
        };

        processor
            .process_batch(
                (0..5).collect::<Vec<u32>>(),
                |n: u32| async move { Ok(n) },
                BatchOverrides {
                    chunk_size: Some(2),
                    worker_count: Some(2),
                    ..Default::default()
                },
                Some(progress),
            )
            .await;

        let seen = updates.lock().clone();
        assert_eq!(seen, vec![(2, 5, 0.4), (4, 5, 0.8), (5, 5, 1.0)]);
    }

    #[tokio::test]
    async fn test_metrics_accumulate() {
        let processor = BatchProcessor::new(settings());

        processor
            .process_batch(
                vec![1, 2, 3],
                |n: i32| async move {
                    if n == 3 {
                        Err(CoreError::new(ErrorCode::NetworkError, "drop"))
                    } else {
                        Ok(n)
                    }
                },
                BatchOverrides::default(),
                None,
            )
            .await;

        let metrics = processor.metrics();
        assert_eq!(metrics.total_batches, 1);
        assert_eq!(metrics.total_items, 3);
        assert_eq!(metrics.successful_items, 2);
        assert_eq!(metrics.failed_items, 1);
        assert!((metrics.last_batch_success_rate - 66.6).abs() < 1.0);

        processor.reset_metrics();
        assert_eq!(processor.metrics().total_batches, 0);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let processor = BatchProcessor::new(settings());
        let results: Vec<BatchOutcome<i32, i32>> = processor
            .process_batch(
                Vec::new(),
                |n: i32| async move { Ok(n) },
                BatchOverrides::default(),
                None,
            )
            .await;
        assert!(results.is_empty());
    }

    // --- AdaptiveBatchProcessor tests ---

    #[tokio::test]
    async fn test_adaptive_sheds_workers_under_failure() {
        let processor = AdaptiveBatchProcessor::new(settings());
        assert_eq!(processor.current_workers(), 5);

        // Three all-failure batches trip one adaptation step
        for _ in 0..3 {
            processor
                .process_batch(
                    vec![1, 2],
                    |_n: i32| async move {
                        Err::<(), _>(CoreError::new(ErrorCode::UpstreamUnavailable, "down"))
                    },
                    BatchOverrides::default(),
                    None,
                )
                .await;
        }

        assert_eq!(processor.current_workers(), 4);
    }

    #[tokio::test]
    async fn test_adaptive_respects_min_workers() {
        let mut s = settings();
        s.min_workers = 2;
        s.max_workers = 3;
        s.adaptation_interval = 1;
        let processor = AdaptiveBatchProcessor::new(s);

        for _ in 0..10 {
            processor
                .process_batch(
                    vec![1],
                    |_n: i32| async move {
                        Err::<(), _>(CoreError::new(ErrorCode::UpstreamUnavailable, "down"))
                    },
                    BatchOverrides::default(),
                    None,
                )
                .await;
        }

        assert_eq!(processor.current_workers(), 2);
    }

    #[tokio::test]
    async fn test_adaptive_recovers_toward_max() {
        let mut s = settings();
        s.adaptation_interval = 1;
        let processor = AdaptiveBatchProcessor::new(s);

        // Push down with failures first
        for _ in 0..2 {
            processor
                .process_batch(
                    vec![1, 2],
                    |_n: i32| async move {
                        Err::<(), _>(CoreError::new(ErrorCode::UpstreamUnavailable, "down"))
                    },
                    BatchOverrides::default(),
                    None,
                )
                .await;
        }
        let lowered = processor.current_workers();
        assert!(lowered < 5);

        // Enough healthy batches flush the failure window and climb back
        for _ in 0..15 {
            processor
                .process_batch(vec![1, 2], |n: i32| async move { Ok(n) }, BatchOverrides::default(), None)
                .await;
        }

        assert_eq!(processor.current_workers(), 5);
    }

    #[tokio::test]
    async fn test_adaptive_history_window_bounded() {
        let processor = AdaptiveBatchProcessor::new(settings());

        for _ in 0..15 {
            processor
                .process_batch(vec![1], |n: i32| async move { Ok(n) }, BatchOverrides::default(), None)
                .await;
        }

        let metrics = processor.metrics();
        assert_eq!(metrics.history.len(), ADAPTATION_WINDOW);
        assert_eq!(metrics.current_workers, 5);
    }
}
