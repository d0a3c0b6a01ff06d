//! The background job manager: worker pool, job table, and reaper.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use metrics::counter;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::job::{JobContext, JobFn, JobId, JobRecord, JobResult, JobSnapshot, JobStatus};
use crate::config::JobSettings;

struct ManagerInner {
    jobs: Mutex<HashMap<JobId, JobRecord>>,
    settings: JobSettings,
    shutdown: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// In-memory job table serviced by a fixed pool of worker tasks.
///
/// Cheap to clone; all clones share the same table. Construction spawns the
/// workers and the reaper, so it must happen inside a tokio runtime.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<ManagerInner>,
}

impl JobManager {
    /// Create a manager and start its workers and reaper.
    pub fn new(settings: JobSettings) -> Self {
        let manager = Self {
            inner: Arc::new(ManagerInner {
                jobs: Mutex::new(HashMap::new()),
                settings,
                shutdown: CancellationToken::new(),
                handles: Mutex::new(Vec::new()),
            }),
        };

        let num_workers = manager.inner.settings.num_workers.max(1);
        for index in 0..num_workers {
            let worker = manager.clone();
            let handle = tokio::spawn(async move { worker.worker_loop(index).await });
            manager.inner.handles.lock().push(handle);
        }

        let reaper = manager.clone();
        let handle = tokio::spawn(async move { reaper.reaper_loop().await });
        manager.inner.handles.lock().push(handle);

        info!(workers = num_workers, "Background job manager started");
        manager
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Public API
    // ───────────────────────────────────────────────────────────────────────────

    /// Add a job to the table. Returns immediately with the job's id; a
    /// worker picks the job up on its next scan.
    pub fn enqueue<F, Fut>(&self, name: impl Into<String>, func: F) -> JobId
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        self.enqueue_with_metadata(name, HashMap::new(), func)
    }

    /// Add a job carrying free-form metadata visible in its snapshots.
    pub fn enqueue_with_metadata<F, Fut>(
        &self,
        name: impl Into<String>,
        metadata: HashMap<String, Value>,
        func: F,
    ) -> JobId
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        let name = name.into();
        let boxed: JobFn = Box::new(move |ctx| Box::pin(func(ctx)));
        let record = JobRecord::new(name.clone(), metadata, boxed);
        let id = record.id;

        self.inner.jobs.lock().insert(id, record);
        counter!("jobs_enqueued_total").increment(1);
        info!(job_id = %id, job_name = %name, "Job enqueued");
        id
    }

    /// Get a snapshot of a job, or `None` if it does not exist (never
    /// existed, or already reaped).
    pub fn get_job(&self, id: JobId) -> Option<JobSnapshot> {
        self.inner.jobs.lock().get(&id).map(|record| record.snapshot())
    }

    /// Get snapshots of all jobs, newest first, truncated to `limit`.
    /// Terminal jobs are skipped when `include_completed` is false.
    pub fn get_all_jobs(&self, include_completed: bool, limit: usize) -> Vec<JobSnapshot> {
        let jobs = self.inner.jobs.lock();
        let mut snapshots: Vec<JobSnapshot> = jobs
            .values()
            .filter(|record| include_completed || !record.status.is_terminal())
            .map(|record| record.snapshot())
            .collect();

        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        snapshots.truncate(limit);
        snapshots
    }

    /// Update a running job's progress (clamped to `[0, 1]`).
    ///
    /// Returns false if the job does not exist or is not running; a stale
    /// progress callback must never alter a terminal job's record.
    pub fn update_progress(&self, id: JobId, progress: f64, message: Option<&str>) -> bool {
        let mut jobs = self.inner.jobs.lock();
        let Some(record) = jobs.get_mut(&id) else {
            return false;
        };
        if record.status != JobStatus::Running {
            return false;
        }

        record.progress = progress.clamp(0.0, 1.0);
        if let Some(message) = message {
            record.progress_message = Some(message.to_string());
        }
        true
    }

    /// Cancel a pending or running job.
    ///
    /// This marks the record and fires the job's cancellation token; it
    /// cannot interrupt an already-executing callable. Returns false if the
    /// job does not exist or is already terminal.
    pub fn cancel_job(&self, id: JobId) -> bool {
        let mut jobs = self.inner.jobs.lock();
        let Some(record) = jobs.get_mut(&id) else {
            return false;
        };
        if record.status.is_terminal() {
            return false;
        }

        record.status = JobStatus::Cancelled;
        record.completed_at = Some(Utc::now());
        record.cancel.cancel();
        counter!("jobs_completed_total", "status" => "cancelled").increment(1);
        info!(job_id = %id, "Job cancelled");
        true
    }

    /// Number of jobs currently in the table.
    pub fn job_count(&self) -> usize {
        self.inner.jobs.lock().len()
    }

    /// Stop workers and the reaper, waiting up to the configured shutdown
    /// timeout for each task to drain.
    pub async fn shutdown(&self) {
        info!("Shutting down background job manager");
        self.inner.shutdown.cancel();

        let handles: Vec<JoinHandle<()>> = self.inner.handles.lock().drain(..).collect();
        for handle in handles {
            if tokio::time::timeout(self.inner.settings.shutdown_timeout, handle)
                .await
                .is_err()
            {
                warn!("Job manager task did not stop within the shutdown timeout");
            }
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Worker and reaper loops
    // ───────────────────────────────────────────────────────────────────────────

    /// Claim the first pending job found, flipping it to running under the
    /// table lock. The callable is taken out of the record so it runs
    /// exactly once.
    fn claim_next(&self) -> Option<(JobId, String, JobFn, CancellationToken)> {
        let mut jobs = self.inner.jobs.lock();
        for record in jobs.values_mut() {
            if record.status == JobStatus::Pending {
                if let Some(func) = record.func.take() {
                    record.status = JobStatus::Running;
                    record.started_at = Some(Utc::now());
                    return Some((record.id, record.name.clone(), func, record.cancel.clone()));
                }
            }
        }
        None
    }

    async fn worker_loop(self, index: usize) {
        debug!(worker = index, "Job worker started");

        loop {
            if self.inner.shutdown.is_cancelled() {
                break;
            }

            match self.claim_next() {
                Some((id, name, func, cancel)) => {
                    self.run_job(id, name, func, cancel).await;
                }
                None => {
                    // Idle: wait for the poll interval or shutdown,
                    // whichever comes first.
                    tokio::select! {
                        _ = self.inner.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.inner.settings.poll_interval) => {}
                    }
                }
            }
        }

        debug!(worker = index, "Job worker stopped");
    }

    /// Execute a claimed job outside the table lock and write back its
    /// terminal state. Panics and errors are captured onto the record; a
    /// failing job never takes its worker down with it.
    async fn run_job(&self, id: JobId, name: String, func: JobFn, cancel: CancellationToken) {
        info!(job_id = %id, job_name = %name, "Starting job");

        let ctx = JobContext {
            id,
            manager: self.clone(),
            cancel,
        };

        let outcome = AssertUnwindSafe(func(ctx)).catch_unwind().await;

        let mut jobs = self.inner.jobs.lock();
        let Some(record) = jobs.get_mut(&id) else {
            return;
        };

        // A job cancelled while running keeps its cancelled state even if
        // the callable went on to finish normally.
        if record.status == JobStatus::Cancelled {
            debug!(job_id = %id, "Job finished after cancellation; keeping cancelled state");
            return;
        }

        match outcome {
            Ok(Ok(value)) => {
                record.result = Some(value);
                record.status = JobStatus::Completed;
                record.completed_at = Some(Utc::now());
                record.progress = 1.0;
                counter!("jobs_completed_total", "status" => "completed").increment(1);
                info!(job_id = %id, job_name = %name, "Job completed successfully");
            }
            Ok(Err(err)) => {
                record.error = Some(err.user_message().to_string());
                record.status = JobStatus::Failed;
                record.completed_at = Some(Utc::now());
                counter!("jobs_completed_total", "status" => "failed").increment(1);
                warn!(
                    job_id = %id,
                    job_name = %name,
                    error = %err,
                    "Job failed"
                );
            }
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "job panicked".to_string());
                record.error = Some(detail.clone());
                record.status = JobStatus::Failed;
                record.completed_at = Some(Utc::now());
                counter!("jobs_completed_total", "status" => "failed").increment(1);
                warn!(job_id = %id, job_name = %name, panic = %detail, "Job panicked");
            }
        }
    }

    /// Periodically delete terminal jobs whose completion timestamp has
    /// outlived the retention TTL, bounding table growth.
    async fn reaper_loop(self) {
        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.inner.settings.reap_interval) => {}
            }

            let ttl = chrono::Duration::from_std(self.inner.settings.job_ttl)
                .unwrap_or_else(|_| chrono::Duration::days(1));
            let cutoff = Utc::now() - ttl;

            let mut jobs = self.inner.jobs.lock();
            let stale: Vec<JobId> = jobs
                .values()
                .filter(|record| {
                    record.status.is_terminal()
                        && record.completed_at.map(|at| at < cutoff).unwrap_or(false)
                })
                .map(|record| record.id)
                .collect();

            let removed = stale.len();
            for id in stale {
                jobs.remove(&id);
            }

            if removed > 0 {
                info!(removed, "Reaped expired jobs");
            }
        }

        debug!("Job reaper stopped");
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
