//! Job records, snapshots, and the execution context handed to job code.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::manager::JobManager;

// ═══════════════════════════════════════════════════════════════════════════════
// Job Identification
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for a job instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Create a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Status
// ═══════════════════════════════════════════════════════════════════════════════

/// Status of a job. Transitions are monotonic:
/// pending → running → {completed, failed, cancelled}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed by a worker
    Pending,
    /// Currently executing
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Cancelled by the caller
    Cancelled,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Callable
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of a job's callable: an opaque success payload or the crate error.
pub type JobResult = crate::error::Result<Value>;

/// Boxed future produced by a job callable.
pub type JobFuture = BoxFuture<'static, JobResult>;

/// The stored form of a job's callable. Taken out of the record exactly once,
/// by the worker that claims the job.
pub(crate) type JobFn = Box<dyn FnOnce(JobContext) -> JobFuture + Send + 'static>;

// ═══════════════════════════════════════════════════════════════════════════════
// Job Record
// ═══════════════════════════════════════════════════════════════════════════════

/// A job as held in the manager's table. Owned exclusively by the table;
/// callers only ever see [`JobSnapshot`]s.
pub(crate) struct JobRecord {
    pub id: JobId,
    pub name: String,
    pub status: JobStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: f64,
    pub progress_message: Option<String>,
    pub metadata: HashMap<String, Value>,
    pub cancel: CancellationToken,
    pub func: Option<JobFn>,
}

impl JobRecord {
    pub(crate) fn new(name: String, metadata: HashMap<String, Value>, func: JobFn) -> Self {
        Self {
            id: JobId::new(),
            name,
            status: JobStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            progress: 0.0,
            progress_message: None,
            metadata,
            cancel: CancellationToken::new(),
            func: Some(func),
        }
    }

    pub(crate) fn snapshot(&self) -> JobSnapshot {
        let runtime_secs = match self.started_at {
            Some(started) => {
                let end = self.completed_at.unwrap_or_else(Utc::now);
                (end - started).num_milliseconds() as f64 / 1000.0
            }
            None => 0.0,
        };

        JobSnapshot {
            id: self.id,
            name: self.name.clone(),
            status: self.status,
            result: self.result.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            progress: self.progress,
            progress_message: self.progress_message.clone(),
            metadata: self.metadata.clone(),
            runtime_secs,
        }
    }
}

/// Read-only view of a job, safe to hand to the UI poll loop.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub name: String,
    pub status: JobStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: f64,
    pub progress_message: Option<String>,
    pub metadata: HashMap<String, Value>,
    /// Seconds spent running so far (or total, once terminal)
    pub runtime_secs: f64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Context
// ═══════════════════════════════════════════════════════════════════════════════

/// Context passed to a job's callable.
///
/// Cancellation is cooperative: `cancel_job` fires the token, and it is the
/// callable's obligation to check [`is_cancelled`](Self::is_cancelled) at
/// safe points if it wants to stop early. The manager makes no preemption
/// guarantee.
#[derive(Clone)]
pub struct JobContext {
    pub(crate) id: JobId,
    pub(crate) manager: JobManager,
    pub(crate) cancel: CancellationToken,
}

impl JobContext {
    /// Get the job ID.
    pub fn job_id(&self) -> JobId {
        self.id
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The job's cancellation token, for `select!`-style integration.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Report progress. Returns false if the job is no longer running (a
    /// stale callback must not resurrect a terminal job's visible state).
    pub fn report_progress(&self, progress: f64, message: Option<&str>) -> bool {
        self.manager.update_progress(self.id, progress, message)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
