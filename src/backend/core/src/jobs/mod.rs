//! Background job system for long-running operations.
//!
//! The dashboard's request path must never block on a slow upstream call,
//! so units of work (for example "extract metadata for N files") are
//! enqueued here and serviced by a fixed pool of worker tasks. The caller
//! keeps only the job id and polls a snapshot on each re-render; a reaper
//! removes terminal jobs once their retention TTL lapses.
//!
//! # Usage
//!
//! ```rust,ignore
//! use satchel_core::jobs::{JobManager, JobStatus};
//!
//! let manager = JobManager::new(settings);
//!
//! let job_id = manager.enqueue("Extract Metadata", |ctx| async move {
//!     for (i, file_id) in file_ids.iter().enumerate() {
//!         if ctx.is_cancelled() {
//!             break;
//!         }
//!         process(file_id).await?;
//!         ctx.report_progress((i + 1) as f64 / file_ids.len() as f64, None);
//!     }
//!     Ok(serde_json::json!({"processed": file_ids.len()}))
//! });
//!
//! // Later, from the UI poll loop:
//! if let Some(snapshot) = manager.get_job(job_id) {
//!     render(snapshot.status, snapshot.progress);
//! }
//! ```

pub mod job;
pub mod manager;

pub use job::{JobContext, JobFuture, JobId, JobResult, JobSnapshot, JobStatus};
pub use manager::JobManager;
