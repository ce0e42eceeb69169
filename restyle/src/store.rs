//! The storage seam for jobs and tasks.
//!
//! A [`WorkStore`] is pure data access: every operation touches a bounded set of rows and is
//! expected to execute atomically. Business rules such as "only failed tasks may be retried" live
//! in the engine, whereas the invariants on the stored data itself are enforced here:
//!
//! - `0 <= failed_count <= completed_count <= total_count` for every job,
//! - a task's output is present iff it is completed and its error iff it failed,
//! - task transitions follow `pending -> processing -> {completed | failed}`, with the only way
//!   back to `pending` being a reset of a `failed` task ([`WorkStore::reset_task`] or
//!   [`WorkStore::reset_failed_task`]).
//!
//! Two implementations are provided: [`memory::InMemoryStore`] in this crate and a Postgres
//! implementation in `restyle-sqlx`. Both are checked against the shared [`test_suite`].
use async_trait::async_trait;
use thiserror::Error;

use crate::{
    job::{Image, Job, JobId, JobKind, JobStatus},
    task::{Task, TaskId, TaskStatus, TaskUpdate},
};

pub mod memory;
pub mod testing;

#[async_trait]
pub trait WorkStore: Send + Sync {
    /// Insert a job together with all of its tasks, all `pending`, in one logical unit.
    ///
    /// Fails with [`StoreError::EmptyJob`] when there are no tasks.
    async fn create_job(&self, job: NewJob) -> Result<JobId, StoreError>;
    async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError>;
    /// All tasks of the job ordered by ascending ordinal.
    async fn get_tasks(&self, job_id: JobId) -> Result<Vec<Task>, StoreError>;
    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError>;
    /// The lowest-ordinal task of the job that is still `pending`.
    async fn next_pending_task(&self, job_id: JobId) -> Result<Option<Task>, StoreError>;
    /// Sets the job status, stamping `completed_at` for terminal statuses and clearing it
    /// otherwise.
    async fn set_job_status(&self, id: JobId, status: JobStatus) -> Result<(), StoreError>;
    /// Records a task transition, rejecting those that break the task lifecycle with
    /// [`StoreError::InvalidTransition`].
    async fn set_task_status(&self, id: TaskId, update: TaskUpdate) -> Result<(), StoreError>;
    /// Atomically increments `completed_count`, and `failed_count` when `failed` is true.
    ///
    /// Should be called exactly once per task reaching a terminal state.
    async fn increment_job_progress(&self, job_id: JobId, failed: bool)
        -> Result<(), StoreError>;
    /// Sets a `failed` task back to `pending`, clearing its output, error and duration.
    ///
    /// Any other status is rejected with [`StoreError::InvalidTransition`]. Must be paired with
    /// [`WorkStore::decrement_job_progress_on_retry`].
    async fn reset_task(&self, id: TaskId) -> Result<(), StoreError>;
    /// Atomically decrements both `completed_count` and `failed_count`.
    ///
    /// Only valid when the task being reset had previously failed.
    async fn decrement_job_progress_on_retry(&self, job_id: JobId) -> Result<(), StoreError>;
    /// [`WorkStore::reset_task`] and [`WorkStore::decrement_job_progress_on_retry`] as one atomic
    /// unit: either both apply or neither does.
    ///
    /// The task must be `failed` and belong to the job. When several callers retry the same task
    /// concurrently exactly one succeeds.
    async fn reset_failed_task(&self, job_id: JobId, task_id: TaskId) -> Result<(), StoreError>;
    /// A page of jobs, most recent first.
    async fn list_jobs(&self, limit: u32, offset: u32) -> Result<Vec<Job>, StoreError>;
    async fn jobs_with_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError>;
    /// Persist the assembled deliverable of a job, replacing any previous one.
    async fn store_artifact(&self, job_id: JobId, artifact: Image) -> Result<(), StoreError>;
    async fn get_artifact(&self, job_id: JobId) -> Result<Option<Image>, StoreError>;
}

/// A job ready to be inserted via [`WorkStore::create_job`].
///
/// Usually constructed via [`crate::job::builder::JobBuilder`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub kind: JobKind,
    pub prompt: String,
    pub preset: Option<String>,
    pub aspect_ratio: Option<String>,
    pub estimated_cost: Option<f64>,
    pub tasks: Vec<NewTask>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub ordinal: u32,
    pub name: Option<String>,
    pub input: Image,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("A job must contain at least one task")]
    EmptyJob,
    #[error("Job {0} not found")]
    JobNotFound(JobId),
    #[error("Task {0} not found")]
    TaskNotFound(TaskId),
    #[error("Task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
    #[error("Progress update would leave the counters of job {0} out of bounds")]
    ProgressOutOfBounds(JobId),
    #[error("Error encoding or decoding data")]
    EncodeDecode(#[from] serde_json::Error),
    #[error("System in bad state")]
    BadState,
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}
