//! Durable, rate-limited processing of image generation jobs.
//!
//! A job is a batch of images, or the slides of a deck, each turned into a task and sent through
//! a [`GenerationGateway`] one at a time. Progress is persisted in a [`WorkStore`], so jobs can be
//! polled, failed tasks retried and drains cancelled while other jobs keep running.
//!
//! # Example
//!
//! ```
//! # use restyle::prelude::*;
//! # use restyle::testing::ScriptedGateway;
//! # tokio::runtime::Builder::new_current_thread().enable_time().start_paused(true).build().unwrap().block_on(async {
//! let engine = Restyle::new(InMemoryStore::new(), ScriptedGateway::default());
//!
//! let job = JobBuilder::batch("enhance")
//!     .with_aspect_ratio("16:9")
//!     .add_image("cat.png", Image::new(vec![0u8; 16], "image/png"))
//!     .build()
//!     .unwrap();
//! let job_id = engine.create_job(job).await.unwrap();
//!
//! assert_eq!(engine.run(job_id).await.unwrap(), RunOutcome::Completed);
//! assert_eq!(engine.job(job_id).await.unwrap().unwrap().status, JobStatus::Completed);
//! # });
//! ```
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinError;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

pub mod assembly;
pub mod config;
pub mod gateway;
pub mod job;
pub mod prelude;
mod processor;
pub mod store;
pub mod supervisor;
pub mod task;
pub mod testing;

use assembly::{Assembler, Unassembled};
use config::EngineConfig;
use gateway::GenerationGateway;
use job::{builder::validate_tasks, Image, Job, JobId, JobStatus};
use processor::JobProcessor;
use store::{NewJob, StoreError, WorkStore};
use supervisor::Supervisor;
use task::{Task, TaskId, TaskStatus};

/// The handle to the processing engine.
///
/// Construct one per process and clone it wherever jobs are created, polled, retried or
/// cancelled. Clones share the same [`Supervisor`], so duplicate drains are prevented across all
/// of them.
#[derive(Clone)]
pub struct Restyle<S: WorkStore + Clone + 'static> {
    store: S,
    gateway: Arc<dyn GenerationGateway>,
    assembler: Arc<dyn Assembler>,
    supervisor: Supervisor,
    config: EngineConfig,
    processor: Arc<JobProcessor<S>>,
    tracker: TaskTracker,
}

/// How a drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Another drain was already active for the job, nothing was done.
    AlreadyRunning,
    NotFound,
    /// The job was deactivated before every pending task was processed.
    Cancelled,
    Completed,
    /// Every task failed, or the deliverable could not be assembled.
    Failed,
}

impl<S> Restyle<S>
where
    S: WorkStore + Clone + 'static,
{
    pub fn new(store: S, gateway: impl GenerationGateway + 'static) -> Self {
        Self::from_parts(
            store,
            Arc::new(gateway),
            Arc::new(Unassembled),
            Supervisor::new(),
            EngineConfig::new(),
        )
    }

    fn from_parts(
        store: S,
        gateway: Arc<dyn GenerationGateway>,
        assembler: Arc<dyn Assembler>,
        supervisor: Supervisor,
        config: EngineConfig,
    ) -> Self {
        let processor = Arc::new(JobProcessor::new(
            store.clone(),
            gateway.clone(),
            assembler.clone(),
            supervisor.clone(),
            &config,
        ));
        Self {
            store,
            gateway,
            assembler,
            supervisor,
            config,
            processor,
            tracker: TaskTracker::new(),
        }
    }

    /// Set the [`Assembler`] used to compose deck jobs.
    pub fn with_assembler(self, assembler: impl Assembler + 'static) -> Self {
        Self::from_parts(
            self.store,
            self.gateway,
            Arc::new(assembler),
            self.supervisor,
            self.config,
        )
    }

    pub fn with_config(self, config: EngineConfig) -> Self {
        Self::from_parts(
            self.store,
            self.gateway,
            self.assembler,
            self.supervisor,
            config,
        )
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Create the job and start draining it in the background.
    pub async fn submit(&self, job: NewJob) -> Result<JobId, RestyleError> {
        let job_id = self.create_job(job).await?;
        self.start(job_id);
        Ok(job_id)
    }

    /// Persist the job and its tasks without starting a drain.
    ///
    /// The estimated cost is computed from the number of tasks and [`EngineConfig::cost_per_task`].
    pub async fn create_job(&self, mut job: NewJob) -> Result<JobId, RestyleError> {
        validate_tasks(&mut job.tasks)?;
        job.estimated_cost = Some(self.config.estimated_cost(job.tasks.len()));
        let job_id = self.store.create_job(job).await?;
        tracing::debug!(%job_id, "Created job {job_id}");
        Ok(job_id)
    }

    /// Start draining the job in the background, without waiting for it.
    ///
    /// Errors are logged. Does nothing if the job is already being drained.
    pub fn start(&self, job_id: JobId) {
        let processor = self.processor.clone();
        self.tracker.spawn(
            async move {
                let _ = processor.run(job_id).await.inspect_err(|error| {
                    tracing::error!(?error, %job_id, "Failed to process job {job_id}: {error}")
                });
            }
            .in_current_span(),
        );
    }

    /// Drain the job, waiting for it to finish.
    pub async fn run(&self, job_id: JobId) -> Result<RunOutcome, RestyleError> {
        Ok(self.processor.run(job_id).await?)
    }

    /// Reset a failed task to pending and make sure a drain picks it up.
    ///
    /// A finished job moves back to [`JobStatus::Processing`]. Only tasks that failed may be
    /// retried, and the task must belong to the job.
    #[tracing::instrument(skip(self))]
    pub async fn retry_task(&self, job_id: JobId, task_id: TaskId) -> Result<(), RestyleError> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .filter(|task| task.job_id == job_id)
            .ok_or(RestyleError::TaskNotFound(task_id))?;
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(RestyleError::JobNotFound(job_id))?;
        if task.status != TaskStatus::Failed {
            return Err(RestyleError::TaskNotRetryable {
                task_id,
                status: task.status,
            });
        }

        self.store
            .reset_failed_task(job_id, task_id)
            .await
            .map_err(|error| match error {
                // Another retry of the same task got there first.
                StoreError::InvalidTransition { from, .. } => RestyleError::TaskNotRetryable {
                    task_id,
                    status: from,
                },
                StoreError::TaskNotFound(_) => RestyleError::TaskNotFound(task_id),
                error => RestyleError::Store(error),
            })?;
        if job.status.is_terminal() {
            self.store
                .set_job_status(job_id, JobStatus::Processing)
                .await?;
        }
        if !self.supervisor.is_active(job_id) {
            self.start(job_id);
        }
        tracing::debug!("Retrying task {task_id} of job {job_id}");
        Ok(())
    }

    /// Stop scheduling further tasks of the job.
    ///
    /// A gateway call already in progress still completes and is recorded, after which the drain
    /// marks the job as failed. A job without an active drain that has not finished is marked as
    /// failed straight away. Returns whether a drain was active.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, job_id: JobId) -> Result<bool, RestyleError> {
        if self.supervisor.deactivate(job_id) {
            tracing::debug!("Cancelled drain of job {job_id}");
            return Ok(true);
        }
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(RestyleError::JobNotFound(job_id))?;
        if !job.status.is_terminal() {
            self.store.set_job_status(job_id, JobStatus::Failed).await?;
        }
        Ok(false)
    }

    /// Restart a job whose drain stopped while tasks were still pending, for example after it
    /// was cancelled.
    ///
    /// Returns whether a drain was started.
    #[tracing::instrument(skip(self))]
    pub async fn resume(&self, job_id: JobId) -> Result<bool, RestyleError> {
        if self.store.get_job(job_id).await?.is_none() {
            return Err(RestyleError::JobNotFound(job_id));
        }
        if self.supervisor.is_active(job_id)
            || self.store.next_pending_task(job_id).await?.is_none()
        {
            return Ok(false);
        }
        self.store
            .set_job_status(job_id, JobStatus::Processing)
            .await?;
        self.start(job_id);
        Ok(true)
    }

    /// Restart the drains of jobs left processing or assembling without an active drain, as
    /// happens when the process stops mid drain.
    ///
    /// Tasks left processing are not run again. This is never called by the engine itself.
    pub async fn reconcile(&self) -> Result<Vec<JobId>, RestyleError> {
        let mut restarted = Vec::new();
        for status in [JobStatus::Processing, JobStatus::Assembling] {
            for job in self.store.jobs_with_status(status).await? {
                if self.supervisor.is_active(job.id) {
                    continue;
                }
                tracing::warn!(job_id = %job.id, "Restarting job {} left {status}", job.id);
                self.start(job.id);
                restarted.push(job.id);
            }
        }
        Ok(restarted)
    }

    pub async fn job(&self, job_id: JobId) -> Result<Option<Job>, RestyleError> {
        Ok(self.store.get_job(job_id).await?)
    }

    pub async fn tasks(&self, job_id: JobId) -> Result<Vec<Task>, RestyleError> {
        Ok(self.store.get_tasks(job_id).await?)
    }

    pub async fn task(&self, task_id: TaskId) -> Result<Option<Task>, RestyleError> {
        Ok(self.store.get_task(task_id).await?)
    }

    /// A page of jobs, most recent first.
    pub async fn list_jobs(&self, limit: u32, offset: u32) -> Result<Vec<Job>, RestyleError> {
        Ok(self.store.list_jobs(limit, offset).await?)
    }

    /// The assembled deliverable of a deck job.
    pub async fn artifact(&self, job_id: JobId) -> Result<Option<Image>, RestyleError> {
        Ok(self.store.get_artifact(job_id).await?)
    }

    pub fn is_running(&self, job_id: JobId) -> bool {
        self.supervisor.is_active(job_id)
    }

    /// Cancel every active drain and wait for all of them to exit.
    pub async fn graceful_shutdown(&self) {
        tracing::debug!("Shutting down restyle drains");
        self.supervisor.deactivate_all();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[derive(Debug, Error)]
pub enum RestyleError {
    #[error("A job must contain at least one task")]
    EmptyJob,
    #[error("More than one task has the ordinal {0}")]
    DuplicateOrdinal(u32),
    #[error("Job {0} not found")]
    JobNotFound(JobId),
    #[error("Task {0} not found")]
    TaskNotFound(TaskId),
    #[error("Task {task_id} is {status}, only failed tasks can be retried")]
    TaskNotRetryable { task_id: TaskId, status: TaskStatus },
    #[error("Error communicating with the store")]
    Store(#[from] StoreError),
}

impl RestyleError {
    /// Whether the caller supplied invalid input, as opposed to the store failing.
    pub fn is_validation(&self) -> bool {
        match self {
            Self::EmptyJob
            | Self::DuplicateOrdinal(_)
            | Self::JobNotFound(_)
            | Self::TaskNotFound(_)
            | Self::TaskNotRetryable { .. } => true,
            Self::Store(error) => matches!(
                error,
                StoreError::EmptyJob | StoreError::JobNotFound(_) | StoreError::TaskNotFound(_)
            ),
        }
    }
}

pub(crate) fn panic_message(error: JoinError) -> String {
    let msg = error.to_string();
    match error.try_into_panic() {
        Ok(panic) => panic
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or(msg),
        Err(_) => msg,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::*;
    use crate::{
        assert_job,
        gateway::FailureKind,
        job::builder::JobBuilder,
        store::memory::InMemoryStore,
        testing::{RecordingAssembler, Script, ScriptedGateway},
    };

    fn engine(gateway: &ScriptedGateway) -> Restyle<InMemoryStore> {
        Restyle::new(InMemoryStore::new(), gateway.clone())
    }

    fn batch(images: u8) -> NewJob {
        (1..=images)
            .fold(JobBuilder::batch("enhance"), |builder, byte| {
                builder.add_image(
                    format!("{byte}.png"),
                    Image::new(vec![byte; 4], "image/png"),
                )
            })
            .build()
            .unwrap()
    }

    /// Wait for every drain started so far to exit.
    async fn settle<S: WorkStore + Clone + 'static>(engine: &Restyle<S>) {
        engine.tracker.close();
        engine.tracker.wait().await;
        engine.tracker.reopen();
    }

    #[tokio::test(start_paused = true)]
    async fn submit_drains_in_the_background() {
        let gateway = ScriptedGateway::default();
        let engine = engine(&gateway);

        let job_id = engine.submit(batch(2)).await.unwrap();
        settle(&engine).await;

        assert_job!(engine.store(), job_id, status: JobStatus::Completed, total: 2, completed: 2);
        assert!(!engine.is_running(job_id));
        assert!(engine
            .tasks(job_id)
            .await
            .unwrap()
            .iter()
            .all(|task| task.output == Some(Script::generated())));
    }

    #[tokio::test]
    async fn estimated_cost_is_stamped_at_creation() {
        let engine = engine(&ScriptedGateway::default())
            .with_config(EngineConfig::new().with_cost_per_task(0.5));

        let job_id = engine.create_job(batch(3)).await.unwrap();

        let job = engine.job(job_id).await.unwrap().unwrap();
        assert_eq!(job.estimated_cost, Some(1.5));
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn invalid_jobs_are_rejected() {
        let engine = engine(&ScriptedGateway::default());
        let mut job = batch(2);
        job.tasks[1].ordinal = 1;

        let duplicate = engine.create_job(job).await.unwrap_err();
        let mut empty = batch(1);
        empty.tasks.clear();
        let empty = engine.submit(empty).await.unwrap_err();

        assert_matches!(duplicate, RestyleError::DuplicateOrdinal(1));
        assert_matches!(empty, RestyleError::EmptyJob);
        assert!(duplicate.is_validation() && empty.is_validation());
        assert!(engine.list_jobs(10, 0).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_restores_processing_and_drains_only_the_retried_task() {
        let gateway = ScriptedGateway::new([
            Script::succeed(),
            Script::fail(FailureKind::RateLimited, "HTTP 429: RESOURCE_EXHAUSTED"),
            Script::succeed(),
        ]);
        let engine = engine(&gateway);
        let job_id = engine.create_job(batch(3)).await.unwrap();
        assert_eq!(engine.run(job_id).await.unwrap(), RunOutcome::Completed);
        assert_job!(engine.store(), job_id, status: JobStatus::Completed, completed: 3, failed: 1);
        let before = engine.tasks(job_id).await.unwrap();
        assert_eq!(before[1].status, TaskStatus::Failed);

        engine.retry_task(job_id, before[1].id).await.unwrap();

        assert_job!(engine.store(), job_id, status: JobStatus::Processing, completed: 2, failed: 0);
        let reset = engine.task(before[1].id).await.unwrap().unwrap();
        assert_eq!(reset.status, TaskStatus::Pending);
        assert_eq!((reset.output, reset.error, reset.duration), (None, None, None));

        settle(&engine).await;

        let job = assert_job!(
            engine.store(),
            job_id,
            status: JobStatus::Completed,
            total: 3,
            completed: 3,
            failed: 0,
        );
        assert_eq!(job.estimated_cost, Some(3.0 * EngineConfig::DEFAULT_COST_PER_TASK));
        let calls = gateway.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[3].request.image, before[1].input);
        let after = engine.tasks(job_id).await.unwrap();
        assert_eq!(after[0], before[0]);
        assert_eq!(after[2], before[2]);
        assert_eq!(after[1].status, TaskStatus::Completed);
    }

    /// Yields to the scheduler before every operation, so concurrent callers interleave.
    #[derive(Clone, Default)]
    struct YieldingStore(InMemoryStore);

    #[async_trait::async_trait]
    impl WorkStore for YieldingStore {
        async fn create_job(&self, job: NewJob) -> Result<JobId, StoreError> {
            tokio::task::yield_now().await;
            self.0.create_job(job).await
        }
        async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
            tokio::task::yield_now().await;
            self.0.get_job(id).await
        }
        async fn get_tasks(&self, job_id: JobId) -> Result<Vec<Task>, StoreError> {
            tokio::task::yield_now().await;
            self.0.get_tasks(job_id).await
        }
        async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
            tokio::task::yield_now().await;
            self.0.get_task(id).await
        }
        async fn next_pending_task(&self, job_id: JobId) -> Result<Option<Task>, StoreError> {
            tokio::task::yield_now().await;
            self.0.next_pending_task(job_id).await
        }
        async fn set_job_status(&self, id: JobId, status: JobStatus) -> Result<(), StoreError> {
            tokio::task::yield_now().await;
            self.0.set_job_status(id, status).await
        }
        async fn set_task_status(
            &self,
            id: TaskId,
            update: task::TaskUpdate,
        ) -> Result<(), StoreError> {
            tokio::task::yield_now().await;
            self.0.set_task_status(id, update).await
        }
        async fn increment_job_progress(
            &self,
            job_id: JobId,
            failed: bool,
        ) -> Result<(), StoreError> {
            tokio::task::yield_now().await;
            self.0.increment_job_progress(job_id, failed).await
        }
        async fn reset_task(&self, id: TaskId) -> Result<(), StoreError> {
            tokio::task::yield_now().await;
            self.0.reset_task(id).await
        }
        async fn decrement_job_progress_on_retry(&self, job_id: JobId) -> Result<(), StoreError> {
            tokio::task::yield_now().await;
            self.0.decrement_job_progress_on_retry(job_id).await
        }
        async fn reset_failed_task(
            &self,
            job_id: JobId,
            task_id: TaskId,
        ) -> Result<(), StoreError> {
            tokio::task::yield_now().await;
            self.0.reset_failed_task(job_id, task_id).await
        }
        async fn list_jobs(&self, limit: u32, offset: u32) -> Result<Vec<Job>, StoreError> {
            tokio::task::yield_now().await;
            self.0.list_jobs(limit, offset).await
        }
        async fn jobs_with_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError> {
            tokio::task::yield_now().await;
            self.0.jobs_with_status(status).await
        }
        async fn store_artifact(&self, job_id: JobId, artifact: Image) -> Result<(), StoreError> {
            tokio::task::yield_now().await;
            self.0.store_artifact(job_id, artifact).await
        }
        async fn get_artifact(&self, job_id: JobId) -> Result<Option<Image>, StoreError> {
            tokio::task::yield_now().await;
            self.0.get_artifact(job_id).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_retries_of_a_task_reset_it_once() {
        let gateway = ScriptedGateway::new([
            Script::fail(FailureKind::SafetyFiltered, "Response blocked: SAFETY"),
            Script::fail(FailureKind::RateLimited, "HTTP 429: RESOURCE_EXHAUSTED"),
            Script::succeed(),
        ]);
        let store = YieldingStore::default();
        let engine = Restyle::new(store.clone(), gateway.clone());
        let job_id = engine.create_job(batch(3)).await.unwrap();
        engine.run(job_id).await.unwrap();
        assert_job!(store.0, job_id, status: JobStatus::Completed, completed: 3, failed: 2);
        let task_id = engine.tasks(job_id).await.unwrap()[0].id;

        let (first, second) = tokio::join!(
            engine.retry_task(job_id, task_id),
            engine.retry_task(job_id, task_id)
        );

        let lost = match (first, second) {
            (Ok(()), Err(lost)) | (Err(lost), Ok(())) => lost,
            results => panic!("expected exactly one retry to succeed: {results:?}"),
        };
        assert_matches!(
            lost,
            RestyleError::TaskNotRetryable { task_id: lost_id, .. } if lost_id == task_id
        );

        settle(&engine).await;

        let tasks = engine.tasks(job_id).await.unwrap();
        let failed = tasks
            .iter()
            .filter(|task| task.status == TaskStatus::Failed)
            .count();
        assert_eq!(failed, 1);
        assert_eq!(tasks[0].status, TaskStatus::Completed);
        assert_eq!(gateway.call_count(), 4);
        assert_job!(store.0, job_id, status: JobStatus::Completed, completed: 3, failed: 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_retry_leaves_task_and_counters_untouched() {
        let gateway = ScriptedGateway::new([Script::fail(FailureKind::Unknown, "boom")]);
        let engine = engine(&gateway);
        let job_id = engine.create_job(batch(1)).await.unwrap();
        engine.run(job_id).await.unwrap();
        let task_id = engine.tasks(job_id).await.unwrap()[0].id;

        engine.store().simulate_outage(true);
        let result = engine.retry_task(job_id, task_id).await;
        engine.store().simulate_outage(false);

        let error = result.unwrap_err();
        assert_matches!(error, RestyleError::Store(StoreError::Unavailable(_)));
        assert!(!error.is_validation());
        assert_job!(engine.store(), job_id, status: JobStatus::Failed, completed: 1, failed: 1);
        let task = engine.task(task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("Image generation failed: boom"));
        assert!(!engine.is_running(job_id));
    }

    #[tokio::test(start_paused = true)]
    async fn only_failed_tasks_of_the_job_can_be_retried() {
        let gateway = ScriptedGateway::default();
        let engine = engine(&gateway);
        let job_id = engine.create_job(batch(1)).await.unwrap();
        let other_job_id = engine.create_job(batch(1)).await.unwrap();
        engine.run(job_id).await.unwrap();
        let task = engine.tasks(job_id).await.unwrap().remove(0);

        let not_failed = engine.retry_task(job_id, task.id).await.unwrap_err();
        let wrong_job = engine.retry_task(other_job_id, task.id).await.unwrap_err();

        assert_matches!(
            not_failed,
            RestyleError::TaskNotRetryable { status: TaskStatus::Completed, .. }
        );
        assert_matches!(wrong_job, RestyleError::TaskNotFound(_));
        assert!(not_failed.is_validation());
        assert_job!(engine.store(), job_id, status: JobStatus::Completed, completed: 1, failed: 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_then_resume() {
        let gateway = ScriptedGateway::default().with_latency(Duration::from_secs(5));
        let engine = engine(&gateway);
        let job_id = engine.submit(batch(5)).await.unwrap();
        gateway.wait_for_calls(1).await;

        assert!(engine.cancel(job_id).await.unwrap());
        settle(&engine).await;

        assert_job!(engine.store(), job_id, status: JobStatus::Failed, completed: 1, failed: 0);
        let pending = engine
            .tasks(job_id)
            .await
            .unwrap()
            .into_iter()
            .filter(|task| task.status == TaskStatus::Pending)
            .count();
        assert_eq!(pending, 4);

        assert!(engine.resume(job_id).await.unwrap());
        settle(&engine).await;

        assert_job!(engine.store(), job_id, status: JobStatus::Completed, completed: 5, failed: 0);
        assert_eq!(gateway.call_count(), 5);
        assert!(!engine.resume(job_id).await.unwrap());
    }

    #[tokio::test]
    async fn cancel_without_active_drain_fails_the_job() {
        let engine = engine(&ScriptedGateway::default());
        let job_id = engine.create_job(batch(2)).await.unwrap();

        assert!(!engine.cancel(job_id).await.unwrap());

        assert_job!(engine.store(), job_id, status: JobStatus::Failed, completed: 0);
        assert_matches!(
            engine.cancel(JobId::from(404)).await,
            Err(RestyleError::JobNotFound(_))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reconcile_restarts_orphaned_jobs() {
        let gateway = ScriptedGateway::default();
        let engine = engine(&gateway);
        let orphaned = engine.create_job(batch(2)).await.unwrap();
        let untouched = engine.create_job(batch(1)).await.unwrap();
        engine
            .store()
            .set_job_status(orphaned, JobStatus::Processing)
            .await
            .unwrap();

        assert_eq!(engine.reconcile().await.unwrap(), vec![orphaned]);
        settle(&engine).await;

        assert_job!(engine.store(), orphaned, status: JobStatus::Completed, completed: 2);
        assert_job!(engine.store(), untouched, status: JobStatus::Pending, completed: 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deck_jobs_are_assembled() {
        let gateway = ScriptedGateway::default();
        let engine = engine(&gateway).with_assembler(RecordingAssembler::new());
        let job = JobBuilder::deck(
            "enhance",
            job::builder::DeckSource {
                filename: "deck.pdf".to_owned(),
                width: 800,
                height: 600,
            },
        )
        .add_slide(Image::new(vec![1; 4], "image/png"))
        .build()
        .unwrap();

        let job_id = engine.create_job(job).await.unwrap();

        assert_eq!(engine.run(job_id).await.unwrap(), RunOutcome::Completed);
        assert_eq!(
            engine.artifact(job_id).await.unwrap(),
            Some(RecordingAssembler::assembled())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn deck_jobs_fail_without_an_assembler() {
        let engine = engine(&ScriptedGateway::default());
        let job = NewJob::mock_job(1).with_kind(job::JobKind::Deck {
            filename: "deck.pdf".to_owned(),
            width: 800,
            height: 600,
        });
        let job_id = engine.create_job(job).await.unwrap();

        assert_eq!(engine.run(job_id).await.unwrap(), RunOutcome::Failed);
        assert_eq!(engine.artifact(job_id).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_shutdown_stops_drains() {
        let gateway = ScriptedGateway::default().with_latency(Duration::from_secs(5));
        let engine = engine(&gateway);
        let job_id = engine.submit(batch(3)).await.unwrap();
        gateway.wait_for_calls(1).await;

        engine.graceful_shutdown().await;

        assert!(!engine.is_running(job_id));
        assert_eq!(gateway.call_count(), 1);
        assert_job!(engine.store(), job_id, status: JobStatus::Failed, completed: 1);
    }
}
