//! Provides an in memory implementation of [`WorkStore`].
//!
//! It is not optimized, instead it is designed to be a correct implementation for use in tests
//! and in single process setups where jobs need not survive a restart.
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicBool, AtomicI32, Ordering},
        Arc, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
};

use async_trait::async_trait;
use chrono::Utc;

use crate::{
    job::{Image, Job, JobId, JobStatus},
    task::{Task, TaskId, TaskStatus, TaskUpdate},
};

use super::{NewJob, StoreError, WorkStore};

#[derive(Default)]
struct State {
    jobs: BTreeMap<JobId, Job>,
    tasks: BTreeMap<TaskId, Task>,
    artifacts: HashMap<JobId, Image>,
}

/// An in memory implementation of [`WorkStore`].
///
/// Cloning is cheap and every clone shares the same underlying data.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
    job_ids: Arc<AtomicI32>,
    task_ids: Arc<AtomicI32>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryStore {
    /// Creates a new instance of [`InMemoryStore`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the underlying storage becoming unavailable (or available again).
    ///
    /// While unavailable every operation fails with [`StoreError::Unavailable`].
    pub fn simulate_outage(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("simulated outage".to_owned()))
        } else {
            Ok(())
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.check_available()?;
        self.state.read().map_err(|_| StoreError::BadState)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.check_available()?;
        self.state.write().map_err(|_| StoreError::BadState)
    }

    fn with_job<T>(
        &self,
        id: JobId,
        f: impl FnOnce(&mut Job) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self.write()?;
        match state.jobs.get_mut(&id) {
            None => Err(StoreError::JobNotFound(id)),
            Some(job) => f(job),
        }
    }

    fn with_task<T>(
        &self,
        id: TaskId,
        f: impl FnOnce(&mut Task) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self.write()?;
        match state.tasks.get_mut(&id) {
            None => Err(StoreError::TaskNotFound(id)),
            Some(task) => f(task),
        }
    }
}

impl Job {
    fn mark_status(&mut self, status: JobStatus) {
        self.status = status;
        self.completed_at = status.is_terminal().then(Utc::now);
    }

    fn record_progress(&mut self, failed: bool) -> Result<(), StoreError> {
        if self.completed_count >= self.total_count {
            return Err(StoreError::ProgressOutOfBounds(self.id));
        }
        self.completed_count += 1;
        if failed {
            self.failed_count += 1;
        }
        Ok(())
    }

    fn revert_failed_progress(&mut self) -> Result<(), StoreError> {
        if self.failed_count == 0 {
            return Err(StoreError::ProgressOutOfBounds(self.id));
        }
        self.completed_count -= 1;
        self.failed_count -= 1;
        Ok(())
    }
}

impl Task {
    fn apply(&mut self, update: TaskUpdate) -> Result<(), StoreError> {
        let to = update.status();
        if to.required_predecessor() != Some(self.status) {
            return Err(StoreError::InvalidTransition {
                task_id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        match update {
            TaskUpdate::Processing => {}
            TaskUpdate::Completed { output, duration } => {
                self.output = Some(output);
                self.error = None;
                self.duration = Some(duration);
            }
            TaskUpdate::Failed { error, duration } => {
                self.output = None;
                self.error = Some(error);
                self.duration = Some(duration);
            }
        }
        Ok(())
    }

    fn check_failed(&self) -> Result<(), StoreError> {
        if self.status != TaskStatus::Failed {
            return Err(StoreError::InvalidTransition {
                task_id: self.id,
                from: self.status,
                to: TaskStatus::Pending,
            });
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.status = TaskStatus::Pending;
        self.output = None;
        self.error = None;
        self.duration = None;
    }
}

#[async_trait]
impl WorkStore for InMemoryStore {
    async fn create_job(&self, job: NewJob) -> Result<JobId, StoreError> {
        if job.tasks.is_empty() {
            return Err(StoreError::EmptyJob);
        }
        let mut state = self.write()?;
        let id = JobId::from(self.job_ids.fetch_add(1, Ordering::SeqCst) + 1);
        let now = Utc::now();
        for task in job.tasks.iter() {
            let task_id = TaskId::from(self.task_ids.fetch_add(1, Ordering::SeqCst) + 1);
            state.tasks.insert(
                task_id,
                Task {
                    id: task_id,
                    job_id: id,
                    ordinal: task.ordinal,
                    name: task.name.clone(),
                    status: TaskStatus::Pending,
                    input: task.input.clone(),
                    output: None,
                    error: None,
                    duration: None,
                    inserted_at: now,
                },
            );
        }
        state.jobs.insert(
            id,
            Job {
                id,
                kind: job.kind,
                status: JobStatus::Pending,
                total_count: job.tasks.len() as u32,
                completed_count: 0,
                failed_count: 0,
                prompt: job.prompt,
                preset: job.preset,
                aspect_ratio: job.aspect_ratio,
                estimated_cost: job.estimated_cost,
                inserted_at: now,
                completed_at: None,
            },
        );
        Ok(id)
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.read()?.jobs.get(&id).cloned())
    }

    async fn get_tasks(&self, job_id: JobId) -> Result<Vec<Task>, StoreError> {
        let mut tasks: Vec<_> = self
            .read()?
            .tasks
            .values()
            .filter(|task| task.job_id == job_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|task| task.ordinal);
        Ok(tasks)
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.read()?.tasks.get(&id).cloned())
    }

    async fn next_pending_task(&self, job_id: JobId) -> Result<Option<Task>, StoreError> {
        Ok(self
            .read()?
            .tasks
            .values()
            .filter(|task| task.job_id == job_id && task.status == TaskStatus::Pending)
            .min_by_key(|task| task.ordinal)
            .cloned())
    }

    async fn set_job_status(&self, id: JobId, status: JobStatus) -> Result<(), StoreError> {
        self.with_job(id, |job| {
            job.mark_status(status);
            Ok(())
        })
    }

    async fn set_task_status(&self, id: TaskId, update: TaskUpdate) -> Result<(), StoreError> {
        self.with_task(id, |task| task.apply(update))
    }

    async fn increment_job_progress(
        &self,
        job_id: JobId,
        failed: bool,
    ) -> Result<(), StoreError> {
        self.with_job(job_id, |job| job.record_progress(failed))
    }

    async fn reset_task(&self, id: TaskId) -> Result<(), StoreError> {
        self.with_task(id, |task| {
            task.check_failed()?;
            task.reset();
            Ok(())
        })
    }

    async fn decrement_job_progress_on_retry(&self, job_id: JobId) -> Result<(), StoreError> {
        self.with_job(job_id, Job::revert_failed_progress)
    }

    async fn reset_failed_task(&self, job_id: JobId, task_id: TaskId) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let State { jobs, tasks, .. } = &mut *state;
        let task = tasks
            .get_mut(&task_id)
            .filter(|task| task.job_id == job_id)
            .ok_or(StoreError::TaskNotFound(task_id))?;
        let job = jobs
            .get_mut(&job_id)
            .ok_or(StoreError::JobNotFound(job_id))?;
        task.check_failed()?;
        job.revert_failed_progress()?;
        task.reset();
        Ok(())
    }

    async fn list_jobs(&self, limit: u32, offset: u32) -> Result<Vec<Job>, StoreError> {
        let mut jobs: Vec<_> = self.read()?.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.inserted_at.cmp(&a.inserted_at).then(b.id.cmp(&a.id)));
        Ok(jobs
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn jobs_with_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError> {
        Ok(self
            .read()?
            .jobs
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect())
    }

    async fn store_artifact(&self, job_id: JobId, artifact: Image) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if !state.jobs.contains_key(&job_id) {
            return Err(StoreError::JobNotFound(job_id));
        }
        state.artifacts.insert(job_id, artifact);
        Ok(())
    }

    async fn get_artifact(&self, job_id: JobId) -> Result<Option<Image>, StoreError> {
        Ok(self.read()?.artifacts.get(&job_id).cloned())
    }
}
