use std::{sync::Arc, time::Duration};

use tokio::time::Instant;
use tracing::{instrument, Instrument};

use crate::{
    gateway::{FailureKind, GenerationFailure, GenerationGateway, GenerationRequest},
    job::Job,
    store::{StoreError, WorkStore},
};

use super::{Task, TaskUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskOutcome {
    Completed,
    Failed(FailureKind),
}

/// Executes single tasks against the gateway, recording each outcome in the store.
pub(crate) struct TaskRunner<S> {
    store: S,
    gateway: Arc<dyn GenerationGateway>,
    timeout: Option<Duration>,
}

impl<S> TaskRunner<S>
where
    S: WorkStore,
{
    pub(crate) fn new(
        store: S,
        gateway: Arc<dyn GenerationGateway>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            store,
            gateway,
            timeout,
        }
    }

    /// Run the task to completion.
    ///
    /// Gateway failures, panics and timeouts are all recorded as a failed task. Only errors from
    /// the store itself are returned.
    #[instrument(skip_all, fields(job_id = %job.id, task_id = %task.id, ordinal = task.ordinal))]
    pub(crate) async fn run_task(&self, job: &Job, task: Task) -> Result<TaskOutcome, StoreError> {
        self.store
            .set_task_status(task.id, TaskUpdate::Processing)
            .await?;
        let started = Instant::now();

        let request = GenerationRequest {
            image: task.input,
            prompt: job.prompt.clone(),
            aspect_ratio: job.aspect_ratio.clone(),
        };
        let gateway = self.gateway.clone();
        let call = async move { gateway.generate(request).await };

        tracing::debug!("Generating image for task {}", task.id);
        let result = match self.timeout {
            Some(timeout) => tokio::spawn(tokio::time::timeout(timeout, call).in_current_span())
                .await
                .map(|result| result.unwrap_or_else(|_| Err(GenerationFailure::timed_out(timeout)))),
            None => tokio::spawn(call.in_current_span()).await,
        };
        let duration = started.elapsed();

        match result.map_err(GenerationFailure::from).and_then(|result| result) {
            Ok(output) => {
                tracing::debug!(?duration, "Task {} completed", task.id);
                self.store
                    .set_task_status(task.id, TaskUpdate::Completed { output, duration })
                    .await?;
                self.store.increment_job_progress(job.id, false).await?;
                Ok(TaskOutcome::Completed)
            }
            Err(failure) => {
                tracing::warn!(
                    kind = ?failure.kind,
                    ?duration,
                    "Task {} failed: {failure}",
                    task.id
                );
                let kind = failure.kind;
                self.store
                    .set_task_status(
                        task.id,
                        TaskUpdate::Failed {
                            error: failure.to_string(),
                            duration,
                        },
                    )
                    .await?;
                self.store.increment_job_progress(job.id, true).await?;
                Ok(TaskOutcome::Failed(kind))
            }
        }
    }
}
