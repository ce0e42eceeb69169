//! The drain loop driving a job's tasks through the gateway one at a time.
use std::{sync::Arc, time::Duration};

use tracing::{instrument, Instrument};

use crate::{
    assembly::{Assembler, AssemblyError, Dimensions, Slide},
    config::EngineConfig,
    gateway::GenerationGateway,
    job::{Job, JobId, JobKind, JobStatus},
    store::{StoreError, WorkStore},
    supervisor::{Registration, Supervisor},
    task::runner::TaskRunner,
    RunOutcome,
};

pub(crate) struct JobProcessor<S> {
    store: S,
    runner: TaskRunner<S>,
    assembler: Arc<dyn Assembler>,
    supervisor: Supervisor,
    task_delay: Duration,
}

impl<S> JobProcessor<S>
where
    S: WorkStore + Clone + 'static,
{
    pub(crate) fn new(
        store: S,
        gateway: Arc<dyn GenerationGateway>,
        assembler: Arc<dyn Assembler>,
        supervisor: Supervisor,
        config: &EngineConfig,
    ) -> Self {
        Self {
            runner: TaskRunner::new(store.clone(), gateway, config.gateway_timeout),
            store,
            assembler,
            supervisor,
            task_delay: config.task_delay,
        }
    }

    /// Drain every pending task of the job, then finalize it.
    ///
    /// At most one drain runs per job: while one is active further calls return
    /// [`RunOutcome::AlreadyRunning`]. The job is deregistered from the [`Supervisor`] on every
    /// exit path, including store errors.
    #[instrument(skip(self))]
    pub(crate) async fn run(&self, job_id: JobId) -> Result<RunOutcome, StoreError> {
        let Some(registration) = self.supervisor.try_register(job_id) else {
            tracing::debug!("Job {job_id} already has an active drain");
            return Ok(RunOutcome::AlreadyRunning);
        };
        let Some(job) = self.store.get_job(job_id).await? else {
            tracing::error!("Cannot process job {job_id}: not found");
            return Ok(RunOutcome::NotFound);
        };

        tracing::debug!("Processing job {job_id}");
        self.store
            .set_job_status(job_id, JobStatus::Processing)
            .await?;
        self.drain(&job, &registration).await?;
        if registration.is_cancelled() {
            return self.cancelled(&registration).await;
        }

        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(StoreError::JobNotFound(job_id))?;
        self.finalize(job, &registration).await
    }

    /// Fail a deactivated job, unless a newer drain has taken it over.
    async fn cancelled(&self, registration: &Registration) -> Result<RunOutcome, StoreError> {
        let job_id = registration.job_id();
        if registration.is_superseded() {
            tracing::debug!("Job {job_id} was cancelled and restarted");
        } else {
            tracing::debug!("Job {job_id} was cancelled");
            self.store.set_job_status(job_id, JobStatus::Failed).await?;
        }
        Ok(RunOutcome::Cancelled)
    }

    async fn complete(&self, registration: &Registration) -> Result<RunOutcome, StoreError> {
        if registration.is_cancelled() {
            return self.cancelled(registration).await;
        }
        self.store
            .set_job_status(registration.job_id(), JobStatus::Completed)
            .await?;
        Ok(RunOutcome::Completed)
    }

    async fn drain(&self, job: &Job, registration: &Registration) -> Result<(), StoreError> {
        while !registration.is_cancelled() {
            let Some(task) = self.store.next_pending_task(job.id).await? else {
                break;
            };
            self.runner.run_task(job, task).await?;
            tokio::select! {
                _ = tokio::time::sleep(self.task_delay) => {}
                _ = registration.cancelled() => {}
            }
        }
        Ok(())
    }

    async fn finalize(
        &self,
        job: Job,
        registration: &Registration,
    ) -> Result<RunOutcome, StoreError> {
        if job.all_failed() {
            tracing::debug!("Every task of job {} failed", job.id);
            self.store.set_job_status(job.id, JobStatus::Failed).await?;
            return Ok(RunOutcome::Failed);
        }
        let JobKind::Deck { width, height, .. } = job.kind else {
            return self.complete(registration).await;
        };

        self.store
            .set_job_status(job.id, JobStatus::Assembling)
            .await?;
        let slides = self.slides(job.id).await?;
        let assembler = self.assembler.clone();
        let dimensions = Dimensions { width, height };
        let assembled = tokio::spawn(
            async move { assembler.assemble(slides, dimensions).await }.in_current_span(),
        )
        .await
        .map_err(AssemblyError::from)
        .and_then(|result| result);

        if registration.is_cancelled() {
            return self.cancelled(registration).await;
        }
        match assembled {
            Ok(artifact) => {
                self.store.store_artifact(job.id, artifact).await?;
                tracing::debug!("Job {} assembled", job.id);
                self.complete(registration).await
            }
            Err(error) => {
                tracing::error!(?error, "Failed to assemble job {}: {error}", job.id);
                self.store.set_job_status(job.id, JobStatus::Failed).await?;
                Ok(RunOutcome::Failed)
            }
        }
    }

    /// The pages of the deliverable: task outputs, or the original input for tasks that failed.
    async fn slides(&self, job_id: JobId) -> Result<Vec<Slide>, StoreError> {
        Ok(self
            .store
            .get_tasks(job_id)
            .await?
            .into_iter()
            .map(|task| match task.output {
                Some(image) => Slide {
                    ordinal: task.ordinal,
                    image,
                    fallback: false,
                },
                None => Slide {
                    ordinal: task.ordinal,
                    image: task.input,
                    fallback: true,
                },
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use async_trait::async_trait;

    use super::*;
    use crate::{
        assert_job,
        gateway::FailureKind,
        job::Image,
        store::{memory::InMemoryStore, NewJob},
        task::TaskStatus,
        testing::{RecordingAssembler, Script, ScriptedGateway},
    };

    fn deck() -> JobKind {
        JobKind::Deck {
            filename: "deck.pptx".to_owned(),
            width: 1280,
            height: 720,
        }
    }

    fn processor(
        store: &InMemoryStore,
        gateway: &ScriptedGateway,
        assembler: impl Assembler + 'static,
    ) -> (Arc<JobProcessor<InMemoryStore>>, Supervisor) {
        let supervisor = Supervisor::new();
        let processor = JobProcessor::new(
            store.clone(),
            Arc::new(gateway.clone()),
            Arc::new(assembler),
            supervisor.clone(),
            &EngineConfig::new(),
        );
        (Arc::new(processor), supervisor)
    }

    #[tokio::test(start_paused = true)]
    async fn tasks_run_in_ordinal_order_one_at_a_time() {
        let store = InMemoryStore::new();
        let id = store
            .create_job(NewJob::mock_job_with_ordinals(vec![3, 1, 2]))
            .await
            .unwrap();
        let gateway = ScriptedGateway::default().with_latency(Duration::from_millis(300));
        let (processor, supervisor) = processor(&store, &gateway, RecordingAssembler::new());

        let outcome = processor.run(id).await.unwrap();

        assert_eq!(outcome, RunOutcome::Completed);
        let calls = gateway.calls();
        let ordinals: Vec<_> = calls.iter().map(|call| call.request.image.data[0]).collect();
        assert_eq!(ordinals, vec![1, 2, 3]);
        for pair in calls.windows(2) {
            assert!(pair[1].started_at - pair[0].started_at >= Duration::from_secs(1));
        }
        assert_eq!(gateway.max_in_flight(), 1);
        assert!(!supervisor.is_active(id));
        let job = assert_job!(
            store,
            id,
            status: JobStatus::Completed,
            total: 3,
            completed: 3,
            failed: 0,
        );
        assert!(job.completed_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn second_run_is_a_no_op() {
        let store = InMemoryStore::new();
        let id = store.create_job(NewJob::mock_job(3)).await.unwrap();
        let gateway = ScriptedGateway::default().with_latency(Duration::from_secs(2));
        let (processor, _) = processor(&store, &gateway, RecordingAssembler::new());

        let first = tokio::spawn({
            let processor = processor.clone();
            async move { processor.run(id).await }
        });
        gateway.wait_for_calls(1).await;

        assert_eq!(processor.run(id).await.unwrap(), RunOutcome::AlreadyRunning);
        assert_eq!(first.await.unwrap().unwrap(), RunOutcome::Completed);
        assert_eq!(gateway.call_count(), 3);
        assert_eq!(gateway.max_in_flight(), 1);
        assert_job!(store, id, status: JobStatus::Completed, completed: 3, failed: 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_scheduling() {
        let store = InMemoryStore::new();
        let id = store.create_job(NewJob::mock_job(5)).await.unwrap();
        let gateway = ScriptedGateway::default().with_latency(Duration::from_secs(10));
        let (processor, supervisor) = processor(&store, &gateway, RecordingAssembler::new());

        let drain = tokio::spawn({
            let processor = processor.clone();
            async move { processor.run(id).await }
        });
        gateway.wait_for_calls(1).await;
        assert!(supervisor.deactivate(id));

        assert_eq!(drain.await.unwrap().unwrap(), RunOutcome::Cancelled);
        assert_eq!(gateway.call_count(), 1);
        let statuses: Vec<_> = store
            .get_tasks(id)
            .await
            .unwrap()
            .into_iter()
            .map(|task| task.status)
            .collect();
        assert_eq!(
            statuses,
            vec![
                TaskStatus::Completed,
                TaskStatus::Pending,
                TaskStatus::Pending,
                TaskStatus::Pending,
                TaskStatus::Pending,
            ]
        );
        assert_job!(store, id, status: JobStatus::Failed, total: 5, completed: 1, failed: 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_task_delay() {
        let store = InMemoryStore::new();
        let id = store.create_job(NewJob::mock_job(2)).await.unwrap();
        let gateway = ScriptedGateway::default();
        let supervisor = Supervisor::new();
        let processor = Arc::new(JobProcessor::new(
            store.clone(),
            Arc::new(gateway.clone()),
            Arc::new(RecordingAssembler::new()),
            supervisor.clone(),
            &EngineConfig::new().with_task_delay(Duration::from_secs(3600)),
        ));

        let drain = tokio::spawn({
            let processor = processor.clone();
            async move { processor.run(id).await }
        });
        gateway.wait_for_calls(1).await;
        let started = tokio::time::Instant::now();
        supervisor.deactivate(id);

        assert_eq!(drain.await.unwrap().unwrap(), RunOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(3600));
    }

    #[tokio::test(start_paused = true)]
    async fn all_failed_skips_assembly() {
        let store = InMemoryStore::new();
        let id = store
            .create_job(NewJob::mock_job(2).with_kind(deck()))
            .await
            .unwrap();
        let gateway = ScriptedGateway::new([
            Script::fail(FailureKind::RateLimited, "HTTP 429"),
            Script::fail(FailureKind::NoResponse, "no image"),
        ]);
        let assembler = RecordingAssembler::new();
        let (processor, _) = processor(&store, &gateway, assembler.clone());

        assert_eq!(processor.run(id).await.unwrap(), RunOutcome::Failed);

        assert!(assembler.calls().is_empty());
        assert_job!(store, id, status: JobStatus::Failed, total: 2, completed: 2, failed: 2);
    }

    #[tokio::test(start_paused = true)]
    async fn deck_assembly_falls_back_to_input_for_failed_tasks() {
        let store = InMemoryStore::new();
        let id = store
            .create_job(NewJob::mock_job(2).with_kind(deck()))
            .await
            .unwrap();
        let styled = Image::new(vec![100; 4], "image/png");
        let gateway = ScriptedGateway::new([
            Script::Succeed(styled.clone()),
            Script::fail(FailureKind::SafetyFiltered, "Response blocked: SAFETY"),
        ]);
        let assembler = RecordingAssembler::new();
        let (processor, _) = processor(&store, &gateway, assembler.clone());

        assert_eq!(processor.run(id).await.unwrap(), RunOutcome::Completed);

        assert_job!(store, id, status: JobStatus::Completed, total: 2, completed: 2, failed: 1);
        let tasks = store.get_tasks(id).await.unwrap();
        assert_eq!(tasks[0].output, Some(styled.clone()));
        assert_matches!(&tasks[1].error, Some(error) if error.contains("safety"));
        assert_eq!(
            assembler.calls(),
            vec![(
                vec![
                    Slide {
                        ordinal: 1,
                        image: styled,
                        fallback: false
                    },
                    Slide {
                        ordinal: 2,
                        image: tasks[1].input.clone(),
                        fallback: true
                    },
                ],
                Dimensions {
                    width: 1280,
                    height: 720
                }
            )]
        );
        assert_eq!(
            store.get_artifact(id).await.unwrap(),
            Some(RecordingAssembler::assembled())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn batch_jobs_skip_assembly() {
        let store = InMemoryStore::new();
        let id = store.create_job(NewJob::mock_job(2)).await.unwrap();
        let gateway = ScriptedGateway::new([Script::fail(FailureKind::Unknown, "boom")]);
        let assembler = RecordingAssembler::new();
        let (processor, _) = processor(&store, &gateway, assembler.clone());

        assert_eq!(processor.run(id).await.unwrap(), RunOutcome::Completed);

        assert!(assembler.calls().is_empty());
        assert_eq!(store.get_artifact(id).await.unwrap(), None);
        assert_job!(store, id, status: JobStatus::Completed, completed: 2, failed: 1);
    }

    #[tokio::test(start_paused = true)]
    async fn assembly_failure_fails_the_job() {
        let store = InMemoryStore::new();
        let id = store
            .create_job(NewJob::mock_job(1).with_kind(deck()))
            .await
            .unwrap();
        let gateway = ScriptedGateway::default();
        let assembler = RecordingAssembler::new().failing("converter crashed");
        let (processor, supervisor) = processor(&store, &gateway, assembler);

        assert_eq!(processor.run(id).await.unwrap(), RunOutcome::Failed);

        assert!(!supervisor.is_active(id));
        assert_eq!(store.get_artifact(id).await.unwrap(), None);
        assert_job!(store, id, status: JobStatus::Failed, completed: 1, failed: 0);
    }

    struct PanickingAssembler;

    #[async_trait]
    impl Assembler for PanickingAssembler {
        async fn assemble(&self, _: Vec<Slide>, _: Dimensions) -> Result<Image, AssemblyError> {
            panic!("converter exploded")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn assembler_panic_fails_the_job() {
        let store = InMemoryStore::new();
        let id = store
            .create_job(NewJob::mock_job(1).with_kind(deck()))
            .await
            .unwrap();
        let gateway = ScriptedGateway::default();
        let (processor, _) = processor(&store, &gateway, PanickingAssembler);

        assert_eq!(processor.run(id).await.unwrap(), RunOutcome::Failed);

        assert_job!(store, id, status: JobStatus::Failed);
    }

    struct SlowAssembler;

    #[async_trait]
    impl Assembler for SlowAssembler {
        async fn assemble(&self, _: Vec<Slide>, _: Dimensions) -> Result<Image, AssemblyError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(RecordingAssembler::assembled())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_assembly_fails_the_job() {
        let store = InMemoryStore::new();
        let id = store
            .create_job(NewJob::mock_job(2).with_kind(deck()))
            .await
            .unwrap();
        let gateway = ScriptedGateway::default();
        let (processor, supervisor) = processor(&store, &gateway, SlowAssembler);

        let drain = tokio::spawn({
            let processor = processor.clone();
            async move { processor.run(id).await }
        });
        while store.get_job(id).await.unwrap().unwrap().status != JobStatus::Assembling {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(supervisor.deactivate(id));

        assert_eq!(drain.await.unwrap().unwrap(), RunOutcome::Cancelled);
        assert_eq!(store.get_artifact(id).await.unwrap(), None);
        assert!(!supervisor.is_active(id));
        assert_job!(store, id, status: JobStatus::Failed, completed: 2, failed: 0);
    }

    #[tokio::test(start_paused = true)]
    async fn store_failure_still_deregisters() {
        let store = InMemoryStore::new();
        let id = store.create_job(NewJob::mock_job(3)).await.unwrap();
        let gateway = ScriptedGateway::default().with_latency(Duration::from_secs(1));
        let (processor, supervisor) = processor(&store, &gateway, RecordingAssembler::new());

        let drain = tokio::spawn({
            let processor = processor.clone();
            async move { processor.run(id).await }
        });
        gateway.wait_for_calls(1).await;
        store.simulate_outage(true);

        assert_matches!(drain.await.unwrap(), Err(StoreError::Unavailable(_)));
        assert!(!supervisor.is_active(id));
        assert!(supervisor.try_register(id).is_some());
    }

    #[tokio::test]
    async fn missing_job() {
        let store = InMemoryStore::new();
        let gateway = ScriptedGateway::default();
        let (processor, supervisor) = processor(&store, &gateway, RecordingAssembler::new());
        let id = JobId::from(404);

        assert_eq!(processor.run(id).await.unwrap(), RunOutcome::NotFound);
        assert!(!supervisor.is_active(id));
    }
}
