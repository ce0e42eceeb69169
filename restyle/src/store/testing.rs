//! Test suite for ensuring a correct implementation of a [`WorkStore`].
use std::time::Duration;

use crate::{
    job::{Image, JobId, JobKind, JobStatus},
    task::{TaskId, TaskStatus, TaskUpdate},
};

use super::*;

const MISSING_JOB: i32 = i32::MAX;
const MISSING_TASK: i32 = i32::MAX;
const DURATION: Duration = Duration::from_millis(1500);

impl NewJob {
    pub(crate) fn mock_job(tasks: u32) -> Self {
        Self::mock_job_with_ordinals((1..=tasks).collect())
    }

    pub(crate) fn mock_job_with_ordinals(ordinals: Vec<u32>) -> Self {
        Self {
            kind: JobKind::Batch,
            prompt: "enhance".to_owned(),
            preset: Some("watercolour".to_owned()),
            aspect_ratio: Some("16:9".to_owned()),
            estimated_cost: Some(0.039 * ordinals.len() as f64),
            tasks: ordinals
                .into_iter()
                .map(|ordinal| NewTask {
                    ordinal,
                    name: Some(format!("image-{ordinal}.png")),
                    input: Image::new(vec![ordinal as u8; 4], "image/png"),
                })
                .collect(),
        }
    }

    pub(crate) fn with_kind(self, kind: JobKind) -> Self {
        Self { kind, ..self }
    }
}

fn output() -> Image {
    Image::new(vec![42; 8], "image/jpeg")
}

/// Run the next pending task of the job to failure, recording progress when `record` is set.
async fn fail_next_task(store: &impl WorkStore, job_id: JobId, record: bool) -> TaskId {
    let task = store.next_pending_task(job_id).await.unwrap().unwrap();
    store
        .set_task_status(task.id, TaskUpdate::Processing)
        .await
        .unwrap();
    store
        .set_task_status(
            task.id,
            TaskUpdate::Failed {
                error: "rate limited".to_owned(),
                duration: DURATION,
            },
        )
        .await
        .unwrap();
    if record {
        store.increment_job_progress(job_id, true).await.unwrap();
    }
    task.id
}

/// Create test suite for a [`WorkStore`] implementation.
///
/// For store implementors, it is useful to include this as part of your test suites.
///
/// # Example
///
/// ```
/// use restyle::test_suite;
/// use restyle::store::memory::InMemoryStore;
/// test_suite!(for: InMemoryStore::new());
/// ```
///
/// If you are using a different async test attribute, or need additional attributes, you can
/// configure the macro to use those instead. For example when using `sqlx::test` you could do
/// the following:
///
/// ```ignore
/// use restyle::test_suite;
/// test_suite!(
///     attrs: [sqlx::test],
///     args: (pool: PgPool),
///     store: StoreImplementation::from(pool)
/// );
/// ```
#[macro_export]
macro_rules! test_suite {
    (for: $store:expr) => {
        $crate::test_suite!(attrs: [tokio::test], args: (), store: $store);
    };
    (attrs: $attrs:tt, args: $args:tt, store: $store:expr) => {
        $crate::test_suite!(
            @tests $attrs $args $store;
            create_job,
            create_job_rejects_empty_task_list,
            create_job_assigns_distinct_ids,
            create_job_persists_kind,
            reads_return_none_when_missing,
            get_tasks_orders_by_ordinal,
            next_pending_task_returns_lowest_ordinal,
            next_pending_task_returns_none_when_drained,
            set_job_status_stamps_completed_at,
            set_job_status_not_found,
            set_task_status_completed,
            set_task_status_failed,
            set_task_status_rejects_invalid_transitions,
            set_task_status_not_found,
            increment_job_progress,
            increment_job_progress_is_bounded_by_total,
            increment_job_progress_concurrently,
            increment_job_progress_not_found,
            reset_task_and_decrement_job_progress,
            reset_task_rejects_tasks_that_have_not_failed,
            decrement_job_progress_is_bounded_by_failures,
            reset_failed_task,
            reset_failed_task_rejects_tasks_that_have_not_failed,
            reset_failed_task_rejects_task_of_another_job,
            reset_failed_task_is_all_or_nothing,
            reset_failed_task_applies_once_under_contention,
            list_jobs_most_recent_first,
            jobs_with_status,
            artifacts,
            store_artifact_not_found,
        );
    };
    (@tests $attrs:tt $args:tt $store:expr; $($name:ident),+ $(,)?) => {
        $(
            $crate::test_suite!(@test $attrs $args $store; $name);
        )+
    };
    (@test [$($attr:meta),+ $(,)?] $args:tt $store:expr; $name:ident) => {
        $(#[$attr])+
        async fn $name $args {
            let store = $store;
            $crate::store::testing::$name(store).await;
        }
    };
}

pub use test_suite;

#[doc(hidden)]
pub async fn create_job(store: impl WorkStore) {
    let id = store.create_job(NewJob::mock_job(3)).await.unwrap();

    let job = store.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.id, id);
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.total_count, 3);
    assert_eq!(job.completed_count, 0);
    assert_eq!(job.failed_count, 0);
    assert_eq!(job.prompt, "enhance");
    assert_eq!(job.preset.as_deref(), Some("watercolour"));
    assert_eq!(job.aspect_ratio.as_deref(), Some("16:9"));
    assert_eq!(job.estimated_cost, Some(0.039 * 3.0));
    assert!(job.completed_at.is_none());

    let tasks = store.get_tasks(id).await.unwrap();
    assert_eq!(tasks.len(), 3);
    for task in tasks {
        assert_eq!(task.job_id, id);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.input, Image::new(vec![task.ordinal as u8; 4], "image/png"));
        assert_eq!(task.name, Some(format!("image-{}.png", task.ordinal)));
        assert!(task.output.is_none());
        assert!(task.error.is_none());
        assert!(task.duration.is_none());
    }
}

#[doc(hidden)]
pub async fn create_job_rejects_empty_task_list(store: impl WorkStore) {
    let result = store.create_job(NewJob::mock_job(0)).await;

    assert!(matches!(result, Err(StoreError::EmptyJob)));
    assert!(store.list_jobs(10, 0).await.unwrap().is_empty());
}

#[doc(hidden)]
pub async fn create_job_assigns_distinct_ids(store: impl WorkStore) {
    let id1 = store.create_job(NewJob::mock_job(2)).await.unwrap();
    let id2 = store.create_job(NewJob::mock_job(2)).await.unwrap();

    assert_ne!(id1, id2);
    let tasks1 = store.get_tasks(id1).await.unwrap();
    let tasks2 = store.get_tasks(id2).await.unwrap();
    assert!(tasks1
        .iter()
        .all(|task| tasks2.iter().all(|other| other.id != task.id)));
}

#[doc(hidden)]
pub async fn create_job_persists_kind(store: impl WorkStore) {
    let kind = JobKind::Deck {
        filename: "quarterly.pptx".to_owned(),
        width: 1280,
        height: 720,
    };
    let id = store
        .create_job(NewJob::mock_job(1).with_kind(kind.clone()))
        .await
        .unwrap();

    let job = store.get_job(id).await.unwrap().unwrap();

    assert_eq!(job.kind, kind);
}

#[doc(hidden)]
pub async fn reads_return_none_when_missing(store: impl WorkStore) {
    let job_id = JobId::from(MISSING_JOB);

    assert!(store.get_job(job_id).await.unwrap().is_none());
    assert!(store.get_tasks(job_id).await.unwrap().is_empty());
    assert!(store.next_pending_task(job_id).await.unwrap().is_none());
    assert!(store.get_artifact(job_id).await.unwrap().is_none());
    assert!(store
        .get_task(TaskId::from(MISSING_TASK))
        .await
        .unwrap()
        .is_none());
}

#[doc(hidden)]
pub async fn get_tasks_orders_by_ordinal(store: impl WorkStore) {
    let id = store
        .create_job(NewJob::mock_job_with_ordinals(vec![3, 1, 2]))
        .await
        .unwrap();

    let ordinals: Vec<_> = store
        .get_tasks(id)
        .await
        .unwrap()
        .into_iter()
        .map(|task| task.ordinal)
        .collect();

    assert_eq!(ordinals, [1, 2, 3]);
}

#[doc(hidden)]
pub async fn next_pending_task_returns_lowest_ordinal(store: impl WorkStore) {
    let id = store
        .create_job(NewJob::mock_job_with_ordinals(vec![2, 1, 3]))
        .await
        .unwrap();

    let first = store.next_pending_task(id).await.unwrap().unwrap();
    assert_eq!(first.ordinal, 1);

    store
        .set_task_status(first.id, TaskUpdate::Processing)
        .await
        .unwrap();

    let second = store.next_pending_task(id).await.unwrap().unwrap();
    assert_eq!(second.ordinal, 2);
}

#[doc(hidden)]
pub async fn next_pending_task_returns_none_when_drained(store: impl WorkStore) {
    let id = store.create_job(NewJob::mock_job(2)).await.unwrap();

    for task in store.get_tasks(id).await.unwrap() {
        store
            .set_task_status(task.id, TaskUpdate::Processing)
            .await
            .unwrap();
        store
            .set_task_status(
                task.id,
                TaskUpdate::Failed {
                    error: "failed".to_owned(),
                    duration: DURATION,
                },
            )
            .await
            .unwrap();
    }

    assert!(store.next_pending_task(id).await.unwrap().is_none());
}

#[doc(hidden)]
pub async fn set_job_status_stamps_completed_at(store: impl WorkStore) {
    let id = store.create_job(NewJob::mock_job(1)).await.unwrap();

    store
        .set_job_status(id, JobStatus::Processing)
        .await
        .unwrap();
    let job = store.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Processing);
    assert!(job.completed_at.is_none());

    store.set_job_status(id, JobStatus::Completed).await.unwrap();
    let job = store.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.completed_at.is_some());

    store
        .set_job_status(id, JobStatus::Processing)
        .await
        .unwrap();
    let job = store.get_job(id).await.unwrap().unwrap();
    assert!(job.completed_at.is_none());

    store.set_job_status(id, JobStatus::Failed).await.unwrap();
    let job = store.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.completed_at.is_some());
}

#[doc(hidden)]
pub async fn set_job_status_not_found(store: impl WorkStore) {
    let id = JobId::from(MISSING_JOB);

    let result = store.set_job_status(id, JobStatus::Failed).await;

    assert!(matches!(result, Err(StoreError::JobNotFound(job_id)) if job_id == id));
}

#[doc(hidden)]
pub async fn set_task_status_completed(store: impl WorkStore) {
    let id = store.create_job(NewJob::mock_job(1)).await.unwrap();
    let task = store.next_pending_task(id).await.unwrap().unwrap();

    store
        .set_task_status(task.id, TaskUpdate::Processing)
        .await
        .unwrap();
    assert_eq!(
        store.get_task(task.id).await.unwrap().unwrap().status,
        TaskStatus::Processing
    );

    store
        .set_task_status(
            task.id,
            TaskUpdate::Completed {
                output: output(),
                duration: DURATION,
            },
        )
        .await
        .unwrap();

    let task = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.output, Some(output()));
    assert!(task.error.is_none());
    assert_eq!(task.duration, Some(DURATION));
}

#[doc(hidden)]
pub async fn set_task_status_failed(store: impl WorkStore) {
    let id = store.create_job(NewJob::mock_job(1)).await.unwrap();
    let task = store.next_pending_task(id).await.unwrap().unwrap();

    store
        .set_task_status(task.id, TaskUpdate::Processing)
        .await
        .unwrap();
    store
        .set_task_status(
            task.id,
            TaskUpdate::Failed {
                error: "blocked by safety filter".to_owned(),
                duration: DURATION,
            },
        )
        .await
        .unwrap();

    let task = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.output.is_none());
    assert_eq!(task.error.as_deref(), Some("blocked by safety filter"));
    assert_eq!(task.duration, Some(DURATION));
}

#[doc(hidden)]
pub async fn set_task_status_rejects_invalid_transitions(store: impl WorkStore) {
    let id = store.create_job(NewJob::mock_job(1)).await.unwrap();
    let task = store.next_pending_task(id).await.unwrap().unwrap();

    let result = store
        .set_task_status(
            task.id,
            TaskUpdate::Completed {
                output: output(),
                duration: DURATION,
            },
        )
        .await;
    assert!(matches!(
        result,
        Err(StoreError::InvalidTransition {
            from: TaskStatus::Pending,
            to: TaskStatus::Completed,
            ..
        })
    ));

    store
        .set_task_status(task.id, TaskUpdate::Processing)
        .await
        .unwrap();
    let result = store
        .set_task_status(task.id, TaskUpdate::Processing)
        .await;
    assert!(matches!(
        result,
        Err(StoreError::InvalidTransition {
            from: TaskStatus::Processing,
            to: TaskStatus::Processing,
            ..
        })
    ));

    store
        .set_task_status(
            task.id,
            TaskUpdate::Completed {
                output: output(),
                duration: DURATION,
            },
        )
        .await
        .unwrap();
    let result = store
        .set_task_status(
            task.id,
            TaskUpdate::Failed {
                error: "late failure".to_owned(),
                duration: DURATION,
            },
        )
        .await;
    assert!(matches!(
        result,
        Err(StoreError::InvalidTransition {
            from: TaskStatus::Completed,
            to: TaskStatus::Failed,
            ..
        })
    ));

    let task = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.output, Some(output()));
    assert!(task.error.is_none());
}

#[doc(hidden)]
pub async fn set_task_status_not_found(store: impl WorkStore) {
    let id = TaskId::from(MISSING_TASK);

    let result = store.set_task_status(id, TaskUpdate::Processing).await;

    assert!(matches!(result, Err(StoreError::TaskNotFound(task_id)) if task_id == id));
}

#[doc(hidden)]
pub async fn increment_job_progress(store: impl WorkStore) {
    let id = store.create_job(NewJob::mock_job(3)).await.unwrap();

    store.increment_job_progress(id, false).await.unwrap();
    store.increment_job_progress(id, true).await.unwrap();

    let job = store.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.completed_count, 2);
    assert_eq!(job.failed_count, 1);
    assert_eq!(job.succeeded_count(), 1);
}

#[doc(hidden)]
pub async fn increment_job_progress_is_bounded_by_total(store: impl WorkStore) {
    let id = store.create_job(NewJob::mock_job(1)).await.unwrap();
    store.increment_job_progress(id, true).await.unwrap();

    let result = store.increment_job_progress(id, true).await;

    assert!(matches!(result, Err(StoreError::ProgressOutOfBounds(job_id)) if job_id == id));
    let job = store.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.completed_count, 1);
    assert_eq!(job.failed_count, 1);
}

#[doc(hidden)]
pub async fn increment_job_progress_concurrently(store: impl WorkStore) {
    let id = store.create_job(NewJob::mock_job(20)).await.unwrap();

    let results = futures::future::join_all(
        (0..20).map(|attempt| store.increment_job_progress(id, attempt % 4 == 0)),
    )
    .await;

    assert!(results.iter().all(Result::is_ok));
    let job = store.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.completed_count, 20);
    assert_eq!(job.failed_count, 5);
}

#[doc(hidden)]
pub async fn increment_job_progress_not_found(store: impl WorkStore) {
    let id = JobId::from(MISSING_JOB);

    let result = store.increment_job_progress(id, false).await;

    assert!(matches!(result, Err(StoreError::JobNotFound(job_id)) if job_id == id));
}

#[doc(hidden)]
pub async fn reset_task_and_decrement_job_progress(store: impl WorkStore) {
    let id = store.create_job(NewJob::mock_job(2)).await.unwrap();
    let task = store.next_pending_task(id).await.unwrap().unwrap();
    store
        .set_task_status(task.id, TaskUpdate::Processing)
        .await
        .unwrap();
    store
        .set_task_status(
            task.id,
            TaskUpdate::Failed {
                error: "rate limited".to_owned(),
                duration: DURATION,
            },
        )
        .await
        .unwrap();
    store.increment_job_progress(id, true).await.unwrap();

    store.reset_task(task.id).await.unwrap();
    store.decrement_job_progress_on_retry(id).await.unwrap();

    let task = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.output.is_none());
    assert!(task.error.is_none());
    assert!(task.duration.is_none());
    let job = store.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.completed_count, 0);
    assert_eq!(job.failed_count, 0);
    assert_eq!(
        store.next_pending_task(id).await.unwrap().map(|t| t.id),
        Some(task.id)
    );
}

#[doc(hidden)]
pub async fn decrement_job_progress_is_bounded_by_failures(store: impl WorkStore) {
    let id = store.create_job(NewJob::mock_job(2)).await.unwrap();
    store.increment_job_progress(id, false).await.unwrap();

    let result = store.decrement_job_progress_on_retry(id).await;

    assert!(matches!(result, Err(StoreError::ProgressOutOfBounds(job_id)) if job_id == id));
    let job = store.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.completed_count, 1);
    assert_eq!(job.failed_count, 0);
}

#[doc(hidden)]
pub async fn reset_task_rejects_tasks_that_have_not_failed(store: impl WorkStore) {
    let id = store.create_job(NewJob::mock_job(2)).await.unwrap();
    let tasks = store.get_tasks(id).await.unwrap();
    store
        .set_task_status(tasks[1].id, TaskUpdate::Processing)
        .await
        .unwrap();

    let pending = store.reset_task(tasks[0].id).await;
    let processing = store.reset_task(tasks[1].id).await;
    let missing = store.reset_task(TaskId::from(MISSING_TASK)).await;

    assert!(matches!(
        pending,
        Err(StoreError::InvalidTransition {
            from: TaskStatus::Pending,
            to: TaskStatus::Pending,
            ..
        })
    ));
    assert!(matches!(
        processing,
        Err(StoreError::InvalidTransition { from: TaskStatus::Processing, .. })
    ));
    assert!(matches!(missing, Err(StoreError::TaskNotFound(_))));
    let task = store.get_task(tasks[1].id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Processing);
}

#[doc(hidden)]
pub async fn reset_failed_task(store: impl WorkStore) {
    let id = store.create_job(NewJob::mock_job(3)).await.unwrap();
    let failed = fail_next_task(&store, id, true).await;
    fail_next_task(&store, id, true).await;

    store.reset_failed_task(id, failed).await.unwrap();

    let task = store.get_task(failed).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.error.is_none());
    assert!(task.duration.is_none());
    let job = store.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.completed_count, 1);
    assert_eq!(job.failed_count, 1);
}

#[doc(hidden)]
pub async fn reset_failed_task_rejects_tasks_that_have_not_failed(store: impl WorkStore) {
    let id = store.create_job(NewJob::mock_job(2)).await.unwrap();
    fail_next_task(&store, id, true).await;
    let pending = store.next_pending_task(id).await.unwrap().unwrap();

    let result = store.reset_failed_task(id, pending.id).await;

    assert!(matches!(
        result,
        Err(StoreError::InvalidTransition { from: TaskStatus::Pending, .. })
    ));
    let job = store.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.completed_count, 1);
    assert_eq!(job.failed_count, 1);
}

#[doc(hidden)]
pub async fn reset_failed_task_rejects_task_of_another_job(store: impl WorkStore) {
    let id = store.create_job(NewJob::mock_job(1)).await.unwrap();
    let other = store.create_job(NewJob::mock_job(1)).await.unwrap();
    let failed = fail_next_task(&store, id, true).await;

    let wrong_job = store.reset_failed_task(other, failed).await;
    let missing = store
        .reset_failed_task(id, TaskId::from(MISSING_TASK))
        .await;

    assert!(matches!(wrong_job, Err(StoreError::TaskNotFound(task_id)) if task_id == failed));
    assert!(matches!(missing, Err(StoreError::TaskNotFound(_))));
    let task = store.get_task(failed).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
}

#[doc(hidden)]
pub async fn reset_failed_task_is_all_or_nothing(store: impl WorkStore) {
    let id = store.create_job(NewJob::mock_job(1)).await.unwrap();
    // Without recorded progress the decrement is out of bounds.
    let failed = fail_next_task(&store, id, false).await;

    let result = store.reset_failed_task(id, failed).await;

    assert!(matches!(result, Err(StoreError::ProgressOutOfBounds(job_id)) if job_id == id));
    let task = store.get_task(failed).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.is_some());
    let job = store.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.completed_count, 0);
    assert_eq!(job.failed_count, 0);
}

#[doc(hidden)]
pub async fn reset_failed_task_applies_once_under_contention(store: impl WorkStore) {
    let id = store.create_job(NewJob::mock_job(3)).await.unwrap();
    let failed = fail_next_task(&store, id, true).await;
    fail_next_task(&store, id, true).await;

    let results =
        futures::future::join_all((0..5).map(|_| store.reset_failed_task(id, failed))).await;

    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    assert!(results.iter().filter_map(|result| result.as_ref().err()).all(|err| matches!(
        err,
        StoreError::InvalidTransition { from: TaskStatus::Pending, .. }
    )));
    let job = store.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.completed_count, 1);
    assert_eq!(job.failed_count, 1);
}

#[doc(hidden)]
pub async fn list_jobs_most_recent_first(store: impl WorkStore) {
    let id1 = store.create_job(NewJob::mock_job(1)).await.unwrap();
    let id2 = store.create_job(NewJob::mock_job(1)).await.unwrap();
    let id3 = store.create_job(NewJob::mock_job(1)).await.unwrap();

    let ids: Vec<_> = store
        .list_jobs(10, 0)
        .await
        .unwrap()
        .into_iter()
        .map(|job| job.id)
        .collect();
    assert_eq!(ids, [id3, id2, id1]);

    let ids: Vec<_> = store
        .list_jobs(1, 1)
        .await
        .unwrap()
        .into_iter()
        .map(|job| job.id)
        .collect();
    assert_eq!(ids, [id2]);
}

#[doc(hidden)]
pub async fn jobs_with_status(store: impl WorkStore) {
    let id1 = store.create_job(NewJob::mock_job(1)).await.unwrap();
    let id2 = store.create_job(NewJob::mock_job(1)).await.unwrap();
    store
        .set_job_status(id2, JobStatus::Processing)
        .await
        .unwrap();

    let processing: Vec<_> = store
        .jobs_with_status(JobStatus::Processing)
        .await
        .unwrap()
        .into_iter()
        .map(|job| job.id)
        .collect();
    let pending: Vec<_> = store
        .jobs_with_status(JobStatus::Pending)
        .await
        .unwrap()
        .into_iter()
        .map(|job| job.id)
        .collect();

    assert_eq!(processing, [id2]);
    assert_eq!(pending, [id1]);
}

#[doc(hidden)]
pub async fn artifacts(store: impl WorkStore) {
    let id = store.create_job(NewJob::mock_job(1)).await.unwrap();
    let first = Image::new(vec![1, 2, 3], "application/pdf");
    let second = Image::new(vec![4, 5, 6], "application/pdf");

    store.store_artifact(id, first.clone()).await.unwrap();
    assert_eq!(store.get_artifact(id).await.unwrap(), Some(first));

    store.store_artifact(id, second.clone()).await.unwrap();
    assert_eq!(store.get_artifact(id).await.unwrap(), Some(second));
}

#[doc(hidden)]
pub async fn store_artifact_not_found(store: impl WorkStore) {
    let id = JobId::from(MISSING_JOB);

    let result = store
        .store_artifact(id, Image::new(vec![1], "application/pdf"))
        .await;

    assert!(matches!(result, Err(StoreError::JobNotFound(job_id)) if job_id == id));
}
