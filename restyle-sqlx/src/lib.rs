//! A Postgres backed [`WorkStore`] for restyle.
//!
//! Every operation is a single statement, except job creation which inserts the job and its tasks
//! in one transaction. Counter updates are guarded in SQL, and the schema enforces the job and
//! task invariants with CHECK constraints.
//!
//! ```ignore
//! let store = RestylePgStore::connect("postgresql://localhost/restyle").await?;
//! store.migrate().await?;
//! let engine = Restyle::new(store, GeminiGateway::from_env()?);
//! ```
use std::ops::Deref;

use async_trait::async_trait;
use restyle::{
    job::{Image, Job, JobId, JobStatus},
    store::{NewJob, StoreError, WorkStore},
    task::{Task, TaskId, TaskUpdate},
};
use sqlx::{postgres::PgQueryResult, PgPool};
use tracing::instrument;

mod types;

use types::TaskColumns;

const JOB_COLUMNS: &str = "\
    id, kind, status, total_count, completed_count, failed_count, prompt, preset, aspect_ratio, \
    estimated_cost, inserted_at, completed_at";

const TASK_COLUMNS: &str = "\
    id, job_id, ordinal, name, status, input, input_mime_type, output, output_mime_type, error, \
    duration_ms, inserted_at";

const RESET_TASK: &str = "\
    UPDATE restyle_tasks SET \
    status = 'pending', output = NULL, output_mime_type = NULL, error = NULL, duration_ms = NULL";

#[derive(Clone, Debug)]
pub struct RestylePgStore {
    pool: PgPool,
}

impl Deref for RestylePgStore {
    type Target = PgPool;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}

impl From<PgPool> for RestylePgStore {
    fn from(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl From<&PgPool> for RestylePgStore {
    fn from(value: &PgPool) -> Self {
        Self {
            pool: value.to_owned(),
        }
    }
}

fn db_error(error: sqlx::Error) -> StoreError {
    tracing::error!(?error, "Database error: {error}");
    StoreError::Unavailable(error.to_string())
}

impl RestylePgStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        Ok(PgPool::connect(url).await.map_err(db_error)?.into())
    }

    /// Apply the embedded migrations creating the restyle tables.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!()
            .run(self.deref())
            .await
            .map_err(|error| {
                tracing::error!(?error, "Failed to migrate: {error}");
                StoreError::Unavailable(error.to_string())
            })
    }

    async fn job_exists(&self, id: JobId) -> Result<bool, StoreError> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM restyle_jobs WHERE id = $1)")
            .bind(i32::from(id))
            .fetch_one(self.deref())
            .await
            .map_err(db_error)
    }

    /// Map an update that touched no rows to the reason it did not apply.
    async fn expect_job_updated(
        &self,
        id: JobId,
        result: PgQueryResult,
        guard_failed: StoreError,
    ) -> Result<(), StoreError> {
        if result.rows_affected() > 0 {
            Ok(())
        } else if self.job_exists(id).await? {
            Err(guard_failed)
        } else {
            Err(StoreError::JobNotFound(id))
        }
    }

    async fn task_status(&self, id: TaskId) -> Result<Option<types::TaskStatus>, StoreError> {
        sqlx::query_scalar("SELECT status FROM restyle_tasks WHERE id = $1")
            .bind(i32::from(id))
            .fetch_optional(self.deref())
            .await
            .map_err(db_error)
    }

    /// Why a reset of a failed task touched no rows.
    async fn reset_rejected(&self, id: TaskId, job_id: Option<JobId>) -> StoreError {
        let task: Result<Option<(i32, types::TaskStatus)>, _> =
            sqlx::query_as("SELECT job_id, status FROM restyle_tasks WHERE id = $1")
                .bind(i32::from(id))
                .fetch_optional(self.deref())
                .await;
        match task {
            Err(error) => db_error(error),
            Ok(Some((owner, status)))
                if job_id.map_or(true, |job_id| i32::from(job_id) == owner) =>
            {
                StoreError::InvalidTransition {
                    task_id: id,
                    from: status.into(),
                    to: restyle::task::TaskStatus::Pending,
                }
            }
            Ok(_) => StoreError::TaskNotFound(id),
        }
    }
}

#[async_trait]
impl WorkStore for RestylePgStore {
    #[instrument(skip_all)]
    async fn create_job(&self, job: NewJob) -> Result<JobId, StoreError> {
        if job.tasks.is_empty() {
            return Err(StoreError::EmptyJob);
        }
        let total = i32::try_from(job.tasks.len()).map_err(|_| StoreError::BadState)?;
        let kind = serde_json::to_value(&job.kind)?;

        let mut tx = self.begin().await.map_err(db_error)?;
        let id: i32 = sqlx::query_scalar(
            r#"INSERT INTO restyle_jobs (
                kind,
                total_count,
                prompt,
                preset,
                aspect_ratio,
                estimated_cost
            ) VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(kind)
        .bind(total)
        .bind(&job.prompt)
        .bind(&job.preset)
        .bind(&job.aspect_ratio)
        .bind(job.estimated_cost)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;

        for task in &job.tasks {
            sqlx::query(
                r#"INSERT INTO restyle_tasks (
                    job_id,
                    ordinal,
                    name,
                    input,
                    input_mime_type
                ) VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(id)
            .bind(i64::from(task.ordinal))
            .bind(&task.name)
            .bind(&task.input.data)
            .bind(&task.input.mime_type)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }
        tx.commit().await.map_err(db_error)?;

        Ok(id.into())
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        sqlx::query_as::<_, types::Job>(&format!(
            "SELECT {JOB_COLUMNS} FROM restyle_jobs WHERE id = $1"
        ))
        .bind(i32::from(id))
        .fetch_optional(self.deref())
        .await
        .map_err(db_error)?
        .map(TryFrom::try_from)
        .transpose()
    }

    async fn get_tasks(&self, job_id: JobId) -> Result<Vec<Task>, StoreError> {
        sqlx::query_as::<_, types::Task>(&format!(
            "SELECT {TASK_COLUMNS} FROM restyle_tasks WHERE job_id = $1 ORDER BY ordinal"
        ))
        .bind(i32::from(job_id))
        .fetch_all(self.deref())
        .await
        .map_err(db_error)?
        .into_iter()
        .map(TryFrom::try_from)
        .collect()
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        sqlx::query_as::<_, types::Task>(&format!(
            "SELECT {TASK_COLUMNS} FROM restyle_tasks WHERE id = $1"
        ))
        .bind(i32::from(id))
        .fetch_optional(self.deref())
        .await
        .map_err(db_error)?
        .map(TryFrom::try_from)
        .transpose()
    }

    async fn next_pending_task(&self, job_id: JobId) -> Result<Option<Task>, StoreError> {
        sqlx::query_as::<_, types::Task>(&format!(
            r#"SELECT {TASK_COLUMNS}
            FROM restyle_tasks
            WHERE job_id = $1 AND status = 'pending'
            ORDER BY ordinal
            LIMIT 1
            "#
        ))
        .bind(i32::from(job_id))
        .fetch_optional(self.deref())
        .await
        .map_err(db_error)?
        .map(TryFrom::try_from)
        .transpose()
    }

    #[instrument(skip(self))]
    async fn set_job_status(&self, id: JobId, status: JobStatus) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"UPDATE restyle_jobs
            SET
                status = $2,
                completed_at = CASE WHEN $3 THEN now() ELSE NULL END
            WHERE id = $1"#,
        )
        .bind(i32::from(id))
        .bind(types::JobStatus::from(status))
        .bind(status.is_terminal())
        .execute(self.deref())
        .await
        .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::JobNotFound(id));
        }
        Ok(())
    }

    #[instrument(skip(self, update), fields(to = %update.status()))]
    async fn set_task_status(&self, id: TaskId, update: TaskUpdate) -> Result<(), StoreError> {
        let to = update.status();
        let from = to.required_predecessor().ok_or(StoreError::BadState)?;
        let columns = TaskColumns::new(id, &update)?;
        let result = sqlx::query(
            r#"UPDATE restyle_tasks
            SET
                status = $2,
                output = $3,
                output_mime_type = $4,
                error = $5,
                duration_ms = $6
            WHERE id = $1 AND status = $7"#,
        )
        .bind(i32::from(id))
        .bind(columns.status)
        .bind(columns.output.map(|image| image.data.as_slice()))
        .bind(columns.output.map(|image| image.mime_type.as_str()))
        .bind(columns.error)
        .bind(columns.duration_ms)
        .bind(types::TaskStatus::from(from))
        .execute(self.deref())
        .await
        .map_err(db_error)?;
        if result.rows_affected() > 0 {
            return Ok(());
        }
        match self.task_status(id).await? {
            None => Err(StoreError::TaskNotFound(id)),
            Some(current) => Err(StoreError::InvalidTransition {
                task_id: id,
                from: current.into(),
                to,
            }),
        }
    }

    async fn increment_job_progress(
        &self,
        job_id: JobId,
        failed: bool,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"UPDATE restyle_jobs
            SET
                completed_count = completed_count + 1,
                failed_count = failed_count + CASE WHEN $2 THEN 1 ELSE 0 END
            WHERE id = $1 AND completed_count < total_count"#,
        )
        .bind(i32::from(job_id))
        .bind(failed)
        .execute(self.deref())
        .await
        .map_err(db_error)?;
        self.expect_job_updated(job_id, result, StoreError::ProgressOutOfBounds(job_id))
            .await
    }

    async fn reset_task(&self, id: TaskId) -> Result<(), StoreError> {
        let result = sqlx::query(&format!("{RESET_TASK} WHERE id = $1 AND status = 'failed'"))
            .bind(i32::from(id))
            .execute(self.deref())
            .await
            .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(self.reset_rejected(id, None).await);
        }
        Ok(())
    }

    async fn decrement_job_progress_on_retry(&self, job_id: JobId) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"UPDATE restyle_jobs
            SET
                completed_count = completed_count - 1,
                failed_count = failed_count - 1
            WHERE id = $1 AND failed_count > 0"#,
        )
        .bind(i32::from(job_id))
        .execute(self.deref())
        .await
        .map_err(db_error)?;
        self.expect_job_updated(job_id, result, StoreError::ProgressOutOfBounds(job_id))
            .await
    }

    #[instrument(skip(self))]
    async fn reset_failed_task(&self, job_id: JobId, task_id: TaskId) -> Result<(), StoreError> {
        let mut tx = self.begin().await.map_err(db_error)?;
        let result = sqlx::query(&format!(
            "{RESET_TASK} WHERE id = $1 AND job_id = $2 AND status = 'failed'"
        ))
        .bind(i32::from(task_id))
        .bind(i32::from(job_id))
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;
        if result.rows_affected() == 0 {
            drop(tx);
            return Err(self.reset_rejected(task_id, Some(job_id)).await);
        }
        let result = sqlx::query(
            r#"UPDATE restyle_jobs
            SET
                completed_count = completed_count - 1,
                failed_count = failed_count - 1
            WHERE id = $1 AND failed_count > 0"#,
        )
        .bind(i32::from(job_id))
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::ProgressOutOfBounds(job_id));
        }
        tx.commit().await.map_err(db_error)
    }

    async fn list_jobs(&self, limit: u32, offset: u32) -> Result<Vec<Job>, StoreError> {
        sqlx::query_as::<_, types::Job>(&format!(
            r#"SELECT {JOB_COLUMNS}
            FROM restyle_jobs
            ORDER BY inserted_at DESC, id DESC
            LIMIT $1 OFFSET $2
            "#
        ))
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(self.deref())
        .await
        .map_err(db_error)?
        .into_iter()
        .map(TryFrom::try_from)
        .collect()
    }

    async fn jobs_with_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError> {
        sqlx::query_as::<_, types::Job>(&format!(
            "SELECT {JOB_COLUMNS} FROM restyle_jobs WHERE status = $1 ORDER BY id"
        ))
        .bind(types::JobStatus::from(status))
        .fetch_all(self.deref())
        .await
        .map_err(db_error)?
        .into_iter()
        .map(TryFrom::try_from)
        .collect()
    }

    async fn store_artifact(&self, job_id: JobId, artifact: Image) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"UPDATE restyle_jobs
            SET artifact = $2, artifact_mime_type = $3
            WHERE id = $1"#,
        )
        .bind(i32::from(job_id))
        .bind(artifact.data)
        .bind(artifact.mime_type)
        .execute(self.deref())
        .await
        .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::JobNotFound(job_id));
        }
        Ok(())
    }

    async fn get_artifact(&self, job_id: JobId) -> Result<Option<Image>, StoreError> {
        let row: Option<(Option<Vec<u8>>, Option<String>)> = sqlx::query_as(
            "SELECT artifact, artifact_mime_type FROM restyle_jobs WHERE id = $1",
        )
        .bind(i32::from(job_id))
        .fetch_optional(self.deref())
        .await
        .map_err(db_error)?;
        Ok(match row {
            Some((Some(data), Some(mime_type))) => Some(Image::new(data, mime_type)),
            _ => None,
        })
    }
}
