use std::time::Duration;

use chrono::{DateTime, Utc};
use restyle::{
    job::Image,
    store::StoreError,
    task::{TaskId, TaskUpdate},
};
use sqlx::prelude::FromRow;

#[derive(sqlx::Type, Debug, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "restyle_job_status", rename_all = "lowercase")]
pub(crate) enum JobStatus {
    Pending,
    Processing,
    Assembling,
    Completed,
    Failed,
}

impl From<JobStatus> for restyle::job::JobStatus {
    fn from(value: JobStatus) -> Self {
        match value {
            JobStatus::Pending => Self::Pending,
            JobStatus::Processing => Self::Processing,
            JobStatus::Assembling => Self::Assembling,
            JobStatus::Completed => Self::Completed,
            JobStatus::Failed => Self::Failed,
        }
    }
}

impl From<restyle::job::JobStatus> for JobStatus {
    fn from(value: restyle::job::JobStatus) -> Self {
        match value {
            restyle::job::JobStatus::Pending => Self::Pending,
            restyle::job::JobStatus::Processing => Self::Processing,
            restyle::job::JobStatus::Assembling => Self::Assembling,
            restyle::job::JobStatus::Completed => Self::Completed,
            restyle::job::JobStatus::Failed => Self::Failed,
        }
    }
}

#[derive(sqlx::Type, Debug, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "restyle_task_status", rename_all = "lowercase")]
pub(crate) enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl From<TaskStatus> for restyle::task::TaskStatus {
    fn from(value: TaskStatus) -> Self {
        match value {
            TaskStatus::Pending => Self::Pending,
            TaskStatus::Processing => Self::Processing,
            TaskStatus::Completed => Self::Completed,
            TaskStatus::Failed => Self::Failed,
        }
    }
}

impl From<restyle::task::TaskStatus> for TaskStatus {
    fn from(value: restyle::task::TaskStatus) -> Self {
        match value {
            restyle::task::TaskStatus::Pending => Self::Pending,
            restyle::task::TaskStatus::Processing => Self::Processing,
            restyle::task::TaskStatus::Completed => Self::Completed,
            restyle::task::TaskStatus::Failed => Self::Failed,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct Job {
    pub id: i32,
    pub kind: serde_json::Value,
    pub status: JobStatus,
    pub total_count: i32,
    pub completed_count: i32,
    pub failed_count: i32,
    pub prompt: String,
    pub preset: Option<String>,
    pub aspect_ratio: Option<String>,
    pub estimated_cost: Option<f64>,
    pub inserted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<Job> for restyle::job::Job {
    type Error = StoreError;

    fn try_from(value: Job) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.id.into(),
            kind: serde_json::from_value(value.kind)?,
            status: value.status.into(),
            total_count: count(value.total_count)?,
            completed_count: count(value.completed_count)?,
            failed_count: count(value.failed_count)?,
            prompt: value.prompt,
            preset: value.preset,
            aspect_ratio: value.aspect_ratio,
            estimated_cost: value.estimated_cost,
            inserted_at: value.inserted_at,
            completed_at: value.completed_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct Task {
    pub id: i32,
    pub job_id: i32,
    pub ordinal: i64,
    pub name: Option<String>,
    pub status: TaskStatus,
    pub input: Vec<u8>,
    pub input_mime_type: String,
    pub output: Option<Vec<u8>>,
    pub output_mime_type: Option<String>,
    pub error: Option<String>,
    pub duration_ms: Option<i64>,
    pub inserted_at: DateTime<Utc>,
}

impl TryFrom<Task> for restyle::task::Task {
    type Error = StoreError;

    fn try_from(value: Task) -> Result<Self, Self::Error> {
        let output = match (value.output, value.output_mime_type) {
            (Some(data), Some(mime_type)) => Some(Image::new(data, mime_type)),
            (None, None) => None,
            _ => return Err(StoreError::BadState),
        };
        let duration = value
            .duration_ms
            .map(|millis| u64::try_from(millis).map(Duration::from_millis))
            .transpose()
            .map_err(|_| StoreError::BadState)?;
        Ok(Self {
            id: value.id.into(),
            job_id: value.job_id.into(),
            ordinal: u32::try_from(value.ordinal).map_err(|_| StoreError::BadState)?,
            name: value.name,
            status: value.status.into(),
            input: Image::new(value.input, value.input_mime_type),
            output,
            error: value.error,
            duration,
            inserted_at: value.inserted_at,
        })
    }
}

fn count(value: i32) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::BadState)
}

/// The columns written by a [`TaskUpdate`].
pub(crate) struct TaskColumns<'a> {
    pub status: TaskStatus,
    pub output: Option<&'a Image>,
    pub error: Option<&'a str>,
    pub duration_ms: Option<i64>,
}

impl<'a> TaskColumns<'a> {
    pub(crate) fn new(task_id: TaskId, update: &'a TaskUpdate) -> Result<Self, StoreError> {
        let millis = |duration: &Duration| {
            i64::try_from(duration.as_millis()).map_err(|_| {
                tracing::error!(%task_id, ?duration, "Duration of task {task_id} out of range");
                StoreError::BadState
            })
        };
        Ok(match update {
            TaskUpdate::Processing => Self {
                status: TaskStatus::Processing,
                output: None,
                error: None,
                duration_ms: None,
            },
            TaskUpdate::Completed { output, duration } => Self {
                status: TaskStatus::Completed,
                output: Some(output),
                error: None,
                duration_ms: Some(millis(duration)?),
            },
            TaskUpdate::Failed { error, duration } => Self {
                status: TaskStatus::Failed,
                output: None,
                error: Some(error),
                duration_ms: Some(millis(duration)?),
            },
        })
    }
}
