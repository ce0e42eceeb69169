//! Tasks: the atomic sub-units of a [`Job`](crate::job::Job).
use std::{fmt::Display, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{Image, JobId};

pub(crate) mod runner;

/// The identifier of a [`Task`].
#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Clone, Copy, Hash)]
pub struct TaskId(i32);

impl From<i32> for TaskId {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl From<TaskId> for i32 {
    fn from(value: TaskId) -> Self {
        value.0
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

/// The status of a [`Task`].
///
/// Tasks move `Pending -> Processing -> {Completed | Failed}` and only return to `Pending` via
/// [`WorkStore::reset_task`](crate::store::WorkStore::reset_task).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// The status a task must currently have to move to `self`.
    pub fn required_predecessor(self) -> Option<TaskStatus> {
        match self {
            Self::Pending => None,
            Self::Processing => Some(Self::Pending),
            Self::Completed | Self::Failed => Some(Self::Processing),
        }
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted task.
///
/// `output` is set if and only if the task is [`TaskStatus::Completed`], and `error` if and only
/// if it is [`TaskStatus::Failed`].
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub job_id: JobId,
    /// Position of the task within its job: the processing and reassembly order.
    pub ordinal: u32,
    /// The original filename for batch items.
    pub name: Option<String>,
    pub status: TaskStatus,
    pub input: Image,
    pub output: Option<Image>,
    pub error: Option<String>,
    pub duration: Option<Duration>,
    pub inserted_at: DateTime<Utc>,
}

/// A status transition recorded through [`WorkStore::set_task_status`].
///
/// [`WorkStore::set_task_status`]: crate::store::WorkStore::set_task_status
#[derive(Debug, Clone, PartialEq)]
pub enum TaskUpdate {
    Processing,
    Completed { output: Image, duration: Duration },
    Failed { error: String, duration: Duration },
}

impl TaskUpdate {
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Processing => TaskStatus::Processing,
            Self::Completed { .. } => TaskStatus::Completed,
            Self::Failed { .. } => TaskStatus::Failed,
        }
    }
}
