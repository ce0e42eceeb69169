//! Jobs: one user-submitted unit of work made up of one or more [`Task`](crate::task::Task)s.
use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod builder;

/// The identifier of a [`Job`].
#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Clone, Copy, Hash)]
pub struct JobId(i32);

impl From<i32> for JobId {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl From<JobId> for i32 {
    fn from(value: JobId) -> Self {
        value.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JobId({})", self.0)
    }
}

/// An image payload together with its mime type.
#[derive(Clone, PartialEq, Eq)]
pub struct Image {
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl Image {
    pub fn new(data: impl Into<Vec<u8>>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }
}

// Image payloads can be megabytes, keep them out of logs.
impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("mime_type", &self.mime_type)
            .field("len", &self.data.len())
            .finish()
    }
}

/// The kind of job, determining what happens once all of its tasks have been processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobKind {
    /// A flat batch of independent images. Every task's output is its own deliverable.
    Batch,
    /// Slides extracted from a deck. Task outputs are composed back into a single deliverable
    /// with the dimensions of the source deck.
    Deck {
        filename: String,
        width: u32,
        height: u32,
    },
}

impl JobKind {
    pub fn requires_assembly(&self) -> bool {
        matches!(self, Self::Deck { .. })
    }
}

/// The status of a [`Job`].
///
/// The lifecycle is `Pending -> Processing -> {Completed | Failed}`, passing through `Assembling`
/// for kinds that require a composition step. Retrying a task of a finished job moves it back to
/// `Processing`, and cancellation moves it to `Failed` from any state.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Assembling,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Assembling => "assembling",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted job.
///
/// At all times `0 <= failed_count <= completed_count <= total_count`. Note `completed_count`
/// counts every task that has reached a terminal state, successful or not; the number of
/// successful tasks is given by [`Job::succeeded_count`].
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub total_count: u32,
    pub completed_count: u32,
    pub failed_count: u32,
    pub prompt: String,
    pub preset: Option<String>,
    pub aspect_ratio: Option<String>,
    pub estimated_cost: Option<f64>,
    pub inserted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn succeeded_count(&self) -> u32 {
        self.completed_count - self.failed_count
    }

    pub fn all_failed(&self) -> bool {
        self.failed_count == self.total_count
    }
}
