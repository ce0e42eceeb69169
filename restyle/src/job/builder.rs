use crate::{
    store::{NewJob, NewTask},
    RestyleError,
};

use super::{Image, JobKind};

/// The source deck a [`JobKind::Deck`] job was extracted from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeckSource {
    pub filename: String,
    pub width: u32,
    pub height: u32,
}

/// Builds a [`NewJob`] ready to be handed to [`Restyle::submit`](crate::Restyle::submit).
///
/// # Example
///
/// ```
/// # use restyle::prelude::*;
/// let job = JobBuilder::batch("enhance")
///     .with_preset("watercolour")
///     .with_aspect_ratio("4:3")
///     .add_image("cat.png", Image::new(vec![0u8; 16], "image/png"))
///     .add_image("dog.jpg", Image::new(vec![1u8; 16], "image/jpeg"))
///     .build()
///     .unwrap();
///
/// assert_eq!(job.tasks.len(), 2);
/// assert_eq!(job.tasks[1].ordinal, 2);
/// ```
#[derive(Debug, Clone)]
pub struct JobBuilder {
    kind: JobKind,
    prompt: String,
    preset: Option<String>,
    aspect_ratio: Option<String>,
    tasks: Vec<NewTask>,
}

impl JobBuilder {
    /// A flat batch of independent images.
    pub fn batch(prompt: impl Into<String>) -> Self {
        Self::new(JobKind::Batch, prompt)
    }

    /// Slides of a deck, reassembled into a single deliverable once processed.
    pub fn deck(prompt: impl Into<String>, source: DeckSource) -> Self {
        Self::new(
            JobKind::Deck {
                filename: source.filename,
                width: source.width,
                height: source.height,
            },
            prompt,
        )
    }

    fn new(kind: JobKind, prompt: impl Into<String>) -> Self {
        Self {
            kind,
            prompt: prompt.into(),
            preset: None,
            aspect_ratio: None,
            tasks: Vec::new(),
        }
    }

    pub fn with_preset(self, preset: impl Into<String>) -> Self {
        Self {
            preset: Some(preset.into()),
            ..self
        }
    }

    pub fn with_aspect_ratio(self, aspect_ratio: impl Into<String>) -> Self {
        Self {
            aspect_ratio: Some(aspect_ratio.into()),
            ..self
        }
    }

    /// Add a named image, taking the ordinal after the highest one added so far.
    pub fn add_image(self, name: impl Into<String>, image: Image) -> Self {
        let ordinal = self.next_ordinal();
        self.add_task_at(ordinal, Some(name.into()), image)
    }

    /// Add a slide, numbered after the highest one added so far.
    pub fn add_slide(self, image: Image) -> Self {
        let ordinal = self.next_ordinal();
        self.add_task_at(ordinal, None, image)
    }

    pub fn add_task_at(mut self, ordinal: u32, name: Option<String>, image: Image) -> Self {
        self.tasks.push(NewTask {
            ordinal,
            name,
            input: image,
        });
        self
    }

    fn next_ordinal(&self) -> u32 {
        self.tasks
            .iter()
            .map(|task| task.ordinal)
            .max()
            .map_or(1, |ordinal| ordinal + 1)
    }

    pub fn build(mut self) -> Result<NewJob, RestyleError> {
        validate_tasks(&mut self.tasks)?;
        Ok(NewJob {
            kind: self.kind,
            prompt: self.prompt,
            preset: self.preset,
            aspect_ratio: self.aspect_ratio,
            estimated_cost: None,
            tasks: self.tasks,
        })
    }
}

/// Sorts the tasks by ordinal, rejecting empty task lists and duplicate ordinals.
pub(crate) fn validate_tasks(tasks: &mut [NewTask]) -> Result<(), RestyleError> {
    if tasks.is_empty() {
        return Err(RestyleError::EmptyJob);
    }
    tasks.sort_by_key(|task| task.ordinal);
    match tasks
        .windows(2)
        .find(|pair| pair[0].ordinal == pair[1].ordinal)
    {
        Some(pair) => Err(RestyleError::DuplicateOrdinal(pair[0].ordinal)),
        None => Ok(()),
    }
}
