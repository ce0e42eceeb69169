//! The post-drain composition step for job kinds that produce a single deliverable.
use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinError;

use crate::job::Image;

/// Composes the processed slides of a deck back into one deliverable.
///
/// Called at most once per drain, and only when at least one task succeeded.
#[async_trait]
pub trait Assembler: Send + Sync {
    async fn assemble(
        &self,
        slides: Vec<Slide>,
        dimensions: Dimensions,
    ) -> Result<Image, AssemblyError>;
}

/// One page of the deliverable, in ascending ordinal order.
#[derive(Debug, Clone, PartialEq)]
pub struct Slide {
    pub ordinal: u32,
    pub image: Image,
    /// Set when the task failed and `image` is its original input.
    pub fallback: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Error, PartialEq)]
pub enum AssemblyError {
    #[error("No assembler configured for deck jobs")]
    Unsupported,
    #[error("Assembly failed: {0}")]
    Failed(String),
}

impl From<JoinError> for AssemblyError {
    fn from(value: JoinError) -> Self {
        Self::Failed(crate::panic_message(value))
    }
}

/// The default [`Assembler`], refusing every deck.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unassembled;

#[async_trait]
impl Assembler for Unassembled {
    async fn assemble(&self, _: Vec<Slide>, _: Dimensions) -> Result<Image, AssemblyError> {
        Err(AssemblyError::Unsupported)
    }
}
