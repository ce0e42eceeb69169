//! The purpose of this module is to alleviate the need to import many of the `[restyle]` types.
//!
//! ```
//! # #![allow(unused_imports)]
//! use restyle::prelude::*;
//! ```
pub use crate::assembly::{Assembler, AssemblyError, Dimensions, Slide};
pub use crate::config::{ConfigError, EngineConfig};
pub use crate::gateway::gemini::{GeminiConfig, GeminiGateway};
pub use crate::gateway::{FailureKind, GenerationFailure, GenerationGateway, GenerationRequest};
pub use crate::job::builder::{DeckSource, JobBuilder};
pub use crate::job::{Image, Job, JobId, JobKind, JobStatus};
pub use crate::store::memory::InMemoryStore;
pub use crate::store::{NewJob, StoreError, WorkStore};
pub use crate::task::{Task, TaskId, TaskStatus};
pub use crate::{Restyle, RestyleError, RunOutcome};
