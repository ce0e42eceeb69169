//! The boundary to the external image generation provider.
//!
//! A [`GenerationGateway`] performs exactly one generation call: no retries, no state. Failures
//! are classified into a [`FailureKind`] purely so that callers can present a sensible message.
use std::{fmt::Display, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinError;

use crate::job::Image;

pub mod gemini;

/// A single image generation call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerationGateway: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<Image, GenerationFailure>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub image: Image,
    pub prompt: String,
    pub aspect_ratio: Option<String>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum FailureKind {
    /// The provider answered without an image.
    NoResponse,
    /// The input or output was blocked by the provider's safety filters.
    SafetyFiltered,
    PermissionDenied,
    RateLimited,
    Unknown,
}

impl FailureKind {
    /// Classify a raw provider error by looking for well known markers in its text.
    pub fn classify(raw: &str) -> Self {
        let raw = raw.to_lowercase();
        let contains_any = |markers: &[&str]| markers.iter().any(|marker| raw.contains(marker));
        if contains_any(&["safety", "blocked", "prohibited_content", "blocklist"]) {
            Self::SafetyFiltered
        } else if contains_any(&[
            "permission_denied",
            "permission denied",
            "http 403",
            "api key not valid",
        ]) {
            Self::PermissionDenied
        } else if contains_any(&["http 429", "resource_exhausted", "rate limit", "quota"]) {
            Self::RateLimited
        } else if contains_any(&["no image", "no candidates", "empty response"]) {
            Self::NoResponse
        } else {
            Self::Unknown
        }
    }
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let description = match self {
            Self::NoResponse => "No image was returned",
            Self::SafetyFiltered => "Blocked by safety filters",
            Self::PermissionDenied => "Permission denied by the image provider",
            Self::RateLimited => "Rate limited by the image provider",
            Self::Unknown => "Image generation failed",
        };
        f.write_str(description)
    }
}

/// A failed generation call.
///
/// The [`Display`] implementation is the message recorded against the failed task.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{kind}: {message}")]
pub struct GenerationFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl GenerationFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Build a failure from raw provider error text, classifying its kind.
    pub fn classified(raw: impl Into<String>) -> Self {
        let message = raw.into();
        Self {
            kind: FailureKind::classify(&message),
            message,
        }
    }

    pub(crate) fn timed_out(timeout: Duration) -> Self {
        Self::new(
            FailureKind::Unknown,
            format!("Generation did not complete within {timeout:?}"),
        )
    }
}

impl From<JoinError> for GenerationFailure {
    fn from(value: JoinError) -> Self {
        Self::new(FailureKind::Unknown, crate::panic_message(value))
    }
}
