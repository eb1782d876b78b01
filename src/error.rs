//! Error taxonomy for the detection and review workflow.

use thiserror::Error;

use crate::classify::ClassifyError;

/// Errors surfaced by detection and the review loop.
///
/// Only [`ContextError::InvalidInput`] and [`ContextError::Storage`] reach
/// callers as hard failures. `ClassificationUnavailable` is returned by the
/// bare detector but recovered inside the workflow with a fallback context.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("project description must not be empty")]
    InvalidInput,

    #[error("classification unavailable: {0}")]
    ClassificationUnavailable(String),

    #[error("session storage unavailable: {0}")]
    Storage(String),
}

impl ContextError {
    /// Plain-language message for the human, naming the unavailable
    /// capability and offering manual context.
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidInput => {
                "Please describe the project or task you want to work on.".to_string()
            }
            Self::ClassificationUnavailable(_) => {
                "Automatic classification is unavailable right now. Describe the project's \
                 domain, intent and complexity in your own words (or use \
                 `refine: domain=..., intent=..., complexity=...`) and it will be applied."
                    .to_string()
            }
            Self::Storage(_) => {
                "Session storage is unavailable, so the context cannot be saved. You can \
                 still supply context manually as free text for this conversation."
                    .to_string()
            }
        }
    }

    pub(crate) fn storage(e: impl std::fmt::Display) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<ClassifyError> for ContextError {
    fn from(e: ClassifyError) -> Self {
        Self::ClassificationUnavailable(e.to_string())
    }
}
