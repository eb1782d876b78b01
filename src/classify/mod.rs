//! Text classification backends.
//!
//! Detection and free-text refinement both go through a [`Classifier`]. The
//! call may be non-deterministic (LLM backends) and may fail; callers treat
//! failure as "classification unavailable" and recover.

mod keyword;
mod ollama;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use keyword::KeywordClassifier;
pub use ollama::OllamaClassifier;

use crate::config::{ClassifierBackend, ClassifierConfig};
use crate::models::ProjectContext;

/// Trait for classification backends.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify `text` into a project context.
    ///
    /// With a `seed`, the text is treated as a correction of that context:
    /// fields the text says nothing about keep the seed's values.
    async fn classify(
        &self,
        text: &str,
        seed: Option<&ProjectContext>,
    ) -> Result<ProjectContext, ClassifyError>;

    /// Get the backend name.
    fn name(&self) -> &str;
}

/// Classification error types.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("Classifier not available: {0}")]
    Unavailable(String),

    #[error("Classification timed out after {0:?}")]
    Timeout(Duration),

    #[error("Classifier API error: {0}")]
    Api(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Could not parse classifier output: {0}")]
    Parse(String),
}

/// Classifier with fallback support.
///
/// Tries classifiers in order and returns the first success.
pub struct ClassifierChain {
    classifiers: Vec<Arc<dyn Classifier>>,
}

impl ClassifierChain {
    pub fn new(classifiers: Vec<Arc<dyn Classifier>>) -> Self {
        Self { classifiers }
    }
}

#[async_trait]
impl Classifier for ClassifierChain {
    async fn classify(
        &self,
        text: &str,
        seed: Option<&ProjectContext>,
    ) -> Result<ProjectContext, ClassifyError> {
        let mut last_error = None;
        for classifier in &self.classifiers {
            match classifier.classify(text, seed).await {
                Ok(context) => return Ok(context),
                Err(e) => {
                    tracing::warn!(classifier = classifier.name(), error = %e, "Classifier failed, trying next");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ClassifyError::Unavailable("no classifier configured".to_string())))
    }

    fn name(&self) -> &str {
        "chain"
    }
}

/// Build the classifier described by the configuration.
pub fn from_config(config: &ClassifierConfig) -> Arc<dyn Classifier> {
    match config.backend {
        ClassifierBackend::Keyword => Arc::new(KeywordClassifier::new()),
        ClassifierBackend::Ollama => {
            let ollama: Arc<dyn Classifier> = Arc::new(
                OllamaClassifier::new(&config.ollama_url, &config.ollama_model)
                    .with_timeout(config.timeout()),
            );
            if config.fallback_to_keywords {
                let keyword: Arc<dyn Classifier> = Arc::new(KeywordClassifier::new());
                Arc::new(ClassifierChain::new(vec![ollama, keyword]))
            } else {
                ollama
            }
        }
    }
}
