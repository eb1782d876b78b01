//! Context detection from free-text descriptions.

use std::sync::Arc;

use crate::classify::Classifier;
use crate::error::ContextError;
use crate::models::{Detection, ProjectContext};

/// Classifies project descriptions into a [`ProjectContext`].
///
/// The underlying classifier may be non-deterministic; callers must not
/// assume identical input yields identical output across runs.
#[derive(Clone)]
pub struct ContextDetector {
    classifier: Arc<dyn Classifier>,
}

impl ContextDetector {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self { classifier }
    }

    pub fn classifier(&self) -> &Arc<dyn Classifier> {
        &self.classifier
    }

    /// Detect the context of `description`.
    ///
    /// Blank input is rejected before the classifier is called. Classifier
    /// failures surface as [`ContextError::ClassificationUnavailable`].
    pub async fn detect(&self, description: &str) -> Result<ProjectContext, ContextError> {
        let description = description.trim();
        if description.is_empty() {
            return Err(ContextError::InvalidInput);
        }

        let mut context = self.classifier.classify(description, None).await?.normalized();
        context.refined = false;

        tracing::info!(
            classifier = self.classifier.name(),
            complexity = %context.complexity,
            domain = %context.domain,
            intent = %context.intent,
            entities = context.entities.len(),
            "Detected project context"
        );

        Ok(context)
    }

    /// Detect, recovering from an unavailable classifier with
    /// [`ProjectContext::fallback`] so the human always has something to
    /// review. Only [`ContextError::InvalidInput`] is returned as an error.
    pub async fn detect_or_fallback(&self, description: &str) -> Result<Detection, ContextError> {
        match self.detect(description).await {
            Ok(context) => Ok(Detection {
                context,
                fallback: false,
                notice: None,
            }),
            Err(e @ ContextError::ClassificationUnavailable(_)) => {
                tracing::warn!(error = %e, "Classification unavailable, using fallback context");
                Ok(Detection {
                    context: ProjectContext::fallback(),
                    fallback: true,
                    notice: Some(e.user_message()),
                })
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::classify::{ClassifyError, KeywordClassifier};
    use crate::models::{Complexity, Intent, UNKNOWN_DOMAIN};

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Classifier for Counting {
        async fn classify(
            &self,
            _text: &str,
            _seed: Option<&ProjectContext>,
        ) -> Result<ProjectContext, ClassifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ClassifyError::Unavailable("offline".to_string()))
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    /// Returns a context with blank fields, as a careless backend might.
    struct Blank;

    #[async_trait]
    impl Classifier for Blank {
        async fn classify(
            &self,
            _text: &str,
            _seed: Option<&ProjectContext>,
        ) -> Result<ProjectContext, ClassifyError> {
            Ok(ProjectContext {
                complexity: Complexity::Medium,
                domain: String::new(),
                intent: Intent::Other(String::new()),
                entities: vec![],
                refined: true,
            })
        }

        fn name(&self) -> &str {
            "blank"
        }
    }

    #[tokio::test]
    async fn blank_description_is_rejected_before_classifying() {
        let classifier = Arc::new(Counting::default());
        let detector = ContextDetector::new(classifier.clone());

        for input in ["", "   ", "\n\t"] {
            let err = detector.detect(input).await.unwrap_err();
            assert!(matches!(err, ContextError::InvalidInput));
        }
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unavailable_classifier_is_reported_by_detect() {
        let detector = ContextDetector::new(Arc::new(Counting::default()));
        let err = detector.detect("Build a RAG system").await.unwrap_err();
        assert!(matches!(err, ContextError::ClassificationUnavailable(_)));
    }

    #[tokio::test]
    async fn fallback_context_is_offered_when_classifier_is_down() {
        let detector = ContextDetector::new(Arc::new(Counting::default()));
        let detection = detector.detect_or_fallback("Build a RAG system").await.unwrap();

        assert!(detection.fallback);
        assert_eq!(detection.context.domain, UNKNOWN_DOMAIN);
        assert_eq!(detection.context.complexity, Complexity::Medium);
        assert!(detection.notice.unwrap().contains("classification"));
    }

    #[tokio::test]
    async fn fallback_still_rejects_blank_input() {
        let detector = ContextDetector::new(Arc::new(KeywordClassifier::new()));
        let err = detector.detect_or_fallback("  ").await.unwrap_err();
        assert!(matches!(err, ContextError::InvalidInput));
    }

    #[tokio::test]
    async fn detected_context_is_never_blank_or_refined() {
        let detector = ContextDetector::new(Arc::new(Blank));
        let ctx = detector.detect("anything at all").await.unwrap();

        assert!(!ctx.domain.is_empty());
        assert!(!ctx.intent.as_str().is_empty());
        assert!(!ctx.complexity.as_str().is_empty());
        assert!(!ctx.refined);
    }

    #[tokio::test]
    async fn required_fields_are_filled_for_varied_descriptions() {
        let detector = ContextDetector::new(Arc::new(KeywordClassifier::new()));
        let descriptions = [
            "Build a RAG system for document search",
            "x",
            "42",
            "???",
            "Refactor the Android onboarding flow",
            "Écrire la documentation du module de paiement",
            "Speed up the nightly ETL job",
        ];

        for description in descriptions {
            let ctx = detector.detect(description).await.unwrap();
            assert!(!ctx.domain.is_empty(), "{description}");
            assert!(!ctx.intent.as_str().is_empty(), "{description}");
            assert!(!ctx.complexity.as_str().is_empty(), "{description}");
        }
    }
}
