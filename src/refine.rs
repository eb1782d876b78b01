//! Applying human feedback to a context.
//!
//! Feedback in `key=value` form (comma separated) is applied field by field.
//! Anything else is handed to the classifier as a correction of the current
//! context. Refinement never fails: bad pairs, unknown keys and classifier
//! outages become warnings and the current values are kept.

use std::sync::Arc;

use crate::classify::Classifier;
use crate::models::{dedup_entities, normalize_tag, Complexity, Intent, ProjectContext, Refinement};

/// Keys accepted in structured feedback.
pub const FIELD_KEYS: &[&str] = &["domain", "intent", "complexity", "entities"];

/// One `key=value` pair from structured feedback. Keys are lowercased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldOverride {
    pub key: String,
    pub value: String,
}

/// Result of splitting feedback into structured pairs.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StructuredFeedback {
    pub pairs: Vec<FieldOverride>,
    /// Segments that were not a well-formed `key=value` pair.
    pub malformed: Vec<String>,
}

impl StructuredFeedback {
    /// Structured feedback has at least one well-formed pair. Otherwise the
    /// whole text is treated as free text.
    pub fn is_structured(&self) -> bool {
        !self.pairs.is_empty()
    }
}

/// Split feedback on commas into `key=value` pairs.
///
/// A pair is well formed when it contains exactly one `=` and both sides are
/// non-empty after trimming.
pub fn parse_structured(feedback: &str) -> StructuredFeedback {
    let mut parsed = StructuredFeedback::default();

    for segment in feedback.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let mut parts = segment.split('=');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(key), Some(value), None)
                if !key.trim().is_empty() && !value.trim().is_empty() =>
            {
                parsed.pairs.push(FieldOverride {
                    key: key.trim().to_lowercase(),
                    value: value.trim().to_string(),
                });
            }
            _ => parsed.malformed.push(segment.to_string()),
        }
    }

    parsed
}

/// Applies feedback to contexts.
#[derive(Clone)]
pub struct Refiner {
    classifier: Arc<dyn Classifier>,
}

impl Refiner {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self { classifier }
    }

    /// Produce a new context from `current` and `feedback`.
    ///
    /// The returned context always has `refined = true`; in the worst case
    /// it equals `current` otherwise.
    pub async fn refine(&self, current: &ProjectContext, feedback: &str) -> Refinement {
        let feedback = feedback.trim();
        if feedback.is_empty() {
            return unchanged(current, "No feedback given; context left unchanged.".to_string());
        }

        let structured = parse_structured(feedback);
        let refinement = if structured.is_structured() {
            apply_structured(current, &structured)
        } else {
            self.refine_free_text(current, feedback).await
        };

        for warning in &refinement.warnings {
            tracing::warn!(warning = %warning, "Refinement feedback not fully applied");
        }
        tracing::info!(
            domain = %refinement.context.domain,
            intent = %refinement.context.intent,
            complexity = %refinement.context.complexity,
            structured = structured.is_structured(),
            "Refined project context"
        );

        refinement
    }

    async fn refine_free_text(&self, current: &ProjectContext, feedback: &str) -> Refinement {
        match self.classifier.classify(feedback, Some(current)).await {
            Ok(context) => {
                let mut context = context.normalized();
                context.refined = true;
                Refinement {
                    context,
                    warnings: Vec::new(),
                }
            }
            Err(e) => unchanged(
                current,
                format!(
                    "Could not interpret the feedback ({}); context left unchanged. \
                     Try `domain=..., intent=..., complexity=...`.",
                    e
                ),
            ),
        }
    }
}

/// Apply well-formed pairs to a copy of `current`, collecting warnings for
/// everything that could not be applied.
pub fn apply_structured(current: &ProjectContext, feedback: &StructuredFeedback) -> Refinement {
    let mut context = current.clone();
    let mut warnings: Vec<String> = feedback
        .malformed
        .iter()
        .map(|segment| format!("Ignored malformed pair '{}'", segment))
        .collect();

    for FieldOverride { key, value } in &feedback.pairs {
        match key.as_str() {
            "domain" => match normalize_tag(value) {
                tag if tag.is_empty() => warnings.push(format!("Ignored empty domain '{}'", value)),
                tag => context.domain = tag,
            },
            "intent" => context.intent = Intent::parse(value),
            "complexity" => match Complexity::from_str(value) {
                Some(complexity) => context.complexity = complexity,
                None => warnings.push(format!(
                    "Unknown complexity '{}' (expected simple, medium or complex)",
                    value
                )),
            },
            "entities" => {
                context.entities = dedup_entities(
                    value
                        .split(|c: char| c == ';' || c == '|' || c.is_whitespace())
                        .map(|e| e.trim().to_lowercase())
                        .filter(|e| !e.is_empty())
                        .collect(),
                );
            }
            other => warnings.push(format!(
                "Ignored unknown key '{}' (expected one of: {})",
                other,
                FIELD_KEYS.join(", ")
            )),
        }
    }

    context.refined = true;
    Refinement {
        context: context.normalized(),
        warnings,
    }
}

fn unchanged(current: &ProjectContext, warning: String) -> Refinement {
    let mut context = current.clone();
    context.refined = true;
    Refinement {
        context,
        warnings: vec![warning],
    }
}
