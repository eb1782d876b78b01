//! Request and response types for MCP tools.

use rmcp::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::models::{Complexity, Intent, ProjectContext, Session};

// ============================================================
// Request Types
// ============================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DetectContextRequest {
    #[schemars(
        description = "Free-text description of the project or task, e.g. 'Build a RAG system for document search'"
    )]
    pub description: String,
}

/// A project context as passed between tools.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ContextParams {
    #[schemars(description = "One of: simple, medium, complex")]
    pub complexity: String,
    #[schemars(description = "Short lowercase domain tag, e.g. ai, web, api, data, mobile")]
    pub domain: String,
    #[schemars(
        description = "Intent tag, e.g. new_feature, bug_fix, refactor, documentation, testing, optimization"
    )]
    pub intent: String,
    #[schemars(description = "Salient keywords from the description")]
    #[serde(default)]
    pub entities: Vec<String>,
    #[schemars(description = "Whether a human has corrected this context")]
    #[serde(default)]
    pub refined: bool,
}

impl ContextParams {
    pub fn into_context(self) -> Result<ProjectContext, String> {
        let complexity = Complexity::from_str(&self.complexity).ok_or_else(|| {
            format!(
                "Invalid complexity '{}'. Must be: simple, medium, or complex",
                self.complexity
            )
        })?;

        let mut context = ProjectContext::new(
            complexity,
            self.domain,
            Intent::parse(&self.intent),
            self.entities,
        );
        context.refined = self.refined;
        Ok(context)
    }
}

impl From<ProjectContext> for ContextParams {
    fn from(context: ProjectContext) -> Self {
        Self {
            complexity: context.complexity.as_str().to_string(),
            domain: context.domain,
            intent: context.intent.as_str().to_string(),
            entities: context.entities,
            refined: context.refined,
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RefineContextRequest {
    #[schemars(description = "The context currently under review")]
    pub context: ContextParams,
    #[schemars(
        description = "The human's feedback, without the 'refine:' prefix. Either 'key=value' pairs (domain, intent, complexity, entities) separated by commas, or free text such as 'it is actually a CLI tool'"
    )]
    pub feedback: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RenderReviewRequest {
    #[schemars(description = "The context to show the human for approval")]
    pub context: ContextParams,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SessionContextRequest {
    #[schemars(description = "Opaque session id, typically the conversation or thread id")]
    pub session_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CommitContextRequest {
    #[schemars(description = "Opaque session id, typically the conversation or thread id")]
    pub session_id: String,
    #[schemars(description = "The context the human approved")]
    pub context: ContextParams,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RefinementTriggerRequest {
    #[schemars(description = "Opaque session id, typically the conversation or thread id")]
    pub session_id: String,
    #[schemars(description = "The user's latest conversational message")]
    pub message: String,
}

// ============================================================
// Response Types
// ============================================================

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct DetectContextResponse {
    pub context: ContextParams,
    /// True when classification was unavailable and a default context was used
    pub fallback: bool,
    /// Plain-language notice to show the human, if any
    pub notice: Option<String>,
    /// Plain-text review prompt to show the human
    pub review_prompt: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RefineContextResponse {
    pub context: ContextParams,
    /// Parts of the feedback that could not be applied
    pub warnings: Vec<String>,
    pub review_prompt: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SessionContextResponse {
    pub session_id: String,
    /// False when nothing has been approved for this session yet
    pub found: bool,
    pub context: Option<ContextParams>,
    pub history_len: usize,
    pub updated_at: Option<String>,
}

impl SessionContextResponse {
    pub fn missing(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            found: false,
            context: None,
            history_len: 0,
            updated_at: None,
        }
    }
}

impl From<Session> for SessionContextResponse {
    fn from(session: Session) -> Self {
        Self {
            session_id: session.session_id,
            found: true,
            context: Some(session.context.into()),
            history_len: session.history.len(),
            updated_at: Some(session.updated_at.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RefinementTriggerResponse {
    /// True when the message contained a trigger phrase for a stored session
    pub triggered: bool,
    /// The stored context refined by the message, awaiting approval
    pub context: Option<ContextParams>,
    pub review_prompt: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}
