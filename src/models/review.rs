use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ProjectContext;

/// A pending human review of a detected context.
///
/// Review states are **transient**: one exists per open review, it is
/// re-rendered every time the loop re-enters review, and it is discarded once
/// the human approves (and the context is committed) or the review is
/// cancelled. Nothing in a `ReviewState` is ever written to the session store
/// directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewState {
    pub id: Uuid,
    pub session_id: String,
    pub context: ProjectContext,
    /// Text shown to the human. Derived from `context`, never authoritative.
    pub review_prompt: String,
    pub decision: Decision,
    /// Free text supplied with a `refine` decision.
    pub feedback: Option<String>,
    /// Number of refinements applied so far in this review.
    pub round: u32,
    /// Plain-language notice shown above the prompt (e.g. classification was
    /// unavailable), if any.
    pub notice: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ReviewState {
    pub fn new(session_id: impl Into<String>, context: ProjectContext) -> Self {
        let review_prompt = crate::review::render_review(&context);
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            context,
            review_prompt,
            decision: Decision::Pending,
            feedback: None,
            round: 0,
            notice: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_notice(mut self, notice: impl Into<String>) -> Self {
        self.notice = Some(notice.into());
        self
    }

    /// Replace the context under review and reset the decision, re-rendering
    /// the prompt so it never shows stale values.
    pub fn advance(&mut self, context: ProjectContext) {
        self.review_prompt = crate::review::render_review(&context);
        self.context = context;
        self.decision = Decision::Pending;
        self.feedback = None;
        self.round += 1;
    }
}

/// The human's decision on a review.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Pending,
    Approve,
    Refine,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approve => "approve",
            Self::Refine => "refine",
        }
    }
}

/// Result of running detection with local recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub context: ProjectContext,
    /// True when classification was unavailable and the fallback context was
    /// used instead.
    pub fallback: bool,
    pub notice: Option<String>,
}

/// Result of applying human feedback.
///
/// Refinement never fails; problems with the feedback surface as `warnings`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refinement {
    pub context: ProjectContext,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Input for detecting a context from a description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectInput {
    pub description: String,
}

/// Input for refining a context with feedback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefineInput {
    pub context: ProjectContext,
    pub feedback: String,
}

/// Input for opening a review on a session.
///
/// When `description` is omitted the session's stored context is reviewed
/// instead of running detection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenReviewInput {
    #[serde(default)]
    pub description: Option<String>,
}

/// A raw human response to a pending review (`approve`, `refine: ...`, or
/// anything else).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewResponseInput {
    pub response: String,
}

/// Outcome of submitting a response to a pending review.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReviewOutcome {
    /// The context was approved and committed; the review is closed.
    Approved { session: super::Session },
    /// Feedback was applied and the review is waiting again.
    Reviewing {
        review: ReviewState,
        #[serde(default)]
        warnings: Vec<String>,
    },
}

/// A conversational message routed to a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessageInput {
    pub session_id: String,
    pub message: String,
}
