//! The detect → review → refine → approve loop.
//!
//! ```text
//! Detecting ──> Reviewing ──approve──> Approved (commit, one put)
//!                  ^   │
//!                  │   └──refine──> Refining
//!                  └────────────────────┘
//! ```
//!
//! The store is written exactly once per run, on approval. Cancelling while
//! reviewing leaves the store untouched.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use crate::classify::{self, Classifier};
use crate::config::{Config, TriggerConfig};
use crate::db::SessionStore;
use crate::detect::ContextDetector;
use crate::error::ContextError;
use crate::models::{Decision, ReviewOutcome, ReviewState, Session};
use crate::refine::{parse_structured, Refiner, FIELD_KEYS};
use crate::review::{self, parse_decision, strip_refine_prefix, ReviewChannel, ReviewDecision};

/// Phase of a review loop, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    Detecting,
    Reviewing,
    Refining,
    Approved,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detecting => "detecting",
            Self::Reviewing => "reviewing",
            Self::Refining => "refining",
            Self::Approved => "approved",
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a full review run ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The human approved and the context was committed.
    Approved(Session),
    /// The review was cancelled; nothing was stored.
    Cancelled,
}

/// Drives detection, review and refinement for sessions backed by a
/// [`SessionStore`].
#[derive(Clone)]
pub struct ContextWorkflow {
    detector: ContextDetector,
    refiner: Refiner,
    store: Arc<dyn SessionStore>,
    triggers: TriggerConfig,
}

impl ContextWorkflow {
    pub fn new(classifier: Arc<dyn Classifier>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            detector: ContextDetector::new(classifier.clone()),
            refiner: Refiner::new(classifier),
            store,
            triggers: TriggerConfig::default(),
        }
    }

    pub fn from_config(config: &Config, store: Arc<dyn SessionStore>) -> Self {
        Self::new(classify::from_config(&config.classifier), store)
            .with_triggers(config.triggers.clone())
    }

    pub fn with_triggers(mut self, triggers: TriggerConfig) -> Self {
        self.triggers = triggers;
        self
    }

    pub fn detector(&self) -> &ContextDetector {
        &self.detector
    }

    pub fn refiner(&self) -> &Refiner {
        &self.refiner
    }

    pub fn triggers(&self) -> &TriggerConfig {
        &self.triggers
    }

    /// The last approved session, if any.
    pub fn stored_session(&self, session_id: &str) -> Result<Option<Session>, ContextError> {
        self.store.get(session_id).map_err(ContextError::storage)
    }

    /// Open a review for `session_id`.
    ///
    /// A session that already has an approved context is reviewed as stored,
    /// without re-running detection. Otherwise `description` is detected,
    /// falling back to a default context with a notice when classification
    /// is unavailable.
    pub async fn open_review(
        &self,
        session_id: &str,
        description: Option<&str>,
    ) -> Result<ReviewState, ContextError> {
        if let Some(session) = self.stored_session(session_id)? {
            tracing::debug!(session_id, "Reusing stored context, skipping detection");
            return Ok(ReviewState::new(session_id, session.context));
        }

        transition(session_id, WorkflowState::Detecting);
        let detection = self
            .detector
            .detect_or_fallback(description.unwrap_or_default())
            .await?;

        let state = ReviewState::new(session_id, detection.context);
        let state = match detection.notice {
            Some(notice) => state.with_notice(notice),
            None => state,
        };
        transition(session_id, WorkflowState::Reviewing);
        Ok(state)
    }

    /// Apply one raw human response to an open review.
    ///
    /// `approve` commits the context under review and closes it. Anything
    /// else is refinement feedback and the review stays open with the
    /// refined context.
    pub async fn respond(
        &self,
        mut state: ReviewState,
        response: &str,
    ) -> Result<ReviewOutcome, ContextError> {
        match parse_decision(response) {
            ReviewDecision::Approve => {
                state.decision = Decision::Approve;
                let session = self.commit(&state)?;
                Ok(ReviewOutcome::Approved { session })
            }
            ReviewDecision::Refine(feedback) => {
                state.decision = Decision::Refine;
                state.feedback = Some(feedback);
                let warnings = self.refine_state(&mut state).await;
                Ok(ReviewOutcome::Reviewing {
                    review: state,
                    warnings,
                })
            }
        }
    }

    /// Run the whole loop for a session: open a review, then wait on
    /// `channel` until the human approves or `cancel` fires.
    pub async fn run(
        &self,
        session_id: &str,
        description: Option<&str>,
        channel: &mut dyn ReviewChannel,
        cancel: Option<&mut watch::Receiver<bool>>,
    ) -> Result<RunOutcome, ContextError> {
        let state = self.open_review(session_id, description).await?;
        self.review_loop(state, channel, cancel).await
    }

    /// Reopen refinement of an approved context from a conversational
    /// message.
    ///
    /// Returns `None` when the message contains no trigger phrase or the
    /// session has nothing stored. Otherwise the message (minus a leading
    /// `refine:`) is applied as feedback and a review is opened on the
    /// result. Nothing is stored until that review is approved.
    pub async fn reopen(
        &self,
        session_id: &str,
        message: &str,
    ) -> Result<Option<(ReviewState, Vec<String>)>, ContextError> {
        if !self.triggers.matches(message) {
            return Ok(None);
        }
        let Some(session) = self.stored_session(session_id)? else {
            tracing::debug!(session_id, "Trigger phrase for session without stored context");
            return Ok(None);
        };

        tracing::info!(session_id, "Trigger phrase detected, reopening refinement");
        let feedback = self.trigger_feedback(message);

        let mut state = ReviewState::new(session_id, session.context);
        state.decision = Decision::Refine;
        state.feedback = Some(feedback);
        let warnings = self.refine_state(&mut state).await;
        Ok(Some((state, warnings)))
    }

    /// [`reopen`](Self::reopen), then wait for approval like [`run`](Self::run).
    /// Returns `None` if the message did not reopen anything.
    pub async fn run_reopened(
        &self,
        session_id: &str,
        message: &str,
        channel: &mut dyn ReviewChannel,
        cancel: Option<&mut watch::Receiver<bool>>,
    ) -> Result<Option<RunOutcome>, ContextError> {
        match self.reopen(session_id, message).await? {
            Some((state, _)) => Ok(Some(self.review_loop(state, channel, cancel).await?)),
            None => Ok(None),
        }
    }

    async fn review_loop(
        &self,
        mut state: ReviewState,
        channel: &mut dyn ReviewChannel,
        mut cancel: Option<&mut watch::Receiver<bool>>,
    ) -> Result<RunOutcome, ContextError> {
        loop {
            state = match review::await_decision(channel, state, cancel.as_deref_mut()).await {
                Ok(state) => state,
                Err(_) => return Ok(RunOutcome::Cancelled),
            };

            match state.decision {
                Decision::Approve => return self.commit(&state).map(RunOutcome::Approved),
                Decision::Refine | Decision::Pending => {
                    let warnings = self.refine_state(&mut state).await;
                    if !warnings.is_empty() {
                        state.notice = Some(warnings.join("\n"));
                    } else {
                        state.notice = None;
                    }
                }
            }
        }
    }

    /// Feedback carried by a trigger message.
    ///
    /// Text after the trigger phrase is used when it is structured, so
    /// `correction: domain=web` yields `domain=web`. A phrase ending in a
    /// field name takes the rest as that field's value (`change domain to
    /// web`, `change domain=web`). Otherwise the whole message is free-text
    /// feedback, keeping statements like "actually, this is a web project"
    /// intact.
    fn trigger_feedback(&self, message: &str) -> String {
        let message = message.trim().replace('\u{2019}', "'");
        let message = message.as_str();
        if let Some(rest) = strip_refine_prefix(message) {
            return rest.trim().to_string();
        }
        let Some((phrase, end)) = self.triggers.locate(message) else {
            return message.to_string();
        };

        let rest = message[end..].trim_start_matches(|c: char| c == ':' || c.is_whitespace());
        let field = phrase
            .rsplit(|c: char| !c.is_ascii_alphanumeric())
            .find(|w| !w.is_empty())
            .map(str::to_ascii_lowercase)
            .filter(|w| FIELD_KEYS.contains(&w.as_str()));

        let candidate = match field {
            Some(field) => {
                let value = rest.trim_start_matches(|c: char| c == '=' || c.is_whitespace());
                let value = value
                    .get(..3)
                    .filter(|to| to.eq_ignore_ascii_case("to "))
                    .map_or(value, |_| &value[3..]);
                format!("{}={}", field, value.trim())
            }
            None => rest.trim().to_string(),
        };

        if parse_structured(&candidate).is_structured() {
            candidate
        } else {
            message.to_string()
        }
    }

    /// Refine the context under review with its feedback and re-render it.
    async fn refine_state(&self, state: &mut ReviewState) -> Vec<String> {
        transition(&state.session_id, WorkflowState::Refining);
        let feedback = state.feedback.clone().unwrap_or_default();
        let refinement = self.refiner.refine(&state.context, &feedback).await;
        state.advance(refinement.context);
        transition(&state.session_id, WorkflowState::Reviewing);
        refinement.warnings
    }

    fn commit(&self, state: &ReviewState) -> Result<Session, ContextError> {
        let session = self
            .store
            .put(&state.session_id, &state.context)
            .map_err(ContextError::storage)?;
        transition(&state.session_id, WorkflowState::Approved);
        Ok(session)
    }
}

fn transition(session_id: &str, to: WorkflowState) {
    tracing::debug!(session_id, state = %to, "Workflow transition");
}
