//! The human review gate.
//!
//! A detected context is rendered as plain text and the human answers with
//! `approve`, `refine: <feedback>`, or any other text (treated as feedback).
//! Waiting is done through a [`ReviewChannel`] so the same loop drives an
//! interactive terminal, an HTTP client or a test harness.

use std::io::{BufRead, Write};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::models::{Decision, ProjectContext, ReviewState};

pub const APPROVE: &str = "approve";
pub const REFINE_PREFIX: &str = "refine:";

/// A parsed human response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewDecision {
    Approve,
    Refine(String),
}

/// Render the plain-text prompt for `context`. Every field is always
/// labelled, so an empty entity list reads `(none)` rather than vanishing.
pub fn render_review(context: &ProjectContext) -> String {
    let entities = if context.entities.is_empty() {
        "(none)".to_string()
    } else {
        context.entities.join(", ")
    };
    let status = if context.refined {
        "refined by you"
    } else {
        "auto-detected"
    };

    format!(
        "Detected project context ({status}):\n\
         \x20 Complexity: {}\n\
         \x20 Domain:     {}\n\
         \x20 Intent:     {}\n\
         \x20 Entities:   {entities}\n\
         \n\
         Reply `approve` to continue, or `refine: <changes>` to correct it\n\
         (e.g. `refine: domain=web, intent=bug_fix` or `refine: it's actually a CLI tool`).",
        context.complexity, context.domain, context.intent,
    )
}

/// Parse a raw response. Only a case-insensitive `approve` approves;
/// everything else is feedback, with an optional `refine:` prefix stripped.
pub fn parse_decision(input: &str) -> ReviewDecision {
    let trimmed = input.trim();
    if trimmed.eq_ignore_ascii_case(APPROVE) {
        return ReviewDecision::Approve;
    }

    match strip_refine_prefix(trimmed) {
        Some(rest) => ReviewDecision::Refine(rest.trim().to_string()),
        None => ReviewDecision::Refine(trimmed.to_string()),
    }
}

/// Strip a leading case-insensitive `refine:` marker.
pub fn strip_refine_prefix(input: &str) -> Option<&str> {
    let prefix = input.get(..REFINE_PREFIX.len())?;
    prefix
        .eq_ignore_ascii_case(REFINE_PREFIX)
        .then(|| &input[REFINE_PREFIX.len()..])
}

/// Where review prompts are shown and responses come from.
#[async_trait]
pub trait ReviewChannel: Send {
    /// Present `review` and wait for one raw response. `None` means the human
    /// side went away and is treated like a cancellation.
    async fn request(&mut self, review: &ReviewState) -> Option<String>;
}

/// Review channel backed by tokio mpsc channels.
///
/// Each prompt is optionally published on `prompts`; each response is read
/// from `responses`.
pub struct ChannelReviewer {
    prompts: Option<mpsc::UnboundedSender<ReviewState>>,
    responses: mpsc::Receiver<String>,
}

impl ChannelReviewer {
    pub fn new(responses: mpsc::Receiver<String>) -> Self {
        Self {
            prompts: None,
            responses,
        }
    }

    /// Create a reviewer together with the sender used to answer it.
    pub fn pair(buffer: usize) -> (Self, mpsc::Sender<String>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(rx), tx)
    }

    pub fn with_prompts(mut self, prompts: mpsc::UnboundedSender<ReviewState>) -> Self {
        self.prompts = Some(prompts);
        self
    }
}

#[async_trait]
impl ReviewChannel for ChannelReviewer {
    async fn request(&mut self, review: &ReviewState) -> Option<String> {
        if let Some(prompts) = &self.prompts {
            if prompts.send(review.clone()).is_err() {
                tracing::debug!("Review prompt listener dropped");
            }
        }
        self.responses.recv().await
    }
}

/// Interactive review on the terminal: prompts go to stdout and each
/// response is one line of stdin.
///
/// Lines are read on a dedicated thread so a cancelled review does not
/// leave a blocking read behind in the runtime.
pub struct StdinReviewer {
    lines: mpsc::Receiver<String>,
}

impl StdinReviewer {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        std::thread::spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to read review response");
                        break;
                    }
                }
            }
        });
        Self { lines: rx }
    }
}

impl Default for StdinReviewer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReviewChannel for StdinReviewer {
    async fn request(&mut self, review: &ReviewState) -> Option<String> {
        {
            let mut stdout = std::io::stdout().lock();
            if let Some(notice) = &review.notice {
                let _ = writeln!(stdout, "{}\n", notice);
            }
            let _ = write!(stdout, "{}\n> ", review.review_prompt);
            let _ = stdout.flush();
        }

        self.lines.recv().await
    }
}

/// The review was cancelled before the human responded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("review cancelled")]
pub struct ReviewCancelled;

/// Suspend until the human responds on `channel` or `cancel` fires.
///
/// Without a cancellation signal the wait is unbounded. On a response the
/// state's `decision` and `feedback` are filled in; nothing else changes.
pub async fn await_decision(
    channel: &mut dyn ReviewChannel,
    mut state: ReviewState,
    cancel: Option<&mut watch::Receiver<bool>>,
) -> Result<ReviewState, ReviewCancelled> {
    let cancelled = async {
        match cancel {
            Some(rx) => wait_cancelled(rx).await,
            None => std::future::pending::<()>().await,
        }
    };

    let response = tokio::select! {
        response = channel.request(&state) => response,
        _ = cancelled => {
            tracing::info!(session_id = %state.session_id, "Review cancelled");
            return Err(ReviewCancelled);
        }
    };

    let Some(response) = response else {
        tracing::info!(session_id = %state.session_id, "Review channel closed");
        return Err(ReviewCancelled);
    };

    match parse_decision(&response) {
        ReviewDecision::Approve => {
            state.decision = Decision::Approve;
            state.feedback = None;
        }
        ReviewDecision::Refine(feedback) => {
            state.decision = Decision::Refine;
            state.feedback = Some(feedback);
        }
    }
    tracing::debug!(
        session_id = %state.session_id,
        decision = state.decision.as_str(),
        round = state.round,
        "Review decision received"
    );

    Ok(state)
}

/// Resolves once the flag is set. A dropped sender can no longer cancel, so
/// that case never resolves.
async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}
