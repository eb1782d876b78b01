use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ProjectContext;

/// The durable record of the last approved context for a session.
///
/// Sessions are keyed by an opaque, caller-chosen id (a conversation or
/// thread id). `context` is overwritten on every approval; `history` is an
/// append-only audit trail, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub context: ProjectContext,
    pub history: Vec<HistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One approved context in a session's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub recorded_at: DateTime<Utc>,
    pub context: ProjectContext,
}

/// Compact view of a session used in listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub domain: String,
    pub complexity: String,
    pub intent: String,
    pub refined: bool,
    pub history_len: usize,
    pub updated_at: DateTime<Utc>,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.session_id.clone(),
            domain: session.context.domain.clone(),
            complexity: session.context.complexity.as_str().to_string(),
            intent: session.context.intent.as_str().to_string(),
            refined: session.context.refined,
            history_len: session.history.len(),
            updated_at: session.updated_at,
        }
    }
}

/// Input for committing an approved context to a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitContextInput {
    pub context: ProjectContext,
}
