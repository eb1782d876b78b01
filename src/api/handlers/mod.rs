use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;

use super::AppState;
use crate::error::ContextError;
use crate::models::*;

// ============================================================
// Error Handling
// ============================================================

/// Log an internal error and return a sanitized response to the client.
fn internal_error(e: impl std::fmt::Display) -> (StatusCode, String) {
    tracing::error!("Internal error: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error".to_string(),
    )
}

/// Map workflow errors to responses. Messages are the plain-language ones
/// meant for the human, never the underlying cause.
fn context_error(e: ContextError) -> (StatusCode, String) {
    match e {
        ContextError::InvalidInput => (StatusCode::BAD_REQUEST, e.user_message()),
        ContextError::ClassificationUnavailable(ref cause) | ContextError::Storage(ref cause) => {
            tracing::error!(error = %cause, "Capability unavailable");
            (StatusCode::SERVICE_UNAVAILABLE, e.user_message())
        }
    }
}

fn session_not_found() -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, "Session not found".to_string())
}

fn review_not_found() -> (StatusCode, String) {
    (
        StatusCode::NOT_FOUND,
        "No review is open for this session".to_string(),
    )
}

// ============================================================
// Health
// ============================================================

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================
// Detection and refinement
// ============================================================

pub async fn detect(
    State(state): State<AppState>,
    Json(input): Json<DetectInput>,
) -> Result<Json<Detection>, (StatusCode, String)> {
    state
        .workflow
        .detector()
        .detect_or_fallback(&input.description)
        .await
        .map(Json)
        .map_err(context_error)
}

pub async fn refine(
    State(state): State<AppState>,
    Json(input): Json<RefineInput>,
) -> Json<Refinement> {
    Json(
        state
            .workflow
            .refiner()
            .refine(&input.context, &input.feedback)
            .await,
    )
}

// ============================================================
// Sessions
// ============================================================

pub async fn list_sessions(
    State(state): State<AppState>,
) -> Result<Json<Vec<SessionSummary>>, (StatusCode, String)> {
    state.db.list_sessions().map(Json).map_err(internal_error)
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Session>, (StatusCode, String)> {
    state
        .db
        .get_session(&id)
        .map_err(internal_error)?
        .map(Json)
        .ok_or_else(session_not_found)
}

/// Commit an already-approved context directly, bypassing review.
pub async fn put_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<CommitContextInput>,
) -> Result<Json<Session>, (StatusCode, String)> {
    state
        .db
        .put_session(&id, &input.context.normalized())
        .map(Json)
        .map_err(internal_error)
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    state.reviews.take(&id);
    if state.db.delete_session(&id).map_err(internal_error)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(session_not_found())
    }
}

pub async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<HistoryEntry>>, (StatusCode, String)> {
    state
        .db
        .get_session(&id)
        .map_err(internal_error)?
        .map(|session| Json(session.history))
        .ok_or_else(session_not_found)
}

// ============================================================
// Review gate
// ============================================================

pub async fn open_review(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<OpenReviewInput>>,
) -> Result<(StatusCode, Json<ReviewState>), (StatusCode, String)> {
    let input = body.map(|Json(input)| input).unwrap_or_default();
    let review = state
        .workflow
        .open_review(&id, input.description.as_deref())
        .await
        .map_err(context_error)?;

    state.reviews.insert(review.clone());
    Ok((StatusCode::CREATED, Json(review)))
}

pub async fn get_review(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ReviewState>, (StatusCode, String)> {
    state.reviews.get(&id).map(Json).ok_or_else(review_not_found)
}

/// Submit `approve`, `refine: ...` or free-text feedback for the open review.
pub async fn decide(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<ReviewResponseInput>,
) -> Result<Json<ReviewOutcome>, (StatusCode, String)> {
    let review = state.reviews.take(&id).ok_or_else(review_not_found)?;

    match state.workflow.respond(review.clone(), &input.response).await {
        Ok(outcome) => {
            if let ReviewOutcome::Reviewing { review, .. } = &outcome {
                state.reviews.insert(review.clone());
            }
            Ok(Json(outcome))
        }
        Err(e) => {
            // Keep the review open so the human can retry once storage is back.
            state.reviews.insert(review);
            Err(context_error(e))
        }
    }
}

/// Cancel the open review. The session store is not touched.
pub async fn cancel_review(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .reviews
        .take(&id)
        .map(|_| {
            tracing::info!(session_id = %id, "Review cancelled");
            StatusCode::NO_CONTENT
        })
        .ok_or_else(review_not_found)
}

// ============================================================
// Conversational messages
// ============================================================

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    /// Whether the message contained a trigger phrase and reopened review.
    pub reopened: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review: Option<ReviewState>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Inspect a conversational message for a refinement trigger. A match opens
/// a review with the message applied as feedback.
pub async fn post_message(
    State(state): State<AppState>,
    Json(input): Json<ConversationMessageInput>,
) -> Result<Json<MessageResponse>, (StatusCode, String)> {
    let reopened = state
        .workflow
        .reopen(&input.session_id, &input.message)
        .await
        .map_err(context_error)?;

    let response = match reopened {
        Some((review, warnings)) => {
            state.reviews.insert(review.clone());
            MessageResponse {
                reopened: true,
                review: Some(review),
                warnings,
            }
        }
        None => MessageResponse {
            reopened: false,
            review: None,
            warnings: Vec::new(),
        },
    };
    Ok(Json(response))
}
