mod handlers;
pub mod middleware;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::db::Database;
use crate::models::ReviewState;
use crate::workflow::ContextWorkflow;

pub use middleware::SecurityConfig;

/// Shared state for the HTTP API.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub workflow: ContextWorkflow,
    pub reviews: PendingReviews,
}

impl AppState {
    pub fn new(db: Database, workflow: ContextWorkflow) -> Self {
        Self {
            db,
            workflow,
            reviews: PendingReviews::default(),
        }
    }
}

/// Open reviews, at most one per session. Reviews are transient and are
/// lost on restart; only approved contexts are durable.
#[derive(Clone, Default)]
pub struct PendingReviews {
    inner: Arc<Mutex<HashMap<String, ReviewState>>>,
}

impl PendingReviews {
    pub fn get(&self, session_id: &str) -> Option<ReviewState> {
        let reviews = self.inner.lock().expect("review lock poisoned");
        reviews.get(session_id).cloned()
    }

    /// Store `review`, replacing any review already open for its session.
    pub fn insert(&self, review: ReviewState) {
        let mut reviews = self.inner.lock().expect("review lock poisoned");
        if let Some(previous) = reviews.insert(review.session_id.clone(), review) {
            tracing::debug!(session_id = %previous.session_id, "Replaced open review");
        }
    }

    pub fn take(&self, session_id: &str) -> Option<ReviewState> {
        let mut reviews = self.inner.lock().expect("review lock poisoned");
        reviews.remove(session_id)
    }
}

pub fn create_router(state: AppState, security: SecurityConfig) -> Router {
    let api = Router::new()
        // Detection and refinement
        .route("/detect", post(handlers::detect))
        .route("/refine", post(handlers::refine))
        // Sessions
        .route("/sessions", get(handlers::list_sessions))
        .route(
            "/sessions/{id}",
            get(handlers::get_session)
                .put(handlers::put_session)
                .delete(handlers::delete_session),
        )
        .route("/sessions/{id}/history", get(handlers::get_history))
        // Review gate
        .route(
            "/sessions/{id}/review",
            get(handlers::get_review)
                .post(handlers::open_review)
                .delete(handlers::cancel_review),
        )
        .route("/sessions/{id}/review/decision", post(handlers::decide))
        // Conversational messages (trigger phrases)
        .route("/messages", post(handlers::post_message))
        // Health
        .route("/health", get(handlers::health));

    let mut router = Router::new()
        .nest("/api/v1", api)
        .layer(from_fn_with_state(
            security.clone(),
            middleware::auth_middleware,
        ));

    if let Some(limiter) = security.rate_limiter.clone() {
        router = router.layer(from_fn_with_state(
            limiter,
            middleware::rate_limit_middleware,
        ));
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(middleware::cors_layer(&security))
        .with_state(state)
}
