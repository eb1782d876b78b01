//! MCP server exposing context detection and review to agent orchestrators.
//!
//! The tools are stateless: the orchestrator drives the review loop by
//! showing `review_prompt` to the human and calling `refine_context` or
//! `commit_context` depending on the answer.

mod types;

pub use types::*;

use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use serde::Serialize;

use crate::db::Database;
use crate::error::ContextError;
use crate::review::render_review;
use crate::workflow::ContextWorkflow;

#[derive(Clone)]
pub struct McpServer {
    db: Database,
    workflow: ContextWorkflow,
    tool_router: ToolRouter<Self>,
}

impl McpServer {
    pub fn new(db: Database, workflow: ContextWorkflow) -> Self {
        Self {
            db,
            workflow,
            tool_router: Self::tool_router(),
        }
    }

    fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    fn context_error(e: ContextError) -> McpError {
        match e {
            ContextError::InvalidInput => McpError::invalid_params(e.user_message(), None),
            _ => McpError::internal_error(e.user_message(), None),
        }
    }

    /// Session ids are opaque; only a blank id is rejected.
    fn session_id(session_id: &str) -> Result<&str, McpError> {
        if session_id.trim().is_empty() {
            return Err(McpError::invalid_params("session_id must not be empty", None));
        }
        Ok(session_id)
    }

    // ============================================================
    // Tool logic, shared with tests
    // ============================================================

    pub async fn detect(&self, description: &str) -> Result<DetectContextResponse, McpError> {
        let detection = self
            .workflow
            .detector()
            .detect_or_fallback(description)
            .await
            .map_err(Self::context_error)?;

        Ok(DetectContextResponse {
            review_prompt: render_review(&detection.context),
            context: detection.context.into(),
            fallback: detection.fallback,
            notice: detection.notice,
        })
    }

    pub async fn refine(
        &self,
        context: ContextParams,
        feedback: &str,
    ) -> Result<RefineContextResponse, McpError> {
        let current = context
            .into_context()
            .map_err(|e| McpError::invalid_params(e, None))?;
        let refinement = self.workflow.refiner().refine(&current, feedback).await;

        Ok(RefineContextResponse {
            review_prompt: render_review(&refinement.context),
            context: refinement.context.into(),
            warnings: refinement.warnings,
        })
    }

    pub fn render(&self, context: ContextParams) -> Result<String, McpError> {
        let context = context
            .into_context()
            .map_err(|e| McpError::invalid_params(e, None))?;
        Ok(render_review(&context))
    }

    pub fn session_context(&self, session_id: &str) -> Result<SessionContextResponse, McpError> {
        let session_id = Self::session_id(session_id)?;
        let session = self
            .db
            .get_session(session_id)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;

        Ok(match session {
            Some(session) => session.into(),
            None => SessionContextResponse::missing(session_id),
        })
    }

    pub fn commit(
        &self,
        session_id: &str,
        context: ContextParams,
    ) -> Result<SessionContextResponse, McpError> {
        let session_id = Self::session_id(session_id)?;
        let context = context
            .into_context()
            .map_err(|e| McpError::invalid_params(e, None))?;

        self.db
            .put_session(session_id, &context)
            .map(Into::into)
            .map_err(|e| McpError::internal_error(e.to_string(), None))
    }

    pub async fn check_trigger(
        &self,
        session_id: &str,
        message: &str,
    ) -> Result<RefinementTriggerResponse, McpError> {
        let session_id = Self::session_id(session_id)?;
        let reopened = self
            .workflow
            .reopen(session_id, message)
            .await
            .map_err(Self::context_error)?;

        Ok(match reopened {
            Some((review, warnings)) => RefinementTriggerResponse {
                triggered: true,
                review_prompt: Some(review.review_prompt),
                context: Some(review.context.into()),
                warnings,
            },
            None => RefinementTriggerResponse {
                triggered: false,
                context: None,
                review_prompt: None,
                warnings: Vec::new(),
            },
        })
    }
}

#[tool_router]
impl McpServer {
    #[tool(
        description = "Detect the project context (complexity, domain, intent, entities) from a free-text description. Call this when a session has no stored context (see get_session_context). Returns the context and a review_prompt: show the review_prompt to the human VERBATIM and wait for 'approve' or 'refine: ...'. If fallback is true, classification was unavailable; show the notice too."
    )]
    async fn detect_context(
        &self,
        params: Parameters<DetectContextRequest>,
    ) -> Result<CallToolResult, McpError> {
        let response = self.detect(&params.0.description).await?;
        Self::json_result(&response)
    }

    #[tool(
        description = "Apply the human's feedback to the context under review. Pass the feedback without the 'refine:' prefix. Structured 'key=value' pairs (domain, intent, complexity, entities) are applied directly; anything else is reinterpreted as a correction. Never fails: unusable feedback is reported in warnings. Show the returned review_prompt to the human again."
    )]
    async fn refine_context(
        &self,
        params: Parameters<RefineContextRequest>,
    ) -> Result<CallToolResult, McpError> {
        let req = params.0;
        let response = self.refine(req.context, &req.feedback).await?;
        Self::json_result(&response)
    }

    #[tool(
        description = "Render a context as the plain-text review prompt shown to the human. Use when you need to re-display a context you already hold."
    )]
    async fn render_review(
        &self,
        params: Parameters<RenderReviewRequest>,
    ) -> Result<CallToolResult, McpError> {
        let prompt = self.render(params.0.context)?;
        Ok(CallToolResult::success(vec![Content::text(prompt)]))
    }

    #[tool(
        description = "Get the last approved context for a session. Call this FIRST in every conversation: if found is true, use the stored context and skip detection."
    )]
    async fn get_session_context(
        &self,
        params: Parameters<SessionContextRequest>,
    ) -> Result<CallToolResult, McpError> {
        let response = self.session_context(&params.0.session_id)?;
        Self::json_result(&response)
    }

    #[tool(
        description = "Persist a context the human has APPROVED. Call exactly once per approval, never for a context still under review. Side effect: overwrites the session's current context and appends it to the session history."
    )]
    async fn commit_context(
        &self,
        params: Parameters<CommitContextRequest>,
    ) -> Result<CallToolResult, McpError> {
        let req = params.0;
        let response = self.commit(&req.session_id, req.context)?;
        tracing::info!(session_id = %req.session_id, "Context committed via MCP");
        Self::json_result(&response)
    }

    #[tool(
        description = "Check a conversational message for a refinement trigger (e.g. 'actually, this is...', 'refine:', 'change domain'). If triggered, the stored context is refined with the message and returned with a review_prompt: show it and wait for approval before calling commit_context."
    )]
    async fn check_refinement_trigger(
        &self,
        params: Parameters<RefinementTriggerRequest>,
    ) -> Result<CallToolResult, McpError> {
        let req = params.0;
        let response = self.check_trigger(&req.session_id, &req.message).await?;
        Self::json_result(&response)
    }
}

#[tool_handler]
impl ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: rmcp::model::Implementation {
                name: "context-gate".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            instructions: Some(
                r#"context-gate detects what a project is about and lets the human confirm it before you act on it.

WORKFLOW (per conversation, keyed by a session_id you choose, e.g. the thread id):
1. get_session_context. If found, use that context and skip to step 5.
2. detect_context with the user's description.
3. Show review_prompt to the human exactly as returned. Wait for their reply.
4. Reply 'approve' -> commit_context with the context shown.
   Reply 'refine: <feedback>' or anything else -> refine_context with the
   feedback, then go back to step 3 with the new review_prompt.
5. For every later user message, call check_refinement_trigger. If triggered,
   go to step 3 with the returned review_prompt.

RULES:
- Only commit a context the human explicitly approved.
- Never commit intermediate refinements.
- If the human abandons the review, commit nothing."#
                    .into(),
            ),
            ..Default::default()
        }
    }
}

pub async fn run_stdio_server(db: Database, workflow: ContextWorkflow) -> anyhow::Result<()> {
    use tokio::io::{stdin, stdout};

    tracing::info!("Starting MCP server via stdio");

    let service = McpServer::new(db, workflow);
    let server = service.serve((stdin(), stdout())).await?;

    let quit_reason = server.waiting().await?;
    tracing::info!("MCP server stopped: {:?}", quit_reason);

    Ok(())
}
