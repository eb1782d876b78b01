//! Project context detection with a human review gate.
//!
//! A free-text description is classified into a [`models::ProjectContext`],
//! shown to a human who either approves it or refines it, and the approved
//! context is persisted per session so later conversations reuse it without
//! re-detection.

pub mod api;
pub mod classify;
pub mod config;
pub mod db;
pub mod detect;
pub mod error;
pub mod mcp;
pub mod models;
pub mod refine;
pub mod review;
pub mod workflow;
