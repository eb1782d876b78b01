//! Domain models for context-gate.
//!
//! # Core Concepts
//!
//! ## Durable Entities
//!
//! - [`Session`]: The last approved [`ProjectContext`] for a caller-chosen
//!   session id, plus an append-only [`HistoryEntry`] trail.
//!
//! ## Transient Entities
//!
//! These exist only while a human is looking at a detection:
//!
//! - [`ReviewState`]: A rendered context awaiting `approve` or `refine: ...`.
//!   Discarded on approval (after commit) or cancellation.
//!
//! ## Values
//!
//! - [`ProjectContext`]: complexity, domain, intent and entities detected from
//!   free text, optionally refined by a human.

mod context;
mod review;
mod session;

pub use context::*;
pub use review::*;
pub use session::*;
