//! # Conversation Module
//!
//! Per-session conversation state and the request pipeline that drives it.
//!
//! ## Key Components:
//! - **history**: turns, the session store abstraction, per-session locks
//! - **orchestrator**: transcribe → generate → synthesize for one request

pub mod history;
pub mod orchestrator;

pub use history::{InMemorySessionStore, SessionStore};
pub use orchestrator::{ConversationOrchestrator, PipelineError, PipelineRequest};
