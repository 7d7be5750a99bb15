//! # Conversation History
//!
//! Each session owns an ordered list of turns that is replayed to the language
//! model on every request. Sessions are created implicitly by the first append
//! and live for the lifetime of the process.
//!
//! ## Concurrency:
//! - [`InMemorySessionStore`] keeps histories in a sharded `DashMap`, so appends
//!   to different sessions never contend on one global lock
//! - [`SessionLocks`] hands out one async mutex per session id; the orchestrator
//!   holds it across read → generate → append so two requests for the same
//!   session cannot interleave their turns
//!
//! The store is a trait so a persistent backend can replace the in-memory one
//! without touching the orchestrator.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Who spoke a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

/// One role-tagged utterance. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }
}

/// Keyed storage of conversation histories.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The full ordered history of a session; empty for an unknown id.
    async fn history(&self, session_id: &str) -> Vec<Turn>;

    /// Append `turns` to the end of a session's history in one step,
    /// creating the session if needed.
    async fn append(&self, session_id: &str, turns: Vec<Turn>);

    /// Number of sessions that have at least one recorded turn.
    async fn session_count(&self) -> usize;
}

/// Volatile, process-wide session store.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, Vec<Turn>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn history(&self, session_id: &str) -> Vec<Turn> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    async fn append(&self, session_id: &str, turns: Vec<Turn>) {
        if turns.is_empty() {
            return;
        }
        self.sessions
            .entry(session_id.to_string())
            .or_default()
            .extend(turns);
    }

    async fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

/// Per-session async mutexes, created on first use.
#[derive(Debug, Default)]
pub struct SessionLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `session_id`. Released when the guard drops.
    pub async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<()> {
        // Clone the Arc out first: the DashMap shard guard must not be held across the await.
        let lock = self
            .locks
            .entry(session_id.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }
}

/// The slice of `turns` to replay to the model.
///
/// `max_turns == 0` means no limit. Otherwise the most recent `max_turns`
/// turns are kept, moved forward if needed so the window starts on a user turn.
pub fn context_window(turns: &[Turn], max_turns: usize) -> &[Turn] {
    if max_turns == 0 || turns.len() <= max_turns {
        return turns;
    }

    let start = turns.len() - max_turns;
    let aligned = turns[start..]
        .iter()
        .position(|turn| turn.role == Role::User)
        .map(|offset| start + offset)
        .unwrap_or(start);
    &turns[aligned..]
}
