//! # Provider Clients
//!
//! Outbound calls to the three external services the relay chains together:
//! speech-to-text, the language model, and text-to-speech. Each service sits
//! behind a small async trait so the conversation orchestrator can be driven
//! by fakes in tests and the concrete HTTP clients can be swapped per provider.
//!
//! ## Key Components:
//! - **transcription**: upload → submit job → poll until done (AssemblyAI wire format)
//! - **polling**: the bounded, fixed-interval poll state machine with an injectable sleeper
//! - **generation**: full-history reply generation (Gemini `generateContent` wire format)
//! - **synthesis**: reply text to a hosted MP3 URL (Murf wire format)
//! - **fallback**: one cached apology clip served when a pipeline fails
//!
//! ## Error model:
//! Every client returns its own `thiserror` enum so callers can tell exactly
//! which stage failed and with what upstream status.

pub mod fallback;
pub mod generation;
pub mod polling;
pub mod synthesis;
pub mod transcription;

use crate::conversation::history::Turn;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;

pub use fallback::FallbackAudio;
pub use generation::{GeminiClient, GenerationError};
pub use synthesis::{MurfClient, SynthesisError};
pub use transcription::{AssemblyAiClient, TranscriptionError};

/// Longest slice of an upstream error body we keep for logs and messages.
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Converts recorded audio into text.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Fails with `MissingCredential` when the client could not make a call at all.
    fn check_credentials(&self) -> Result<(), TranscriptionError> {
        Ok(())
    }

    /// Returns whatever text the provider produced, including an empty string.
    async fn transcribe(&self, audio: Vec<u8>) -> Result<String, TranscriptionError>;
}

/// Produces the model's next turn from the ordered conversation so far.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    fn check_credentials(&self) -> Result<(), GenerationError> {
        Ok(())
    }

    async fn generate_reply(&self, turns: &[Turn]) -> Result<String, GenerationError>;
}

/// Turns reply text into hosted audio.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    fn check_credentials(&self) -> Result<(), SynthesisError> {
        Ok(())
    }

    /// Synthesize `text` with `voice_id` and return the URL of the generated audio.
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<String, SynthesisError>;

    /// Fetch the bytes behind an audio URL returned by [`SpeechSynthesizer::synthesize`].
    async fn download(&self, audio_url: &str) -> Result<Vec<u8>, SynthesisError>;
}

/// A failed call to a provider: the HTTP status when one was received,
/// and a short description (usually the start of the response body).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFailure {
    pub status: Option<u16>,
    pub message: String,
}

impl CallFailure {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn from_reqwest(err: reqwest::Error) -> Self {
        Self {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {}: {}", status, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Build the shared outbound client. One client per provider keeps connection pools separate.
pub fn build_http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("voice-relay-backend/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Check the status of a provider response and decode its JSON body.
///
/// Non-2xx responses become a [`CallFailure`] carrying the status and a
/// truncated body; an undecodable 2xx body keeps its status too.
pub async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, CallFailure> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CallFailure::new(Some(status.as_u16()), truncate_body(&body)));
    }

    let body = response.bytes().await.map_err(CallFailure::from_reqwest)?;
    serde_json::from_slice(&body).map_err(|e| {
        CallFailure::new(Some(status.as_u16()), format!("invalid response body: {}", e))
    })
}

pub(crate) fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX_ERROR_BODY_CHARS {
        return trimmed.to_string();
    }
    let mut cut: String = trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect();
    cut.push('…');
    cut
}

/// Provider API key, treating a blank value as unset.
pub(crate) fn configured_key(key: &Option<String>) -> Option<&str> {
    key.as_deref().filter(|key| !key.trim().is_empty())
}
