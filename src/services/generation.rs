//! # Language-Model Client
//!
//! Sends the whole ordered conversation to a Gemini-style `generateContent`
//! endpoint and returns the first candidate's first text part. The model keeps
//! no state between calls; all context comes from the turns we send.

use crate::config::GenerationSettings;
use crate::conversation::history::Turn;
use crate::services::{configured_key, truncate_body, CallFailure, ReplyGenerator};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info};

/// Why the model did not produce a reply.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("language model API key is not configured")]
    MissingCredential,

    /// The endpoint could not be reached (DNS, TLS, timeout, ...).
    #[error("language model request failed: {0}")]
    Transport(CallFailure),

    #[error("language model request failed with status {status}")]
    Status { status: u16, body: String },

    /// The endpoint answered 2xx but without `candidates[0].content.parts[0].text`.
    #[error("invalid response format from language model")]
    MalformedResponse,
}

impl GenerationError {
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            GenerationError::Transport(f) => f.status,
            GenerationError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

impl<'a> From<&'a Turn> for Content<'a> {
    fn from(turn: &'a Turn) -> Self {
        Content {
            role: turn.role.as_str(),
            parts: [Part { text: &turn.text }],
        }
    }
}

/// Pull `candidates[0].content.parts[0].text` out of a response body.
fn extract_reply(body: &Value) -> Option<String> {
    body.get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .get(0)?
        .get("text")?
        .as_str()
        .map(str::to_owned)
}

pub struct GeminiClient {
    http: reqwest::Client,
    settings: GenerationSettings,
}

impl GeminiClient {
    pub fn new(http: reqwest::Client, settings: GenerationSettings) -> Self {
        Self { http, settings }
    }

    fn api_key(&self) -> Result<&str, GenerationError> {
        configured_key(&self.settings.api_key).ok_or(GenerationError::MissingCredential)
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.model
        )
    }
}

#[async_trait]
impl ReplyGenerator for GeminiClient {
    fn check_credentials(&self) -> Result<(), GenerationError> {
        self.api_key().map(|_| ())
    }

    async fn generate_reply(&self, turns: &[Turn]) -> Result<String, GenerationError> {
        let key = self.api_key()?;

        let request = GenerateRequest {
            contents: turns.iter().map(Content::from).collect(),
        };

        info!(model = %self.settings.model, turns = turns.len(), "Calling language model");
        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", key)
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(CallFailure::from_reqwest(e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GenerationError::Transport(CallFailure::from_reqwest(e)))?;

        if !status.is_success() {
            let body = truncate_body(&body);
            error!(status = status.as_u16(), body = %body, "Language model returned an error");
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply = serde_json::from_str::<Value>(&body)
            .ok()
            .as_ref()
            .and_then(extract_reply)
            .ok_or_else(|| {
                error!(body = %truncate_body(&body), "Failed to parse language model response");
                GenerationError::MalformedResponse
            })?;

        info!(chars = reply.len(), "Language model reply received");
        Ok(reply)
    }
}
