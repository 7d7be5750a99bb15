//! # Speech-to-Text Client
//!
//! Transcribes one recorded clip through an AssemblyAI-style API in three steps:
//! 1. **Upload** the raw bytes, receiving a provider-internal URL
//! 2. **Submit** a transcription job for that URL (language detection,
//!    punctuation and text formatting enabled)
//! 3. **Poll** the job with [`TranscriptPoller`] until it completes, fails,
//!    or runs out of attempts
//!
//! Each step has its own error variant so logs show exactly where a clip was lost.

use crate::config::TranscriptionSettings;
use crate::services::polling::{JobStatus, PollOutcome, PollPolicy, Sleeper, TokioSleeper, TranscriptPoller};
use crate::services::{configured_key, read_json, CallFailure, SpeechToText};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

/// Why a clip could not be transcribed.
#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("speech-to-text API key is not set")]
    MissingCredential,

    #[error("audio upload failed: {0}")]
    Upload(CallFailure),

    #[error("transcription job submission failed: {0}")]
    Submit(CallFailure),

    #[error("transcription status check failed: {0}")]
    Poll(CallFailure),

    #[error("transcription failed: {0}")]
    Provider(String),

    #[error("transcription did not finish after {attempts} status checks")]
    Timeout { attempts: u32 },
}

impl TranscriptionError {
    /// HTTP status returned by the provider, when the failure carried one.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            TranscriptionError::Upload(f)
            | TranscriptionError::Submit(f)
            | TranscriptionError::Poll(f) => f.status,
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    upload_url: String,
}

#[derive(Debug, Serialize)]
struct TranscriptRequest<'a> {
    audio_url: &'a str,
    language_detection: bool,
    punctuate: bool,
    format_text: bool,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptStatus {
    status: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP client for the upload / transcript endpoints.
pub struct AssemblyAiClient<S: Sleeper = TokioSleeper> {
    http: reqwest::Client,
    settings: TranscriptionSettings,
    poller: TranscriptPoller<S>,
}

impl AssemblyAiClient<TokioSleeper> {
    pub fn new(http: reqwest::Client, settings: TranscriptionSettings) -> Self {
        let policy = PollPolicy {
            interval: std::time::Duration::from_secs(settings.poll_interval_secs),
            max_attempts: settings.max_poll_attempts,
        };
        Self::with_poller(http, settings, TranscriptPoller::new(policy, TokioSleeper))
    }
}

impl<S: Sleeper> AssemblyAiClient<S> {
    pub fn with_poller(
        http: reqwest::Client,
        settings: TranscriptionSettings,
        poller: TranscriptPoller<S>,
    ) -> Self {
        Self {
            http,
            settings,
            poller,
        }
    }

    fn api_key(&self) -> Result<&str, TranscriptionError> {
        configured_key(&self.settings.api_key).ok_or(TranscriptionError::MissingCredential)
    }

    async fn upload(&self, key: &str, audio: Vec<u8>) -> Result<String, TranscriptionError> {
        let response = self
            .http
            .post(&self.settings.upload_url)
            .header("authorization", key)
            .header("content-type", "application/octet-stream")
            .body(audio)
            .send()
            .await
            .map_err(|e| TranscriptionError::Upload(CallFailure::from_reqwest(e)))?;

        let body: UploadResponse = read_json(response).await.map_err(TranscriptionError::Upload)?;
        Ok(body.upload_url)
    }

    async fn submit(&self, key: &str, audio_url: &str) -> Result<String, TranscriptionError> {
        let request = TranscriptRequest {
            audio_url,
            language_detection: true,
            punctuate: true,
            format_text: true,
        };

        let response = self
            .http
            .post(&self.settings.transcript_url)
            .header("authorization", key)
            .json(&request)
            .send()
            .await
            .map_err(|e| TranscriptionError::Submit(CallFailure::from_reqwest(e)))?;

        let body: SubmitResponse = read_json(response).await.map_err(TranscriptionError::Submit)?;
        Ok(body.id)
    }

    async fn check(&self, key: &str, transcript_id: &str) -> Result<JobStatus, TranscriptionError> {
        let url = format!(
            "{}/{}",
            self.settings.transcript_url.trim_end_matches('/'),
            transcript_id
        );
        let response = self
            .http
            .get(&url)
            .header("authorization", key)
            .send()
            .await
            .map_err(|e| TranscriptionError::Poll(CallFailure::from_reqwest(e)))?;

        let body: TranscriptStatus = read_json(response).await.map_err(TranscriptionError::Poll)?;
        Ok(JobStatus::from_provider(&body.status, body.text, body.error))
    }
}

#[async_trait]
impl<S: Sleeper> SpeechToText for AssemblyAiClient<S> {
    fn check_credentials(&self) -> Result<(), TranscriptionError> {
        self.api_key().map(|_| ())
    }

    async fn transcribe(&self, audio: Vec<u8>) -> Result<String, TranscriptionError> {
        let key = self.api_key()?;
        let audio_bytes = audio.len();
        let policy = self.poller.policy();
        info!(
            audio_bytes,
            max_attempts = policy.max_attempts,
            interval_secs = policy.interval.as_secs(),
            "Starting transcription"
        );

        let audio_url = self.upload(key, audio).await?;
        let transcript_id = self.submit(key, &audio_url).await?;
        info!(transcript_id = %transcript_id, "Transcription job submitted");

        let outcome = self
            .poller
            .poll(|_| self.check(key, &transcript_id))
            .await?;

        match outcome {
            PollOutcome::Completed(text) => {
                info!(transcript_id = %transcript_id, chars = text.len(), "Transcription completed");
                Ok(text)
            }
            PollOutcome::Failed(message) => {
                error!(transcript_id = %transcript_id, error = %message, "Provider reported transcription error");
                Err(TranscriptionError::Provider(message))
            }
            PollOutcome::TimedOut { attempts } => {
                error!(transcript_id = %transcript_id, attempts, "Transcription timed out");
                Err(TranscriptionError::Timeout { attempts })
            }
        }
    }
}
