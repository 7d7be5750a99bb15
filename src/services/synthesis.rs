//! # Text-to-Speech Client
//!
//! Converts reply text into a hosted MP3 through a Murf-style `speech/generate`
//! endpoint. Output parameters are fixed: MP3, mono, 24 kHz, neutral speed and
//! pitch, `GEN2` model tier. Only the text and voice vary per call.

use crate::config::SynthesisSettings;
use crate::services::{configured_key, read_json, CallFailure, SpeechSynthesizer};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

const AUDIO_FORMAT: &str = "MP3";
const MODEL_TIER: &str = "GEN2";
const CHANNEL_TYPE: &str = "MONO";
const SAMPLE_RATE: u32 = 24_000;

/// Why no reply audio was produced.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("text-to-speech API key is not set")]
    MissingCredential,

    #[error("speech generation request failed: {0}")]
    Transport(CallFailure),

    #[error("speech generation failed: {0}")]
    Status(CallFailure),

    #[error("no audio URL returned from text-to-speech provider")]
    NoAudioReturned,

    #[error("audio download failed: {0}")]
    Download(CallFailure),
}

impl SynthesisError {
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            SynthesisError::Transport(f) | SynthesisError::Status(f) | SynthesisError::Download(f) => {
                f.status
            }
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateSpeechRequest<'a> {
    text: &'a str,
    voice_id: &'a str,
    audio_format: &'static str,
    model: &'static str,
    speed: i32,
    pitch: i32,
    channel_type: &'static str,
    sample_rate: u32,
}

impl<'a> GenerateSpeechRequest<'a> {
    fn new(text: &'a str, voice_id: &'a str) -> Self {
        Self {
            text,
            voice_id,
            audio_format: AUDIO_FORMAT,
            model: MODEL_TIER,
            speed: 0,
            pitch: 0,
            channel_type: CHANNEL_TYPE,
            sample_rate: SAMPLE_RATE,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateSpeechResponse {
    #[serde(rename = "audioFile", default)]
    audio_file: Option<String>,
}

impl GenerateSpeechResponse {
    fn into_audio_url(self) -> Result<String, SynthesisError> {
        self.audio_file
            .filter(|url| !url.trim().is_empty())
            .ok_or(SynthesisError::NoAudioReturned)
    }
}

pub struct MurfClient {
    http: reqwest::Client,
    settings: SynthesisSettings,
}

impl MurfClient {
    pub fn new(http: reqwest::Client, settings: SynthesisSettings) -> Self {
        Self { http, settings }
    }

    fn api_key(&self) -> Result<&str, SynthesisError> {
        configured_key(&self.settings.api_key).ok_or(SynthesisError::MissingCredential)
    }
}

#[async_trait]
impl SpeechSynthesizer for MurfClient {
    fn check_credentials(&self) -> Result<(), SynthesisError> {
        self.api_key().map(|_| ())
    }

    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<String, SynthesisError> {
        let key = self.api_key()?;

        info!(voice_id, chars = text.len(), "Generating speech");
        let response = self
            .http
            .post(&self.settings.api_url)
            .header("api-key", key)
            .header("accept", "application/json")
            .json(&GenerateSpeechRequest::new(text, voice_id))
            .send()
            .await
            .map_err(|e| SynthesisError::Transport(CallFailure::from_reqwest(e)))?;

        let body: GenerateSpeechResponse = read_json(response).await.map_err(|failure| {
            error!(status = ?failure.status, error = %failure.message, "Speech generation failed");
            SynthesisError::Status(failure)
        })?;

        let audio_url = body.into_audio_url()?;
        info!(voice_id, "Speech generation successful");
        Ok(audio_url)
    }

    async fn download(&self, audio_url: &str) -> Result<Vec<u8>, SynthesisError> {
        let response = self
            .http
            .get(audio_url)
            .send()
            .await
            .map_err(|e| SynthesisError::Download(CallFailure::from_reqwest(e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SynthesisError::Download(CallFailure::new(
                Some(status.as_u16()),
                "audio file could not be fetched",
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SynthesisError::Download(CallFailure::from_reqwest(e)))?;
        Ok(bytes.to_vec())
    }
}
