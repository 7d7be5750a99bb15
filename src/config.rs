//! # Configuration Management
//!
//! Loads relay settings from layered sources:
//! - built-in defaults (the `Default` impl below)
//! - an optional `config.toml` in the working directory
//! - environment variables with the `APP_` prefix (`APP_SERVER__PORT=9000`)
//! - the provider credential variables `ASSEMBLY_AI_API_KEY`, `GOOGLE_API_KEY`
//!   and `MURF_API_KEY`, plus the platform variables `HOST` and `PORT`
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Credential / platform variables
//! 2. `APP_` environment variables
//! 3. Configuration file (config.toml)
//! 4. Default values
//!
//! Credentials are optional here on purpose: a missing key only fails the
//! request that needs it, never server startup.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Complete relay configuration, grouped by concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub transcription: TranscriptionSettings,
    pub generation: GenerationSettings,
    pub synthesis: SynthesisSettings,
    pub audio: AudioSettings,
    pub history: HistorySettings,
    pub http: HttpSettings,
}

/// Where the HTTP server binds.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Speech-to-text provider settings (upload, job submission and polling).
///
/// ## Polling:
/// The job is checked at most `max_poll_attempts` times, `poll_interval_secs`
/// apart. With the defaults (10s, 30 attempts) a clip gives up after roughly
/// five minutes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionSettings {
    pub api_key: Option<String>,
    pub upload_url: String,
    pub transcript_url: String,
    pub poll_interval_secs: u64,
    pub max_poll_attempts: u32,
}

/// Language-model endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSettings {
    pub api_key: Option<String>,
    /// Base URL without the `/models/...` suffix.
    pub base_url: String,
    pub model: String,
}

/// Text-to-speech provider settings, including the fallback apology clip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisSettings {
    pub api_key: Option<String>,
    pub api_url: String,
    /// Voice used when the caller does not send `voice_id`, and for the fallback clip.
    pub default_voice: String,
    pub fallback_text: String,
    /// Where the fallback MP3 is cached. `None` means `<tmp>/fallback_audio.mp3`.
    pub fallback_path: Option<PathBuf>,
}

/// Inbound audio validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSettings {
    /// Lower-case filename suffixes accepted on upload (checked by name only).
    pub allowed_extensions: Vec<String>,
    /// Largest accepted multipart part, in bytes.
    pub max_upload_bytes: usize,
}

/// How conversation history is committed and replayed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySettings {
    /// Maximum number of most recent turns replayed to the model. `0` = everything.
    pub max_context_turns: usize,
    pub commit: HistoryCommit,
}

/// When the user turn of a pipeline run is written to history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryCommit {
    /// Append the user turn before generation, the model turn after it.
    /// A failed generation leaves the user turn behind.
    Incremental,
    /// Append both turns together once generation has succeeded.
    Atomic,
}

/// Outbound HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    /// Per-request timeout for every provider call (each poll is its own request).
    pub request_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 5000,
            },
            transcription: TranscriptionSettings {
                api_key: None,
                upload_url: "https://api.assemblyai.com/v2/upload".to_string(),
                transcript_url: "https://api.assemblyai.com/v2/transcript".to_string(),
                poll_interval_secs: 10,
                max_poll_attempts: 30,
            },
            generation: GenerationSettings {
                api_key: None,
                base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
                model: "gemini-2.0-flash".to_string(),
            },
            synthesis: SynthesisSettings {
                api_key: None,
                api_url: "https://api.murf.ai/v1/speech/generate".to_string(),
                default_voice: "natalie".to_string(),
                fallback_text: "I'm having trouble connecting right now. Please try again later."
                    .to_string(),
                fallback_path: None,
            },
            audio: AudioSettings {
                allowed_extensions: ["wav", "mp3", "mp4", "m4a", "webm", "ogg"]
                    .iter()
                    .map(|ext| ext.to_string())
                    .collect(),
                max_upload_bytes: 25 * 1024 * 1024,
            },
            history: HistorySettings {
                max_context_turns: 0,
                commit: HistoryCommit::Incremental,
            },
            http: HttpSettings {
                request_timeout_secs: 60,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port (`APP_` prefix, `__` between levels)
    /// - `APP_TRANSCRIPTION__POLL_INTERVAL_SECS=5`: Poll faster
    /// - `APP_HISTORY__COMMIT=atomic`: Only record complete exchanges
    /// - `ASSEMBLY_AI_API_KEY=...`: Speech-to-text credential
    /// - `PORT=3000`: Special case for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        // Provider credentials keep their conventional names rather than APP_*.
        for (var, key) in [
            ("ASSEMBLY_AI_API_KEY", "transcription.api_key"),
            ("GOOGLE_API_KEY", "generation.api_key"),
            ("MURF_API_KEY", "synthesis.api_key"),
        ] {
            if let Ok(value) = env::var(var) {
                if !value.trim().is_empty() {
                    settings = settings.set_override(key, value)?;
                }
            }
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject settings that would make the relay misbehave at runtime.
    ///
    /// Missing credentials are deliberately not checked; see the module docs.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.transcription.poll_interval_secs == 0 {
            return Err(anyhow::anyhow!("Transcription poll interval must be greater than 0"));
        }

        if self.transcription.max_poll_attempts == 0 {
            return Err(anyhow::anyhow!("Transcription poll attempts must be greater than 0"));
        }

        if self.audio.allowed_extensions.is_empty() {
            return Err(anyhow::anyhow!("At least one audio extension must be allowed"));
        }

        if self.audio.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("Maximum upload size must be greater than 0"));
        }

        if self.synthesis.default_voice.trim().is_empty() {
            return Err(anyhow::anyhow!("Default voice cannot be empty"));
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.http.request_timeout_secs)
    }

    /// Resolved location of the cached fallback clip.
    pub fn fallback_audio_path(&self) -> PathBuf {
        self.synthesis
            .fallback_path
            .clone()
            .unwrap_or_else(|| env::temp_dir().join("fallback_audio.mp3"))
    }
}
