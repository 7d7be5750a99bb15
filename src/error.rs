//! # Error Handling
//!
//! `AppError` is the error type every HTTP handler returns. It decides the
//! status code and renders one user-facing message as JSON.
//!
//! Pipeline failures arrive as [`PipelineError`] (tagged by stage) and are
//! mapped here, in one place:
//!
//! | Failure | Variant | Status |
//! |---|---|---|
//! | missing/invalid upload, bad extension | `ValidationError` | 400 |
//! | transcript was blank | `NoSpeech` | 400 |
//! | provider credential not configured | `ConfigError` | 500 |
//! | provider error or malformed answer | `Upstream` | 502 |
//! | transcription poll ceiling reached | `UpstreamTimeout` | 504 |
//!
//! ## JSON Response Format:
//! ```json
//! {
//!   "error": "Invalid file format",
//!   "error_type": "validation_error",
//!   "timestamp": "2025-01-01T12:00:00Z"
//! }
//! ```

use crate::conversation::PipelineError;
use crate::services::TranscriptionError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Errors surfaced to HTTP clients.
#[derive(Debug)]
pub enum AppError {
    /// Malformed request (e.g. unreadable multipart body)
    BadRequest(String),

    NotFound(String),

    /// A required setting or credential is missing
    ConfigError(String),

    /// The request was well-formed but its content is not acceptable
    ValidationError(String),

    /// The clip was transcribed but contained no speech
    NoSpeech,

    /// An external provider failed or answered with something unusable
    Upstream(String),

    /// An external provider did not finish in time
    UpstreamTimeout(String),
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            AppError::ConfigError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg.clone()),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg.clone()),
            AppError::NoSpeech => (
                StatusCode::BAD_REQUEST,
                "no_speech",
                "No speech detected in audio".to_string(),
            ),
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, "upstream_error", msg.clone()),
            AppError::UpstreamTimeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "upstream_timeout", msg.clone()),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::NoSpeech => write!(f, "No speech detected in audio"),
            AppError::Upstream(msg) => write!(f, "Upstream error: {}", msg),
            AppError::UpstreamTimeout(msg) => write!(f, "Upstream timeout: {}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        self.parts().0
    }

    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = self.parts();

        HttpResponse::build(status).json(json!({
            "error": message,
            "error_type": error_type,
            "timestamp": chrono::Utc::now().to_rfc3339()
        }))
    }
}

/// Collapse a stage failure into one message and status.
///
/// The detailed cause (upstream status, provider body) is already logged by
/// the orchestrator; clients get the stage-level summary.
impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        if err.is_configuration() {
            return AppError::ConfigError(err.to_string());
        }

        match err {
            PipelineError::NoSpeech => AppError::NoSpeech,
            PipelineError::Transcription(TranscriptionError::Timeout { .. }) => {
                AppError::UpstreamTimeout("Transcription timeout".to_string())
            }
            PipelineError::Transcription(e) => {
                AppError::Upstream(format!("Failed to transcribe audio: {}", e))
            }
            PipelineError::Generation(e) => AppError::Upstream(format!("Failed to generate a reply: {}", e)),
            PipelineError::Synthesis(e) => AppError::Upstream(format!("Failed to generate speech: {}", e)),
        }
    }
}

impl From<actix_multipart::MultipartError> for AppError {
    fn from(err: actix_multipart::MultipartError) -> Self {
        AppError::BadRequest(format!("Invalid multipart payload: {}", err))
    }
}

pub type AppResult<T> = Result<T, AppError>;
