//! # Voice Chat Endpoint
//!
//! `POST /agent/chat/{session_id}` with a multipart body:
//! - `audio`: the recorded clip (required; filename suffix must be allowed)
//! - `voice_id`: text-to-speech voice (optional; defaults to the configured voice)
//!
//! Validation happens entirely before the pipeline starts, so a rejected
//! upload never reaches a provider.

use crate::conversation::PipelineRequest;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpResponse};
use futures_util::StreamExt as _;
use serde::Serialize;
use tracing::info;

/// Successful chat response body.
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub success: bool,
    pub transcription: String,
    pub llm_response: String,
    pub audio_url: String,
}

/// What we pulled out of the multipart body.
#[derive(Debug, Default)]
struct ChatUpload {
    /// `(filename, bytes)` of the `audio` part.
    audio: Option<(String, Vec<u8>)>,
    voice_id: Option<String>,
}

/// Whether `filename` ends in one of `allowed` (case-insensitive, suffix only).
pub fn is_allowed_file(filename: &str, allowed: &[String]) -> bool {
    match filename.rsplit_once('.') {
        Some((_, ext)) => {
            let ext = ext.to_ascii_lowercase();
            allowed.iter().any(|a| a.eq_ignore_ascii_case(&ext))
        }
        None => false,
    }
}

/// Collect one part, refusing anything over `limit` bytes.
async fn read_field(field: &mut Field, limit: usize) -> AppResult<Vec<u8>> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk?;
        if bytes.len() + chunk.len() > limit {
            return Err(AppError::ValidationError(format!(
                "File too large (limit is {} bytes)",
                limit
            )));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

async fn read_upload(mut payload: Multipart, limit: usize) -> AppResult<ChatUpload> {
    let mut upload = ChatUpload::default();

    while let Some(item) = payload.next().await {
        let mut field = item?;
        let name = field.name().map(str::to_owned);

        match name.as_deref() {
            Some("audio") => {
                let filename = field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename())
                    .unwrap_or_default()
                    .to_string();
                let bytes = read_field(&mut field, limit).await?;
                upload.audio = Some((filename, bytes));
            }
            Some("voice_id") => {
                let bytes = read_field(&mut field, limit).await?;
                let voice = String::from_utf8(bytes)
                    .map_err(|_| AppError::ValidationError("voice_id must be UTF-8 text".to_string()))?;
                let voice = voice.trim();
                if !voice.is_empty() {
                    upload.voice_id = Some(voice.to_string());
                }
            }
            // Drain parts we don't use so the stream can advance.
            _ => {
                read_field(&mut field, limit).await?;
            }
        }
    }

    Ok(upload)
}

pub async fn agent_chat(
    state: web::Data<AppState>,
    path: web::Path<String>,
    payload: Multipart,
) -> AppResult<HttpResponse> {
    let session_id = path.into_inner();
    let upload = read_upload(payload, state.config.audio.max_upload_bytes).await?;

    let (filename, audio) = upload
        .audio
        .ok_or_else(|| AppError::ValidationError("No audio file provided".to_string()))?;
    if filename.is_empty() {
        return Err(AppError::ValidationError("No file selected".to_string()));
    }
    if !is_allowed_file(&filename, &state.config.audio.allowed_extensions) {
        return Err(AppError::ValidationError("Invalid file format".to_string()));
    }

    let voice_id = upload
        .voice_id
        .unwrap_or_else(|| state.config.synthesis.default_voice.clone());
    info!(
        session_id = %session_id,
        filename = %filename,
        audio_bytes = audio.len(),
        voice_id = %voice_id,
        "Received audio file"
    );

    let mut pipeline = state.begin_pipeline();
    let reply = match state
        .orchestrator
        .run(&session_id, PipelineRequest { audio, voice_id })
        .await
    {
        Ok(reply) => reply,
        Err(e) => {
            pipeline.mark_failed();
            return Err(e.into());
        }
    };

    Ok(HttpResponse::Ok().json(ChatResponse {
        success: true,
        transcription: reply.transcription,
        llm_response: reply.llm_response,
        audio_url: reply.audio_url,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::orchestrator::tests::{FakeLlm, FakeStt, FakeTts};
    use crate::state::tests::test_state;
    use actix_web::{test as actix_test, App};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    const BOUNDARY: &str = "----relay-test-boundary";

    /// Hand-built multipart body; `None` filename makes a plain text part.
    fn multipart_body(parts: &[(&str, Option<&str>, &str)]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, filename, content) in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match filename {
                Some(filename) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                        name, filename
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                ),
            }
            body.extend_from_slice(content.as_bytes());
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn chat_request(session: &str, body: Vec<u8>) -> actix_test::TestRequest {
        actix_test::TestRequest::post()
            .uri(&format!("/agent/chat/{}", session))
            .insert_header((
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(body)
    }

    #[test]
    fn test_allowed_extensions() {
        let allowed = crate::config::AppConfig::default().audio.allowed_extensions;
        for name in ["a.wav", "a.MP3", "voice.note.m4a", "clip.webm", "x.ogg", "y.mp4"] {
            assert!(is_allowed_file(name, &allowed), "{}", name);
        }
        for name in ["clip.exe", "wav", "audio.", "noextension", "clip.wav.exe"] {
            assert!(!is_allowed_file(name, &allowed), "{}", name);
        }
    }

    #[actix_web::test]
    async fn test_successful_chat_returns_reply_and_records_history() {
        let dir = tempfile::tempdir().unwrap();
        let tts = Arc::new(FakeTts::default());
        let state = test_state(
            Arc::new(FakeStt::saying("hello there")),
            Arc::new(FakeLlm {
                reply: Some("Hi! How can I help?".into()),
                ..Default::default()
            }),
            tts.clone(),
            dir.path(),
        );
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/agent/chat/{session_id}", web::post().to(agent_chat)),
        )
        .await;

        let body = multipart_body(&[("audio", Some("audio.wav"), "RIFF....WAVEfmt ")]);
        let resp = actix_test::call_service(&app, chat_request("abc", body).to_request()).await;
        assert!(resp.status().is_success());

        let json: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(
            json,
            serde_json::json!({
                "success": true,
                "transcription": "hello there",
                "llm_response": "Hi! How can I help?",
                "audio_url": "https://cdn/x.mp3"
            })
        );
        assert_eq!(tts.requests.lock().unwrap()[0].1, "natalie");
        assert_eq!(state.sessions().history("abc").await.len(), 2);
        assert_eq!(state.get_metrics_snapshot().pipeline_runs, 1);
    }

    #[actix_web::test]
    async fn test_voice_id_field_overrides_default() {
        let dir = tempfile::tempdir().unwrap();
        let tts = Arc::new(FakeTts::default());
        let state = test_state(
            Arc::new(FakeStt::saying("hello")),
            Arc::new(FakeLlm::default()),
            tts.clone(),
            dir.path(),
        );
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/agent/chat/{session_id}", web::post().to(agent_chat)),
        )
        .await;

        let body = multipart_body(&[
            ("voice_id", None, "en-US-ken"),
            ("audio", Some("clip.webm"), "webm-bytes"),
        ]);
        let resp = actix_test::call_service(&app, chat_request("s", body).to_request()).await;
        assert!(resp.status().is_success());
        assert_eq!(tts.requests.lock().unwrap()[0].1, "en-US-ken");
    }

    #[actix_web::test]
    async fn test_unsupported_extension_rejected_before_any_provider_call() {
        let dir = tempfile::tempdir().unwrap();
        let stt = Arc::new(FakeStt::saying("hello"));
        let state = test_state(
            stt.clone(),
            Arc::new(FakeLlm::default()),
            Arc::new(FakeTts::default()),
            dir.path(),
        );
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/agent/chat/{session_id}", web::post().to(agent_chat)),
        )
        .await;

        let body = multipart_body(&[("audio", Some("clip.exe"), "MZ")]);
        let resp = actix_test::call_service(&app, chat_request("s", body).to_request()).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);

        let json: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(json["error"], "Invalid file format");
        assert_eq!(stt.calls.load(Ordering::SeqCst), 0);
        assert_eq!(state.sessions().session_count().await, 0);
    }

    #[actix_web::test]
    async fn test_missing_audio_part_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(
            Arc::new(FakeStt::saying("hello")),
            Arc::new(FakeLlm::default()),
            Arc::new(FakeTts::default()),
            dir.path(),
        );
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/agent/chat/{session_id}", web::post().to(agent_chat)),
        )
        .await;

        let body = multipart_body(&[("voice_id", None, "natalie")]);
        let resp = actix_test::call_service(&app, chat_request("s", body).to_request()).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);

        let json: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(json["error"], "No audio file provided");
    }

    #[actix_web::test]
    async fn test_silent_clip_returns_no_speech() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(
            Arc::new(FakeStt::saying("   ")),
            Arc::new(FakeLlm::default()),
            Arc::new(FakeTts::default()),
            dir.path(),
        );
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/agent/chat/{session_id}", web::post().to(agent_chat)),
        )
        .await;

        let body = multipart_body(&[("audio", Some("audio.wav"), "RIFF")]);
        let resp = actix_test::call_service(&app, chat_request("quiet", body).to_request()).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);

        let json: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(json["error"], "No speech detected in audio");
        assert!(state.sessions().history("quiet").await.is_empty());
        assert_eq!(state.get_metrics_snapshot().pipeline_failures, 1);
    }

    #[actix_web::test]
    async fn test_oversized_upload_rejected_before_transcription() {
        let dir = tempfile::tempdir().unwrap();
        let stt = Arc::new(FakeStt::saying("hello"));
        let mut config = crate::config::AppConfig::default();
        config.audio.max_upload_bytes = 8;
        config.synthesis.fallback_path = Some(dir.path().join("fallback_audio.mp3"));
        let state = AppState::with_services(
            config,
            stt.clone(),
            Arc::new(FakeLlm::default()),
            Arc::new(FakeTts::default()),
            Arc::new(crate::conversation::InMemorySessionStore::new()),
        );
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/agent/chat/{session_id}", web::post().to(agent_chat)),
        )
        .await;

        let body = multipart_body(&[("audio", Some("audio.wav"), "RIFF....WAVEfmt ")]);
        let resp = actix_test::call_service(&app, chat_request("s", body).to_request()).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);

        let json: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(json["error"], "File too large (limit is 8 bytes)");
        assert_eq!(stt.calls.load(Ordering::SeqCst), 0);
    }

    #[actix_web::test]
    async fn test_unconfigured_providers_return_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = crate::config::AppConfig::default();
        // Unroutable, so any attempted call would surface as a 502 instead.
        config.transcription.upload_url = "http://127.0.0.1:9/upload".to_string();
        config.transcription.api_key = Some("stt-key".to_string());
        config.synthesis.fallback_path = Some(dir.path().join("fallback_audio.mp3"));
        let state = AppState::new(config).unwrap();

        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/agent/chat/{session_id}", web::post().to(agent_chat)),
        )
        .await;

        let body = multipart_body(&[("audio", Some("audio.wav"), "RIFF")]);
        let resp = actix_test::call_service(&app, chat_request("s", body).to_request()).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);

        let json: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(json["error_type"], "config_error");
        assert!(state.sessions().history("s").await.is_empty());
    }
}
