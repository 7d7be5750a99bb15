//! # Conversation Orchestrator
//!
//! Runs one inbound clip through the full pipeline for a session:
//!
//! ```text
//! Received → Transcribing → (empty check) → Generating → Synthesizing → Success
//! ```
//!
//! Provider credentials are checked before anything else, so a missing key
//! fails the run with no upload and no history change.
//!
//! ## History rules:
//! - Nothing is written while transcribing; an empty transcript changes nothing
//! - With [`HistoryCommit::Incremental`] the user turn is appended before
//!   generation and the model turn right after it. A failed generation leaves
//!   exactly the user turn; a failed synthesis leaves both turns, since the
//!   exchange did happen even though no audio came back
//! - With [`HistoryCommit::Atomic`] both turns are appended together after a
//!   successful generation, so a failed generation leaves no trace
//!
//! Failed stages are never rolled back or retried here.

use crate::config::{HistoryCommit, HistorySettings};
use crate::conversation::history::{context_window, SessionLocks, SessionStore, Turn};
use crate::services::{
    GenerationError, ReplyGenerator, SpeechSynthesizer, SpeechToText, SynthesisError,
    TranscriptionError,
};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

/// One caller-submitted clip.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub audio: Vec<u8>,
    pub voice_id: String,
}

/// Everything the caller needs to show and play the reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineReply {
    pub transcription: String,
    pub llm_response: String,
    pub audio_url: String,
}

/// Pipeline position, used to tag logs and failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Received,
    Transcribing,
    Generating,
    Synthesizing,
    Success,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Received => "received",
            PipelineStage::Transcribing => "transcribing",
            PipelineStage::Generating => "generating",
            PipelineStage::Synthesizing => "synthesizing",
            PipelineStage::Success => "success",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pipeline run that stopped early, tagged by the stage that failed.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No speech detected in audio")]
    NoSpeech,

    #[error(transparent)]
    Transcription(#[from] TranscriptionError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
}

impl PipelineError {
    /// The stage the run was in when it failed.
    pub fn stage(&self) -> PipelineStage {
        match self {
            PipelineError::NoSpeech | PipelineError::Transcription(_) => PipelineStage::Transcribing,
            PipelineError::Generation(_) => PipelineStage::Generating,
            PipelineError::Synthesis(_) => PipelineStage::Synthesizing,
        }
    }

    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            PipelineError::NoSpeech => None,
            PipelineError::Transcription(e) => e.upstream_status(),
            PipelineError::Generation(e) => e.upstream_status(),
            PipelineError::Synthesis(e) => e.upstream_status(),
        }
    }

    /// A provider credential was missing; nothing was sent over the network for this stage.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            PipelineError::Transcription(TranscriptionError::MissingCredential)
                | PipelineError::Generation(GenerationError::MissingCredential)
                | PipelineError::Synthesis(SynthesisError::MissingCredential)
        )
    }
}

/// Composes the three provider calls and owns the history rules above.
pub struct ConversationOrchestrator {
    transcriber: Arc<dyn SpeechToText>,
    generator: Arc<dyn ReplyGenerator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    store: Arc<dyn SessionStore>,
    locks: SessionLocks,
    settings: HistorySettings,
}

impl ConversationOrchestrator {
    pub fn new(
        transcriber: Arc<dyn SpeechToText>,
        generator: Arc<dyn ReplyGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        store: Arc<dyn SessionStore>,
        settings: HistorySettings,
    ) -> Self {
        Self {
            transcriber,
            generator,
            synthesizer,
            store,
            locks: SessionLocks::new(),
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Run the full pipeline for `session_id`. Failures are logged here with
    /// the session, stage and upstream status before being returned.
    pub async fn run(
        &self,
        session_id: &str,
        request: PipelineRequest,
    ) -> Result<PipelineReply, PipelineError> {
        debug!(session_id, stage = %PipelineStage::Received, audio_bytes = request.audio.len(), "Pipeline started");

        let result = self.run_stages(session_id, request).await;
        match &result {
            Ok(_) => {
                info!(session_id, stage = %PipelineStage::Success, "Pipeline completed");
            }
            Err(e) => {
                error!(
                    session_id,
                    stage = %e.stage(),
                    status = ?e.upstream_status(),
                    error = %e,
                    "Pipeline failed"
                );
            }
        }
        result
    }

    async fn run_stages(
        &self,
        session_id: &str,
        request: PipelineRequest,
    ) -> Result<PipelineReply, PipelineError> {
        // Every provider must be usable before the clip leaves the process.
        self.transcriber.check_credentials()?;
        self.generator.check_credentials()?;
        self.synthesizer.check_credentials()?;

        debug!(session_id, stage = %PipelineStage::Transcribing, "Entering stage");
        let transcription = self.transcriber.transcribe(request.audio).await?;
        if transcription.trim().is_empty() {
            return Err(PipelineError::NoSpeech);
        }
        info!(session_id, transcription = %transcription, "User transcription");

        let llm_response = {
            // Held from the history read to the model append; synthesis runs unlocked.
            let _session = self.locks.acquire(session_id).await;
            let user_turn = Turn::user(transcription.clone());

            debug!(session_id, stage = %PipelineStage::Generating, "Entering stage");
            let reply = match self.settings.commit {
                HistoryCommit::Incremental => {
                    self.store.append(session_id, vec![user_turn]).await;
                    let history = self.store.history(session_id).await;
                    let reply = self
                        .generator
                        .generate_reply(context_window(&history, self.settings.max_context_turns))
                        .await?;
                    self.store.append(session_id, vec![Turn::model(reply.clone())]).await;
                    reply
                }
                HistoryCommit::Atomic => {
                    let mut history = self.store.history(session_id).await;
                    history.push(user_turn.clone());
                    let reply = self
                        .generator
                        .generate_reply(context_window(&history, self.settings.max_context_turns))
                        .await?;
                    self.store
                        .append(session_id, vec![user_turn, Turn::model(reply.clone())])
                        .await;
                    reply
                }
            };
            info!(session_id, llm_response = %reply, "Model reply recorded");
            reply
        };

        debug!(session_id, stage = %PipelineStage::Synthesizing, voice_id = %request.voice_id, "Entering stage");
        let audio_url = self
            .synthesizer
            .synthesize(&llm_response, &request.voice_id)
            .await?;

        Ok(PipelineReply {
            transcription,
            llm_response,
            audio_url,
        })
    }
}
