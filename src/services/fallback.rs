//! # Fallback Audio
//!
//! A single pre-generated apology clip that clients play when a pipeline run
//! fails. It is synthesized once, downloaded, and cached on disk; later
//! requests reuse the file without touching the text-to-speech provider.
//!
//! Failure here never propagates: the caller just learns the clip is unavailable.

use crate::services::{SpeechSynthesizer, SynthesisError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info};

#[derive(Debug, Error)]
enum FallbackError {
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error("could not write fallback audio: {0}")]
    Io(#[from] std::io::Error),
}

/// One-entry cache for the apology clip, keyed by its fixed location on disk.
pub struct FallbackAudio {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    path: PathBuf,
    text: String,
    voice_id: String,
    /// Serializes generation so concurrent first requests synthesize only once.
    gate: Mutex<()>,
}

impl FallbackAudio {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        path: PathBuf,
        text: impl Into<String>,
        voice_id: impl Into<String>,
    ) -> Self {
        Self {
            synthesizer,
            path,
            text: text.into(),
            voice_id: voice_id.into(),
            gate: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the clip is already on disk. Never triggers generation.
    pub async fn is_cached(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }

    /// Return the cached clip, generating it first if it does not exist yet.
    ///
    /// Returns `None` when the clip cannot be produced; the error is logged.
    pub async fn ensure(&self) -> Option<PathBuf> {
        let _guard = self.gate.lock().await;

        if self.is_cached().await {
            info!(path = %self.path.display(), "Fallback audio file already exists");
            return Some(self.path.clone());
        }

        info!(path = %self.path.display(), "Generating fallback audio file");
        match self.generate().await {
            Ok(()) => {
                info!(path = %self.path.display(), "Fallback audio file generated");
                Some(self.path.clone())
            }
            Err(e) => {
                error!(error = %e, path = %self.path.display(), "Failed to generate fallback audio");
                None
            }
        }
    }

    async fn generate(&self) -> Result<(), FallbackError> {
        let audio_url = self.synthesizer.synthesize(&self.text, &self.voice_id).await?;
        let bytes = self.synthesizer.download(&audio_url).await?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write then rename, so a crash never leaves a truncated clip behind the existence check.
        let partial = self.path.with_extension("mp3.part");
        tokio::fs::write(&partial, &bytes).await?;
        tokio::fs::rename(&partial, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::CallFailure;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSynth {
        synth_calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl SpeechSynthesizer for CountingSynth {
        async fn synthesize(&self, text: &str, voice_id: &str) -> Result<String, SynthesisError> {
            self.synth_calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(voice_id, "natalie");
            assert!(text.contains("trouble"));
            if self.fail {
                return Err(SynthesisError::Status(CallFailure::new(Some(503), "unavailable")));
            }
            Ok("https://cdn/fallback.mp3".to_string())
        }

        async fn download(&self, audio_url: &str) -> Result<Vec<u8>, SynthesisError> {
            assert_eq!(audio_url, "https://cdn/fallback.mp3");
            Ok(b"ID3fake-mp3".to_vec())
        }
    }

    fn fallback(synth: Arc<CountingSynth>, path: PathBuf) -> FallbackAudio {
        FallbackAudio::new(
            synth,
            path,
            "I'm having trouble connecting right now. Please try again later.",
            "natalie",
        )
    }

    #[tokio::test]
    async fn test_generated_once_then_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fallback_audio.mp3");
        let synth = Arc::new(CountingSynth::default());
        let cache = fallback(synth.clone(), path.clone());

        assert!(!cache.is_cached().await);
        assert_eq!(cache.ensure().await, Some(path.clone()));
        assert_eq!(cache.ensure().await, Some(path.clone()));

        assert_eq!(synth.synth_calls.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read(&path).unwrap(), b"ID3fake-mp3");
        assert!(!path.with_extension("mp3.part").exists());
    }

    #[tokio::test]
    async fn test_concurrent_first_requests_synthesize_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("fallback_audio.mp3");
        let synth = Arc::new(CountingSynth::default());
        let cache = Arc::new(fallback(synth.clone(), path));

        let (a, b) = tokio::join!(cache.ensure(), cache.ensure());
        assert!(a.is_some() && b.is_some());
        assert_eq!(synth.synth_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_reports_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fallback_audio.mp3");
        let synth = Arc::new(CountingSynth {
            fail: true,
            ..Default::default()
        });
        let cache = fallback(synth.clone(), path.clone());

        assert_eq!(cache.ensure().await, None);
        assert!(!path.exists());

        // Not cached, so the next request tries again.
        assert_eq!(cache.ensure().await, None);
        assert_eq!(synth.synth_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_existing_file_skips_synthesis() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fallback_audio.mp3");
        std::fs::write(&path, b"already here").unwrap();
        let synth = Arc::new(CountingSynth::default());

        assert_eq!(fallback(synth.clone(), path.clone()).ensure().await, Some(path));
        assert_eq!(synth.synth_calls.load(Ordering::SeqCst), 0);
    }
}
