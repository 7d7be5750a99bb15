//! # Application State Management
//!
//! Everything the HTTP handlers share: configuration, the conversation
//! orchestrator (which owns the provider clients and the session store), the
//! fallback clip cache, and request metrics.
//!
//! ## Thread Safety Pattern:
//! - Read-only pieces (config, orchestrator, fallback) are shared through `Arc`
//! - Metrics change on every request and sit behind `Arc<RwLock<_>>`
//! - Session histories have their own concurrency model; see `conversation::history`
//!
//! `AppState` is `Clone`; every clone points at the same underlying data.

use crate::config::AppConfig;
use crate::conversation::{ConversationOrchestrator, InMemorySessionStore, SessionStore};
use crate::services::{
    build_http_client, AssemblyAiClient, FallbackAudio, GeminiClient, MurfClient, ReplyGenerator,
    SpeechSynthesizer, SpeechToText,
};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub orchestrator: Arc<ConversationOrchestrator>,
    pub fallback: Arc<FallbackAudio>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub start_time: Instant,
}

/// Request counters collected by the metrics middleware and the chat handler.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,

    /// Pipelines currently between upload and response
    pub active_pipelines: u32,

    /// Completed pipeline runs, successful or not
    pub pipeline_runs: u64,
    pub pipeline_failures: u64,

    /// Key: "METHOD /path", e.g. "POST /agent/chat/{session_id}"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

/// Keeps `active_pipelines` accurate even if a handler returns early.
pub struct PipelineGuard {
    state: AppState,
    failed: bool,
}

impl PipelineGuard {
    pub fn mark_failed(&mut self) {
        self.failed = true;
    }
}

impl Drop for PipelineGuard {
    fn drop(&mut self) {
        let mut metrics = self.state.metrics_mut();
        metrics.active_pipelines = metrics.active_pipelines.saturating_sub(1);
        metrics.pipeline_runs += 1;
        if self.failed {
            metrics.pipeline_failures += 1;
        }
    }
}

impl AppState {
    /// Build the production state: one HTTP client per provider, the
    /// in-memory session store, and the fallback cache at its configured path.
    pub fn new(config: AppConfig) -> Result<Self> {
        let timeout = config.request_timeout();

        let transcriber: Arc<dyn SpeechToText> = Arc::new(AssemblyAiClient::new(
            build_http_client(timeout)?,
            config.transcription.clone(),
        ));
        let generator: Arc<dyn ReplyGenerator> = Arc::new(GeminiClient::new(
            build_http_client(timeout)?,
            config.generation.clone(),
        ));
        let synthesizer: Arc<dyn SpeechSynthesizer> = Arc::new(MurfClient::new(
            build_http_client(timeout)?,
            config.synthesis.clone(),
        ));

        Ok(Self::with_services(
            config,
            transcriber,
            generator,
            synthesizer,
            Arc::new(InMemorySessionStore::new()),
        ))
    }

    /// Assemble state from explicit collaborators (used by `new` and by tests).
    pub fn with_services(
        config: AppConfig,
        transcriber: Arc<dyn SpeechToText>,
        generator: Arc<dyn ReplyGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let fallback = FallbackAudio::new(
            synthesizer.clone(),
            config.fallback_audio_path(),
            config.synthesis.fallback_text.clone(),
            config.synthesis.default_voice.clone(),
        );
        let orchestrator = ConversationOrchestrator::new(
            transcriber,
            generator,
            synthesizer,
            store,
            config.history.clone(),
        );

        Self {
            config: Arc::new(config),
            orchestrator: Arc::new(orchestrator),
            fallback: Arc::new(fallback),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        self.orchestrator.store()
    }

    // A panic while holding the metrics lock cannot leave counters in a state
    // worth refusing to read, so poisoning is ignored.
    fn metrics_ref(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(|e| e.into_inner())
    }

    fn metrics_mut(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn increment_request_count(&self) {
        self.metrics_mut().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics_mut().error_count += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_mut();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Count a pipeline as active until the returned guard is dropped.
    pub fn begin_pipeline(&self) -> PipelineGuard {
        self.metrics_mut().active_pipelines += 1;
        PipelineGuard {
            state: self.clone(),
            failed: false,
        }
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_ref().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Errors per request, from 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
