//! # Transcription Job Polling
//!
//! Speech-to-text providers process uploads asynchronously: the client submits
//! a job and then has to ask, repeatedly, whether it is done. This module holds
//! that loop as an explicit state machine so it can be tested without waiting.
//!
//! ## States:
//! 1. **Checking(n)**: ask the provider for the job status (attempt `n`)
//! 2. **Waiting(n)**: the job is still queued/processing, sleep one interval
//! 3. **Done**: the job completed, failed, or the attempt ceiling was reached
//!
//! ## Timing:
//! - No sleep before the first check, so a finished job returns immediately
//! - Exactly one interval between consecutive checks
//! - No sleep after the final check; the ceiling is reported straight away
//!
//! The interval is fixed, not exponential: provider latency is roughly constant
//! for short clips.
//!
//! Sleeping goes through the [`Sleeper`] trait. In production that is
//! `tokio::time::sleep`, which suspends only the current task, so a slow job
//! never holds an HTTP worker thread.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Provider-side state of a transcription job, as observed through one status check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Processing,
    /// Finished; carries the transcript (possibly empty).
    Completed(String),
    /// The provider gave up; carries its error message.
    Error(String),
}

impl JobStatus {
    /// Interpret the provider's `status` field.
    ///
    /// Unknown status strings are treated as still processing; only the
    /// attempt ceiling ends a job that never reports a terminal state.
    pub fn from_provider(status: &str, text: Option<String>, error: Option<String>) -> Self {
        match status {
            "completed" => JobStatus::Completed(text.unwrap_or_default()),
            "error" => JobStatus::Error(error.unwrap_or_else(|| "Unknown error".to_string())),
            "queued" => JobStatus::Queued,
            _ => JobStatus::Processing,
        }
    }
}

/// How often, and how many times, to check a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    /// 30 checks, 10 seconds apart: about five minutes.
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_attempts: 30,
        }
    }
}

/// Terminal result of polling one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Completed(String),
    Failed(String),
    TimedOut { attempts: u32 },
}

/// Suspends the poller between status checks.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Cooperative async sleep on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

enum PollState {
    Checking(u32),
    Waiting(u32),
    Done(PollOutcome),
}

/// Drives the poll state machine for a single job.
pub struct TranscriptPoller<S: Sleeper> {
    policy: PollPolicy,
    sleeper: S,
}

impl<S: Sleeper> TranscriptPoller<S> {
    pub fn new(policy: PollPolicy, sleeper: S) -> Self {
        Self { policy, sleeper }
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Poll until the job reaches a terminal state or the attempt ceiling.
    ///
    /// `check` is called with the 1-based attempt number and must perform one
    /// status request. An error from `check` aborts polling immediately: there
    /// is no retry of failed status requests, only of pending jobs.
    pub async fn poll<F, Fut, E>(&self, mut check: F) -> Result<PollOutcome, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<JobStatus, E>>,
    {
        let mut state = PollState::Checking(1);

        loop {
            state = match state {
                PollState::Checking(attempt) => match check(attempt).await? {
                    JobStatus::Completed(text) => PollState::Done(PollOutcome::Completed(text)),
                    JobStatus::Error(message) => PollState::Done(PollOutcome::Failed(message)),
                    pending if attempt >= self.policy.max_attempts => {
                        debug!(attempt, status = ?pending, "Transcription poll ceiling reached");
                        PollState::Done(PollOutcome::TimedOut { attempts: attempt })
                    }
                    pending => {
                        debug!(attempt, status = ?pending, "Transcription still pending");
                        PollState::Waiting(attempt)
                    }
                },
                PollState::Waiting(attempt) => {
                    self.sleeper.sleep(self.policy.interval).await;
                    PollState::Checking(attempt + 1)
                }
                PollState::Done(outcome) => return Ok(outcome),
            };
        }
    }
}
