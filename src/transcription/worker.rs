//! # Transcription Worker Pool
//!
//! Runs window transcriptions off the connection receive loops. One pool is
//! created at startup and shared by every session.
//!
//! ## Bounding:
//! Two limits keep a slow engine from growing memory without bound:
//! - **Admission queue**: a bounded channel of pending jobs. `submit` awaits
//!   while it is full, which stalls the caller's ingest task (backpressure).
//! - **Concurrency**: a semaphore caps simultaneously running inferences.
//!
//! ## Blocking Inference:
//! The ASR call is CPU/GPU-bound and synchronous, so each job runs under
//! `tokio::task::spawn_blocking`; the async executor threads never block on
//! inference.
//!
//! ## Cancellation:
//! Jobs for a drained session are skipped before execution and their results
//! suppressed after. The engine call itself is not assumed to support
//! cooperative cancellation and is never interrupted once started.

use crate::audio::session::StreamSession;
use crate::audio::window::AudioWindow;
use crate::transcription::asr::SpeechRecognizer;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, warn};

/// A completed window transcription.
#[derive(Debug, Clone)]
pub struct WindowTranscript {
    /// Sequence index of the window this text belongs to.
    pub seq: u64,

    /// Transcribed text.
    pub text: String,

    /// When transcription finished.
    pub completed_at: DateTime<Utc>,

    /// Engine time for this window in milliseconds.
    pub processing_time_ms: u64,
}

/// Result of one window's transcription job, success or failure.
///
/// A failure is isolated to its window: the session keeps running and later
/// windows are unaffected.
#[derive(Debug, Clone)]
pub enum TranscriptionOutcome {
    Completed(WindowTranscript),
    Failed { seq: u64, error: String },
}

impl TranscriptionOutcome {
    pub fn seq(&self) -> u64 {
        match self {
            TranscriptionOutcome::Completed(transcript) => transcript.seq,
            TranscriptionOutcome::Failed { seq, .. } => *seq,
        }
    }
}

/// One unit of work for the pool: a window plus where its outcome goes.
pub struct WindowJob {
    pub window: AudioWindow,

    /// Session the window belongs to; used for cancellation checks and
    /// per-session counters.
    pub session: Arc<StreamSession>,

    /// Per-session outcome channel, drained by the connection actor.
    pub results: mpsc::Sender<TranscriptionOutcome>,
}

/// Shared handle to the transcription worker pool.
///
/// Cheap to clone; all clones feed the same admission queue.
#[derive(Clone)]
pub struct TranscriptionPool {
    jobs: mpsc::Sender<WindowJob>,
}

impl TranscriptionPool {
    /// Start the pool's dispatcher task.
    ///
    /// ## Parameters:
    /// - **recognizer**: the shared ASR engine handle
    /// - **max_concurrent**: simultaneous inference cap
    /// - **queue_depth**: admission queue capacity
    pub fn start(
        recognizer: Arc<dyn SpeechRecognizer>,
        max_concurrent: usize,
        queue_depth: usize,
    ) -> Self {
        let (jobs_tx, mut jobs_rx) = mpsc::channel::<WindowJob>(queue_depth);

        tokio::spawn(async move {
            let semaphore = Arc::new(Semaphore::new(max_concurrent));

            while let Some(job) = jobs_rx.recv().await {
                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let recognizer = recognizer.clone();

                tokio::spawn(async move {
                    let _permit = permit;
                    run_job(recognizer, job).await;
                });
            }

            debug!("transcription pool dispatcher stopped");
        });

        Self { jobs: jobs_tx }
    }

    /// Admit a job to the pool.
    ///
    /// Awaits while the admission queue is full; the caller's ingest loop
    /// stalls, which is the documented backpressure policy. Fails only if
    /// the pool has shut down.
    pub async fn submit(&self, job: WindowJob) -> Result<(), ()> {
        let session = job.session.clone();
        match self.jobs.send(job).await {
            Ok(()) => Ok(()),
            Err(_) => {
                // Balance the dispatch counter for the job that never ran.
                session.record_settled();
                Err(())
            }
        }
    }
}

/// Execute one window job end to end.
async fn run_job(recognizer: Arc<dyn SpeechRecognizer>, job: WindowJob) {
    let WindowJob {
        window,
        session,
        results,
    } = job;
    let seq = window.seq;

    // Queued jobs for a drained session are skipped without touching the
    // engine at all.
    if session.is_cancelled() {
        debug!(
            session_id = %session.session_id,
            seq,
            "skipping queued window for drained session"
        );
        session.record_settled();
        return;
    }

    let started = Instant::now();
    let samples = window.samples;
    let joined = tokio::task::spawn_blocking(move || recognizer.transcribe(&samples)).await;
    let processing_time_ms = started.elapsed().as_millis() as u64;

    session.record_settled();

    let outcome = match joined {
        Ok(Ok(text)) => {
            debug!(
                session_id = %session.session_id,
                seq,
                processing_time_ms,
                chars = text.len(),
                "window transcribed"
            );
            TranscriptionOutcome::Completed(WindowTranscript {
                seq,
                text,
                completed_at: Utc::now(),
                processing_time_ms,
            })
        }
        Ok(Err(err)) => {
            session.record_failure();
            warn!(
                session_id = %session.session_id,
                seq,
                error = %err,
                "window transcription failed"
            );
            TranscriptionOutcome::Failed {
                seq,
                error: err.to_string(),
            }
        }
        Err(join_err) => {
            session.record_failure();
            error!(
                session_id = %session.session_id,
                seq,
                error = %join_err,
                "transcription task panicked"
            );
            TranscriptionOutcome::Failed {
                seq,
                error: format!("transcription task panicked: {}", join_err),
            }
        }
    };

    // The session may have drained while the engine was running. The
    // computation cannot be stopped; its result can only be discarded.
    if session.is_cancelled() {
        debug!(
            session_id = %session.session_id,
            seq,
            "suppressing result for drained session"
        );
        return;
    }

    let _ = results.send(outcome).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use std::time::Duration;

    /// Recognizer that echoes the sample count, failing and delaying on
    /// request.
    struct ScriptedRecognizer {
        /// Fail whenever the first sample matches this marker value.
        fail_marker: f32,
        /// Sleep per call, keyed off the first sample (marker -> millis).
        delay_for: Vec<(f32, u64)>,
    }

    impl ScriptedRecognizer {
        fn new() -> Self {
            Self {
                fail_marker: f32::NAN,
                delay_for: Vec::new(),
            }
        }
    }

    impl SpeechRecognizer for ScriptedRecognizer {
        fn transcribe(&self, samples: &[f32]) -> Result<String> {
            let marker = samples.first().copied().unwrap_or(0.0);
            if let Some((_, millis)) = self.delay_for.iter().find(|(m, _)| *m == marker) {
                std::thread::sleep(Duration::from_millis(*millis));
            }
            if marker == self.fail_marker {
                return Err(anyhow!("engine unavailable"));
            }
            Ok(format!("text for marker {}", marker))
        }
    }

    fn window(seq: u64, marker: f32, len: usize) -> AudioWindow {
        let mut samples = vec![0.0; len];
        samples[0] = marker;
        AudioWindow { seq, samples }
    }

    #[tokio::test]
    async fn test_outcomes_are_delivered() {
        let pool = TranscriptionPool::start(Arc::new(ScriptedRecognizer::new()), 2, 8);
        let session = Arc::new(StreamSession::new());
        session.activate().unwrap();
        let (results_tx, mut results_rx) = mpsc::channel(8);

        session.record_dispatch();
        pool.submit(WindowJob {
            window: window(0, 1.0, 16),
            session: session.clone(),
            results: results_tx,
        })
        .await
        .unwrap();

        match results_rx.recv().await.unwrap() {
            TranscriptionOutcome::Completed(transcript) => {
                assert_eq!(transcript.seq, 0);
                assert_eq!(transcript.text, "text for marker 1");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(session.inflight(), 0);
    }

    #[tokio::test]
    async fn test_failure_is_isolated_to_its_window() {
        let recognizer = ScriptedRecognizer {
            fail_marker: 2.0,
            delay_for: Vec::new(),
        };
        let pool = TranscriptionPool::start(Arc::new(recognizer), 1, 8);
        let session = Arc::new(StreamSession::new());
        session.activate().unwrap();
        let (results_tx, mut results_rx) = mpsc::channel(8);

        for (seq, marker) in [(0, 1.0f32), (1, 2.0), (2, 3.0)] {
            session.record_dispatch();
            pool.submit(WindowJob {
                window: window(seq, marker, 16),
                session: session.clone(),
                results: results_tx.clone(),
            })
            .await
            .unwrap();
        }

        // Single worker preserves order here; the middle window fails,
        // the ones around it succeed.
        let first = results_rx.recv().await.unwrap();
        assert!(matches!(first, TranscriptionOutcome::Completed(_)));

        match results_rx.recv().await.unwrap() {
            TranscriptionOutcome::Failed { seq, error } => {
                assert_eq!(seq, 1);
                assert!(error.contains("engine unavailable"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let third = results_rx.recv().await.unwrap();
        assert!(matches!(third, TranscriptionOutcome::Completed(_)));
        assert_eq!(session.windows_failed(), 1);
    }

    #[tokio::test]
    async fn test_results_arrive_in_completion_order() {
        // Window 0 is slow, window 1 is fast; with two workers the later
        // window's result must land first.
        let recognizer = ScriptedRecognizer {
            fail_marker: f32::NAN,
            delay_for: vec![(1.0, 300)],
        };
        let pool = TranscriptionPool::start(Arc::new(recognizer), 2, 8);
        let session = Arc::new(StreamSession::new());
        session.activate().unwrap();
        let (results_tx, mut results_rx) = mpsc::channel(8);

        for (seq, marker) in [(0, 1.0f32), (1, 0.5)] {
            session.record_dispatch();
            pool.submit(WindowJob {
                window: window(seq, marker, 16),
                session: session.clone(),
                results: results_tx.clone(),
            })
            .await
            .unwrap();
        }

        let first = results_rx.recv().await.unwrap();
        let second = results_rx.recv().await.unwrap();
        assert_eq!(first.seq(), 1);
        assert_eq!(second.seq(), 0);
    }

    #[tokio::test]
    async fn test_drained_session_results_are_suppressed() {
        let recognizer = ScriptedRecognizer {
            fail_marker: f32::NAN,
            delay_for: vec![(1.0, 100)],
        };
        let pool = TranscriptionPool::start(Arc::new(recognizer), 1, 8);
        let session = Arc::new(StreamSession::new());
        session.activate().unwrap();
        let (results_tx, mut results_rx) = mpsc::channel(8);

        session.record_dispatch();
        pool.submit(WindowJob {
            window: window(0, 1.0, 16),
            session: session.clone(),
            results: results_tx,
        })
        .await
        .unwrap();

        // Drain while the engine is still working on the window.
        session.begin_drain();

        // The sender side hangs up without delivering anything.
        assert!(results_rx.recv().await.is_none());
        assert_eq!(session.inflight(), 0);
    }
}
