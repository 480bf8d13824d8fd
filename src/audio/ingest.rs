//! # Ingest Task
//!
//! The single consumer between a connection's receive loop and the
//! transcription pool. The WebSocket actor forwards raw binary frames into a
//! bounded channel; this task decodes them, feeds the window assembler, and
//! submits every extracted window as a pool job.
//!
//! ## Backpressure:
//! `TranscriptionPool::submit` awaits while the admission queue is full, so
//! this task stalls instead of queueing windows in memory. While it is
//! stalled the bounded frame channel fills and the actor starts dropping
//! frames with a warning. Memory stays bounded end to end.
//!
//! ## Teardown:
//! The task ends when the actor drops the frame sender. Whatever partial
//! window is left in the assembler is discarded — accepted data loss, logged
//! at debug.

use crate::audio::decoder::decode_pcm_frame;
use crate::audio::session::StreamSession;
use crate::audio::window::WindowAssembler;
use crate::state::AppState;
use crate::transcription::worker::{TranscriptionOutcome, TranscriptionPool, WindowJob};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Decode and dispatch frames until the sender side hangs up.
pub async fn pump_frames(
    mut frames: mpsc::Receiver<Vec<u8>>,
    window_size: usize,
    session: Arc<StreamSession>,
    pool: TranscriptionPool,
    results: mpsc::Sender<TranscriptionOutcome>,
    state: AppState,
) {
    let mut assembler = WindowAssembler::new(window_size);

    while let Some(frame) = frames.recv().await {
        let samples = decode_pcm_frame(&frame);

        for window in assembler.push(&samples) {
            session.record_dispatch();
            state.record_window_dispatched();
            let job = WindowJob {
                window,
                session: session.clone(),
                results: results.clone(),
            };

            if pool.submit(job).await.is_err() {
                warn!(
                    session_id = %session.session_id,
                    "transcription pool shut down, ending ingest"
                );
                return;
            }
        }
    }

    let discarded = assembler.discard_remainder();
    if discarded > 0 {
        debug!(
            session_id = %session.session_id,
            samples = discarded,
            "discarded partial window at teardown"
        );
    }

    debug!(
        session_id = %session.session_id,
        windows = assembler.windows_extracted(),
        "ingest task finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::asr::SpeechRecognizer;
    use anyhow::{anyhow, Result};

    /// Reports the sample count so tests can verify window sizing, and fails
    /// when the window's leading sample carries the failure marker.
    struct CountingRecognizer;

    const FAIL_MARKER: f32 = -1.0;

    impl SpeechRecognizer for CountingRecognizer {
        fn transcribe(&self, samples: &[f32]) -> Result<String> {
            if samples.first() == Some(&FAIL_MARKER) {
                return Err(anyhow!("simulated engine failure"));
            }
            Ok(format!("{} samples", samples.len()))
        }
    }

    fn pcm_frame(bytes: usize) -> Vec<u8> {
        // Non-zero constant sample so failure-marker windows stay distinct.
        let sample = 100i16.to_le_bytes();
        (0..bytes).map(|i| sample[i % 2]).collect()
    }

    async fn spawn_pipeline(
        window_size: usize,
    ) -> (
        mpsc::Sender<Vec<u8>>,
        mpsc::Receiver<TranscriptionOutcome>,
        Arc<StreamSession>,
        tokio::task::JoinHandle<()>,
    ) {
        let (frames_tx, frames_rx) = mpsc::channel(64);
        let (results_tx, results_rx) = mpsc::channel(64);
        let session = Arc::new(StreamSession::new());
        session.activate().unwrap();
        let pool = TranscriptionPool::start(Arc::new(CountingRecognizer), 2, 16);

        let state = AppState::new(crate::config::AppConfig::default());
        let handle = tokio::spawn(pump_frames(
            frames_rx,
            window_size,
            session.clone(),
            pool,
            results_tx,
            state,
        ));

        (frames_tx, results_rx, session, handle)
    }

    #[tokio::test]
    async fn test_two_half_second_frames_produce_one_window_and_one_text() {
        // Two 16000-byte frames = 8000 samples each; together exactly one
        // second at 16 kHz.
        let (frames_tx, mut results_rx, session, handle) = spawn_pipeline(16000).await;

        frames_tx.send(pcm_frame(16000)).await.unwrap();
        frames_tx.send(pcm_frame(16000)).await.unwrap();

        match results_rx.recv().await.unwrap() {
            TranscriptionOutcome::Completed(transcript) => {
                assert_eq!(transcript.seq, 0);
                assert_eq!(transcript.text, "16000 samples");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(session.windows_dispatched(), 1);

        drop(frames_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_burst_dispatches_two_full_windows() {
        let (frames_tx, mut results_rx, session, handle) = spawn_pipeline(100).await;

        // 500 bytes = 250 samples = two windows plus a 50-sample remainder.
        frames_tx.send(pcm_frame(500)).await.unwrap();

        let mut seqs = vec![
            results_rx.recv().await.unwrap().seq(),
            results_rx.recv().await.unwrap().seq(),
        ];
        seqs.sort_unstable();
        assert_eq!(seqs, vec![0, 1]);
        assert_eq!(session.windows_dispatched(), 2);

        // The remainder never becomes a window on teardown.
        drop(frames_tx);
        handle.await.unwrap();
        assert!(results_rx.recv().await.is_none());
        assert_eq!(session.windows_dispatched(), 2);
    }

    #[tokio::test]
    async fn test_partial_buffer_discarded_on_disconnect() {
        let (frames_tx, mut results_rx, session, handle) = spawn_pipeline(16000).await;

        // Less than one window's worth, then disconnect.
        frames_tx.send(pcm_frame(6000)).await.unwrap();
        drop(frames_tx);
        handle.await.unwrap();

        assert!(results_rx.recv().await.is_none());
        assert_eq!(session.windows_dispatched(), 0);
    }

    #[tokio::test]
    async fn test_failed_window_does_not_stop_later_windows() {
        let (frames_tx, mut results_rx, session, handle) = spawn_pipeline(8).await;

        // First window leads with the failure marker; second is clean.
        let mut bad = Vec::new();
        bad.extend_from_slice(&(-32768i16).to_le_bytes());
        bad.extend(pcm_frame(14));
        frames_tx.send(bad).await.unwrap();
        frames_tx.send(pcm_frame(16)).await.unwrap();

        let mut failed = 0;
        let mut completed = 0;
        for _ in 0..2 {
            match results_rx.recv().await.unwrap() {
                TranscriptionOutcome::Failed { seq, error } => {
                    assert_eq!(seq, 0);
                    assert!(error.contains("simulated engine failure"));
                    failed += 1;
                }
                TranscriptionOutcome::Completed(transcript) => {
                    assert_eq!(transcript.seq, 1);
                    completed += 1;
                }
            }
        }
        assert_eq!((failed, completed), (1, 1));

        // The session survived the failure and keeps transcribing.
        frames_tx.send(pcm_frame(16)).await.unwrap();
        match results_rx.recv().await.unwrap() {
            TranscriptionOutcome::Completed(transcript) => assert_eq!(transcript.seq, 2),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(session.windows_failed(), 1);

        drop(frames_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_odd_length_frames_still_fill_windows() {
        let (frames_tx, mut results_rx, _session, handle) = spawn_pipeline(8).await;

        // 9 bytes -> 5 samples, 7 bytes -> 4 samples; 9 total = one window
        // with one sample left over.
        frames_tx.send(pcm_frame(9)).await.unwrap();
        frames_tx.send(pcm_frame(7)).await.unwrap();

        match results_rx.recv().await.unwrap() {
            TranscriptionOutcome::Completed(transcript) => {
                assert_eq!(transcript.text, "8 samples");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        drop(frames_tx);
        handle.await.unwrap();
    }
}
