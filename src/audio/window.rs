//! # Ingest Buffer and Window Dispatch
//!
//! Accumulates decoded samples per session and carves them into fixed-size
//! windows for transcription. This is the only place samples are buffered
//! between the connection and the transcription pool.
//!
//! ## Invariants:
//! - The buffer grows only by appended decoded samples and shrinks only by
//!   whole-window extraction
//! - A window always contains exactly `window_size` samples; partial windows
//!   are never dispatched
//! - Sequence indices are strictly increasing per session and never reused
//! - Leftover samples below the threshold stay buffered until more audio
//!   arrives or the session tears down (where they are discarded)

/// A fixed-size slice of audio dispatched as one transcription unit.
///
/// Immutable after extraction: exactly `window_size` normalized samples plus
/// the per-session sequence index assigned when it was carved out of the
/// ingest buffer. Consumed by exactly one transcription job.
#[derive(Debug, Clone)]
pub struct AudioWindow {
    /// Per-session sequence index, assigned at extraction time.
    pub seq: u64,

    /// Normalized mono samples; always exactly the configured window size.
    pub samples: Vec<f32>,
}

/// Per-session sample accumulator and window extractor.
///
/// Single-owner type: it lives inside the session's ingest task, so no
/// locking is required. The connection actor never touches it directly.
pub struct WindowAssembler {
    /// Samples accumulated since the last extraction.
    pending: Vec<f32>,

    /// Number of samples per dispatched window.
    window_size: usize,

    /// Sequence index the next extracted window will receive.
    next_seq: u64,
}

impl WindowAssembler {
    /// Create an assembler producing windows of `window_size` samples.
    pub fn new(window_size: usize) -> Self {
        Self {
            pending: Vec::with_capacity(window_size),
            window_size,
            next_seq: 0,
        }
    }

    /// Append decoded samples and extract every full window now available.
    ///
    /// ## Burst Handling:
    /// If the buffer holds more than one window's worth after the append
    /// (e.g. a burst of large frames), windows are extracted repeatedly until
    /// the remainder is below the threshold. Each extraction removes exactly
    /// `window_size` samples; the remainder stays buffered.
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioWindow> {
        self.pending.extend_from_slice(samples);

        let mut windows = Vec::new();
        while self.pending.len() >= self.window_size {
            let extracted: Vec<f32> = self.pending.drain(..self.window_size).collect();
            windows.push(AudioWindow {
                seq: self.next_seq,
                samples: extracted,
            });
            self.next_seq += 1;
        }

        windows
    }

    /// Number of samples currently buffered (always below `window_size`
    /// after a `push` returns).
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Total windows extracted so far.
    pub fn windows_extracted(&self) -> u64 {
        self.next_seq
    }

    /// Drop the leftover partial buffer at session teardown.
    ///
    /// Returns the number of samples discarded so the caller can log the
    /// accepted data loss. No window is ever produced from a remainder.
    pub fn discard_remainder(&mut self) -> usize {
        let discarded = self.pending.len();
        self.pending.clear();
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_window_extracts_once_and_empties_buffer() {
        let mut assembler = WindowAssembler::new(16000);

        // Two half-window frames reach the threshold exactly.
        assert!(assembler.push(&vec![0.1; 8000]).is_empty());
        let windows = assembler.push(&vec![0.2; 8000]);

        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].seq, 0);
        assert_eq!(windows[0].samples.len(), 16000);
        assert_eq!(assembler.pending_len(), 0);
    }

    #[test]
    fn test_burst_extracts_multiple_full_windows_in_order() {
        let mut assembler = WindowAssembler::new(100);

        let windows = assembler.push(&vec![0.0; 200]);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].seq, 0);
        assert_eq!(windows[1].seq, 1);
        assert!(windows.iter().all(|w| w.samples.len() == 100));
        assert_eq!(assembler.pending_len(), 0);
    }

    #[test]
    fn test_remainder_below_threshold_stays_buffered() {
        let mut assembler = WindowAssembler::new(100);

        let windows = assembler.push(&vec![0.0; 250]);
        assert_eq!(windows.len(), 2);
        assert_eq!(assembler.pending_len(), 50);

        // The remainder joins the next frame's samples.
        let windows = assembler.push(&vec![0.0; 50]);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].seq, 2);
        assert_eq!(assembler.pending_len(), 0);
    }

    #[test]
    fn test_window_preserves_sample_order_across_frames() {
        let mut assembler = WindowAssembler::new(4);

        assembler.push(&[1.0, 2.0]);
        let windows = assembler.push(&[3.0, 4.0, 5.0]);

        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].samples, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(assembler.pending_len(), 1);
    }

    #[test]
    fn test_sequence_indices_strictly_increase() {
        let mut assembler = WindowAssembler::new(10);
        let mut last_seq = None;

        for _ in 0..5 {
            for window in assembler.push(&vec![0.0; 25]) {
                if let Some(prev) = last_seq {
                    assert!(window.seq > prev);
                }
                last_seq = Some(window.seq);
            }
        }

        assert_eq!(assembler.windows_extracted(), 12);
    }

    #[test]
    fn test_discard_remainder_produces_no_window() {
        let mut assembler = WindowAssembler::new(100);

        assembler.push(&vec![0.0; 70]);
        assert_eq!(assembler.discard_remainder(), 70);
        assert_eq!(assembler.pending_len(), 0);
        assert_eq!(assembler.windows_extracted(), 0);

        // Discarded audio must not shift later sequence indices.
        let windows = assembler.push(&vec![0.0; 100]);
        assert_eq!(windows[0].seq, 0);
    }
}
