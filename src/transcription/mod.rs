//! # Transcription Module
//!
//! Speech-to-text for the streaming pipeline. The engine itself
//! (Whisper via Candle-rs, no whisper.cpp FFI) sits behind the
//! `SpeechRecognizer` trait; the worker pool schedules window jobs onto it
//! without ever blocking a connection's receive loop.
//!
//! ## Key Components:
//! - **asr**: engine trait + Candle Whisper implementation, loaded once at
//!   startup and shared read-only by every session
//! - **worker**: bounded admission queue + bounded-concurrency pool running
//!   blocking inference on the spawn_blocking thread pool

pub mod asr;
pub mod worker;

pub use asr::{ModelSize, SharedRecognizer, SpeechRecognizer, WhisperAsr};
pub use worker::{TranscriptionOutcome, TranscriptionPool, WindowJob, WindowTranscript};
