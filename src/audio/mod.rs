//! # Audio Pipeline Module
//!
//! Everything between a connection's binary frames and the transcription
//! pool: PCM decoding, per-session window assembly, the ingest task, the
//! session state machine, and whole-file conversion for the upload path.
//!
//! ## Streaming Data Flow:
//! frames → `decoder` → `WindowAssembler` (`window`) → pool jobs, driven by
//! the single-consumer task in `ingest`. Session lifecycle and counters
//! live in `session`.
//!
//! ## Wire Format:
//! - **Sample Rate**: configurable, 16 kHz default
//! - **Bit Depth**: 16-bit signed PCM, little-endian
//! - **Channels**: Mono

pub mod convert; // mono mixdown, resampling, normalization for uploads
pub mod decoder; // raw PCM frames -> normalized samples
pub mod ingest; // per-session decode/dispatch task
pub mod session; // connection lifecycle state machine
pub mod window; // ingest buffer and window extraction
