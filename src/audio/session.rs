//! # Streaming Session Lifecycle
//!
//! Tracks the state of one streaming connection from handshake to teardown.
//! Each WebSocket connection owns exactly one `StreamSession`; sessions share
//! no mutable state with each other, only aggregate counters in `AppState`.
//!
//! ## Session Lifecycle:
//! 1. **Connecting**: handshake accepted, ingest not yet running
//! 2. **Active**: receive loop running; frames decoded, windows dispatched,
//!    results emitted, all interleaved
//! 3. **Draining**: client disconnected or protocol error; no new frames,
//!    in-flight transcriptions are suppressed rather than interrupted
//! 4. **Closed**: terminal; buffers and bookkeeping released

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;
use uuid::Uuid;

/// Connection lifecycle states, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Handshake accepted, receive loop not yet started.
    Connecting,
    /// Receive loop running, windows flowing.
    Active,
    /// Teardown begun; new frames rejected, in-flight results suppressed.
    Draining,
    /// Terminal.
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Draining => "draining",
            SessionState::Closed => "closed",
        }
    }
}

/// State for one streaming connection.
///
/// ## Sharing:
/// The connection actor, its ingest task, and any in-flight transcription
/// jobs each hold an `Arc<StreamSession>`. Everything mutable is atomic or
/// behind the state lock; there is no cross-session sharing.
pub struct StreamSession {
    /// Unique identifier for this connection.
    pub session_id: String,

    /// When the connection was accepted.
    pub created_at: DateTime<Utc>,

    /// Current lifecycle state.
    state: RwLock<SessionState>,

    /// Set on drain. In-flight jobs check this before running and before
    /// emitting; the ASR computation itself is never interrupted.
    cancelled: AtomicBool,

    /// Transcription jobs dispatched but not yet completed or skipped.
    inflight: AtomicUsize,

    /// Windows extracted and handed to the pool.
    windows_dispatched: AtomicU64,

    /// Windows whose transcription failed.
    windows_failed: AtomicU64,

    /// Results actually delivered to the client.
    results_emitted: AtomicU64,
}

impl StreamSession {
    /// Create a session in the `Connecting` state with a fresh UUID.
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            state: RwLock::new(SessionState::Connecting),
            cancelled: AtomicBool::new(false),
            inflight: AtomicUsize::new(0),
            windows_dispatched: AtomicU64::new(0),
            windows_failed: AtomicU64::new(0),
            results_emitted: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.read().unwrap()
    }

    /// `Connecting → Active`: the receive loop is up.
    pub fn activate(&self) -> Result<(), String> {
        let mut state = self.state.write().unwrap();
        match *state {
            SessionState::Connecting => {
                *state = SessionState::Active;
                Ok(())
            }
            other => Err(format!("cannot activate session in state {:?}", other)),
        }
    }

    /// `Connecting/Active → Draining`: stop accepting frames and suppress
    /// outstanding results. Idempotent so disconnect and protocol-error
    /// paths can both call it.
    pub fn begin_drain(&self) {
        let mut state = self.state.write().unwrap();
        match *state {
            SessionState::Connecting | SessionState::Active => {
                *state = SessionState::Draining;
                self.cancelled.store(true, Ordering::SeqCst);
            }
            SessionState::Draining | SessionState::Closed => {}
        }
    }

    /// `Draining → Closed`: bookkeeping released.
    pub fn close(&self) {
        let mut state = self.state.write().unwrap();
        *state = SessionState::Closed;
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether in-flight work for this session should be suppressed.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn record_dispatch(&self) {
        self.windows_dispatched.fetch_add(1, Ordering::Relaxed);
        self.inflight.fetch_add(1, Ordering::SeqCst);
    }

    /// A dispatched job finished, failed, or was skipped.
    pub fn record_settled(&self) {
        self.inflight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn record_failure(&self) {
        self.windows_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_emitted(&self) {
        self.results_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::SeqCst)
    }

    pub fn windows_dispatched(&self) -> u64 {
        self.windows_dispatched.load(Ordering::Relaxed)
    }

    pub fn windows_failed(&self) -> u64 {
        self.windows_failed.load(Ordering::Relaxed)
    }

    pub fn results_emitted(&self) -> u64 {
        self.results_emitted.load(Ordering::Relaxed)
    }
}

impl Default for StreamSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_happy_path() {
        let session = StreamSession::new();
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(!session.is_cancelled());

        session.activate().unwrap();
        assert_eq!(session.state(), SessionState::Active);

        session.begin_drain();
        assert_eq!(session.state(), SessionState::Draining);
        assert!(session.is_cancelled());

        session.close();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_activate_requires_connecting() {
        let session = StreamSession::new();
        session.activate().unwrap();
        assert!(session.activate().is_err());

        session.begin_drain();
        assert!(session.activate().is_err());
    }

    #[test]
    fn test_drain_before_activation_cancels() {
        // Client can disconnect during the handshake.
        let session = StreamSession::new();
        session.begin_drain();
        assert_eq!(session.state(), SessionState::Draining);
        assert!(session.is_cancelled());
    }

    #[test]
    fn test_drain_is_idempotent() {
        let session = StreamSession::new();
        session.activate().unwrap();
        session.begin_drain();
        session.begin_drain();
        assert_eq!(session.state(), SessionState::Draining);
    }

    #[test]
    fn test_inflight_bookkeeping() {
        let session = StreamSession::new();
        session.record_dispatch();
        session.record_dispatch();
        assert_eq!(session.inflight(), 2);
        assert_eq!(session.windows_dispatched(), 2);

        session.record_settled();
        assert_eq!(session.inflight(), 1);

        session.record_failure();
        session.record_settled();
        assert_eq!(session.inflight(), 0);
        assert_eq!(session.windows_failed(), 1);
    }
}
