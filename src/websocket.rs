//! # WebSocket Streaming Transcription Handler
//!
//! The connection session for `/ws/transcribe`. Each connection is one
//! independent actix actor owning one `StreamSession`; nothing mutable is
//! shared between connections.
//!
//! ## Wire Protocol:
//! - **Client → Server**: binary frames of 16-bit signed LE PCM, mono, at
//!   the configured sample rate, chunked however the client likes
//! - **Server → Client**: one text frame per completed window — the
//!   transcribed text, or [`TRANSCRIPTION_FAILED_MARKER`] when that
//!   window's engine call failed
//!
//! Results are sent in **completion order**, not dispatch order: windows
//! are transcribed concurrently and a later window may finish first. This
//! is the wire contract; clients needing strict ordering must buffer.
//!
//! ## Internal Flow:
//! The actor's receive path only forwards raw frames into a bounded channel
//! consumed by the session's ingest task (`audio::ingest::pump_frames`);
//! decoding, windowing, and pool submission all happen there, so the
//! receive loop never blocks on transcription. Outcomes come back over a
//! second channel bridged into the actor as a message stream.
//!
//! ## Backpressure:
//! When the transcription pool's admission queue is full the ingest task
//! stalls, the frame channel fills, and this actor drops further frames
//! with a warning. Dropped audio is lost, not buffered.

use crate::audio::ingest::pump_frames;
use crate::audio::session::StreamSession;
use crate::error::AppError;
use crate::state::AppState;
use crate::transcription::worker::{TranscriptionOutcome, TranscriptionPool};

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

/// Text frame sent in place of a transcript when a window's engine call
/// failed. The failure stays isolated to that window.
pub const TRANSCRIPTION_FAILED_MARKER: &str = "[transcription failed]";

/// How often the server pings an idle client.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Missing any heartbeat for this long closes the connection.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Capacity of the per-session outcome channel; sized for bursts of
/// completions, drained continuously by the actor.
const OUTCOME_CHANNEL_DEPTH: usize = 32;

/// Actor for one streaming transcription connection.
pub struct TranscribeSocket {
    /// This connection's session state; shared with the ingest task and
    /// in-flight jobs, never with other connections.
    session: Arc<StreamSession>,

    /// Sender half of the bounded frame channel. Dropped on teardown to
    /// end the ingest task.
    frames: Option<mpsc::Sender<Vec<u8>>>,

    /// Shared transcription pool handle.
    pool: TranscriptionPool,

    /// Shared application state (metrics, config).
    state: web::Data<AppState>,

    /// Window size in samples, fixed at connection time.
    window_size: usize,

    /// Frame channel capacity, fixed at connection time.
    frame_channel_depth: usize,

    /// Last time the client showed signs of life.
    last_heartbeat: Instant,

    /// Frames dropped because the frame channel was full.
    dropped_frames: u64,
}

impl TranscribeSocket {
    pub fn new(
        session: Arc<StreamSession>,
        pool: TranscriptionPool,
        state: web::Data<AppState>,
        window_size: usize,
        frame_channel_depth: usize,
    ) -> Self {
        Self {
            session,
            frames: None,
            pool,
            state,
            window_size,
            frame_channel_depth,
            last_heartbeat: Instant::now(),
            dropped_frames: 0,
        }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(
                    session_id = %act.session.session_id,
                    "heartbeat timeout, closing connection"
                );
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }
}

impl Actor for TranscribeSocket {
    type Context = ws::WebsocketContext<Self>;

    /// Wire up the session: heartbeat, frame channel, ingest task, and the
    /// outcome stream feeding the result emitter.
    fn started(&mut self, ctx: &mut Self::Context) {
        if let Err(err) = self.session.activate() {
            error!(session_id = %self.session.session_id, error = %err, "failed to activate session");
            ctx.stop();
            return;
        }

        self.start_heartbeat(ctx);

        let (frames_tx, frames_rx) = mpsc::channel(self.frame_channel_depth);
        let (results_tx, results_rx) = mpsc::channel(OUTCOME_CHANNEL_DEPTH);
        self.frames = Some(frames_tx);

        tokio::spawn(pump_frames(
            frames_rx,
            self.window_size,
            self.session.clone(),
            self.pool.clone(),
            results_tx,
            self.state.get_ref().clone(),
        ));

        ctx.add_stream(ReceiverStream::new(results_rx));

        info!(
            session_id = %self.session.session_id,
            window_size = self.window_size,
            "streaming session active"
        );
    }

    /// Teardown: drain, end the ingest task, release bookkeeping.
    ///
    /// In-flight transcriptions are not interrupted; the drain flag makes
    /// the workers discard their results instead of sending them here.
    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.session.begin_drain();
        self.frames.take();
        self.session.close();
        self.state.end_session();

        let age_seconds = chrono::Utc::now()
            .signed_duration_since(self.session.created_at)
            .num_seconds();

        info!(
            session_id = %self.session.session_id,
            state = self.session.state().as_str(),
            age_seconds,
            windows_dispatched = self.session.windows_dispatched(),
            results_emitted = self.session.results_emitted(),
            windows_failed = self.session.windows_failed(),
            inflight_suppressed = self.session.inflight(),
            dropped_frames = self.dropped_frames,
            "streaming session closed"
        );
    }
}

/// Receive loop: forward binary frames, answer heartbeats, handle close.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for TranscribeSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Binary(data)) => {
                let Some(frames) = &self.frames else {
                    return;
                };

                match frames.try_send(data.to_vec()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        // Documented backpressure policy: transcription is
                        // behind, this frame's audio is dropped.
                        self.dropped_frames += 1;
                        if self.dropped_frames % 100 == 1 {
                            warn!(
                                session_id = %self.session.session_id,
                                dropped_frames = self.dropped_frames,
                                "frame channel full, dropping audio"
                            );
                        }
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        error!(
                            session_id = %self.session.session_id,
                            "ingest task gone, closing connection"
                        );
                        ctx.stop();
                    }
                }
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Text(_)) => {
                // Contract is binary-in/text-out; text from the client is
                // not part of the protocol.
                warn!(
                    session_id = %self.session.session_id,
                    "ignoring unexpected text frame"
                );
            }
            Ok(ws::Message::Close(reason)) => {
                info!(
                    session_id = %self.session.session_id,
                    ?reason,
                    "client closed connection"
                );
                self.session.begin_drain();
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(
                    session_id = %self.session.session_id,
                    "unexpected continuation frame"
                );
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(
                    session_id = %self.session.session_id,
                    error = %err,
                    "websocket protocol error"
                );
                self.session.begin_drain();
                ctx.stop();
            }
        }
    }
}

/// Result emitter: outcomes arrive in completion order and leave as text
/// frames immediately.
impl StreamHandler<TranscriptionOutcome> for TranscribeSocket {
    fn handle(&mut self, outcome: TranscriptionOutcome, ctx: &mut Self::Context) {
        match outcome {
            TranscriptionOutcome::Completed(transcript) => {
                self.session.record_emitted();
                self.state.record_result_emitted();
                debug!(
                    session_id = %self.session.session_id,
                    seq = transcript.seq,
                    processing_time_ms = transcript.processing_time_ms,
                    "emitting transcript"
                );
                ctx.text(transcript.text);
            }
            TranscriptionOutcome::Failed { seq, error } => {
                self.state.record_window_failed();
                debug!(
                    session_id = %self.session.session_id,
                    seq,
                    error = %error,
                    "emitting failure marker"
                );
                ctx.text(TRANSCRIPTION_FAILED_MARKER);
            }
        }
    }

    /// The outcome stream ends when the ingest task and every in-flight job
    /// have hung up — either normal teardown or a dead pool.
    fn finished(&mut self, _ctx: &mut Self::Context) {
        debug!(
            session_id = %self.session.session_id,
            "outcome stream finished"
        );
    }
}

/// HTTP → WebSocket upgrade for `/ws/transcribe`.
///
/// Refuses the connection with 503 when the concurrent-session limit is
/// reached; admission is the only cross-session decision in the pipeline.
pub async fn transcribe_ws(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    pool: web::Data<TranscriptionPool>,
) -> ActixResult<HttpResponse> {
    if let Err(reason) = state.try_begin_session() {
        warn!(peer = ?req.connection_info().peer_addr(), %reason, "refusing streaming connection");
        return Err(AppError::ServiceUnavailable(reason).into());
    }

    let config = state.get_config();
    let session = Arc::new(StreamSession::new());

    info!(
        session_id = %session.session_id,
        peer = ?req.connection_info().peer_addr(),
        "new streaming connection"
    );

    let socket = TranscribeSocket::new(
        session,
        pool.get_ref().clone(),
        state.clone(),
        config.audio.window_size(),
        config.performance.frame_channel_depth,
    );

    match ws::start(socket, &req, stream) {
        Ok(response) => Ok(response),
        Err(err) => {
            // The actor never started, so its stopped() hook will not run.
            state.end_session();
            Err(err)
        }
    }
}
