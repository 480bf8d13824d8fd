//! # Voice Notes Backend - Main Application Entry Point
//!
//! An actix-web server for live voice-note transcription:
//!
//! - `/ws/transcribe`: streaming transcription — binary PCM frames in, one
//!   text frame per completed audio window out
//! - `/upload`: one-shot transcription of a whole WAV file
//! - `/ws/summary`, `/ws/talk`: thin glue over the chat-completion
//!   collaborator for summarizing and querying transcripts
//! - `/health`, `/api/v1/*`: health, metrics, and runtime configuration
//!
//! ## Startup Order:
//! Configuration is loaded and validated first, then the Whisper engine is
//! downloaded/loaded exactly once and handed to the transcription pool as a
//! shared read-only handle. Sessions never load models.

mod audio; // frame decoding, windowing, ingest, session lifecycle
mod config; // layered configuration (defaults, config.toml, env)
mod error; // AppError and HTTP error responses
mod handlers; // upload, summary/talk, runtime config endpoints
mod health; // health and metrics endpoints
mod llm; // chat-completion collaborator client
mod middleware; // request tracing and endpoint metrics
mod state; // shared state and aggregate counters
mod transcription; // ASR engine and worker pool
mod websocket; // streaming transcription sessions

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpResponse, HttpServer};
use anyhow::Result;
use error::{AppError, AppResult};
use candle_core::Device;
use config::AppConfig;
use llm::ChatClient;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use transcription::{ModelSize, SharedRecognizer, TranscriptionPool, WhisperAsr};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown flag flipped by the signal handler task.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting voice-notes-backend v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {}:{}, window {}ms at {}Hz",
        config.server.host, config.server.port, config.audio.window_ms, config.audio.sample_rate
    );

    // The ASR engine is process-wide: loaded once, shared read-only by
    // every session and the upload handler.
    let model_size: ModelSize = config
        .models
        .whisper_model
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid models.whisper_model: {}", e))?;
    let device = Device::cuda_if_available(0).unwrap_or(Device::Cpu);
    let recognizer: SharedRecognizer = Arc::new(WhisperAsr::load(model_size, device).await?);

    let pool = TranscriptionPool::start(
        recognizer.clone(),
        config.performance.transcription_workers,
        config.performance.admission_queue_depth,
    );

    let chat_client = ChatClient::new(
        config.llm.api_url.clone(),
        config.models.llm_model.clone(),
        Duration::from_secs(config.llm.request_timeout_secs),
    )?;

    let app_state = AppState::new(config.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::Data::new(pool.clone()))
            .app_data(web::Data::new(recognizer.clone()))
            .app_data(web::Data::new(chat_client.clone()))
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::EndpointMetrics)
            .wrap(middleware::RequestTracing)
            .route("/ws/transcribe", web::get().to(websocket::transcribe_ws))
            .route("/ws/summary", web::get().to(handlers::summary_ws))
            .route("/ws/talk", web::get().to(handlers::talk_ws))
            .route("/upload", web::post().to(handlers::upload_audio))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config)),
            )
            .route("/health", web::get().to(health::health_check))
            .default_service(web::route().to(not_found))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Fallback for unknown routes.
async fn not_found() -> AppResult<HttpResponse> {
    Err(AppError::NotFound("no such endpoint".to_string()))
}

/// Initialize tracing with an env-controlled filter.
///
/// `RUST_LOG` overrides the default of debug for this crate and info for
/// actix.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_notes_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Flip the shutdown flag on SIGTERM or SIGINT.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Poll the shutdown flag without busy-waiting.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
