//! Runtime configuration endpoints: `GET`/`PUT /api/v1/config`.
//!
//! Reads return the live configuration; updates are partial JSON merges
//! validated before they become visible. Window and pool settings apply to
//! sessions opened after the update — live sessions keep the values they
//! started with.

use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

fn config_json(config: &crate::config::AppConfig) -> serde_json::Value {
    json!({
        "server": {
            "host": config.server.host,
            "port": config.server.port
        },
        "audio": {
            "sample_rate": config.audio.sample_rate,
            "window_ms": config.audio.window_ms,
            "window_size_samples": config.audio.window_size()
        },
        "models": {
            "whisper_model": config.models.whisper_model,
            "llm_model": config.models.llm_model
        },
        "llm": {
            "api_url": config.llm.api_url,
            "request_timeout_secs": config.llm.request_timeout_secs
        },
        "performance": {
            "max_concurrent_sessions": config.performance.max_concurrent_sessions,
            "transcription_workers": config.performance.transcription_workers,
            "admission_queue_depth": config.performance.admission_queue_depth,
            "frame_channel_depth": config.performance.frame_channel_depth
        }
    })
}

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config_json(&config)
    })))
}

pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config.update_from_json(&json_str)?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": config_json(&current_config)
    })))
}
