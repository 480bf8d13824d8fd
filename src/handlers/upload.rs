//! # One-Shot Upload Transcription
//!
//! `POST /upload`: accepts a whole WAV file as multipart form data, converts
//! it to the engine's format (mono, configured sample rate, peak
//! normalized), and returns a single transcription for the entire file.
//! This is boundary glue around the same ASR engine the streaming pipeline
//! uses; none of the windowing machinery is involved.

use crate::audio::convert::{mix_to_mono, peak_normalize, resample};
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::transcription::asr::SharedRecognizer;

use actix_multipart::form::{tempfile::TempFile, MultipartForm};
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::io::Cursor;
use tracing::{debug, info};

/// Multipart payload: one `file` field holding the audio.
#[derive(Debug, MultipartForm)]
pub struct UploadForm {
    #[multipart(rename = "file")]
    pub file: TempFile,
}

/// Decode a WAV payload into normalized f32 samples plus its header.
fn decode_wav(bytes: &[u8]) -> AppResult<(wav::Header, Vec<f32>)> {
    let (header, data) = wav::read(&mut Cursor::new(bytes))
        .map_err(|e| AppError::BadRequest(format!("invalid WAV file: {}", e)))?;

    let samples: Vec<f32> = match data {
        wav::BitDepth::Eight(v) => v.iter().map(|&s| (s as f32 - 128.0) / 128.0).collect(),
        wav::BitDepth::Sixteen(v) => v.iter().map(|&s| s as f32 / 32768.0).collect(),
        wav::BitDepth::TwentyFour(v) => v.iter().map(|&s| s as f32 / 8_388_608.0).collect(),
        wav::BitDepth::ThirtyTwoFloat(v) => v,
        wav::BitDepth::Empty => Vec::new(),
    };

    if samples.is_empty() {
        return Err(AppError::BadRequest(
            "audio file contains no samples".to_string(),
        ));
    }

    Ok((header, samples))
}

/// Handle an upload: convert, transcribe once, reply with the text.
pub async fn upload_audio(
    MultipartForm(form): MultipartForm<UploadForm>,
    state: web::Data<AppState>,
    recognizer: web::Data<SharedRecognizer>,
) -> AppResult<HttpResponse> {
    let filename = form
        .file
        .file_name
        .clone()
        .unwrap_or_else(|| "upload.wav".to_string());

    let bytes = std::fs::read(form.file.file.path())
        .map_err(|e| AppError::Internal(format!("failed to read upload: {}", e)))?;

    info!(filename = %filename, bytes = bytes.len(), "processing uploaded audio file");

    let (header, samples) = decode_wav(&bytes)?;
    let target_rate = state.get_config().audio.sample_rate;

    let mono = mix_to_mono(&samples, header.channel_count as usize);
    let resampled = resample(&mono, header.sampling_rate, target_rate);
    let normalized = peak_normalize(&resampled);

    debug!(
        filename = %filename,
        channels = header.channel_count,
        source_rate = header.sampling_rate,
        target_rate,
        samples = normalized.len(),
        "uploaded audio converted"
    );

    // One blocking inference over the whole file.
    let engine = recognizer.get_ref().clone();
    let transcription = tokio::task::spawn_blocking(move || engine.transcribe(&normalized))
        .await
        .map_err(|e| AppError::Internal(format!("transcription task panicked: {}", e)))?
        .map_err(|e| AppError::Internal(format!("transcription failed: {}", e)))?;

    Ok(HttpResponse::Ok().json(json!({
        "filename": filename,
        "transcription": transcription,
    })))
}
