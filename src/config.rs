//! # Configuration Management
//!
//! Loads application configuration from multiple sources, in priority order:
//! 1. Environment variables (`APP_` prefix, plus bare `HOST`/`PORT` used by
//!    deployment platforms)
//! 2. A `config.toml` file next to the binary (optional)
//! 3. Built-in defaults
//!
//! Configuration is validated once at startup and again after every partial
//! runtime update, so an invalid combination never becomes live.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub models: ModelsConfig,
    pub llm: LlmConfig,
    pub performance: PerformanceConfig,
}

/// HTTP server bind settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Streaming audio format and windowing.
///
/// The wire format is fixed 16-bit signed little-endian mono PCM; only the
/// rate and the window length are configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Samples per second expected from clients (Whisper wants 16000).
    pub sample_rate: u32,

    /// Window length in milliseconds; each full window becomes one
    /// transcription unit. Default is one second.
    pub window_ms: u32,
}

impl AudioConfig {
    /// Window length in samples — the dispatch threshold.
    pub fn window_size(&self) -> usize {
        (self.sample_rate as usize * self.window_ms as usize) / 1000
    }
}

/// Model selection for the two external engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Whisper variant loaded at startup ("tiny" .. "large").
    pub whisper_model: String,

    /// Model id sent to the chat-completion collaborator.
    pub llm_model: String,
}

/// Chat-completion collaborator endpoint (Ollama-style `/api/chat`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_url: String,
    pub request_timeout_secs: u64,
}

/// Bounds on concurrent work.
///
/// These are the knobs that keep a slow engine from growing memory without
/// limit: sessions are refused above `max_concurrent_sessions`, windows
/// queue in a channel of `admission_queue_depth`, at most
/// `transcription_workers` inferences run at once, and each connection
/// buffers at most `frame_channel_depth` raw frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
    pub transcription_workers: usize,
    pub admission_queue_depth: usize,
    pub frame_channel_depth: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
            },
            audio: AudioConfig {
                sample_rate: 16000,
                window_ms: 1000,
            },
            models: ModelsConfig {
                whisper_model: "base".to_string(),
                llm_model: "llama3.2".to_string(),
            },
            llm: LlmConfig {
                api_url: "http://127.0.0.1:11434/api/chat".to_string(),
                request_timeout_secs: 120,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 10,
                transcription_workers: 2,
                admission_queue_depth: 32,
                frame_channel_depth: 64,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml`, and environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER_HOST=0.0.0.0`
    /// - `APP_MODELS_WHISPER_MODEL=small`
    /// - `HOST` / `PORT`: platform-style overrides without the prefix
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject configurations that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.audio.sample_rate == 0 {
            return Err(anyhow::anyhow!("Sample rate must be greater than 0"));
        }

        if self.audio.window_ms == 0 || self.audio.window_size() == 0 {
            return Err(anyhow::anyhow!(
                "Window duration must cover at least one sample"
            ));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!(
                "Max concurrent sessions must be greater than 0"
            ));
        }

        if self.performance.transcription_workers == 0 {
            return Err(anyhow::anyhow!(
                "Transcription workers must be greater than 0"
            ));
        }

        if self.performance.admission_queue_depth == 0 || self.performance.frame_channel_depth == 0
        {
            return Err(anyhow::anyhow!("Queue depths must be greater than 0"));
        }

        Ok(())
    }

    /// Apply a partial update from a JSON document.
    ///
    /// Only the fields present in the JSON change; everything else keeps
    /// its current value. The merged result is validated before returning.
    /// Window/worker changes apply to sessions opened after the update.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = port as u16;
            }
        }

        if let Some(audio) = partial.get("audio") {
            if let Some(rate) = audio.get("sample_rate").and_then(|v| v.as_u64()) {
                self.audio.sample_rate = rate as u32;
            }
            if let Some(window) = audio.get("window_ms").and_then(|v| v.as_u64()) {
                self.audio.window_ms = window as u32;
            }
        }

        if let Some(models) = partial.get("models") {
            if let Some(whisper) = models.get("whisper_model").and_then(|v| v.as_str()) {
                self.models.whisper_model = whisper.to_string();
            }
            if let Some(llm) = models.get("llm_model").and_then(|v| v.as_str()) {
                self.models.llm_model = llm.to_string();
            }
        }

        if let Some(llm) = partial.get("llm") {
            if let Some(url) = llm.get("api_url").and_then(|v| v.as_str()) {
                self.llm.api_url = url.to_string();
            }
            if let Some(timeout) = llm.get("request_timeout_secs").and_then(|v| v.as_u64()) {
                self.llm.request_timeout_secs = timeout;
            }
        }

        if let Some(performance) = partial.get("performance") {
            if let Some(sessions) = performance
                .get("max_concurrent_sessions")
                .and_then(|v| v.as_u64())
            {
                self.performance.max_concurrent_sessions = sessions as usize;
            }
            if let Some(workers) = performance
                .get("transcription_workers")
                .and_then(|v| v.as_u64())
            {
                self.performance.transcription_workers = workers as usize;
            }
            if let Some(depth) = performance
                .get("admission_queue_depth")
                .and_then(|v| v.as_u64())
            {
                self.performance.admission_queue_depth = depth as usize;
            }
            if let Some(depth) = performance
                .get("frame_channel_depth")
                .and_then(|v| v.as_u64())
            {
                self.performance.frame_channel_depth = depth as usize;
            }
        }

        self.validate()?;
        Ok(())
    }
}
