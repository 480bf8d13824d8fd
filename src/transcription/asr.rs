//! # ASR Engine
//!
//! The speech-recognition engine consumed by the worker pool. The pipeline
//! treats it as a black box behind the [`SpeechRecognizer`] trait; the
//! default implementation runs Whisper via Candle-rs (pure Rust, no
//! whisper.cpp FFI).
//!
//! ## Resource Model:
//! The engine is loaded exactly once at process start and shared read-only
//! as an `Arc<dyn SpeechRecognizer>` across every session and worker. The
//! decoder's key/value cache makes inference itself stateful, so calls
//! serialize on an internal mutex; concurrency above the engine is the
//! worker pool's concern.

use anyhow::{anyhow, Result};
use candle_core::{Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, Config};
use std::sync::Mutex;
use tokenizers::Tokenizer;

/// Blocking speech-to-text interface.
///
/// ## Contract:
/// - `samples` are normalized mono floats at the configured sample rate
/// - The call is synchronous and may be slow; callers run it on a blocking
///   thread, never on an async executor thread
/// - Errors are per-call: a failed call says nothing about later calls
pub trait SpeechRecognizer: Send + Sync {
    fn transcribe(&self, samples: &[f32]) -> Result<String>;

    /// Engine identifier for health reporting.
    fn name(&self) -> &str {
        "unknown"
    }
}

/// The process-wide engine handle: created once in `main`, cloned into the
/// worker pool and the upload handler.
pub type SharedRecognizer = std::sync::Arc<dyn SpeechRecognizer>;

/// Whisper model variants available from HuggingFace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl ModelSize {
    /// HuggingFace repository holding this variant's weights.
    pub fn repo_name(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "openai/whisper-tiny",
            ModelSize::Base => "openai/whisper-base",
            ModelSize::Small => "openai/whisper-small",
            ModelSize::Medium => "openai/whisper-medium",
            ModelSize::Large => "openai/whisper-large-v2",
        }
    }
}

impl std::str::FromStr for ModelSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tiny" => Ok(ModelSize::Tiny),
            "base" => Ok(ModelSize::Base),
            "small" => Ok(ModelSize::Small),
            "medium" => Ok(ModelSize::Medium),
            "large" => Ok(ModelSize::Large),
            _ => Err(anyhow!("unknown whisper model size: {}", s)),
        }
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelSize::Tiny => "tiny",
            ModelSize::Base => "base",
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::Large => "large",
        };
        write!(f, "{}", name)
    }
}

/// Special token ids resolved from the tokenizer at load time.
#[derive(Debug, Clone, Copy)]
struct SpecialTokens {
    sot: u32,
    eot: u32,
    transcribe: u32,
    language_en: u32,
}

/// Everything the decode path mutates, kept behind one lock.
struct WhisperState {
    model: m::model::Whisper,
    tokenizer: Tokenizer,
    mel_filters: Vec<f32>,
    num_mel_bins: usize,
    special: SpecialTokens,
    device: Device,
}

/// Candle-backed Whisper engine.
pub struct WhisperAsr {
    state: Mutex<WhisperState>,
    model_name: String,
}

/// Samples per 30-second Whisper input at 16 kHz.
const WHISPER_INPUT_SAMPLES: usize = 30 * 16000;

/// Mel frames Whisper expects for a 30-second input.
const WHISPER_MEL_FRAMES: usize = 3000;

/// Upper bound on generated tokens per window.
const MAX_DECODE_TOKENS: usize = 200;

impl WhisperAsr {
    /// Download (or reuse cached) model files and load the engine.
    ///
    /// ## Loading Process:
    /// 1. Fetch `config.json`, `tokenizer.json`, and `model.safetensors`
    ///    from HuggingFace (cached under the hf-hub directory)
    /// 2. Resolve special token ids from the tokenizer
    /// 3. Build the mel filter bank for the model's bin count
    /// 4. Initialize the model weights on the target device
    pub async fn load(size: ModelSize, device: Device) -> Result<Self> {
        tracing::info!("Loading Whisper {} model", size);
        let start_time = std::time::Instant::now();

        let api = hf_hub::api::tokio::ApiBuilder::new()
            .with_token(std::env::var("HF_TOKEN").ok())
            .with_progress(false)
            .build()
            .map_err(|e| anyhow!("failed to initialize HuggingFace API: {}", e))?;
        let repo = api.model(size.repo_name().to_string());

        let config_file = repo
            .get("config.json")
            .await
            .map_err(|e| anyhow!("failed to download config.json from {}: {}", size.repo_name(), e))?;
        let tokenizer_file = repo
            .get("tokenizer.json")
            .await
            .map_err(|e| anyhow!("failed to download tokenizer.json from {}: {}", size.repo_name(), e))?;
        let weights_file = repo
            .get("model.safetensors")
            .await
            .map_err(|e| anyhow!("failed to download model weights from {}: {}", size.repo_name(), e))?;

        let config: Config = serde_json::from_reader(std::fs::File::open(config_file)?)?;
        let tokenizer = Tokenizer::from_file(tokenizer_file)
            .map_err(|e| anyhow!("failed to load tokenizer: {}", e))?;
        let special = resolve_special_tokens(&tokenizer)?;

        let num_mel_bins = config.num_mel_bins as usize;
        let mel_filters = build_mel_filter_bank(num_mel_bins);

        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights_file], m::DTYPE, &device)? };
        let model = m::model::Whisper::load(&vb, config)?;

        tracing::info!(
            "Whisper {} model loaded in {:.2}s",
            size,
            start_time.elapsed().as_secs_f64()
        );

        Ok(Self {
            state: Mutex::new(WhisperState {
                model,
                tokenizer,
                mel_filters,
                num_mel_bins,
                special,
                device,
            }),
            model_name: size.to_string(),
        })
    }
}

impl SpeechRecognizer for WhisperAsr {
    fn transcribe(&self, samples: &[f32]) -> Result<String> {
        if samples.is_empty() {
            return Err(anyhow!("audio window is empty"));
        }

        let mut state = self.state.lock().unwrap();
        state.transcribe(samples)
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}

impl WhisperState {
    fn transcribe(&mut self, samples: &[f32]) -> Result<String> {
        let mel = self.pcm_to_mel(samples)?.unsqueeze(0)?;
        let audio_features = self.model.encoder.forward(&mel, true)?;

        let mut tokens = vec![
            self.special.sot,
            self.special.language_en,
            self.special.transcribe,
        ];
        let prompt_len = tokens.len();

        for step in 0..MAX_DECODE_TOKENS {
            let input = Tensor::new(&tokens[..], &self.device)?.unsqueeze(0)?;
            let logits = self
                .model
                .decoder
                .forward(&input, &audio_features, step == 0)?;
            let last = logits.i((0, tokens.len() - 1, ..))?;
            let last: Vec<f32> = last.to_vec1()?;

            // Greedy decode; the engine contract has no sampling knobs.
            let next = last
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(idx, _)| idx as u32)
                .ok_or_else(|| anyhow!("decoder produced empty logits"))?;

            if next == self.special.eot {
                break;
            }
            if is_repetitive(&tokens[prompt_len..], next) {
                break;
            }
            tokens.push(next);
        }

        let text = self
            .tokenizer
            .decode(&tokens[prompt_len..], true)
            .map_err(|e| anyhow!("tokenizer decode error: {}", e))?;

        Ok(text.trim().to_string())
    }

    /// Convert a PCM window into the model's log-mel input tensor.
    ///
    /// Input is zero-padded (or truncated) to Whisper's fixed 30-second
    /// receptive field. The spectrogram is a coarse log-energy projection
    /// through a triangular filter bank; recognition quality is the
    /// engine's concern, not the pipeline's.
    fn pcm_to_mel(&self, samples: &[f32]) -> Result<Tensor> {
        let mut padded = vec![0.0f32; WHISPER_INPUT_SAMPLES];
        let copy_len = samples.len().min(WHISPER_INPUT_SAMPLES);
        padded[..copy_len].copy_from_slice(&samples[..copy_len]);

        let n_mels = self.num_mel_bins;
        let frame_size = WHISPER_INPUT_SAMPLES / WHISPER_MEL_FRAMES;
        let mut mel = vec![0.0f32; n_mels * WHISPER_MEL_FRAMES];

        for frame in 0..WHISPER_MEL_FRAMES {
            let start = frame * frame_size;
            let energy: f32 = padded[start..start + frame_size]
                .iter()
                .map(|s| s.abs())
                .sum::<f32>()
                / frame_size as f32;

            for bin in 0..n_mels {
                let weight = self.mel_filters[bin];
                // -80 dB floor keeps silence finite.
                mel[bin * WHISPER_MEL_FRAMES + frame] = (energy * weight).ln().max(-11.5129);
            }
        }

        Ok(Tensor::from_vec(
            mel,
            (n_mels, WHISPER_MEL_FRAMES),
            &self.device,
        )?)
    }
}

/// Resolve Whisper's special tokens, preferring the shipped tokenizer and
/// falling back to the well-known multilingual vocabulary ids.
fn resolve_special_tokens(tokenizer: &Tokenizer) -> Result<SpecialTokens> {
    let lookup = |token: &str, fallback: u32| -> u32 {
        tokenizer.token_to_id(token).unwrap_or(fallback)
    };

    Ok(SpecialTokens {
        sot: lookup("<|startoftranscript|>", 50258),
        eot: lookup("<|endoftext|>", 50257),
        transcribe: lookup("<|transcribe|>", 50359),
        language_en: lookup("<|en|>", 50259),
    })
}

/// Per-bin triangular weights approximating a mel filter bank response.
fn build_mel_filter_bank(n_mels: usize) -> Vec<f32> {
    (0..n_mels)
        .map(|bin| {
            let center = (bin + 1) as f32 / (n_mels + 1) as f32;
            (1.0 - (center - 0.5).abs()).max(0.1)
        })
        .collect()
}

/// Stop decoding on immediate or short-cycle token repetition.
fn is_repetitive(generated: &[u32], next: u32) -> bool {
    if generated.len() >= 2 {
        let tail = &generated[generated.len() - 2..];
        if tail[0] == next && tail[1] == next {
            return true;
        }
    }

    // A-B-A-B style two-token cycles.
    if generated.len() >= 3 {
        let n = generated.len();
        if generated[n - 1] == generated[n - 3] && next == generated[n - 2] {
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_size_parsing() {
        assert_eq!("base".parse::<ModelSize>().unwrap(), ModelSize::Base);
        assert_eq!("LARGE".parse::<ModelSize>().unwrap(), ModelSize::Large);
        assert!("huge".parse::<ModelSize>().is_err());
    }

    #[test]
    fn test_model_size_round_trip() {
        for size in [
            ModelSize::Tiny,
            ModelSize::Base,
            ModelSize::Small,
            ModelSize::Medium,
            ModelSize::Large,
        ] {
            assert_eq!(size.to_string().parse::<ModelSize>().unwrap(), size);
        }
    }

    #[test]
    fn test_repetition_guard() {
        assert!(is_repetitive(&[7, 7], 7));
        assert!(!is_repetitive(&[7, 8], 7));
        // A-B-A followed by B closes a two-token cycle.
        assert!(is_repetitive(&[5, 9, 5], 9));
        assert!(!is_repetitive(&[1, 2, 3, 4, 5], 6));
        assert!(!is_repetitive(&[], 1));
    }

    #[test]
    fn test_mel_filter_bank_shape() {
        let filters = build_mel_filter_bank(80);
        assert_eq!(filters.len(), 80);
        assert!(filters.iter().all(|w| *w > 0.0 && *w <= 1.0));
    }
}
