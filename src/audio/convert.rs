//! # Whole-File Audio Conversion
//!
//! Conversion helpers for the one-shot upload endpoint: interleaved
//! multi-channel audio is mixed down to mono, resampled to the engine's
//! rate, and peak-normalized before a single transcription pass. The
//! streaming pipeline never goes through this path — its wire format is
//! already mono at the target rate.

/// Mix interleaved channels down to mono by averaging each frame.
///
/// `[L0, R0, L1, R1, ...]` becomes `[(L0+R0)/2, (L1+R1)/2, ...]`. Mono
/// input is returned as-is. Trailing samples of an incomplete final frame
/// are ignored.
pub fn mix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }

    let frames = samples.len() / channels;
    let mut mono = Vec::with_capacity(frames);

    for frame in 0..frames {
        let start = frame * channels;
        let sum: f32 = samples[start..start + channels].iter().sum();
        mono.push(sum / channels as f32);
    }

    mono
}

/// Resample mono audio by linear interpolation.
///
/// Output length is `round(len * to_rate / from_rate)`. Quality is adequate
/// for speech fed to the ASR engine; an equal-rate input is passed through
/// untouched.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).round() as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let pos = i as f64 * ratio;
        let idx = pos as usize;
        let frac = (pos - idx as f64) as f32;

        let a = samples[idx.min(samples.len() - 1)];
        let b = samples[(idx + 1).min(samples.len() - 1)];
        out.push(a + (b - a) * frac);
    }

    out
}

/// Scale samples so the peak magnitude is 1.0.
///
/// Silent input is returned unchanged; there is nothing to scale against.
pub fn peak_normalize(samples: &[f32]) -> Vec<f32> {
    let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    if peak == 0.0 {
        return samples.to_vec();
    }

    samples.iter().map(|s| s / peak).collect()
}
